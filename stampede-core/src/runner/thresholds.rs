use stampede_metrics::{Collector, MetricValue};

use super::error::{Error, Result};

/// All threshold expressions attached to one metric.
#[derive(Debug, Clone)]
pub struct ThresholdSet {
    pub metric: String,
    pub exprs: Vec<ThresholdExprSpec>,
}

/// One expression, parsed once at configuration time.
#[derive(Debug, Clone)]
pub struct ThresholdExprSpec {
    pub raw: String,
    pub expr: ThresholdExpr,
    pub abort_on_fail: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdStat {
    Avg,
    Min,
    Max,
    Count,
    Rate,
    P(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct ThresholdExpr {
    pub stat: ThresholdStat,
    pub op: ThresholdOp,
    pub value: f64,
}

/// Result of evaluating one expression.
#[derive(Debug, Clone)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    pub passed: bool,
    pub observed: Option<f64>,
    pub abort_on_fail: bool,
    /// Set when the expression could not be evaluated against recorded data;
    /// such an outcome is always `passed == false`.
    pub error: Option<String>,
}

impl ThresholdSet {
    /// Parse `(expression, abort_on_fail)` pairs for `metric`.
    pub fn parse(metric: impl Into<String>, exprs: &[(&str, bool)]) -> Result<Self> {
        let metric = metric.into();
        let mut out = Vec::with_capacity(exprs.len());

        for (raw, abort_on_fail) in exprs {
            let expr = parse_threshold_expr(raw).map_err(|message| Error::Threshold {
                metric: metric.clone(),
                message,
            })?;
            out.push(ThresholdExprSpec {
                raw: (*raw).to_string(),
                expr,
                abort_on_fail: *abort_on_fail,
            });
        }

        Ok(Self { metric, exprs: out })
    }
}

pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold expression".to_string());
    }

    // Two-character operators first so `<` does not shadow `<=`.
    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("missing comparison operator: {raw}"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("invalid threshold expression: {raw}"));
    }

    let stat = if left.eq_ignore_ascii_case("avg") {
        ThresholdStat::Avg
    } else if left.eq_ignore_ascii_case("min") {
        ThresholdStat::Min
    } else if left.eq_ignore_ascii_case("max") {
        ThresholdStat::Max
    } else if left.eq_ignore_ascii_case("count") {
        ThresholdStat::Count
    } else if left.eq_ignore_ascii_case("rate") {
        ThresholdStat::Rate
    } else if let Some(inner) = left.strip_prefix("p(").and_then(|v| v.strip_suffix(')')) {
        let p: u32 = inner
            .parse()
            .map_err(|_| format!("invalid percentile: {raw}"))?;
        if !(1..=100).contains(&p) {
            return Err(format!("percentile out of range (1..=100): {raw}"));
        }
        ThresholdStat::P(p)
    } else {
        return Err(format!("unknown statistic `{left}`: {raw}"));
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value: {raw}"))?;

    Ok(ThresholdExpr { stat, op, value })
}

/// Reject thresholds that reference metrics the collector does not know
/// about. Runs at startup, before any VU is spawned.
pub fn validate_thresholds(sets: &[ThresholdSet], collector: &Collector) -> Result<()> {
    for set in sets {
        if !collector.contains(&set.metric) {
            return Err(Error::UnknownThresholdMetric(set.metric.clone()));
        }
    }
    Ok(())
}

fn compare(left: f64, op: ThresholdOp, right: f64) -> bool {
    match op {
        ThresholdOp::Lt => left < right,
        ThresholdOp::Lte => left <= right,
        ThresholdOp::Gt => left > right,
        ThresholdOp::Gte => left >= right,
        ThresholdOp::Eq => left == right,
    }
}

fn observed_value(collector: &Collector, metric: &str, stat: ThresholdStat) -> Option<f64> {
    let values = collector.snapshot(metric)?;

    match (values, stat) {
        (MetricValue::Trend(v), ThresholdStat::Avg) => v.avg,
        (MetricValue::Trend(v), ThresholdStat::Min) => v.min,
        (MetricValue::Trend(v), ThresholdStat::Max) => v.max,
        (MetricValue::Trend(v), ThresholdStat::Count) => Some(v.count as f64),
        (MetricValue::Trend(_), ThresholdStat::P(p)) => {
            collector.quantile(metric, f64::from(p) / 100.0)
        }

        (MetricValue::Counter { value }, ThresholdStat::Count) => Some(value),

        (MetricValue::Gauge { value }, ThresholdStat::Avg) => Some(value),
        (MetricValue::Gauge { value }, ThresholdStat::Min) => Some(value),
        (MetricValue::Gauge { value }, ThresholdStat::Max) => Some(value),

        (MetricValue::Rate { rate, .. }, ThresholdStat::Rate) => rate,
        (MetricValue::Rate { total, .. }, ThresholdStat::Count) => Some(total as f64),

        // Statistic does not apply to this metric kind.
        (_, _) => None,
    }
}

/// Evaluate every expression against current aggregates. An expression with
/// no observable value fails with a configuration-error annotation rather
/// than being skipped.
pub fn evaluate_thresholds(sets: &[ThresholdSet], collector: &Collector) -> Vec<ThresholdOutcome> {
    let mut out = Vec::new();

    for set in sets {
        for spec in &set.exprs {
            let observed = observed_value(collector, &set.metric, spec.expr.stat);
            let (passed, error) = match observed {
                Some(v) => (compare(v, spec.expr.op, spec.expr.value), None),
                None => (
                    false,
                    Some(format!(
                        "no data recorded for metric `{}` statistic",
                        set.metric
                    )),
                ),
            };

            out.push(ThresholdOutcome {
                metric: set.metric.clone(),
                expression: spec.raw.clone(),
                passed,
                observed,
                abort_on_fail: spec.abort_on_fail,
                error,
            });
        }
    }

    out
}

/// Mid-run check of `abortOnFail` expressions. Expressions with no data yet
/// are skipped here; the final evaluation applies the strict semantics.
pub fn abort_breached(sets: &[ThresholdSet], collector: &Collector) -> Option<ThresholdOutcome> {
    for set in sets {
        for spec in &set.exprs {
            if !spec.abort_on_fail {
                continue;
            }

            let Some(observed) = observed_value(collector, &set.metric, spec.expr.stat) else {
                continue;
            };

            if !compare(observed, spec.expr.op, spec.expr.value) {
                return Some(ThresholdOutcome {
                    metric: set.metric.clone(),
                    expression: spec.raw.clone(),
                    passed: false,
                    observed: Some(observed),
                    abort_on_fail: true,
                    error: None,
                });
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use stampede_metrics::{MetricKind, PercentileMode};
    use std::sync::Arc;

    #[test]
    fn parse_accepts_whitespace_and_all_statistics() {
        let expr = parse_threshold_expr("  p(95)  <  500  ").unwrap();
        assert_eq!(expr.stat, ThresholdStat::P(95));
        assert_eq!(expr.op, ThresholdOp::Lt);
        assert_eq!(expr.value, 500.0);

        assert_eq!(
            parse_threshold_expr("rate<0.01").unwrap().stat,
            ThresholdStat::Rate
        );
        assert_eq!(
            parse_threshold_expr("avg>=1.5").unwrap().op,
            ThresholdOp::Gte
        );
        assert_eq!(
            parse_threshold_expr("count==10").unwrap().op,
            ThresholdOp::Eq
        );
    }

    #[test]
    fn parse_rejects_malformed_expressions() {
        assert!(parse_threshold_expr("").is_err());
        assert!(parse_threshold_expr("p95<500").is_err());
        assert!(parse_threshold_expr("p(0)<500").is_err());
        assert!(parse_threshold_expr("p(101)<500").is_err());
        assert!(parse_threshold_expr("avg").is_err());
        assert!(parse_threshold_expr("avg<abc").is_err());
        assert!(parse_threshold_expr("median<5").is_err());
    }

    #[test]
    fn validate_rejects_unknown_metric() {
        let collector = Collector::default();
        let sets = vec![ThresholdSet::parse("nonexistent", &[("rate<0.01", false)]).unwrap()];

        let err = validate_thresholds(&sets, &collector).unwrap_err();
        assert!(matches!(err, Error::UnknownThresholdMetric(_)));
    }

    #[test]
    fn p95_threshold_over_documented_sample_set_fails() {
        // Nearest-rank p95 of ten samples is the 10th ordered value; one
        // 600 ms outlier therefore fails `p(95)<500`.
        let collector = Arc::new(Collector::new(PercentileMode::Exact));
        let h = collector.handle(MetricKind::Trend, "http_req_duration");
        for v in [100.0, 100.0, 100.0, 100.0, 600.0, 100.0, 100.0, 100.0, 100.0, 100.0] {
            h.add(v);
        }

        let sets =
            vec![ThresholdSet::parse("http_req_duration", &[("p(95)<500", false)]).unwrap()];
        let outcomes = evaluate_thresholds(&sets, &collector);

        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].passed);
        assert_eq!(outcomes[0].observed, Some(600.0));
    }

    #[test]
    fn rate_threshold_passes_under_the_bound() {
        let collector = Arc::new(Collector::default());
        let h = collector.handle(MetricKind::Rate, "http_req_failed");
        for i in 0..1000 {
            h.add_bool(i == 0);
        }

        let sets =
            vec![ThresholdSet::parse("http_req_failed", &[("rate<0.01", false)]).unwrap()];
        let outcomes = evaluate_thresholds(&sets, &collector);
        assert!(outcomes[0].passed);
        assert_eq!(outcomes[0].observed, Some(0.001));
    }

    #[test]
    fn missing_data_is_an_annotated_failure() {
        let collector = Arc::new(Collector::default());
        // Registered but never recorded: a rate with no samples has no value.
        let _ = collector.handle(MetricKind::Rate, "errors");

        let sets = vec![ThresholdSet::parse("errors", &[("rate<0.01", false)]).unwrap()];
        let outcomes = evaluate_thresholds(&sets, &collector);

        assert!(!outcomes[0].passed);
        assert!(outcomes[0].observed.is_none());
        assert!(outcomes[0].error.is_some());
    }

    #[test]
    fn abort_check_skips_expressions_without_data() {
        let collector = Arc::new(Collector::default());
        let _ = collector.handle(MetricKind::Rate, "errors");

        let sets = vec![ThresholdSet::parse("errors", &[("rate<0.5", true)]).unwrap()];
        assert!(abort_breached(&sets, &collector).is_none());

        let h = collector.handle(MetricKind::Rate, "errors");
        h.add_bool(true);
        let breach = abort_breached(&sets, &collector).unwrap();
        assert_eq!(breach.metric, "errors");
        assert!(breach.abort_on_fail);
    }
}
