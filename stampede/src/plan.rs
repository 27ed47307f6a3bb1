use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use stampede_core::PercentileMode;
use stampede_core::runner::{Options, ScenarioOptions, Stage, ThresholdSet};

/// A YAML test plan: target, scenario map, thresholds, and the request
/// sequence each iteration performs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPlan {
    pub base_url: String,

    #[serde(default)]
    pub scenarios: BTreeMap<String, ScenarioYaml>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdExprYaml>,

    #[serde(default)]
    pub requests: Vec<RequestYaml>,

    /// Pause between iterations.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sleep: Option<YamlDuration>,

    /// Bound for the built-in response-time check, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response_time_check_ms: Option<u64>,

    /// Percentile storage strategy: exact | approximate.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub percentiles: Option<PercentilesYaml>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PercentilesYaml {
    Exact,
    Approximate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioYaml {
    /// Executor kind: constant-vus | ramping-vus | constant-arrival-rate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor: Option<String>,

    /// Scenario-level metric tags.
    #[serde(
        skip_serializing_if = "BTreeMap::is_empty",
        default,
        deserialize_with = "deserialize_tags"
    )]
    pub tags: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vus: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration: Option<YamlDuration>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub start_time: Option<YamlDuration>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub graceful_stop: Option<YamlDuration>,

    // ramping-vus
    #[serde(rename = "startVUs")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_vus: Option<u64>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub stages: Vec<StageYaml>,

    // constant-arrival-rate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub time_unit: Option<YamlDuration>,

    #[serde(rename = "preAllocatedVUs")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_allocated_vus: Option<u64>,

    #[serde(rename = "maxVUs")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_vus: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageYaml {
    pub target: u64,

    #[serde(default)]
    pub duration: YamlDuration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestYaml {
    pub path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Metric label; defaults to the path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Status the built-in check asserts; defaults to 200.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expect_status: Option<u16>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub headers: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// A threshold value: one expression, or a list of expressions, where each
/// expression is a plain string or `{ threshold, abortOnFail }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdExprYaml {
    One(ThresholdEntryYaml),
    Many(Vec<ThresholdEntryYaml>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdEntryYaml {
    Expr(String),
    Detailed {
        threshold: String,
        #[serde(rename = "abortOnFail", default)]
        abort_on_fail: bool,
    },
}

impl ThresholdEntryYaml {
    fn as_pair(&self) -> (&str, bool) {
        match self {
            Self::Expr(expr) => (expr.as_str(), false),
            Self::Detailed {
                threshold,
                abort_on_fail,
            } => (threshold.as_str(), *abort_on_fail),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct YamlDuration(Duration);

impl YamlDuration {
    #[must_use]
    pub fn into_inner(self) -> Duration {
        self.0
    }
}

impl From<Duration> for YamlDuration {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl Serialize for YamlDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(self.0).to_string())
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v <= 0 {
                    return Err(E::custom("duration must be positive"));
                }
                Ok(YamlDuration(Duration::from_secs(v as u64)))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v <= 0.0 {
                    return Err(E::custom("duration must be a positive, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_str(&v)
            }
        }

        deserializer.deserialize_any(V)
    }
}

fn deserialize_tags<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_yaml::Value>::deserialize(deserializer)?;
    let mut out = BTreeMap::new();

    for (k, v) in raw {
        let s = match v {
            serde_yaml::Value::Null => continue,
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s,
            _ => continue,
        };
        out.insert(k, s);
    }

    Ok(out)
}

pub async fn load_plan(path: &Path) -> anyhow::Result<TestPlan> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read test plan: {}", path.display()))?;

    serde_yaml::from_slice(&bytes)
        .with_context(|| format!("failed to parse test plan YAML: {}", path.display()))
}

impl TestPlan {
    /// Convert into engine options. Threshold expressions parse here;
    /// executor-shape validation happens in `scenarios_from_options`.
    pub fn to_options(&self) -> anyhow::Result<Options> {
        let scenarios = self
            .scenarios
            .iter()
            .map(|(name, s)| scenario_options(name, s))
            .collect();

        let mut thresholds = Vec::with_capacity(self.thresholds.len());
        for (metric, exprs) in &self.thresholds {
            let entries: Vec<&ThresholdEntryYaml> = match exprs {
                ThresholdExprYaml::One(one) => vec![one],
                ThresholdExprYaml::Many(many) => many.iter().collect(),
            };
            let pairs: Vec<(&str, bool)> = entries.iter().map(|e| e.as_pair()).collect();
            thresholds.push(ThresholdSet::parse(metric.clone(), &pairs)?);
        }

        let percentile_mode = match self.percentiles {
            Some(PercentilesYaml::Exact) => PercentileMode::Exact,
            Some(PercentilesYaml::Approximate) | None => PercentileMode::Approximate,
        };

        Ok(Options {
            vus: None,
            iterations: None,
            duration: None,
            scenarios,
            thresholds,
            percentile_mode,
        })
    }
}

fn scenario_options(name: &str, s: &ScenarioYaml) -> ScenarioOptions {
    ScenarioOptions {
        name: name.to_string(),
        executor: s.executor.clone(),
        tags: s
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        vus: s.vus,
        iterations: s.iterations,
        duration: s.duration.map(YamlDuration::into_inner),
        start_time: s.start_time.map(YamlDuration::into_inner),
        graceful_stop: s.graceful_stop.map(YamlDuration::into_inner),
        start_vus: s.start_vus,
        stages: s
            .stages
            .iter()
            .map(|st| Stage {
                duration: st.duration.into_inner(),
                target: st.target,
            })
            .collect(),
        rate: s.rate,
        time_unit: s.time_unit.map(YamlDuration::into_inner),
        pre_allocated_vus: s.pre_allocated_vus,
        max_vus: s.max_vus,
    }
}
