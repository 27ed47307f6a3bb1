use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use bytes::Bytes;

use stampede_core::HttpRequest;
use stampede_core::runner::{Checks, HttpResult, IterationContext};

use crate::plan::{TestPlan, YamlDuration};

const DEFAULT_RESPONSE_TIME_CHECK: Duration = Duration::from_millis(500);

pub type IterationFuture = Pin<Box<dyn Future<Output = Result<(), Infallible>> + Send>>;

#[derive(Debug, Clone)]
struct RequestSpec {
    method: http::Method,
    url: String,
    name: String,
    expect_status: u16,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
}

/// The built-in iteration: the plan's requests in order, each response run
/// through the standard checks, then an optional pause.
#[derive(Debug)]
pub struct IterationPlan {
    requests: Vec<RequestSpec>,
    sleep: Option<Duration>,
    response_time_limit: Duration,
}

impl IterationPlan {
    pub fn from_plan(plan: &TestPlan, base_url: &str) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !plan.requests.is_empty(),
            "test plan defines no requests to execute"
        );

        let base = base_url.trim_end_matches('/');
        let mut requests = Vec::with_capacity(plan.requests.len());

        for r in &plan.requests {
            let method: http::Method = r
                .method
                .as_deref()
                .unwrap_or("GET")
                .to_ascii_uppercase()
                .parse()
                .with_context(|| format!("invalid method for request {}", r.path))?;

            anyhow::ensure!(
                r.path.starts_with('/'),
                "request path must start with '/': {}",
                r.path
            );

            requests.push(RequestSpec {
                method,
                url: format!("{base}{}", r.path),
                name: r.name.clone().unwrap_or_else(|| r.path.clone()),
                expect_status: r.expect_status.unwrap_or(200),
                headers: r
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                body: r.body.as_ref().map(|b| Bytes::from(b.clone())),
            });
        }

        Ok(Self {
            requests,
            sleep: plan.sleep.map(YamlDuration::into_inner),
            response_time_limit: plan
                .response_time_check_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RESPONSE_TIME_CHECK),
        })
    }

    /// The closure handed to the engine; one call per iteration.
    pub fn into_fn(self: Arc<Self>) -> impl Fn(IterationContext) -> IterationFuture + Clone {
        move |ctx: IterationContext| -> IterationFuture {
            let plan = self.clone();
            Box::pin(async move {
                for spec in &plan.requests {
                    let mut req =
                        HttpRequest::new(spec.method.clone(), spec.url.clone())
                            .with_name(spec.name.clone());
                    for (k, v) in &spec.headers {
                        req = req.with_header(k.clone(), v.clone());
                    }
                    if let Some(body) = &spec.body {
                        req.body = body.clone();
                    }

                    let res = ctx.http(req).await;
                    let expect = spec.expect_status;
                    let limit = plan.response_time_limit;
                    let checks = Checks::new()
                        .add("status is correct", move |r: &HttpResult| {
                            r.status == Some(expect)
                        })
                        .add("response body is not empty", |r: &HttpResult| {
                            !r.body.is_empty()
                        })
                        .add("response time is within bound", move |r: &HttpResult| {
                            r.duration < limit
                        });

                    let _ = ctx.check(&res, &checks);
                }

                if let Some(pause) = plan.sleep {
                    ctx.sleep(pause).await;
                }

                Ok(())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn plan_from(yaml: &str) -> TestPlan {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn builds_request_specs_with_defaults() {
        let plan = plan_from(
            r#"
baseUrl: http://localhost:8080/
requests:
  - { path: /health }
  - { path: "/api/persons?n=-5", expectStatus: 400, method: get }
sleep: 250ms
"#,
        );

        let iter = IterationPlan::from_plan(&plan, &plan.base_url).unwrap();
        assert_eq!(iter.requests.len(), 2);
        assert_eq!(iter.requests[0].url, "http://localhost:8080/health");
        assert_eq!(iter.requests[0].expect_status, 200);
        assert_eq!(iter.requests[0].name, "/health");
        assert_eq!(iter.requests[1].expect_status, 400);
        assert_eq!(iter.requests[1].method, http::Method::GET);
        assert_eq!(iter.sleep, Some(Duration::from_millis(250)));
        assert_eq!(iter.response_time_limit, DEFAULT_RESPONSE_TIME_CHECK);
    }

    #[test]
    fn empty_request_list_is_rejected() {
        let plan = plan_from("baseUrl: http://localhost:8080\n");
        assert!(IterationPlan::from_plan(&plan, &plan.base_url).is_err());
    }

    #[test]
    fn bad_method_and_relative_path_are_rejected() {
        let plan = plan_from(
            r#"
baseUrl: http://localhost:8080
requests:
  - { path: /ok, method: "not a method" }
"#,
        );
        assert!(IterationPlan::from_plan(&plan, &plan.base_url).is_err());

        let plan = plan_from(
            r#"
baseUrl: http://localhost:8080
requests:
  - { path: "health" }
"#,
        );
        assert!(IterationPlan::from_plan(&plan, &plan.base_url).is_err());
    }
}
