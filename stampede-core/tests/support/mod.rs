#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const PATH_HEALTH: &str = "/health";
pub const PATH_PERSONS: &str = "/persons";
pub const PATH_ERROR: &str = "/error";
pub const PATH_SLOW: &str = "/slow";

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }
}

pub struct TestServer {
    addr: SocketAddr,
    stats: TestServerStats,
    shutdown: Option<oneshot::Sender<()>>,
    accept_task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let stats = TestServerStats::default();

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let accept_stats = stats.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let stats = accept_stats.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service =
                                service_fn(move |req| handle(stats.clone(), req));
                            let _ = http1::Builder::new().serve_connection(io, service).await;
                        });
                    }
                }
            }
        });

        Ok(Self {
            addr,
            stats,
            shutdown: Some(shutdown_tx),
            accept_task,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.accept_task.await;
    }
}

async fn handle(
    stats: TestServerStats,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    stats.inc_requests_total();

    let response = match req.uri().path() {
        PATH_HEALTH => text(StatusCode::OK, "ok"),
        PATH_PERSONS => text(StatusCode::OK, r#"[{"name":"ada"},{"name":"grace"}]"#),
        PATH_ERROR => text(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
        PATH_SLOW => {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            text(StatusCode::OK, "slow ok")
        }
        _ => text(StatusCode::NOT_FOUND, "not found"),
    };

    Ok(response)
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut res = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *res.status_mut() = status;
    res
}
