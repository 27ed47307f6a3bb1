use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse transport-error class, used as a metric/check label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum HttpTransportErrorKind {
    InvalidUrl,
    UnsupportedScheme,
    RequestBuild,
    HeaderName,
    HeaderValue,
    Request,
    Timeout,
    BodyRead,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("only http:// URLs are supported: {0}")]
    UnsupportedScheme(String),

    #[error("http request build failed: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("invalid http header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("invalid http header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("http request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("http request timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to read response body: {0}")]
    BodyRead(#[from] hyper::Error),
}

impl Error {
    #[must_use]
    pub fn transport_error_kind(&self) -> HttpTransportErrorKind {
        match self {
            Self::InvalidUrl(_) => HttpTransportErrorKind::InvalidUrl,
            Self::UnsupportedScheme(_) => HttpTransportErrorKind::UnsupportedScheme,
            Self::RequestBuild(_) => HttpTransportErrorKind::RequestBuild,
            Self::HeaderName(_) => HttpTransportErrorKind::HeaderName,
            Self::HeaderValue(_) => HttpTransportErrorKind::HeaderValue,
            Self::Request(_) => HttpTransportErrorKind::Request,
            Self::Timeout(_) => HttpTransportErrorKind::Timeout,
            Self::BodyRead(_) => HttpTransportErrorKind::BodyRead,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: http::Method,
    pub url: String,
    /// Metric label for this request; defaults to the URL when unset.
    pub name: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    #[must_use]
    pub fn new(method: http::Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            name: None,
            headers: Vec::new(),
            body: Bytes::new(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(http::Method::GET, url)
    }

    #[must_use]
    pub fn post(url: impl Into<String>, body: Bytes) -> Self {
        let mut req = Self::new(http::Method::POST, url);
        req.body = body;
        req
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn metric_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
    /// Estimated wire bytes for the request (HTTP/1.1 framing + body).
    pub bytes_sent: u64,
    /// Estimated wire bytes for the response (HTTP/1.1 framing + body).
    pub bytes_received: u64,
}

impl HttpResponse {
    #[must_use]
    pub fn body_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpConnector, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        // The OS-level TCP connect timeout can run to tens of seconds; a
        // short default makes unreachable targets surface promptly.
        Self::new(Some(Duration::from_secs(3)))
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut connector = HttpConnector::new();
        connector.enforce_http(false);
        connector.set_connect_timeout(connect_timeout);

        let inner = Client::builder(TokioExecutor::new()).build(connector);
        Self { inner }
    }

    pub async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        let timeout = req.timeout;
        let parsed = url::Url::parse(&req.url).map_err(|_| Error::InvalidUrl(req.url.clone()))?;
        if parsed.scheme() != "http" {
            return Err(Error::UnsupportedScheme(req.url));
        }

        let bytes_sent = estimate_request_bytes(&req.method, &parsed, &req.headers, &req.body)?;

        let uri: hyper::Uri = req
            .url
            .parse()
            .map_err(|_| Error::InvalidUrl(req.url.clone()))?;

        let mut builder = Request::builder().method(req.method).uri(uri);

        // Make implicit headers explicit so byte accounting is deterministic.
        if !has_header(&req.headers, "host")
            && let Some(host) = host_header_value(&parsed)
        {
            builder = builder.header(http::header::HOST, host);
        }
        if !req.body.is_empty() && !has_header(&req.headers, "content-length") {
            builder = builder.header(http::header::CONTENT_LENGTH, req.body.len());
        }

        for (k, v) in req.headers {
            let name = http::header::HeaderName::from_bytes(k.as_bytes())?;
            let value = http::header::HeaderValue::from_str(&v)?;
            builder = builder.header(name, value);
        }

        let req: Request<Full<Bytes>> = builder.body(Full::new(req.body))?;

        let res: hyper::Response<Incoming> = if let Some(timeout) = timeout {
            match tokio::time::timeout(timeout, self.inner.request(req)).await {
                Ok(res) => res?,
                Err(_) => return Err(Error::Timeout(timeout)),
            }
        } else {
            self.inner.request(req).await?
        };

        let (parts, body) = res.into_parts();
        let status = parts.status.as_u16();
        let head_bytes = estimate_response_head_bytes(parts.status, &parts.headers);
        let body = body.collect().await?.to_bytes();
        let bytes_received = head_bytes.saturating_add(body.len() as u64);

        Ok(HttpResponse {
            status,
            body,
            bytes_sent,
            bytes_received,
        })
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.request(HttpRequest::get(url)).await
    }
}

// Best-effort HTTP/1.1 framing estimates: request/status line + headers +
// CRLF + body. Implicit Host/Content-Length are included for determinism.

fn estimate_request_bytes(
    method: &http::Method,
    parsed: &url::Url,
    headers: &[(String, String)],
    body: &Bytes,
) -> Result<u64> {
    let path_len = {
        let path = parsed.path();
        let query_len = parsed.query().map_or(0, |q| q.len() + 1);
        path.len() + query_len
    };

    // "METHOD SP path SP HTTP/1.1 CRLF"
    let mut bytes = (method.as_str().len() + 1 + path_len + 1 + "HTTP/1.1".len() + 2) as u64;

    for (k, v) in headers {
        bytes = bytes.saturating_add(header_line_bytes(k.len(), v.len()));
    }
    if !has_header(headers, "host")
        && let Some(host) = host_header_value(parsed)
    {
        bytes = bytes.saturating_add(header_line_bytes("host".len(), host.len()));
    }
    if !body.is_empty() && !has_header(headers, "content-length") {
        let v = body.len().to_string();
        bytes = bytes.saturating_add(header_line_bytes("content-length".len(), v.len()));
    }

    // End of headers, then the body itself.
    Ok(bytes.saturating_add(2).saturating_add(body.len() as u64))
}

fn estimate_response_head_bytes(status: http::StatusCode, headers: &http::HeaderMap) -> u64 {
    // "HTTP/1.1 SP 200 CRLF" (reason phrase ignored)
    let mut bytes = ("HTTP/1.1".len() + 1 + status.as_str().len() + 2) as u64;
    for (name, value) in headers.iter() {
        bytes = bytes.saturating_add(header_line_bytes(name.as_str().len(), value.len()));
    }
    bytes.saturating_add(2)
}

fn header_line_bytes(name_len: usize, value_len: usize) -> u64 {
    // "name: value\r\n"
    (name_len + 2 + value_len + 2) as u64
}

fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

fn host_header_value(parsed: &url::Url) -> Option<String> {
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) if port != 80 => Some(format!("{host}:{port}")),
        _ => Some(host.to_string()),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn request_builders_fill_defaults() {
        let req = HttpRequest::get("http://localhost:8080/health")
            .with_name("/health")
            .with_header("accept", "application/json")
            .with_timeout(Duration::from_secs(5));

        assert_eq!(req.method, http::Method::GET);
        assert_eq!(req.metric_name(), "/health");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.timeout, Some(Duration::from_secs(5)));

        let bare = HttpRequest::get("http://localhost:8080/x");
        assert_eq!(bare.metric_name(), "http://localhost:8080/x");
    }

    #[test]
    fn request_byte_estimate_accounts_for_implicit_headers() {
        let parsed = url::Url::parse("http://example.com:8080/a?n=5").unwrap();
        let bytes =
            estimate_request_bytes(&http::Method::GET, &parsed, &[], &Bytes::new()).unwrap();

        // "GET /a?n=5 HTTP/1.1\r\n" + "host: example.com:8080\r\n" + "\r\n"
        let expected = 21 + 24 + 2;
        assert_eq!(bytes, expected);
    }

    #[tokio::test]
    async fn non_http_scheme_is_rejected() {
        let client = HttpClient::default();
        let err = client
            .request(HttpRequest::get("https://example.com/"))
            .await;
        assert!(matches!(err, Err(Error::UnsupportedScheme(_))));
    }

    #[tokio::test]
    async fn unreachable_host_fails_fast_with_connect_timeout() {
        let client = HttpClient::new(Some(Duration::from_millis(200)));
        let req = HttpRequest::get("http://192.0.2.1:81/");

        let started = std::time::Instant::now();
        let err = client.request(req).await;
        assert!(err.is_err());
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "expected fast connect failure"
        );
    }
}
