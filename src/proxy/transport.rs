//! Instrumented upstream transport.
//!
//! [`InstrumentedTransport`] wraps any tower service that performs an HTTP
//! round trip (the pooled hyper client in production, a `service_fn` in
//! tests) and writes upstream facts into the request's [`RecordHandle`]:
//! address, status line, body size and round-trip time. Requests without a
//! record are refused before anything is sent.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use http::{Request, Response, StatusCode, Uri};
use http_body::Body as HttpBody;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tower::Service;

use super::record::RecordHandle;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type HttpsConnector = hyper_rustls::HttpsConnector<HttpConnector>;
pub type HttpClient = Client<HttpsConnector, Body>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request carries no access record")]
    MissingRecord,

    #[error("upstream request failed: {0}")]
    Upstream(#[source] BoxError),
}

#[must_use]
pub fn build_http_client() -> HttpClient {
    // With more than one rustls provider compiled in, rustls cannot pick
    // one on its own.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .build(https)
}

#[derive(Debug, Clone)]
pub struct InstrumentedTransport<S> {
    inner: S,
}

impl<S> InstrumentedTransport<S> {
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl InstrumentedTransport<HttpClient> {
    #[must_use]
    pub fn http() -> Self {
        Self::new(build_http_client())
    }
}

impl<S, B> Service<Request<Body>> for InstrumentedTransport<S>
where
    S: Service<Request<Body>, Response = Response<B>> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
    B: HttpBody + Send + 'static,
{
    type Response = Response<B>;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_ready(cx)
            .map_err(|e| TransportError::Upstream(e.into()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // Drive the instance that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let Some(record) = req.extensions().get::<RecordHandle>().cloned() else {
                return Err(TransportError::MissingRecord);
            };
            let addr = upstream_addr(req.uri());

            let start = Instant::now();
            let response = inner
                .call(req)
                .await
                .map_err(|e| TransportError::Upstream(e.into()))?;
            let elapsed = start.elapsed();

            let size = response_size(&response);
            let status = status_line(response.status());
            record.update(|r| {
                r.upstream_addr = addr;
                r.upstream_status = status;
                r.upstream_size = size.unwrap_or(0);
                r.upstream_response_time = elapsed;
            });

            Ok(response)
        })
    }
}

/// `"200 OK"` style status text.
#[must_use]
pub fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {reason}", status.as_u16()),
        None => status.as_u16().to_string(),
    }
}

/// `host:port` of the upstream, with the scheme's default port filled in.
#[must_use]
pub fn upstream_addr(uri: &Uri) -> String {
    let host = uri.host().unwrap_or_default();
    let port = uri.port_u16().unwrap_or_else(|| match uri.scheme_str() {
        Some("https") => 443,
        _ => 80,
    });
    format!("{host}:{port}")
}

fn response_size<B: HttpBody>(response: &Response<B>) -> Option<u64> {
    response
        .headers()
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .or_else(|| response.body().size_hint().exact())
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use http_body_util::Full;
    use tower::{service_fn, ServiceExt};

    use super::*;
    use crate::proxy::record::AccessRecord;

    async fn respond(
        status: StatusCode,
        body: &'static str,
    ) -> Result<Response<Full<bytes::Bytes>>, Infallible> {
        let mut response = Response::new(Full::new(bytes::Bytes::from_static(body.as_bytes())));
        *response.status_mut() = status;
        Ok(response)
    }

    fn request_with_record(uri: &str) -> (Request<Body>, RecordHandle) {
        let handle = RecordHandle::new(AccessRecord::default());
        let mut req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        req.extensions_mut().insert(handle.clone());
        (req, handle)
    }

    #[tokio::test]
    async fn records_upstream_facts() {
        let transport = InstrumentedTransport::new(service_fn(|_req: Request<Body>| {
            respond(StatusCode::OK, "hello")
        }));
        let (req, handle) = request_with_record("http://127.0.0.1:9001/api");

        let response = transport.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let record = handle.snapshot();
        assert_eq!(record.upstream_addr, "127.0.0.1:9001");
        assert_eq!(record.upstream_status, "200 OK");
        assert_eq!(record.upstream_size, 5);
    }

    #[tokio::test]
    async fn default_port_follows_scheme() {
        let transport = InstrumentedTransport::new(service_fn(|_req: Request<Body>| {
            respond(StatusCode::NOT_FOUND, "")
        }));
        let (req, handle) = request_with_record("https://backend.internal/x");

        transport.oneshot(req).await.unwrap();

        let record = handle.snapshot();
        assert_eq!(record.upstream_addr, "backend.internal:443");
        assert_eq!(record.upstream_status, "404 Not Found");
    }

    #[tokio::test]
    async fn refuses_request_without_record() {
        let transport = InstrumentedTransport::new(service_fn(|_req: Request<Body>| {
            respond(StatusCode::OK, "hello")
        }));
        let req = Request::builder()
            .uri("http://127.0.0.1:9001/")
            .body(Body::empty())
            .unwrap();

        let err = transport.oneshot(req).await.unwrap_err();
        assert!(matches!(err, TransportError::MissingRecord));
    }

    #[tokio::test]
    async fn failed_round_trip_leaves_record_untouched() {
        let failing = service_fn(|_req: Request<Body>| async {
            Err::<Response<Full<bytes::Bytes>>, _>(std::io::Error::other("connection refused"))
        });
        let transport = InstrumentedTransport::new(failing);
        let (req, handle) = request_with_record("http://127.0.0.1:1/");

        let err = transport.oneshot(req).await.unwrap_err();
        assert!(matches!(err, TransportError::Upstream(_)));
        assert_eq!(handle.snapshot(), AccessRecord::default());
    }

    #[test]
    fn unknown_status_has_no_reason() {
        assert_eq!(status_line(StatusCode::from_u16(599).unwrap()), "599");
    }
}
