//! Per-upstream proxy handler.
//!
//! An [`UpstreamProxy`] is built once per configured upstream and closes
//! over that upstream's target URL. For each request it attaches a trace
//! id and a fresh [`RecordHandle`], rewrites the request toward the target
//! ([`headers`]), sends it through the [`InstrumentedTransport`] and hands
//! the upstream response back wrapped in a [`MeteredBody`], which emits the
//! access log once the client has the bytes.

pub mod body;
pub mod headers;
pub mod record;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::response::IntoResponse;
use bytes::Bytes;
use http::request::Parts;
use http::uri::Scheme;
use http::{Request, Response, StatusCode, Uri, Version};
use http_body::Body as HttpBody;
use tower::{Service, ServiceExt};
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, Instrument};
use url::Url;

use self::body::MeteredBody;
use self::record::{AccessRecord, RecordHandle};
use self::transport::{BoxError, HttpClient, InstrumentedTransport};
use crate::trace;

#[derive(Clone)]
pub struct UpstreamProxy<S = HttpClient> {
    host: Arc<str>,
    target: Arc<Url>,
    transport: InstrumentedTransport<S>,
    logger: Dispatch,
}

impl<S> std::fmt::Debug for UpstreamProxy<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamProxy")
            .field("host", &self.host)
            .field("target", &self.target.as_str())
            .finish_non_exhaustive()
    }
}

impl<S, B> UpstreamProxy<S>
where
    S: Service<Request<Body>, Response = Response<B>> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    pub fn new(
        host: &str,
        target: Url,
        transport: InstrumentedTransport<S>,
        logger: Dispatch,
    ) -> Self {
        Self {
            host: Arc::from(host),
            target: Arc::new(target),
            transport,
            logger,
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Proxy one request. Always yields a response; upstream failures
    /// become `502 Bad Gateway`.
    pub async fn serve(&self, req: Request<Body>) -> Response<Body> {
        let logger = self.logger.clone();
        self.clone().forward(req).with_subscriber(logger).await
    }

    async fn forward(self, mut req: Request<Body>) -> Response<Body> {
        let start = Instant::now();
        let trace_id = trace::new_trace_id(req.extensions_mut());
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let scheme = req
            .extensions()
            .get::<Scheme>()
            .cloned()
            .unwrap_or(Scheme::HTTP);

        let (parts, body) = req.into_parts();
        let record = RecordHandle::new(AccessRecord::from_request(&parts, peer));

        let span = tracing::info_span!("proxy", trace_id = %trace_id, upstream = %self.host);
        let response = self
            .round_trip(parts, body, peer, &scheme, &record)
            .instrument(span)
            .await;

        MeteredBody::wrap(response, record, trace_id, start, self.logger.clone())
    }

    async fn round_trip(
        &self,
        parts: Parts,
        body: Body,
        peer: Option<SocketAddr>,
        scheme: &Scheme,
        record: &RecordHandle,
    ) -> Response<Body> {
        let uri = match upstream_uri(&self.target, &parts.uri) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(error = %e, "failed to build upstream uri");
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };

        let forwarded = headers::build_forwarded_headers(
            &parts.headers,
            peer.map(|p| p.ip()),
            &self.target,
            scheme.as_str(),
            trace::trace_id(&parts.extensions),
        );

        let mut upstream = Request::new(body);
        *upstream.method_mut() = parts.method;
        *upstream.uri_mut() = uri;
        *upstream.version_mut() = Version::HTTP_11;
        *upstream.headers_mut() = forwarded;
        *upstream.extensions_mut() = parts.extensions;
        upstream.extensions_mut().insert(record.clone());

        tracing::debug!(
            method = %upstream.method(),
            uri = %upstream.uri(),
            "forwarding request"
        );

        match self.transport.clone().oneshot(upstream).await {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                headers::strip_response_hop_by_hop(&mut parts.headers);
                Response::from_parts(parts, Body::new(body))
            }
            Err(e) => {
                tracing::error!(error = %e, "upstream request failed");
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }
}

/// Absolute upstream URI for `inbound`: the target's scheme and authority,
/// the target's base path joined to the request path with a single slash,
/// and both query strings combined.
pub fn upstream_uri(target: &Url, inbound: &Uri) -> Result<Uri, http::uri::InvalidUri> {
    let path = join_paths(target.path(), inbound.path());
    let query = match (
        target.query().filter(|q| !q.is_empty()),
        inbound.query().filter(|q| !q.is_empty()),
    ) {
        (Some(base), Some(extra)) => Some(format!("{base}&{extra}")),
        (Some(q), None) | (None, Some(q)) => Some(q.to_string()),
        (None, None) => None,
    };

    let mut uri = format!(
        "{}://{}{path}",
        target.scheme(),
        headers::upstream_authority(target)
    );
    if let Some(query) = query {
        uri.push('?');
        uri.push_str(&query);
    }
    uri.parse()
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}
