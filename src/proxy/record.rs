//! Per-request access record.
//!
//! An [`AccessRecord`] accumulates client, request, upstream and response
//! facts for one proxied request. The dispatch handler and the
//! instrumented transport fill it from different call stacks, so it lives
//! behind a [`RecordHandle`] (`Arc<Mutex<_>>`) stored in the request's
//! extensions. The handle is created per request and dropped with it.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use http::header::{CONTENT_LENGTH, HOST, REFERER, USER_AGENT};
use http::request::Parts;
use http::HeaderMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessRecord {
    // client
    pub remote_addr: String,
    pub remote_port: String,
    pub x_forwarded_for: String,

    // request
    pub method: String,
    pub request_uri: String,
    pub query_string: String,
    pub host: String,
    pub request_size: u64,

    // response
    pub status: String,
    pub body_bytes_sent: u64,
    pub bytes_sent: u64,
    pub request_time: Duration,

    // upstream, left at defaults when the round trip failed
    pub upstream_status: String,
    pub upstream_size: u64,
    pub upstream_addr: String,
    pub upstream_response_time: Duration,

    // headers
    pub referer: String,
    pub user_agent: String,
}

impl AccessRecord {
    /// Capture the client and request facts known before proxying.
    #[must_use]
    pub fn from_request(parts: &Parts, peer: Option<SocketAddr>) -> Self {
        let headers = &parts.headers;
        let host = header_str(headers, HOST.as_str())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(ToString::to_string))
            .unwrap_or_default();

        Self {
            remote_addr: peer.map(|p| p.ip().to_string()).unwrap_or_default(),
            remote_port: peer.map(|p| p.port().to_string()).unwrap_or_default(),
            x_forwarded_for: header_str(headers, "x-forwarded-for")
                .unwrap_or_default()
                .to_string(),
            method: parts.method.to_string(),
            request_uri: parts.uri.to_string(),
            query_string: parts.uri.query().unwrap_or_default().to_string(),
            host,
            request_size: header_str(headers, CONTENT_LENGTH.as_str())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            referer: header_str(headers, REFERER.as_str())
                .unwrap_or_default()
                .to_string(),
            user_agent: header_str(headers, USER_AGENT.as_str())
                .unwrap_or_default()
                .to_string(),
            ..Self::default()
        }
    }

    /// Emit the record as one `access_log` event on the current dispatcher.
    pub fn emit(&self, trace_id: &str) {
        tracing::info!(
            trace_id = %trace_id,
            remote_addr = %self.remote_addr,
            remote_port = %self.remote_port,
            x_forwarded_for = %self.x_forwarded_for,
            method = %self.method,
            request_uri = %self.request_uri,
            query_string = %self.query_string,
            host = %self.host,
            request_size = self.request_size,
            status = %self.status,
            body_bytes_sent = self.body_bytes_sent,
            bytes_sent = self.bytes_sent,
            request_time = self.request_time.as_secs_f64(),
            upstream_addr = %self.upstream_addr,
            upstream_status = %self.upstream_status,
            upstream_size = self.upstream_size,
            upstream_response_time = self.upstream_response_time.as_secs_f64(),
            referer = %self.referer,
            user_agent = %self.user_agent,
            "access_log"
        );
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Shared, mutable handle to one request's [`AccessRecord`].
#[derive(Debug, Clone, Default)]
pub struct RecordHandle(Arc<Mutex<AccessRecord>>);

impl RecordHandle {
    #[must_use]
    pub fn new(record: AccessRecord) -> Self {
        Self(Arc::new(Mutex::new(record)))
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut AccessRecord) -> R) -> R {
        f(&mut self.lock())
    }

    #[must_use]
    pub fn snapshot(&self) -> AccessRecord {
        self.lock().clone()
    }

    // A panic while holding the lock leaves plain data behind; keep using it.
    fn lock(&self) -> MutexGuard<'_, AccessRecord> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
