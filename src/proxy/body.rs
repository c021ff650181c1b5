//! Response body that meters bytes written to the client.
//!
//! [`MeteredBody`] wraps the body handed back to the server and counts the
//! data frames it yields. When the stream ends, or the body is dropped
//! because the client went away, the owning request's record is finalized
//! and the access log is emitted once through the injected dispatch.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body::{Body as HttpBody, Frame, SizeHint};
use tracing::Dispatch;

use super::record::RecordHandle;
use super::transport::status_line;
use crate::trace::TraceId;

struct Completion {
    record: RecordHandle,
    trace_id: TraceId,
    status: StatusCode,
    head_bytes: u64,
    start: Instant,
    logger: Dispatch,
}

pub struct MeteredBody {
    inner: Body,
    sent: u64,
    completion: Option<Completion>,
}

impl MeteredBody {
    /// Wrap `response` so that its access log is emitted when the body
    /// has been written or abandoned.
    pub fn wrap(
        response: Response<Body>,
        record: RecordHandle,
        trace_id: TraceId,
        start: Instant,
        logger: Dispatch,
    ) -> Response<Body> {
        let (parts, inner) = response.into_parts();
        let completion = Completion {
            record,
            trace_id,
            status: parts.status,
            head_bytes: head_bytes(parts.status, &parts.headers),
            start,
            logger,
        };
        let body = Self {
            inner,
            sent: 0,
            completion: Some(completion),
        };
        Response::from_parts(parts, Body::new(body))
    }

    fn finish(&mut self) {
        let Some(c) = self.completion.take() else {
            return;
        };
        let sent = self.sent;
        let record = c.record.update(|r| {
            r.status = status_line(c.status);
            r.body_bytes_sent = sent;
            r.bytes_sent = c.head_bytes + sent;
            r.request_time = c.start.elapsed();
            r.clone()
        });
        tracing::dispatcher::with_default(&c.logger, || record.emit(c.trace_id.as_str()));
    }
}

impl HttpBody for MeteredBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.sent += data.len() as u64;
                }
            }
            Poll::Ready(None) => this.finish(),
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for MeteredBody {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Approximate size of the HTTP/1.1 response head for `bytes_sent`.
fn head_bytes(status: StatusCode, headers: &HeaderMap) -> u64 {
    let line = "HTTP/1.1 ".len() + status_line(status).len() + 2;
    let fields: usize = headers
        .iter()
        .map(|(name, value)| name.as_str().len() + 2 + value.len() + 2)
        .sum();
    (line + fields + 2) as u64
}
