//! Per-request trace identifiers.
//!
//! A [`TraceId`] is a random UUIDv4 attached to a request's extensions by
//! [`new_trace_id`]. Anything holding the request (or its extensions) can
//! read it back with [`trace_id`], which yields an empty string when no
//! identifier was attached. The identifier is forwarded upstream in the
//! [`TRACE_HEADER`] header.

use std::fmt;

use http::{Extensions, HeaderName};

pub const TRACE_HEADER: HeaderName = HeaderName::from_static("x-trace-id");

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(String);

impl TraceId {
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Attach a fresh identifier to `extensions`, replacing any previous one.
pub fn new_trace_id(extensions: &mut Extensions) -> TraceId {
    let id = TraceId::generate();
    extensions.insert(id.clone());
    id
}

#[must_use]
pub fn trace_id(extensions: &Extensions) -> &str {
    extensions.get::<TraceId>().map_or("", TraceId::as_str)
}
