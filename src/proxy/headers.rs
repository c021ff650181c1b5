//! Header forwarding and hop-by-hop stripping.
//!
//! [`build_forwarded_headers`] clones the client headers, strips hop-by-hop
//! headers (including any the client listed in `Connection`), rewrites
//! `Host` to the upstream authority and adds proxy metadata
//! (`X-Forwarded-For`, `X-Real-IP`, `X-Forwarded-Proto`,
//! `X-Forwarded-Host`, `Via`, `X-Trace-ID`).

use std::net::IpAddr;
use std::sync::LazyLock;

use http::header::{CONNECTION, HOST, VIA};
use http::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::trace::TRACE_HEADER;

static HOP_BY_HOP: LazyLock<Vec<HeaderName>> = LazyLock::new(|| {
    [
        "connection",
        "proxy-connection",
        "keep-alive",
        "transfer-encoding",
        "te",
        "trailer",
        "upgrade",
        "proxy-authorization",
        "proxy-authenticate",
    ]
    .iter()
    .filter_map(|name| name.parse::<HeaderName>().ok())
    .collect()
});

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
static X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

const VIA_VALUE: &str = "1.1 hostgate";

/// Remove hop-by-hop headers, plus every header named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| name.trim().parse::<HeaderName>().ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Strip hop-by-hop headers from an upstream response.
///
/// The body is streamed through unchanged, so `content-length` stays.
pub fn strip_response_hop_by_hop(headers: &mut HeaderMap) {
    strip_hop_by_hop(headers);
}

/// Authority the upstream expects in `Host`: host plus any explicit port.
#[must_use]
pub fn upstream_authority(target: &Url) -> String {
    let host = target.host_str().unwrap_or_default();
    target
        .port()
        .map_or_else(|| host.to_string(), |port| format!("{host}:{port}"))
}

pub fn build_forwarded_headers(
    original: &HeaderMap,
    client_ip: Option<IpAddr>,
    target: &Url,
    inbound_scheme: &str,
    trace_id: &str,
) -> HeaderMap {
    let mut headers = original.clone();
    strip_hop_by_hop(&mut headers);

    if let Ok(val) = HeaderValue::from_str(&upstream_authority(target)) {
        headers.insert(HOST, val);
    }

    if let Some(ip) = client_ip {
        let ip = ip.to_string();
        let xff = original
            .get(&X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .map_or_else(|| ip.clone(), |existing| format!("{existing}, {ip}"));
        if let Ok(val) = HeaderValue::from_str(&xff) {
            headers.insert(X_FORWARDED_FOR.clone(), val);
        }

        // first hop in the chain
        let real_ip = xff.split(',').next().unwrap_or(&ip).trim();
        if let Ok(val) = HeaderValue::from_str(real_ip) {
            headers.insert(X_REAL_IP.clone(), val);
        }
    }

    if let Ok(val) = HeaderValue::from_str(inbound_scheme) {
        headers.insert(X_FORWARDED_PROTO.clone(), val);
    }

    if let Some(original_host) = original.get(HOST) {
        headers.insert(X_FORWARDED_HOST.clone(), original_host.clone());
    }

    headers.insert(VIA, HeaderValue::from_static(VIA_VALUE));

    if let Ok(val) = HeaderValue::from_str(trace_id) {
        headers.insert(TRACE_HEADER, val);
    }

    headers
}
