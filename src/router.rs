//! Route table and axum router.
//!
//! [`RouteTable::build`] turns the config into an immutable dispatch
//! table: one [`UpstreamProxy`] per upstream host and one
//! [`StaticMountHandler`] per mount. An unparsable upstream target aborts
//! the build with the offending value; no partial table is returned.
//!
//! Dispatch order for a request:
//! 1. `/favicon.ico`: the matching upstream host if there is one, else the
//!    first mount directory that has the icon, else 204,
//! 2. the static mount with the longest matching prefix (earliest declared
//!    on a tie),
//! 3. the upstream whose host name equals the request host (port dropped,
//!    case-insensitive),
//! 4. 404.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Router;
use http::header::HOST;
use http::{Request, StatusCode};
use tower_http::trace::TraceLayer;
use tracing::Dispatch;

use crate::config::model::Config;
use crate::config::validation::validate_target_url;
use crate::error::GatewayError;
use crate::proxy::transport::InstrumentedTransport;
use crate::proxy::UpstreamProxy;
use crate::static_files::{self, StaticMountHandler, FAVICON_PATH};

#[derive(Debug)]
pub struct RouteTable {
    upstreams: HashMap<String, UpstreamProxy>,
    mounts: Vec<StaticMountHandler>,
}

impl RouteTable {
    /// Build the table, failing on the first upstream whose target is not
    /// an absolute http(s) URL.
    pub fn build(config: &Config, logger: &Dispatch) -> Result<Self, GatewayError> {
        let mut targets = Vec::with_capacity(config.upstreams.len());
        for upstream in &config.upstreams {
            let target = validate_target_url(&upstream.target).map_err(|reason| {
                GatewayError::InvalidUpstreamTarget {
                    host: upstream.host_name.clone(),
                    target: upstream.target.clone(),
                    reason,
                }
            })?;
            targets.push((upstream.host_name.as_str(), target));
        }

        let transport = InstrumentedTransport::http();
        let mut upstreams = HashMap::with_capacity(targets.len());
        for (host, target) in targets {
            let key = normalize_host(host);
            if upstreams.contains_key(&key) {
                tracing::warn!(host = %host, "duplicate upstream host ignored");
                continue;
            }
            let proxy = UpstreamProxy::new(host, target, transport.clone(), logger.clone());
            upstreams.insert(key, proxy);
        }

        let mounts = config
            .proxy
            .static_files
            .iter()
            .map(StaticMountHandler::new)
            .collect();

        Ok(Self { upstreams, mounts })
    }

    #[must_use]
    pub fn upstream_count(&self) -> usize {
        self.upstreams.len()
    }

    /// Registered host names, sorted.
    #[must_use]
    pub fn hosts(&self) -> Vec<&str> {
        let mut hosts: Vec<&str> = self.upstreams.values().map(UpstreamProxy::host).collect();
        hosts.sort_unstable();
        hosts
    }

    #[must_use]
    pub fn mounts(&self) -> &[StaticMountHandler] {
        &self.mounts
    }

    #[must_use]
    pub fn match_mount(&self, path: &str) -> Option<&StaticMountHandler> {
        self.mounts
            .iter()
            .filter(|m| m.matches(path))
            // max_by_key keeps the last maximum; reverse to prefer the first
            .rev()
            .max_by_key(|m| m.prefix().len())
    }

    #[must_use]
    pub fn match_host(&self, host: &str) -> Option<&UpstreamProxy> {
        self.upstreams.get(&normalize_host(host))
    }

    pub async fn dispatch(&self, req: Request<Body>) -> Response {
        let upstream = request_host(&req).and_then(|h| self.match_host(h));

        // An exact favicon route outranks any mount prefix, `/` included.
        if req.uri().path() == FAVICON_PATH {
            return match upstream {
                Some(proxy) => proxy.serve(req).await,
                None => static_files::serve_favicon(&self.mounts, req).await,
            };
        }

        if let Some(mount) = self.match_mount(req.uri().path()) {
            return mount.serve(req).await;
        }

        if let Some(proxy) = upstream {
            return proxy.serve(req).await;
        }

        tracing::debug!(
            host = request_host(&req).unwrap_or_default(),
            path = %req.uri().path(),
            "no route matched"
        );
        StatusCode::NOT_FOUND.into_response()
    }
}

/// Host the client asked for: the `Host` header, or the URI authority for
/// HTTP/2 and absolute-form requests.
fn request_host(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().host())
}

/// Lowercase host with any port removed. Bracketed IPv6 literals keep
/// their brackets.
fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let bare = if host.starts_with('[') {
        host.find(']').map_or(host, |end| &host[..=end])
    } else {
        host.rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map_or(host, |(name, _)| name)
    };
    bare.to_ascii_lowercase()
}

async fn dispatch_handler(State(routes): State<Arc<RouteTable>>, req: Request<Body>) -> Response {
    routes.dispatch(req).await
}

pub fn build_router(routes: Arc<RouteTable>) -> Router {
    Router::new()
        .fallback(dispatch_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(routes)
}
