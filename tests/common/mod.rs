//! Shared fixtures for the integration tests: a capturing log writer, stub
//! upstreams and a gateway running on an ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path;
use axum::http::{HeaderMap, Uri};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use hostgate::cli::LogLevel;
use hostgate::config::model::{Config, Proxy, StaticMount, Upstream};
use hostgate::error::GatewayError;
pub use hostgate::logging::capture::Capture;
use hostgate::logging::{self, LogFormat};
use hostgate::server::{Gateway, ShutdownOutcome};
use tokio::task::JoinHandle;

/// Start a stub upstream on an ephemeral port.
///
/// Every path answers `"<name> <path>"` and echoes the received
/// `x-trace-id` and `host` back in `x-seen-trace-id` / `x-seen-host`.
/// `/slow/{ms}` waits that many milliseconds first.
pub async fn stub_upstream(name: &'static str) -> SocketAddr {
    let echo = move |uri: Uri, headers: HeaderMap| async move {
        let mut response = format!("{name} {}", uri.path()).into_response();
        for (from, to) in [("x-trace-id", "x-seen-trace-id"), ("host", "x-seen-host")] {
            if let Some(value) = headers.get(from) {
                response.headers_mut().insert(to, value.clone());
            }
        }
        response
    };

    let app = Router::new()
        .route(
            "/slow/{ms}",
            get(move |Path(ms): Path<u64>| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                format!("{name} slept {ms}")
            }),
        )
        .fallback(echo);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn config(upstreams: &[(&str, SocketAddr)], mounts: Vec<StaticMount>) -> Config {
    Config {
        proxy: Proxy {
            port: 8080,
            read_header_timeout: 2_000,
            shutdown_timeout: 3_000,
            static_files: mounts,
            ..Default::default()
        },
        upstreams: upstreams
            .iter()
            .map(|(host, addr)| Upstream {
                host_name: (*host).to_string(),
                target: format!("http://{addr}"),
            })
            .collect(),
        log_level: 0,
    }
}

pub fn mount(path: &str, dir: &std::path::Path) -> StaticMount {
    StaticMount {
        path: path.into(),
        dir: dir.to_string_lossy().into_owned(),
        ..Default::default()
    }
}

pub struct Running {
    pub gateway: Arc<Gateway>,
    pub addr: SocketAddr,
    pub logs: Capture,
    pub handle: JoinHandle<Result<ShutdownOutcome, GatewayError>>,
}

impl Running {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Request shutdown and wait for `serve` to return.
    pub async fn stop(self) -> ShutdownOutcome {
        self.gateway.shutdown();
        self.handle.await.unwrap().unwrap()
    }
}

/// Start a gateway for `config` on `127.0.0.1:0`, logging JSON into a
/// fresh [`Capture`]. Shutdown is driven through [`Gateway::shutdown`].
pub async fn start(config: &Config) -> Running {
    let logs = Capture::default();
    let dispatch = logging::build(&LogLevel::Info, LogFormat::Json, logs.clone());
    let gateway = Arc::new(Gateway::new(config, dispatch).unwrap());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let serving = Arc::clone(&gateway);
    let handle =
        tokio::spawn(async move { serving.serve(listener, std::future::pending()).await });

    // serve() flips the phase before accepting; wait for it so tests can
    // assert on lifecycle state.
    for _ in 0..100 {
        if gateway.local_addr().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    Running {
        gateway,
        addr,
        logs,
        handle,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
