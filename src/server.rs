//! Listener lifecycle: bind, serve, drain.
//!
//! A [`Gateway`] owns the router, the listener settings and the injected
//! log dispatch. It moves through [`Phase`]s
//! `Created -> Listening -> ShuttingDown -> Stopped`. Each accepted
//! connection runs on its own task, served by hyper's auto (HTTP/1.1 +
//! HTTP/2) builder with a header-read timeout. Shutdown comes from an OS
//! signal or [`Gateway::shutdown`]; open connections are asked to finish
//! their in-flight requests and are aborted once `shutdown_timeout`
//! elapses.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::Router;
use http::uri::Scheme;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::instrument::WithSubscriber;
use tracing::Dispatch;

use crate::config::model::Config;
use crate::error::GatewayError;
use crate::router::{build_router, RouteTable};
use crate::tls;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Listening,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every connection finished before the deadline.
    Graceful,
    /// The deadline passed; `remaining` connections were closed forcibly.
    TimedOut { remaining: usize },
}

#[derive(Debug)]
struct State {
    phase: Phase,
    local_addr: Option<SocketAddr>,
}

pub struct Gateway {
    router: Router,
    routes: Arc<RouteTable>,
    port: u16,
    read_header_timeout: Duration,
    shutdown_timeout: Duration,
    tls: Option<(PathBuf, PathBuf)>,
    logger: Dispatch,
    state: Mutex<State>,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("port", &self.port)
            .field("tls", &self.tls.is_some())
            .field("state", &*self.lock_state())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Build the route table and router from `config`. Fails on the first
    /// invalid upstream target.
    pub fn new(config: &Config, logger: Dispatch) -> Result<Self, GatewayError> {
        let routes = Arc::new(RouteTable::build(config, &logger)?);
        let router = build_router(Arc::clone(&routes));
        let proxy = &config.proxy;

        let tls = proxy.is_tls_enabled().then(|| {
            (
                PathBuf::from(&proxy.tls_cert_path),
                PathBuf::from(&proxy.tls_key_path),
            )
        });

        Ok(Self {
            router,
            routes,
            port: proxy.port,
            read_header_timeout: proxy.read_header_timeout(),
            shutdown_timeout: proxy.shutdown_timeout(),
            tls,
            logger,
            state: Mutex::new(State {
                phase: Phase::Created,
                local_addr: None,
            }),
            shutdown_tx: watch::Sender::new(false),
        })
    }

    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.lock_state().phase
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        let state = self.lock_state();
        matches!(state.phase, Phase::ShuttingDown | Phase::Stopped) || *self.shutdown_tx.borrow()
    }

    /// Address the listener is bound to, once listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_state().local_addr
    }

    /// Request shutdown. Safe to call from any task, before or after the
    /// listener exists; a request made before `serve` makes it return
    /// without accepting anything.
    pub fn shutdown(&self) {
        let mut state = self.lock_state();
        if state.phase == Phase::Listening {
            state.phase = Phase::ShuttingDown;
        }
        self.shutdown_tx.send_replace(true);
    }

    /// Bind `0.0.0.0:<port>`.
    pub async fn bind(&self) -> Result<TcpListener, GatewayError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port));
        TcpListener::bind(addr)
            .await
            .map_err(|source| GatewayError::Bind { addr, source })
    }

    /// Bind, serve until SIGINT/SIGTERM/SIGHUP or [`Gateway::shutdown`],
    /// then drain. A drain that runs past the deadline is an error.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let listener = self.bind().await?;
        match self.serve(listener, shutdown_signal()).await? {
            ShutdownOutcome::Graceful => Ok(()),
            ShutdownOutcome::TimedOut { remaining } => {
                Err(GatewayError::ShutdownTimedOut { remaining })
            }
        }
    }

    /// Serve `listener` until `signal` resolves or [`Gateway::shutdown`] is
    /// called, then drain open connections within the shutdown timeout.
    pub async fn serve<F>(
        &self,
        listener: TcpListener,
        signal: F,
    ) -> Result<ShutdownOutcome, GatewayError>
    where
        F: Future<Output = ()> + Send,
    {
        self.serve_inner(listener, signal)
            .with_subscriber(self.logger.clone())
            .await
    }

    async fn serve_inner<F>(
        &self,
        listener: TcpListener,
        signal: F,
    ) -> Result<ShutdownOutcome, GatewayError>
    where
        F: Future<Output = ()> + Send,
    {
        let acceptor = match &self.tls {
            Some((cert, key)) => Some(tls::build_acceptor(cert, key)?),
            None => None,
        };
        let local_addr = listener.local_addr()?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        {
            let mut state = self.lock_state();
            if *shutdown_rx.borrow_and_update() {
                state.phase = Phase::Stopped;
                tracing::info!("shutdown requested before start");
                return Ok(ShutdownOutcome::Graceful);
            }
            state.phase = Phase::Listening;
            state.local_addr = Some(local_addr);
        }

        tracing::info!(
            addr = %local_addr,
            tls = acceptor.is_some(),
            upstreams = self.routes.upstream_count(),
            static_mounts = self.routes.mounts().len(),
            "gateway listening"
        );

        let mut connections = JoinSet::new();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                () = &mut signal => {
                    tracing::info!("received shutdown signal");
                    break;
                }
                () = stop_requested(&mut shutdown_rx) => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.spawn_connection(&mut connections, stream, peer, acceptor.clone());
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept connection");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }

        drop(listener);
        self.begin_shutdown();
        Ok(self.drain(connections).await)
    }

    fn spawn_connection(
        &self,
        connections: &mut JoinSet<()>,
        stream: TcpStream,
        peer: SocketAddr,
        acceptor: Option<TlsAcceptor>,
    ) {
        let router = self.router.clone();
        let header_timeout = self.read_header_timeout;
        let shutdown_rx = self.shutdown_tx.subscribe();
        let scheme = if acceptor.is_some() {
            Scheme::HTTPS
        } else {
            Scheme::HTTP
        };

        let service = hyper::service::service_fn(move |mut req: Request<Incoming>| {
            req.extensions_mut().insert(ConnectInfo(peer));
            req.extensions_mut().insert(scheme.clone());
            router.clone().oneshot(req)
        });

        let task = async move {
            match acceptor {
                Some(acceptor) => {
                    match tokio::time::timeout(header_timeout, acceptor.accept(stream)).await {
                        Ok(Ok(tls)) => {
                            serve_connection(tls, service, header_timeout, shutdown_rx).await;
                        }
                        Ok(Err(e)) => tracing::debug!(%peer, error = %e, "TLS handshake failed"),
                        Err(_) => tracing::debug!(%peer, "TLS handshake timed out"),
                    }
                }
                None => serve_connection(stream, service, header_timeout, shutdown_rx).await,
            }
        };
        connections.spawn(task.with_subscriber(self.logger.clone()));
    }

    fn begin_shutdown(&self) {
        let mut state = self.lock_state();
        state.phase = Phase::ShuttingDown;
        self.shutdown_tx.send_replace(true);
    }

    async fn drain(&self, mut connections: JoinSet<()>) -> ShutdownOutcome {
        tracing::info!(
            open_connections = connections.len(),
            "starting graceful shutdown"
        );

        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        let outcome = if drained.is_ok() {
            tracing::info!("server shutdown completed");
            ShutdownOutcome::Graceful
        } else {
            let remaining = connections.len();
            connections.abort_all();
            while connections.join_next().await.is_some() {}
            tracing::error!(
                remaining,
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "graceful shutdown timed out, closed remaining connections"
            );
            ShutdownOutcome::TimedOut { remaining }
        };

        self.lock_state().phase = Phase::Stopped;
        outcome
    }

    // The state is two plain fields; a poisoned lock still holds valid data.
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn serve_connection<I, S>(
    io: I,
    service: S,
    header_timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: hyper::service::Service<Request<Incoming>, Response = axum::response::Response>
        + Send
        + 'static,
    S::Future: Send + 'static,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(header_timeout);

    let conn = builder.serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        res = conn.as_mut() => res,
        () = stop_requested(&mut shutdown_rx) => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "connection closed with error");
    }
}

/// Resolve once shutdown has been requested. The watch borrow is released
/// before returning so callers may keep awaiting in `select!` arms.
async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    // A closed channel means the gateway is gone; treat it as a stop.
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Resolve on SIGINT (Ctrl+C), SIGTERM or SIGHUP.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let unix_signal = |kind: tokio::signal::unix::SignalKind, name: &'static str| async move {
        match tokio::signal::unix::signal(kind) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, signal = name, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = unix_signal(tokio::signal::unix::SignalKind::terminate(), "SIGTERM");
    #[cfg(unix)]
    let hangup = unix_signal(tokio::signal::unix::SignalKind::hangup(), "SIGHUP");

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    #[cfg(not(unix))]
    let hangup = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
        () = hangup => tracing::info!("received SIGHUP"),
    }
}
