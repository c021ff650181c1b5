//! Hostgate is a host-based HTTP(S) reverse-proxy gateway.
//!
//! Each inbound request is dispatched by its `Host` header to one of a
//! fixed set of upstream services, or served from a local directory when
//! its path falls under a static mount. Every proxied request produces one
//! structured `access_log` record that joins facts from the inbound side
//! and the upstream round trip under a per-request trace id.
//!
//! # Architecture
//!
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (run, validate).
//! - [`config`] -- Config file loading, env expansion and validation.
//! - [`error`] -- Unified error types using `thiserror`.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//! - [`trace`] -- Per-request trace identifiers.
//! - [`proxy`] -- Per-upstream proxy handler, instrumented transport, header
//!   forwarding and access-log emission.
//! - [`static_files`] -- Static asset mounts and the favicon route.
//! - [`router`] -- Route table and axum router.
//! - [`server`] -- Listener lifecycle, TLS, signals and graceful shutdown.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `yaml` | YAML config file support _(enabled by default)_ |
//! | `json` | JSON config file support |

// Binary crate; public functions are internal, not consumed by external users.
#![allow(clippy::missing_errors_doc)]

pub mod cli;
pub mod cmd;
pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod router;
pub mod server;
pub mod static_files;
pub mod tls;
pub mod trace;
