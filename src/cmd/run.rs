//! `hostgate run`: start the gateway.
//!
//! Loads the config file, builds the log dispatch from the CLI flags (or the
//! config's `log_level`), then runs the [`Gateway`] until a termination
//! signal and a bounded drain.

use std::path::{Path, PathBuf};

use crate::cli::{LogLevel, RunArgs};
use crate::config;
use crate::error::GatewayError;
use crate::logging;
use crate::server::Gateway;

const CANDIDATES: &[&str] = &[
    "hostgate.yaml",
    "hostgate.yml",
    #[cfg(feature = "json")]
    "hostgate.json",
    "config.yaml",
    "config.yml",
];

pub async fn execute(args: RunArgs) -> Result<(), GatewayError> {
    let path = resolve_config_path(args.config.as_deref()).await?;
    let config = config::load(&path).await?;

    let level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(config.log_level));
    let dispatch = logging::stdout(&level, logging::resolve_format(args.pretty, args.json));

    // Third-party spans (tower-http) go through the global default; the
    // gateway itself logs through the dispatch it is handed.
    if tracing::dispatcher::set_global_default(dispatch.clone()).is_err() {
        eprintln!("warning: a global tracing subscriber was already installed");
    }

    tracing::info!(
        config = %path.display(),
        port = config.proxy.port,
        upstreams = config.upstreams.len(),
        static_mounts = config.proxy.static_files.len(),
        "configuration loaded"
    );

    let gateway = Gateway::new(&config, dispatch)?;
    gateway.run().await?;

    tracing::info!("hostgate stopped");
    Ok(())
}

/// The explicit path, or the first candidate present in the working
/// directory.
pub async fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf, GatewayError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    for name in CANDIDATES {
        let path = PathBuf::from(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(path);
        }
    }

    Err(GatewayError::NoConfigFile {
        hint: format!(
            "Provide --config <file> or create one of: {}",
            CANDIDATES.join(", ")
        ),
    })
}
