//! Serde data structures for the hostgate configuration file.
//!
//! Contains [`Config`] (the root), [`Proxy`] (listener settings),
//! [`StaticMount`] and [`Upstream`]. All types derive `Serialize` and
//! `Deserialize` with `deny_unknown_fields` for strict parsing.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

const fn default_read_header_timeout() -> u64 {
    30_000
}

const fn default_shutdown_timeout() -> u64 {
    5_000
}

fn is_empty(v: &str) -> bool {
    v.is_empty()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub proxy: Proxy,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstreams: Vec<Upstream>,

    /// Debug: -4, Info: 0, Warn: 4, Error: 8.
    #[serde(default)]
    pub log_level: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Proxy {
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,

    /// Milliseconds allowed for a client to send the full request head.
    #[serde(default = "default_read_header_timeout")]
    pub read_header_timeout: u64,

    /// Milliseconds allowed for in-flight requests to drain on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    #[serde(default, skip_serializing_if = "is_empty")]
    pub tls_cert_path: String,

    #[serde(default, skip_serializing_if = "is_empty")]
    pub tls_key_path: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub static_files: Vec<StaticMount>,
}

impl Default for Proxy {
    fn default() -> Self {
        Self {
            port: 0,
            read_header_timeout: default_read_header_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
            tls_cert_path: String::new(),
            tls_key_path: String::new(),
            static_files: Vec::new(),
        }
    }
}

impl Proxy {
    #[must_use]
    pub fn is_tls_enabled(&self) -> bool {
        !self.tls_cert_path.is_empty() && !self.tls_key_path.is_empty()
    }

    #[must_use]
    pub const fn read_header_timeout(&self) -> Duration {
        Duration::from_millis(self.read_header_timeout)
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StaticMount {
    pub path: String,

    pub dir: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_file: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub error_pages: BTreeMap<u16, String>,
}

impl StaticMount {
    pub const DEFAULT_INDEX: &'static str = "index.html";

    #[must_use]
    pub fn index_file(&self) -> &str {
        self.default_file
            .as_deref()
            .filter(|f| !f.is_empty())
            .unwrap_or(Self::DEFAULT_INDEX)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Upstream {
    pub host_name: String,
    pub target: String,
}

/// Accepts `port: 8080` as well as `port: "8080"`, the latter being what
/// `${PORT}` style substitutions usually produce when quoted.
fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u16),
        Text(String),
    }

    match PortRepr::deserialize(deserializer)? {
        PortRepr::Number(port) => Ok(port),
        PortRepr::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{text}'"))),
    }
}
