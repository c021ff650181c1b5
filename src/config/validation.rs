//! Configuration validation with detailed error reporting.
//!
//! The [`validate`] function checks a parsed [`Config`] for structural
//! errors such as a zero port, half-configured TLS, empty or duplicate
//! upstream host names and malformed static mounts. Upstream target URLs
//! are checked separately by [`validate_target_url`], which the router
//! builder calls fail-fast on the first bad target.

use std::collections::HashSet;

use url::Url;

use super::model::Config;
use crate::error::ValidationError;

/// Validate a single upstream target URL. Returns the parsed URL or a
/// human-readable error.
pub fn validate_target_url(target: &str) -> Result<Url, String> {
    match Url::parse(target) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            if scheme != "http" && scheme != "https" {
                Err(format!(
                    "unsupported scheme '{scheme}' (expected http or https)"
                ))
            } else if parsed.host_str().map_or(true, str::is_empty) {
                Err(format!("'{target}' has no host"))
            } else {
                Ok(parsed)
            }
        }
        Err(e) => Err(format!("'{target}' is not a valid absolute URL ({e})")),
    }
}

/// Validate a static mount path prefix.
pub fn validate_mount_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("path cannot be empty".into());
    }
    if !path.starts_with('/') {
        return Err(format!("path must start with '/' (did you mean '/{path}'?)"));
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let proxy = &config.proxy;

    if proxy.port == 0 {
        errors.push(ValidationError {
            location: "proxy".into(),
            field: "port".into(),
            message: "port must be between 1 and 65535".into(),
            suggestion: None,
        });
    }

    if proxy.tls_cert_path.is_empty() != proxy.tls_key_path.is_empty() {
        let missing = if proxy.tls_cert_path.is_empty() {
            "tls_cert_path"
        } else {
            "tls_key_path"
        };
        errors.push(ValidationError {
            location: "proxy".into(),
            field: missing.into(),
            message: "TLS needs both a certificate and a key".into(),
            suggestion: Some("set both paths or leave both empty".into()),
        });
    }

    for (i, mount) in proxy.static_files.iter().enumerate() {
        let location = if mount.path.is_empty() {
            format!("static_files[{i}]")
        } else {
            format!("static_files {}", mount.path)
        };

        if let Err(msg) = validate_mount_path(&mount.path) {
            errors.push(ValidationError {
                location: location.clone(),
                field: "path".into(),
                message: msg,
                suggestion: if !mount.path.is_empty() && !mount.path.starts_with('/') {
                    Some(format!("did you mean '/{}'?", mount.path))
                } else {
                    None
                },
            });
        }

        if mount.dir.is_empty() {
            errors.push(ValidationError {
                location: location.clone(),
                field: "dir".into(),
                message: "dir cannot be empty".into(),
                suggestion: None,
            });
        }

        for status in mount.error_pages.keys() {
            if !(400..=599).contains(status) {
                errors.push(ValidationError {
                    location: location.clone(),
                    field: "error_pages".into(),
                    message: format!("{status} is not an error status"),
                    suggestion: Some("use a status between 400 and 599".into()),
                });
            }
        }
    }

    let mut seen_hosts = HashSet::new();

    for (i, upstream) in config.upstreams.iter().enumerate() {
        let host = upstream.host_name.trim();
        if host.is_empty() {
            errors.push(ValidationError {
                location: format!("upstreams[{i}]"),
                field: "host_name".into(),
                message: "host_name cannot be empty".into(),
                suggestion: None,
            });
            continue;
        }

        if !seen_hosts.insert(host.to_ascii_lowercase()) {
            errors.push(ValidationError {
                location: format!("upstreams {host}"),
                field: "host_name".into(),
                message: "duplicate host_name".into(),
                suggestion: None,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[must_use]
pub fn format_validation_report(path: &str, config: &Config) -> String {
    let proxy = &config.proxy;
    let mut lines = vec![format!(
        "  port {} ({}), {} upstreams, {} static mounts\n",
        proxy.port,
        if proxy.is_tls_enabled() { "tls" } else { "plaintext" },
        config.upstreams.len(),
        proxy.static_files.len()
    )];

    for upstream in &config.upstreams {
        lines.push(format!("  {}  -> {}", upstream.host_name, upstream.target));
    }
    for mount in &proxy.static_files {
        let fallback = mount.fallback.as_deref().unwrap_or("none");
        lines.push(format!("  {}  -> {} (fallback: {fallback})", mount.path, mount.dir));
    }
    lines.push(format!(
        "  read_header_timeout: {}ms, shutdown_timeout: {}ms",
        proxy.read_header_timeout, proxy.shutdown_timeout
    ));

    format!("{} is valid\n{}", path, lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{Proxy, StaticMount, Upstream};

    fn minimal_config() -> Config {
        Config {
            proxy: Proxy {
                port: 8080,
                read_header_timeout: 2000,
                shutdown_timeout: 3000,
                tls_cert_path: String::new(),
                tls_key_path: String::new(),
                static_files: vec![StaticMount {
                    path: "/public/".into(),
                    dir: "testdata/public".into(),
                    ..Default::default()
                }],
            },
            upstreams: vec![Upstream {
                host_name: "backend1.local".into(),
                target: "http://localhost:8081".into(),
            }],
            log_level: 0,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate(&minimal_config()).is_ok());
    }

    #[test]
    fn zero_port_fails() {
        let mut config = minimal_config();
        config.proxy.port = 0;
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "port"));
    }

    #[test]
    fn half_configured_tls_fails() {
        let mut config = minimal_config();
        config.proxy.tls_cert_path = "cert.pem".into();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "tls_key_path"));
    }

    #[test]
    fn duplicate_hosts_fail() {
        let mut config = minimal_config();
        config.upstreams.push(Upstream {
            host_name: "Backend1.local".into(),
            target: "http://localhost:8082".into(),
        });
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("duplicate")));
    }

    #[test]
    fn empty_host_fails() {
        let mut config = minimal_config();
        config.upstreams[0].host_name = "  ".into();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "host_name"));
    }

    #[test]
    fn mount_path_without_slash_suggests_fix() {
        let mut config = minimal_config();
        config.proxy.static_files[0].path = "public/".into();
        let errors = validate(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.suggestion.as_deref() == Some("did you mean '/public/'?")));
    }

    #[test]
    fn non_error_status_page_fails() {
        let mut config = minimal_config();
        config.proxy.static_files[0]
            .error_pages
            .insert(200, "ok.html".into());
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "error_pages"));
    }

    #[test]
    fn target_urls_must_be_absolute_http() {
        assert!(validate_target_url("http://127.0.0.1:9001").is_ok());
        assert!(validate_target_url("https://backend.internal/base").is_ok());
        assert!(validate_target_url("://").is_err());
        assert!(validate_target_url(":invalid:url").is_err());
        assert!(validate_target_url("backend:8080/path").is_err());
        assert!(validate_target_url("ftp://files.local").is_err());
    }

    #[test]
    fn report_lists_upstreams_and_mounts() {
        let report = format_validation_report("config.yaml", &minimal_config());
        assert!(report.starts_with("config.yaml is valid"));
        assert!(report.contains("backend1.local  -> http://localhost:8081"));
        assert!(report.contains("/public/  -> testdata/public"));
    }
}
