//! `hostgate validate`: check a configuration file for errors.
//!
//! Parses and validates the config file, including the upstream target
//! URLs the gateway would reject at startup, and reports the result as
//! human-readable text or JSON.

use crate::cli::{ValidateArgs, ValidateFormat};
use crate::config::model::Config;
use crate::config::{self, parse_config_str, validation};
use crate::error::{GatewayError, ValidationError};

pub fn execute(args: &ValidateArgs) -> Result<(), GatewayError> {
    let path = &args.config;

    if !path.exists() {
        return Err(GatewayError::ConfigFileNotFound { path: path.clone() });
    }

    let raw = std::fs::read_to_string(path)?;
    let content = config::expand_env(&raw, |name| std::env::var(name).ok());

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let config = parse_config_str(ext, &content, &path.display().to_string())?;

    let errors = check(&config);
    if !errors.is_empty() {
        match args.format {
            ValidateFormat::Text => {
                eprintln!("\u{2717} {} has {} errors\n", path.display(), errors.len());
                for error in &errors {
                    eprintln!("{error}");
                }
            }
            ValidateFormat::Json => {
                let json_errors: Vec<serde_json::Value> = errors
                    .iter()
                    .map(|e| {
                        serde_json::json!({
                            "location": e.location,
                            "field": e.field,
                            "message": e.message,
                            "suggestion": e.suggestion,
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::json!({
                        "valid": false,
                        "errors": json_errors,
                    })
                );
            }
        }
        return Err(GatewayError::ConfigValidation { errors });
    }

    match args.format {
        ValidateFormat::Text => {
            println!(
                "\u{2713} {}",
                validation::format_validation_report(&path.display().to_string(), &config)
            );
        }
        ValidateFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "valid": true,
                    "port": config.proxy.port,
                    "tls": config.proxy.is_tls_enabled(),
                    "upstreams": config.upstreams.len(),
                    "static_mounts": config.proxy.static_files.len(),
                })
            );
        }
    }

    Ok(())
}

/// Structural errors plus one error per unusable upstream target.
fn check(config: &Config) -> Vec<ValidationError> {
    let mut errors = validation::validate(config).err().unwrap_or_default();

    for upstream in &config.upstreams {
        if let Err(reason) = validation::validate_target_url(&upstream.target) {
            errors.push(ValidationError {
                location: format!("upstreams {}", upstream.host_name),
                field: "target".into(),
                message: reason,
                suggestion: Some("use an absolute URL such as http://127.0.0.1:9001".into()),
            });
        }
    }

    errors
}
