//! Command-line interface definitions using clap derive macros.
//!
//! Contains the top-level [`Cli`] parser, the [`Commands`] enum for
//! subcommands (run, validate), and their associated argument structs.
//! Flags that matter in containers have an environment variable
//! equivalent.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "hostgate",
    version,
    about = "Host-based HTTP(S) reverse-proxy gateway",
    propagate_version = true,
    after_help = "\x1b[1mQuick start:\x1b[0m\n  \
        hostgate run                         Start with ./hostgate.yaml\n  \
        hostgate run -c gateway.yaml         Start with a specific config\n  \
        hostgate validate gateway.yaml       Check a config without listening"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway
    Run(RunArgs),

    /// Validate a config file without starting
    Validate(ValidateArgs),
}

#[derive(Args)]
#[command(after_help = "\x1b[1mExamples:\x1b[0m\n  \
        hostgate run                                  Auto-detect config\n  \
        hostgate run -c gateway.yaml                  Specific config file\n  \
        hostgate run -c gateway.yaml --pretty -l debug  Local dev mode")]
pub struct RunArgs {
    /// Config file path (.yaml, .yml, .json)
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Log level (overrides `log_level` from the config file)
    #[arg(short, long, env = "LOG_LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Force pretty (human-readable) log output
    #[arg(long)]
    pub pretty: bool,

    /// Force JSON log output (overrides TTY detection)
    #[arg(long, conflicts_with = "pretty")]
    pub json: bool,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Config file to validate
    #[arg(default_value = "hostgate.yaml")]
    pub config: PathBuf,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: ValidateFormat,
}

#[derive(Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }

    /// Map the numeric `log_level` from the config file
    /// (debug -4, info 0, warn 4, error 8) onto a level. Values between the
    /// named steps round down to the more verbose level.
    #[must_use]
    pub const fn from_config(level: i32) -> Self {
        if level < 0 {
            Self::Debug
        } else if level < 4 {
            Self::Info
        } else if level < 8 {
            Self::Warn
        } else {
            Self::Error
        }
    }
}

#[derive(Clone, Debug, ValueEnum)]
pub enum ValidateFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_levels_map_to_named_steps() {
        assert_eq!(LogLevel::from_config(-4), LogLevel::Debug);
        assert_eq!(LogLevel::from_config(-1), LogLevel::Debug);
        assert_eq!(LogLevel::from_config(0), LogLevel::Info);
        assert_eq!(LogLevel::from_config(1), LogLevel::Info);
        assert_eq!(LogLevel::from_config(4), LogLevel::Warn);
        assert_eq!(LogLevel::from_config(8), LogLevel::Error);
        assert_eq!(LogLevel::from_config(12), LogLevel::Error);
    }

    #[test]
    fn run_accepts_config_and_overrides() {
        let cli = Cli::try_parse_from(["hostgate", "run", "-c", "gw.yaml", "-l", "debug", "--json"])
            .unwrap();
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(args.config, Some(PathBuf::from("gw.yaml")));
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert!(args.json);
    }

    #[test]
    fn pretty_conflicts_with_json() {
        assert!(Cli::try_parse_from(["hostgate", "run", "--pretty", "--json"]).is_err());
    }
}
