//! Structured logging setup using the `tracing` ecosystem.
//!
//! [`build`] assembles a `tracing-subscriber` registry with either JSON
//! output (for production) or pretty-printed output (for TTY / local dev)
//! and returns it as a [`Dispatch`] instead of installing it. The gateway
//! and its handlers receive that dispatch explicitly; only the binary entry
//! point makes it the process default.

use tracing::Dispatch;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt};

use crate::cli::LogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[must_use]
pub fn resolve_format(pretty: bool, json: bool) -> LogFormat {
    if json {
        LogFormat::Json
    } else if pretty || std::io::IsTerminal::is_terminal(&std::io::stdout()) {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

/// Build a dispatch writing to `writer` at `level` in the given format.
///
/// JSON records carry the event fields at the top level and the fields of
/// the enclosing span under `span`, so a `trace_id` recorded on a request
/// span shows up on every record emitted inside it.
pub fn build<W>(level: &LogLevel, format: LogFormat, writer: W) -> Dispatch
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = Targets::new().with_default(level.to_tracing_level());

    match format {
        LogFormat::Json => Dispatch::new(
            tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_current_span(true)
                    .with_span_list(false)
                    .flatten_event(true)
                    .with_writer(writer),
            ),
        ),
        LogFormat::Pretty => Dispatch::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty().with_writer(writer)),
        ),
    }
}

/// Build the stdout dispatch used by the binary.
#[must_use]
pub fn stdout(level: &LogLevel, format: LogFormat) -> Dispatch {
    build(level, format, std::io::stdout)
}

/// In-memory log sink.
///
/// [`Capture`] is a `MakeWriter` over a shared buffer, so a dispatch built
/// with it can be inspected after the fact. JSON records are looked up by
/// their `message`.
pub mod capture {
    use std::io::Write;
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use std::time::Duration;

    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Debug, Clone, Default)]
    pub struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buffer().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    impl Capture {
        #[must_use]
        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.buffer()).into_owned()
        }

        /// JSON records whose `message` equals `message`.
        #[must_use]
        pub fn records(&self, message: &str) -> Vec<serde_json::Value> {
            self.text()
                .lines()
                .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
                .filter(|v| v["message"] == message)
                .collect()
        }

        /// Poll for up to two seconds until at least `n` records with
        /// `message` exist, then return whatever is there.
        ///
        /// An access log is written when the server drops the response
        /// body, which can land just after the client has read it.
        pub async fn wait_for(&self, message: &str, n: usize) -> Vec<serde_json::Value> {
            for _ in 0..100 {
                let records = self.records(message);
                if records.len() >= n {
                    return records;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            self.records(message)
        }

        fn buffer(&self) -> MutexGuard<'_, Vec<u8>> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }
}
