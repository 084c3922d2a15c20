use std::io::{self, IsTerminal};
use std::str::FromStr;
use tracing_subscriber::{EnvFilter, fmt};

/// How diagnostics are rendered on stderr.
///
/// Stdout is reserved for echoed lines, so logging never goes there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format {other:?} (expected json or pretty)")),
        }
    }
}

/// JSON when stderr is piped or redirected, human-readable on a terminal.
pub fn default_log_format() -> LogFormat {
    if io::stderr().is_terminal() {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

pub fn init_logging(format: Option<LogFormat>) {
    // tokio-console owns the subscriber when enabled
    if std::env::var("TOKIO_CONSOLE").is_ok() {
        console_subscriber::init();
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format.unwrap_or_else(default_log_format) {
        LogFormat::Json => fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .json()
            .flatten_event(true)
            .init(),
        LogFormat::Pretty => fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_target(false)
            .init(),
    }
}
