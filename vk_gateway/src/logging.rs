//! Structured logging configuration.
//!
//! Console output for development, JSON lines for production. Plugin logs
//! are re-emitted through the same subscriber with a `plugin` field.

use std::{fmt, str::FromStr};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format selected by `LOG_FORMAT`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Console,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "pretty" | "text" => Ok(Self::Console),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}', expected console or json")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Console => write!(f, "console"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Initialize structured logging.
///
/// Levels come from `RUST_LOG`, defaulting to `info` with chatty HTTP
/// crates turned down.
pub fn init(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,hyper_util=warn,reqwest=warn"));
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Console => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);
            registry.with(fmt_layer).init();
        }
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_target(true);
            registry.with(fmt_layer).init();
        }
    }

    tracing::info!(%format, "structured logging initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_format() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("console".parse::<LogFormat>(), Ok(LogFormat::Console));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
