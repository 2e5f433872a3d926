//! Telemetry (§4.11): installs the `tracing` subscriber. No metrics or
//! exporter layer is added — that is an "outer surface" concern the
//! specification explicitly excludes — but structured logging itself is
//! mandatory ambient stack regardless of the daemon's other Non-goals.

use std::str::FromStr;

use strum::EnumString;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Selects the `fmt` layer's encoding. `DEVNETD_LOG_FORMAT=json` is the shape
/// an operator wants once logs are shipped off the host instead of read from
/// a terminal; `pretty` is the default for local runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_env() -> Self {
        std::env::var("DEVNETD_LOG_FORMAT")
            .ok()
            .and_then(|raw| LogFormat::from_str(&raw).ok())
            .unwrap_or(LogFormat::Pretty)
    }
}

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter).with(tracing_error::ErrorLayer::default());
    let result = match LogFormat::from_env() {
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parses_known_values_and_rejects_others() {
        assert_eq!(LogFormat::from_str("json").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert!(LogFormat::from_str("xml").is_err());
    }
}
