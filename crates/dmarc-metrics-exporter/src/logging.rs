//! Tracing subscriber setup.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingSettings;
use crate::{Error, Result};

/// Maps a configured level name to a tracing filter directive.
pub fn parse_level(level: &str) -> Result<&'static str> {
    match level.to_ascii_lowercase().as_str() {
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warning" | "warn" => Ok("warn"),
        "error" | "critical" => Ok("error"),
        other => Err(Error::Config(format!("invalid log level {other:?}"))),
    }
}

/// Builds the filter: `--debug` forces debug, then `RUST_LOG`, then the
/// configured level.
pub fn filter(settings: &LoggingSettings, debug: bool) -> Result<EnvFilter> {
    if debug {
        return Ok(EnvFilter::new("debug"));
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    Ok(EnvFilter::new(parse_level(&settings.level)?))
}

/// Installs the global subscriber.
pub fn init(settings: &LoggingSettings, debug: bool) -> Result<()> {
    let json = settings.json;

    tracing_subscriber::registry()
        .with(filter(settings, debug)?)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .try_init()
        .map_err(|e| Error::Config(format!("cannot install logger: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn level_names() {
        assert_eq!(parse_level("debug").unwrap(), "debug");
        assert_eq!(parse_level("INFO").unwrap(), "info");
        assert_eq!(parse_level("warning").unwrap(), "warn");
        assert_eq!(parse_level("critical").unwrap(), "error");
        assert!(parse_level("verbose").is_err());
    }

    #[test]
    fn debug_flag_wins() {
        let settings = LoggingSettings {
            level: "error".to_string(),
            json: false,
        };
        assert_eq!(filter(&settings, true).unwrap().to_string(), "debug");
    }
}
