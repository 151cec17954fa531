//! Process-wide log setup for the binary.

use tracing::level_filters::LevelFilter;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::LoggingError;

/// Accepted `--log-level` names.
pub const LOG_LEVELS: &[&str] = &["critical", "error", "warning", "info", "debug"];

/// Maps a level name to a filter. `critical` has no tracing equivalent and
/// maps to `error`.
pub fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "critical" | "error" => Ok(LevelFilter::ERROR),
        "warning" | "warn" => Ok(LevelFilter::WARN),
        "info" => Ok(LevelFilter::INFO),
        "debug" => Ok(LevelFilter::DEBUG),
        _ => Err(LoggingError::UnknownLevel(level.to_string())),
    }
}

/// Installs the global subscriber. `RUST_LOG`, when set, takes precedence
/// over `level`. Call once.
pub fn init_logging(level: &str) -> Result<(), LoggingError> {
    let default_level = parse_level(level)?;
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    LogTracer::init()?;

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("critical").unwrap(), LevelFilter::ERROR);
        assert_eq!(parse_level("WARNING").unwrap(), LevelFilter::WARN);
        assert_eq!(parse_level(" info ").unwrap(), LevelFilter::INFO);
        assert_eq!(parse_level("debug").unwrap(), LevelFilter::DEBUG);
        assert!(matches!(
            parse_level("verbose"),
            Err(LoggingError::UnknownLevel(level)) if level == "verbose"
        ));
    }

    #[test]
    fn test_every_listed_level_parses() {
        for level in LOG_LEVELS {
            assert!(parse_level(level).is_ok(), "{}", level);
        }
    }
}
