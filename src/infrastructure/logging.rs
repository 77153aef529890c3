//! Logger initialization using tracing.

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::services::config::{ConfigError, LogConfig};

/// Holds the non-blocking writer guard; dropping it flushes file logs.
pub struct Logging {
    _guard: Option<WorkerGuard>,
}

/// Initialize the global subscriber from config. `RUST_LOG` still wins
/// over the configured level when set.
pub fn init(config: &LogConfig) -> Result<Logging, ConfigError> {
    let level = parse_level(&config.level)?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let (file_layer, guard) = match config.log_dir {
        Some(ref dir) => {
            let appender = rolling::daily(dir, "gpilot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stdout_layer = if config.format == "json" {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(Logging { _guard: guard })
}

fn parse_level(level: &str) -> Result<Level, ConfigError> {
    match level {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(ConfigError::Invalid {
            field: "logging.level".into(),
            reason: format!("unknown level '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse() {
        assert_eq!(parse_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_level("warn").unwrap(), Level::WARN);
        assert!(parse_level("loud").is_err());
    }
}
