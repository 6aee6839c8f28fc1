use tracing::Level;
use tracing_subscriber::util::TryInitError;

use crate::config::{LogFormat, LoggingConfig};

/// Installs the global fmt subscriber described by `config`.
///
/// Returns an error when a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TryInitError> {
    use tracing_subscriber::util::SubscriberInitExt;

    let log_level = max_level(config);

    match config.format {
        LogFormat::Compact => {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_max_level(log_level)
                .compact()
                .finish()
                .try_init()
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_max_level(log_level)
                .pretty()
                .finish()
                .try_init()
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_max_level(log_level)
                .json()
                .finish()
                .try_init()
        }
    }
}

pub fn max_level(config: &LoggingConfig) -> Level {
    config.level.trim().parse::<Level>().unwrap_or(Level::INFO)
}
