//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` registry with one fmt layer per output
//! enabled in [`LoggingConfig`]. `RUST_LOG` takes precedence over the
//! configured level. Installation uses `try_init`, so a second call (for
//! example from a second test in the same binary) is a no-op rather than a
//! panic.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber. Returns `Ok(false)` when one was already set.
pub fn init_logging(config: &LoggingConfig) -> Result<bool> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let installed = tracing_subscriber::registry()
        .with(output_layers(config)?)
        .with(filter)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    }
    Ok(installed)
}

fn output_layers(config: &LoggingConfig) -> Result<Vec<BoxedLayer>> {
    if !config.log_to_console && !config.log_to_file {
        return Err(ProtocolError::ConfigError(
            "at least one logging output must be enabled".into(),
        ));
    }

    let mut layers = Vec::with_capacity(2);
    if config.log_to_console {
        let layer = fmt::layer().with_target(true);
        layers.push(if config.json_format {
            layer.json().boxed()
        } else {
            layer.boxed()
        });
    }

    if config.log_to_file {
        let path = config.log_file_path.as_deref().ok_or_else(|| {
            ProtocolError::ConfigError("log_file_path must be set for file logging".into())
        })?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let layer = fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(Mutex::new(file));
        layers.push(if config.json_format {
            layer.json().boxed()
        } else {
            layer.boxed()
        });
    }
    Ok(layers)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config).unwrap();
        assert!(!init_logging(&config).unwrap());
    }

    #[test]
    fn test_file_logging_requires_path() {
        let config = LoggingConfig {
            log_to_file: true,
            log_file_path: None,
            ..LoggingConfig::default()
        };
        assert!(matches!(
            init_logging(&config),
            Err(ProtocolError::ConfigError(_))
        ));
    }

    #[test]
    fn test_one_layer_per_enabled_output() {
        let path = std::env::temp_dir().join(format!("peer-protocol-{}.log", std::process::id()));
        let file_only = LoggingConfig {
            log_to_console: false,
            log_to_file: true,
            log_file_path: Some(path.to_string_lossy().into_owned()),
            json_format: true,
            ..LoggingConfig::default()
        };
        assert_eq!(output_layers(&file_only).unwrap().len(), 1);

        let both = LoggingConfig {
            log_to_console: true,
            ..file_only.clone()
        };
        assert_eq!(output_layers(&both).unwrap().len(), 2);

        assert_eq!(output_layers(&LoggingConfig::default()).unwrap().len(), 1);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_no_outputs_rejected() {
        let config = LoggingConfig {
            log_to_console: false,
            log_to_file: false,
            ..LoggingConfig::default()
        };
        assert!(matches!(
            init_logging(&config),
            Err(ProtocolError::ConfigError(_))
        ));
    }
}
