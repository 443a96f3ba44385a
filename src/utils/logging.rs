//! # Logging
//!
//! Installs a `tracing-subscriber` formatter according to [`LoggingConfig`].
//!
//! The server never depends on logging being available: if the log file cannot be opened
//! the formatter falls back to stderr, and if another subscriber is already installed the
//! call reports it on stderr and carries on.

use crate::config::LoggingConfig;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::fmt;

/// Install the global subscriber. Returns `true` if this call installed it.
///
/// When `log_to_file` is set and the file opens, logs go to the file; otherwise they go
/// to stderr.
pub fn init_logging(config: &LoggingConfig) -> bool {
    if config.log_to_file {
        if let Some(path) = config.log_file_path.as_deref() {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    let builder = fmt()
                        .with_max_level(config.log_level)
                        .with_ansi(false)
                        .with_writer(Mutex::new(file));
                    let result = if config.json_format {
                        builder.json().try_init()
                    } else {
                        builder.try_init()
                    };
                    return report(config, result);
                }
                Err(e) => eprintln!(
                    "[{}] cannot open log file {path}: {e}; logging to console",
                    config.app_name
                ),
            }
        }
    }

    let builder = fmt()
        .with_max_level(config.log_level)
        .with_writer(std::io::stderr);
    let result = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    report(config, result)
}

fn report(
    config: &LoggingConfig,
    result: std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>,
) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            eprintln!("[{}] logging not initialised: {e}", config.app_name);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_degrades_without_panicking() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(!init_logging(&config));
    }

    #[test]
    fn unopenable_file_falls_back_to_console() {
        let config = LoggingConfig {
            log_to_file: true,
            log_file_path: Some("/nonexistent-dir/stagewire/server.log".into()),
            ..LoggingConfig::default()
        };
        // Either installs the console subscriber or finds one already installed
        let _ = init_logging(&config);
    }
}
