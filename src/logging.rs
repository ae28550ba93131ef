//! Logging setup: rolling daily file plus console output via `tracing`.

use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::AudiologResult;

/// Logging configuration consumed by [`init_logging`].
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub max_level: tracing::Level,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            max_level: if cfg!(debug_assertions) {
                tracing::Level::DEBUG
            } else {
                tracing::Level::INFO
            },
        }
    }
}

/// Initialize the logging system with the provided configuration.
///
/// Development builds get pretty console-style output; release builds log
/// JSON. Both write through a non-blocking daily-rotated file appender.
pub fn init_logging(config: LoggingConfig) -> AudiologResult<()> {
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, "audiolog.log");

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    std::mem::forget(guard); // keep the writer alive for the process lifetime

    let env_filter = create_env_filter(&config);

    if cfg!(debug_assertions) {
        fmt()
            .with_env_filter(env_filter)
            .with_writer(non_blocking)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(false)
            .pretty()
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_writer(non_blocking)
            .json()
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    }

    tracing::info!(
        log_dir = %config.log_dir.display(),
        json_enabled = !cfg!(debug_assertions),
        "Logging initialized"
    );

    Ok(())
}

fn create_env_filter(config: &LoggingConfig) -> EnvFilter {
    // Environment wins; otherwise root level from config with the crate
    // itself allowed down to debug.
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level_str = match config.max_level {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        };

        EnvFilter::new(format!("{},audiolog=debug", level_str))
    })
}

/// Default log directory, next to the recorder's data.
pub fn default_log_dir() -> PathBuf {
    if cfg!(target_os = "macos") {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library/Logs/audiolog")
    } else if cfg!(target_os = "windows") {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("audiolog")
            .join("logs")
    } else {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("audiolog")
            .join("logs")
    }
}
