//! Tracing subscriber setup for the binary

use crate::config::AnalysisConfig;
use crate::errors::{AnalysisError, Result};
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE_PREFIX: &str = "adgraph.log";

/// `RUST_LOG` wins over the configured level
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Installs the global subscriber: console output, plus a daily rolling
/// file when `log_dir` is set. Keep the returned guard alive until exit
/// or buffered file lines are lost.
pub fn init_logging(config: &AnalysisConfig) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // Console goes to stderr so JSON output on stdout stays clean
    let console_layer = fmt::layer().with_writer(io::stderr).with_ansi(true);

    tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| AnalysisError::ConfigError(format!("Failed to initialize logging: {}", e)))?;

    if let Some(dir) = &config.log_dir {
        tracing::info!("Log directory: {}", dir.display());
    }
    Ok(guard)
}
