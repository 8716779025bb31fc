//! Logging configuration

use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::errors::LaunchpadError;

/// Verbosity of the daemon and CLI logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    #[value(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    fn directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Logging options
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Log level
    pub log_level: LogLevel,

    /// Write logs to stdout
    pub stdout: bool,

    /// Directory for the daily-rolling daemon log, `None` disables file output
    pub log_dir: Option<PathBuf>,

    /// Enable JSON format
    pub json_format: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            stdout: true,
            log_dir: None,
            json_format: false,
        }
    }
}

/// Initialize logging.
///
/// The returned guard flushes the file writer on drop and must be held for the
/// lifetime of the process.
pub fn init_logging(options: LogOptions) -> Result<Option<WorkerGuard>, LaunchpadError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.log_level.directive()));

    let mut layers = Vec::new();

    if options.stdout {
        if options.json_format {
            layers.push(fmt::layer().json().boxed());
        } else {
            layers.push(fmt::layer().boxed());
        }
    }

    let mut guard = None;
    if let Some(log_dir) = &options.log_dir {
        std::fs::create_dir_all(log_dir)?;
        let appender = tracing_appender::rolling::daily(log_dir, "launchpad.log");
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| LaunchpadError::ConfigError(e.to_string()))?;

    Ok(guard)
}
