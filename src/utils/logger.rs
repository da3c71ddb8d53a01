use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_log::LogTracer;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

use crate::errors::{ConfigError, Result};

// Keeps the non-blocking file writer's worker thread alive.
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

const DEFAULT_LOG_LEVEL: &str = "info";

fn default_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_console() -> bool {
    true
}

/// Logger configuration structure
///
/// ```
/// use std::path::PathBuf;
/// use qstream::utils::logger::LoggerConfig;
///
/// let config = LoggerConfig::new()
///     .with_level("debug")
///     .with_file_path(PathBuf::from("./logs/qstream.log"))
///     .with_console(true);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Log level filter (trace, debug, info, warn, error or an EnvFilter directive)
    #[serde(default = "default_level")]
    pub level: String,
    /// Optional file path; the file rotates daily
    pub file_path: Option<PathBuf>,
    /// Whether to enable console output
    #[serde(default = "default_console")]
    pub enable_console: bool,
    /// Whether to use JSON format for logs
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_path: None,
            enable_console: true,
            json_format: false,
        }
    }
}

impl LoggerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: impl AsRef<str>) -> Self {
        self.level = level.as_ref().into();
        self
    }

    pub fn with_file_path(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_console(mut self, enable: bool) -> Self {
        self.enable_console = enable;
        self
    }

    pub fn with_json(mut self, enable: bool) -> Self {
        self.json_format = enable;
        self
    }

    /// Initialize the logger with this configuration
    pub fn init(self) -> Result<()> {
        init_logger(self)
    }
}

/// True when `QSTREAM_DISABLE_LOGS` (or `DISABLE_LOGS`) is set to a truthy value.
pub fn is_logging_disabled() -> bool {
    let value = env::var("QSTREAM_DISABLE_LOGS")
        .or_else(|_| env::var("DISABLE_LOGS"))
        .unwrap_or_default();
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Installs the global tracing subscriber and bridges the `log` facade into it.
///
/// Only the first call installs anything; later calls return `Ok(())`. `RUST_LOG`
/// overrides `config.level` when set.
pub fn init_logger(config: LoggerConfig) -> Result<()> {
    if is_logging_disabled() {
        LOGGER_INITIALIZED.store(true, Ordering::SeqCst);
        return Ok(());
    }
    if LOGGER_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::warn!("Logger already initialized, skipping re-initialization");
        return Ok(());
    }

    let _ = LogTracer::builder()
        .with_max_level(log::LevelFilter::Trace)
        .init();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = OffsetTime::new(local_offset, Rfc3339);

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.enable_console {
        if config.json_format {
            layers.push(fmt::layer().json().with_timer(timer.clone()).boxed());
        } else {
            layers.push(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_timer(timer.clone())
                    .boxed(),
            );
        }
    }

    if let Some(file_path) = config.file_path {
        let dir = match file_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let prefix = file_path
            .file_stem()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "qstream".to_string());
        let file_appender = tracing_appender::rolling::Builder::new()
            .rotation(Rotation::DAILY)
            .filename_prefix(prefix)
            .filename_suffix("log")
            .build(&dir)
            .map_err(|e| ConfigError::Load(e.into()))?;

        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
        let _ = FILE_GUARD.set(guard);

        let layer = if config.json_format {
            fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_timer(timer.clone())
                .boxed()
        } else {
            fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer)
                .with_timer(timer)
                .boxed()
        };
        layers.push(layer);
    }

    let _ = tracing_subscriber::registry().with(layers).with(filter).try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_config_builder() {
        let config = LoggerConfig::new()
            .with_level("debug")
            .with_file_path(PathBuf::from("./test.log"))
            .with_console(false)
            .with_json(true);

        assert_eq!(config.level, "debug");
        assert_eq!(config.file_path, Some(PathBuf::from("./test.log")));
        assert!(!config.enable_console);
        assert!(config.json_format);
    }

    #[test]
    fn test_logger_config_defaults_from_toml() {
        let config: LoggerConfig = toml::from_str("").unwrap();
        assert_eq!(config.level, "info");
        assert!(config.enable_console);
        assert!(config.file_path.is_none());
    }

    #[test]
    fn test_logger_init_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggerConfig::new()
            .with_level("debug")
            .with_console(false)
            .with_file_path(dir.path().join("qstream.log"));

        // Global state; a second init is a no-op either way.
        init_logger(config).unwrap();
        init_logger(LoggerConfig::new()).unwrap();

        log::info!("logger initialized");
    }
}
