//! Logging setup for the runtime binary.
//!
//! Console output always goes to stderr: in a worker process stdout is
//! the protocol channel. An optional daily rolling file is written to an
//! XDG-compliant location (`~/.local/share/toolbox-runtime/logs/` by
//! default). `RUST_LOG`, when set, overrides the configured level.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default application name used for the log directory and file.
pub const DEFAULT_APP_NAME: &str = "toolbox-runtime";

/// Logging configuration, the `[logging]` section of the config file.
///
/// # Example
///
/// ```rust
/// use toolbox_runtime::logging::{LogLevel, LoggingConfig};
///
/// let config = LoggingConfig::new()
///     .with_file(true)
///     .with_level(LogLevel::Debug);
/// assert!(config.file);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Whether to log to stderr.
    ///
    /// Default: true
    pub console: bool,
    /// Whether to also log to a daily rolling file.
    ///
    /// Default: false
    pub file: bool,
    /// Name used for the log file (`{app_name}.log`).
    pub app_name: String,
    /// Custom log directory. If None, uses XDG data dir + `toolbox-runtime/logs`.
    pub log_dir: Option<PathBuf>,
    /// Level filter.
    pub level: LogLevel,
}

impl LoggingConfig {
    /// Creates a new LoggingConfig with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables the file layer.
    #[must_use]
    pub fn with_file(mut self, enabled: bool) -> Self {
        self.file = enabled;
        self
    }

    /// Enables or disables the console layer.
    #[must_use]
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.console = enabled;
        self
    }

    /// Sets a custom log directory.
    #[must_use]
    pub fn with_log_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(path.into());
        self
    }

    /// Sets the level filter.
    #[must_use]
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console: true,
            file: false,
            app_name: DEFAULT_APP_NAME.to_string(),
            log_dir: None,
            level: LogLevel::default(),
        }
    }
}

/// Log level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Converts to a tracing_subscriber LevelFilter.
    #[must_use]
    pub fn to_filter(self) -> tracing_subscriber::filter::LevelFilter {
        match self {
            Self::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
            Self::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
            Self::Info => tracing_subscriber::filter::LevelFilter::INFO,
            Self::Warn => tracing_subscriber::filter::LevelFilter::WARN,
            Self::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        }
    }
}

/// Keeps the file writer alive; dropping it flushes pending lines.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

impl fmt::Debug for LoggingGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingGuard").finish_non_exhaustive()
    }
}

static LOGGING_GUARD: OnceLock<LoggingGuard> = OnceLock::new();

/// Errors that can occur during logging initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingError {
    /// The specific error that occurred.
    pub kind: LoggingErrorKind,
}

/// Specific logging error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggingErrorKind {
    /// Failed to determine the XDG data directory.
    NoDataDir,
    /// Failed to create the log directory.
    CreateDirFailed {
        /// The path that could not be created.
        path: PathBuf,
        /// The reason for failure.
        reason: String,
    },
    /// Subscriber initialization failed.
    SubscriberInitFailed {
        /// The reason for failure.
        reason: String,
    },
}

impl LoggingError {
    /// Creates a new LoggingError with the given kind.
    #[must_use]
    pub fn new(kind: LoggingErrorKind) -> Self {
        Self { kind }
    }

    /// Creates an error for a missing XDG data directory.
    #[must_use]
    pub fn no_data_dir() -> Self {
        Self::new(LoggingErrorKind::NoDataDir)
    }

    /// Creates an error for failed directory creation.
    #[must_use]
    pub fn create_dir_failed(path: PathBuf, reason: impl Into<String>) -> Self {
        Self::new(LoggingErrorKind::CreateDirFailed {
            path,
            reason: reason.into(),
        })
    }

    /// Creates an error for subscriber initialization failure.
    #[must_use]
    pub fn subscriber_init_failed(reason: impl Into<String>) -> Self {
        Self::new(LoggingErrorKind::SubscriberInitFailed {
            reason: reason.into(),
        })
    }
}

impl fmt::Display for LoggingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            LoggingErrorKind::NoDataDir => write!(
                f,
                "could not determine XDG data directory; \
                 set XDG_DATA_HOME or use a custom log_dir"
            ),
            LoggingErrorKind::CreateDirFailed { path, reason } => write!(
                f,
                "failed to create log directory '{}': {}; check permissions",
                path.display(),
                reason
            ),
            LoggingErrorKind::SubscriberInitFailed { reason } => write!(
                f,
                "failed to initialize tracing subscriber: {}; \
                 a subscriber may already be set",
                reason
            ),
        }
    }
}

impl std::error::Error for LoggingError {}

/// Returns the directory log files go to.
///
/// # Errors
///
/// Returns an error when no custom directory is set and the XDG data
/// directory cannot be determined.
pub fn log_dir(config: &LoggingConfig) -> Result<PathBuf, LoggingError> {
    if let Some(ref custom_dir) = config.log_dir {
        return Ok(custom_dir.clone());
    }
    dirs::data_local_dir()
        .map(|dir| dir.join(DEFAULT_APP_NAME).join("logs"))
        .ok_or_else(LoggingError::no_data_dir)
}

fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.to_filter().into())
        .from_env_lossy()
}

/// Installs the global subscriber described by `config`.
///
/// The file writer's guard is stored for the lifetime of the process.
/// Returns false if logging was already initialized.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or another
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<bool, LoggingError> {
    if LOGGING_GUARD.get().is_some() {
        return Ok(false);
    }

    let console = config.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    let (file, guard) = if config.file {
        let dir = log_dir(config)?;
        std::fs::create_dir_all(&dir)
            .map_err(|e| LoggingError::create_dir_failed(dir.clone(), e.to_string()))?;
        let appender = tracing_appender::rolling::daily(&dir, format!("{}.log", config.app_name));
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter(config.level))
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| LoggingError::subscriber_init_failed(e.to_string()))?;

    if let Some(guard) = guard {
        let _ = LOGGING_GUARD.set(LoggingGuard { _guard: guard });
    }
    Ok(true)
}
