//! Global `tracing` subscriber for embedders of the framework.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::error::{TelemetryError, TelemetryResult};

/// How often a file target starts a new file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRotation {
    /// One file per day.
    #[default]
    Daily,
    /// One file per hour.
    Hourly,
    /// A single ever-growing file.
    Never,
}

impl FileRotation {
    fn rotation(self) -> Rotation {
        match self {
            Self::Daily => Rotation::DAILY,
            Self::Hourly => Rotation::HOURLY,
            Self::Never => Rotation::NEVER,
        }
    }
}

/// Line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, indented fields.
    #[default]
    Pretty,
    /// One short line per event.
    Compact,
    /// One JSON object per line.
    Json,
    /// `tracing-subscriber`'s stock layout.
    Full,
}

impl LogFormat {
    /// Case-insensitive lookup of a format name; `None` if unknown.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::Pretty, Self::Compact, Self::Json, Self::Full]
            .into_iter()
            .find(|format| name.eq_ignore_ascii_case(format.name()))
    }

    /// Name as written in configuration files.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
            Self::Full => "full",
        }
    }
}

/// Where log lines go.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Standard output.
    Stdout,
    /// Standard error.
    #[default]
    Stderr,
    /// Rolling files under a directory.
    File {
        /// Directory, created on setup if missing.
        directory: PathBuf,
        /// File name prefix.
        prefix: String,
        /// Rotation schedule.
        #[serde(default)]
        rotation: FileRotation,
    },
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Base filter, e.g. `info` or `warn,tessel_framework=debug`.
    pub level: String,
    /// Line layout.
    pub format: LogFormat,
    /// Destination.
    pub target: LogTarget,
    /// Prefix each line with a timestamp.
    pub timestamps: bool,
    /// Prefix each line with the emitting thread's name. Useful when
    /// reading lock waits and start-level worker output.
    pub thread_names: bool,
    /// Extra directives layered over `level`.
    pub directives: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            timestamps: true,
            thread_names: false,
            directives: Vec::new(),
        }
    }
}

impl LogConfig {
    /// Defaults with `level` as the base filter.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Self::default()
        }
    }

    /// Use `format`.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Send output to `target`.
    #[must_use]
    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    /// Send output to rolling files in `directory`.
    #[must_use]
    pub fn with_file_logging(
        self,
        directory: impl Into<PathBuf>,
        prefix: impl Into<String>,
        rotation: FileRotation,
    ) -> Self {
        self.with_target(LogTarget::File {
            directory: directory.into(),
            prefix: prefix.into(),
            rotation,
        })
    }

    /// Add a directive such as `tessel_framework::lock=trace`.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Omit timestamps.
    #[must_use]
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    /// Include thread names.
    #[must_use]
    pub fn with_thread_names(mut self) -> Self {
        self.thread_names = true;
        self
    }

    fn filter(&self) -> TelemetryResult<EnvFilter> {
        let base = EnvFilter::try_new(&self.level)
            .map_err(|e| TelemetryError::ConfigError(format!("level '{}': {e}", self.level)))?;
        self.directives.iter().try_fold(base, |filter, directive| {
            directive
                .parse()
                .map(|d| filter.add_directive(d))
                .map_err(|e| TelemetryError::ConfigError(format!("directive '{directive}': {e}")))
        })
    }

    fn layer<W>(&self, writer: W, ansi: bool) -> Box<dyn Layer<Registry> + Send + Sync>
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_thread_names(self.thread_names);
        if self.timestamps {
            match self.format {
                LogFormat::Pretty => layer.pretty().boxed(),
                LogFormat::Compact => layer.compact().boxed(),
                LogFormat::Json => layer.json().boxed(),
                LogFormat::Full => layer.boxed(),
            }
        } else {
            let layer = layer.without_time();
            match self.format {
                LogFormat::Pretty => layer.pretty().boxed(),
                LogFormat::Compact => layer.compact().boxed(),
                LogFormat::Json => layer.json().boxed(),
                LogFormat::Full => layer.boxed(),
            }
        }
    }
}

/// Install the process-wide subscriber described by `config`.
///
/// # Errors
///
/// [`TelemetryError::ConfigError`] for a bad level or directive,
/// [`TelemetryError::IoError`] if the log directory cannot be created and
/// [`TelemetryError::InitError`] if a subscriber is already installed.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = config.filter()?;
    let layer = match &config.target {
        LogTarget::Stdout => config.layer(io::stdout, true),
        LogTarget::Stderr => config.layer(io::stderr, true),
        LogTarget::File {
            directory,
            prefix,
            rotation,
        } => {
            std::fs::create_dir_all(directory)?;
            let files = RollingFileAppender::new(rotation.rotation(), directory, prefix);
            config.layer(files, false)
        },
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| TelemetryError::InitError(e.to_string()))
}

/// [`setup_logging`] with [`LogConfig::default`].
///
/// # Errors
///
/// Fails if a subscriber is already installed.
pub fn setup_default_logging() -> TelemetryResult<()> {
    setup_logging(&LogConfig::default())
}
