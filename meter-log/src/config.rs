use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// The maximum level emitted by the meter crates.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Only errors.
    Error,
    /// Errors and warnings.
    Warn,
    /// Lifecycle messages, the default.
    #[default]
    Info,
    /// Per-request details.
    Debug,
    /// Everything.
    Trace,
    /// No logging at all.
    Off,
}

impl Level {
    /// Converts into the corresponding `tracing` filter.
    pub const fn level_filter(self) -> LevelFilter {
        match self {
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Info => LevelFilter::INFO,
            Level::Debug => LevelFilter::DEBUG,
            Level::Trace => LevelFilter::TRACE,
            Level::Off => LevelFilter::OFF,
        }
    }
}

/// Controls the log format.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Chooses [`LogFormat::Pretty`] on a TTY, otherwise [`LogFormat::Simplified`].
    #[default]
    Auto,

    /// Compact output with colors.
    ///
    /// ```text
    ///  INFO meter_server::service: collector listening on 127.0.0.1:8080
    /// ```
    Pretty,

    /// Plain text with timestamps.
    ///
    /// ```text
    /// 2024-03-04T12:10:32.120Z  INFO meter_server::service: collector listening on 127.0.0.1:8080
    /// ```
    Simplified,

    /// One JSON object per line.
    ///
    /// ```text
    /// {"timestamp":"2024-03-04T12:11:08.729716Z","level":"INFO","message":"collector listening on 127.0.0.1:8080","target":"meter_server::service"}
    /// ```
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// The log level for the meter crates. Third-party crates log at `info` at most.
    pub level: Level,

    /// Controls the log output format.
    pub format: LogFormat,

    /// When set to `true`, backtraces are forced on.
    ///
    /// Otherwise, backtraces can be enabled by setting `RUST_BACKTRACE` to `full`.
    pub enable_backtraces: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: LogFormat::Auto,
            enable_backtraces: false,
        }
    }
}
