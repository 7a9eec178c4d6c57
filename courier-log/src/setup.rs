use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::crates;

/// Controls the log format.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    #[default]
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO  courier_transmission::transmitter > sender capacity restored
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2024-12-04T12:10:32Z  INFO courier_transmission::transmitter: sender capacity restored
    /// ```
    Simplified,

    /// Dump out JSON lines.
    ///
    /// ```text
    /// {"timestamp":"2024-12-04T12:11:08.729716Z","level":"INFO","target":"courier_transmission::transmitter","message":"sender capacity restored"}
    /// ```
    Json,
}

/// The logging level parse error.
#[derive(Clone, Debug)]
pub struct LevelParseError(String);

impl std::fmt::Display for LevelParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as level: expected one of "error", "warn", "info", "debug", "trace", "off""#,
            self.0
        )
    }
}

impl std::error::Error for LevelParseError {}

/// The maximum level of log messages emitted by courier crates.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// The "error" level.
    Error,
    /// The "warn" level.
    Warn,
    /// The "info" level.
    #[default]
    Info,
    /// The "debug" level.
    Debug,
    /// The "trace" level.
    Trace,
    /// No logs will be emitted.
    Off,
}

impl LogLevel {
    /// Returns the tracing [`LevelFilter`] for this level.
    pub const fn level_filter(&self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Off => LevelFilter::OFF,
        }
    }
}

impl LogLevel {
    /// Returns the lowercase name used in configuration and filter directives.
    pub const fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
            LogLevel::Off => "off",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = LevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogLevel::Error,
            s if s.eq_ignore_ascii_case("error") => LogLevel::Error,
            s if s.eq_ignore_ascii_case("warn") => LogLevel::Warn,
            s if s.eq_ignore_ascii_case("info") => LogLevel::Info,
            s if s.eq_ignore_ascii_case("debug") => LogLevel::Debug,
            s if s.eq_ignore_ascii_case("trace") => LogLevel::Trace,
            s if s.eq_ignore_ascii_case("off") => LogLevel::Off,
            s => return Err(LevelParseError(s.into())),
        };

        Ok(result)
    }
}

/// Controls the logging system.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// The log level for courier crates.
    pub level: LogLevel,

    /// Controls the log output format.
    ///
    /// Defaults to [`LogFormat::Auto`], which detects the best format based on the TTY.
    pub format: LogFormat,
}

/// Builds the default filter: third-party crates log at INFO, courier crates at the configured
/// level.
fn default_filter(level: LogLevel) -> EnvFilter {
    let level = level.as_str();
    EnvFilter::new(crates::directives("info", |_| level))
}

/// Initialize the logging system.
///
/// The `RUST_LOG` environment variable takes precedence over the configured level. Calling this
/// function more than once has no effect.
///
/// # Example
///
/// ```
/// let log_config = courier_log::LogConfig {
///     level: courier_log::LogLevel::Debug,
///     ..Default::default()
/// };
///
/// courier_log::init(&log_config);
/// ```
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(config.level));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match (config.format, console::user_attended()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => {
            registry.with(fmt::layer().pretty().with_target(true)).try_init()
        }
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => registry
            .with(fmt::layer().compact().with_ansi(false).with_target(true))
            .try_init(),
        (LogFormat::Json, _) => registry
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .try_init(),
    };

    if result.is_err() {
        crate::debug!("logging was already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("off".parse::<LogLevel>().unwrap(), LogLevel::Off);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_default_filter_covers_workspace() {
        let filter = default_filter(LogLevel::Debug).to_string().to_lowercase();
        assert!(filter.contains("courier_log=debug"), "{filter}");
    }

    #[test]
    fn test_deserialize_config() {
        let json = r#"{"level":"debug","format":"json"}"#;
        let config: LogConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Json);
    }
}
