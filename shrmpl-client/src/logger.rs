//! # Leveled Logger
//!
//! Thin convenience layer over [`LogClient`]: a fixed host name, a minimum
//! level, an activity toggle and a lazy (re)connect to the configured sink.
//! Every accepted record is also mirrored to `tracing`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use shrmpl_common::{ClientResult, ConfigError, Settings, TcpOptions};

use crate::log_client::LogClient;
use crate::log_frame::LogRecord;

/// Severity of a log record, with its 4-byte wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    /// Audit-style activity records; ranks with `Info` for filtering.
    Activity,
}

impl LogLevel {
    /// Four-byte code written into the frame.
    pub fn code(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERRO",
            LogLevel::Activity => "ACTV",
        }
    }

    fn rank(self) -> u8 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info | LogLevel::Activity => 1,
            LogLevel::Warn => 2,
            LogLevel::Error => 3,
        }
    }

    /// True when a record at `level` passes a `self` threshold.
    pub fn allows(self, level: LogLevel) -> bool {
        level.rank() >= self.rank()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    /// Accepts both names (`DEBUG`, `ERROR`) and wire codes (`DEBG`, `ERRO`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" | "DEBG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" | "ERRO" => Ok(LogLevel::Error),
            "ACTV" | "ACTIVITY" => Ok(LogLevel::Activity),
            _ => Err(ConfigError::Invalid {
                key: "LOG_LEVEL".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// `host:port` of the log sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogDestination {
    pub host: String,
    pub port: u16,
}

impl FromStr for LogDestination {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::Invalid {
            key: "SLOG_DEST".to_string(),
            value: s.to_string(),
        };
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(LogDestination {
            host: host.to_string(),
            port,
        })
    }
}

/// Settings for [`Logger`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Sink address; `None` disables network delivery.
    pub destination: Option<LogDestination>,
    /// Host field written into every frame (at most 32 bytes).
    pub host: String,
    /// Records below this level are discarded.
    pub min_level: LogLevel,
    /// Deliver `ACTV` records to the sink.
    pub send_activity: bool,
    /// Deliver records to the sink at all.
    pub send_log: bool,
    pub tcp: TcpOptions,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            destination: None,
            host: "localhost".to_string(),
            min_level: LogLevel::Info,
            send_activity: false,
            send_log: true,
            tcp: TcpOptions::default(),
        }
    }
}

impl LoggerConfig {
    /// Reads `SLOG_DEST`, `SERVER_NAME`, `LOG_LEVEL`, `SEND_ACTV` and `SEND_LOG`.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let defaults = LoggerConfig::default();
        let destination = match settings.get("SLOG_DEST") {
            Some(dest) if !dest.is_empty() => Some(dest.parse::<LogDestination>()?),
            _ => None,
        };
        let min_level = match settings.get("LOG_LEVEL") {
            Some(level) => level.parse::<LogLevel>()?,
            None => defaults.min_level,
        };
        Ok(LoggerConfig {
            destination,
            host: settings
                .get("SERVER_NAME")
                .map(str::to_string)
                .unwrap_or(defaults.host),
            min_level,
            send_activity: settings.get_bool("SEND_ACTV", defaults.send_activity)?,
            send_log: settings.get_bool("SEND_LOG", defaults.send_log)?,
            tcp: defaults.tcp,
        })
    }
}

/// Leveled logger that ships records to the log sink.
#[derive(Debug)]
pub struct Logger {
    config: LoggerConfig,
    client: LogClient,
}

impl Logger {
    /// Creates a logger. The sink is contacted on the first delivered record.
    pub fn new(config: LoggerConfig) -> Self {
        let client = LogClient::with_options(config.tcp.clone());
        Logger { config, client }
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// Filters, validates, mirrors to `tracing`, and delivers one record.
    ///
    /// Returns `Ok(())` for records that are filtered out. Invalid records are
    /// rejected even when delivery is disabled, and never reach `tracing`.
    /// Delivery failures are returned; the next call reconnects.
    pub fn log(&mut self, level: LogLevel, code: &str, message: &str) -> ClientResult<()> {
        if !self.config.min_level.allows(level) {
            return Ok(());
        }
        LogRecord::new(level.code(), &self.config.host, code, message)?;
        mirror(level, &self.config.host, code, message);

        if !self.should_send(level) {
            return Ok(());
        }
        let Some(destination) = self.config.destination.as_ref() else {
            return Ok(());
        };

        if !self.client.is_connected() {
            debug!(host = %destination.host, port = destination.port, "connecting to log sink");
            self.client.connect(&destination.host, destination.port)?;
        }
        self.client
            .send(level.code(), &self.config.host, code, message)
    }

    pub fn debug(&mut self, code: &str, message: &str) -> ClientResult<()> {
        self.log(LogLevel::Debug, code, message)
    }

    pub fn info(&mut self, code: &str, message: &str) -> ClientResult<()> {
        self.log(LogLevel::Info, code, message)
    }

    pub fn warn(&mut self, code: &str, message: &str) -> ClientResult<()> {
        self.log(LogLevel::Warn, code, message)
    }

    pub fn error(&mut self, code: &str, message: &str) -> ClientResult<()> {
        self.log(LogLevel::Error, code, message)
    }

    pub fn activity(&mut self, code: &str, message: &str) -> ClientResult<()> {
        self.log(LogLevel::Activity, code, message)
    }

    pub fn close(&mut self) {
        self.client.close();
    }

    fn should_send(&self, level: LogLevel) -> bool {
        self.config.send_log && (level != LogLevel::Activity || self.config.send_activity)
    }
}

fn mirror(level: LogLevel, host: &str, code: &str, message: &str) {
    match level {
        LogLevel::Debug => debug!(host, code, "{}", message),
        LogLevel::Info | LogLevel::Activity => info!(host, code, level = level.code(), "{}", message),
        LogLevel::Warn => warn!(host, code, "{}", message),
        LogLevel::Error => error!(host, code, "{}", message),
    }
}
