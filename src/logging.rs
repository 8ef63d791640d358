//! Logging hooks for request/response traffic
//!
//! Diagnostics go through `tracing`. Applications that want the traffic in
//! their own sink (a UI console, a ring buffer) attach a [`CallbackLogger`].

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::protocol::UnitId;

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Where log records go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingMode {
    Disabled,
    /// Only the `tracing` macros
    #[default]
    Tracing,
    /// Only the user callback
    Callback,
    Both,
}

/// User callback receiving formatted records
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Logger forwarding records to `tracing` and/or a user callback
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<LogCallback>,
    mode: LoggingMode,
    min_level: LogLevel,
}

impl fmt::Debug for CallbackLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackLogger")
            .field("has_callback", &self.callback.is_some())
            .field("mode", &self.mode)
            .field("min_level", &self.min_level)
            .finish()
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self {
            callback: None,
            mode: LoggingMode::Tracing,
            min_level: LogLevel::Info,
        }
    }
}

impl CallbackLogger {
    /// Logger delivering records to `callback` only
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(LogLevel, &str) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
            mode: LoggingMode::Callback,
            min_level: LogLevel::Info,
        }
    }

    pub fn with_mode(mut self, mode: LoggingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn mode(&self) -> LoggingMode {
        self.mode
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if level < self.min_level {
            return;
        }

        if matches!(self.mode, LoggingMode::Tracing | LoggingMode::Both) {
            match level {
                LogLevel::Trace => trace!("{}", message),
                LogLevel::Debug => debug!("{}", message),
                LogLevel::Info => info!("{}", message),
                LogLevel::Warn => warn!("{}", message),
                LogLevel::Error => error!("{}", message),
            }
        }

        if matches!(self.mode, LoggingMode::Callback | LoggingMode::Both) {
            if let Some(callback) = &self.callback {
                callback(level, message);
            }
        }
    }

    pub fn log_request(&self, unit: UnitId, function: u8, frame: &[u8]) {
        self.log(
            LogLevel::Info,
            &format!(
                "TX unit={} fc=0x{:02X} [{}]",
                unit,
                function,
                format_hex_packet(frame)
            ),
        );
    }

    pub fn log_response(&self, unit: UnitId, function: u8, payload: &[u8]) {
        self.log(
            LogLevel::Info,
            &format!(
                "RX unit={} fc=0x{:02X} [{}]",
                unit,
                function,
                format_hex_packet(payload)
            ),
        );
    }
}

/// Format raw bytes as a space-separated hex string
pub fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Emit a packet dump for transports with packet logging enabled
pub(crate) fn log_packet(protocol: &str, direction: &str, unit: Option<UnitId>, data: &[u8]) {
    let hex = format_hex_packet(data);
    match unit {
        Some(id) => info!("[MODBUS-{}] {} slave:{} {}", protocol, direction, id, hex),
        None => info!("[MODBUS-{}] {} {}", protocol, direction, hex),
    }
}
