//! Error types for the Modbus master engine
//!
//! Failures fall in two families: input errors that the caller must fix
//! ([`ModbusError::InvalidArgument`], [`ModbusError::InvalidFunction`]) and
//! bus or wiring problems (everything else). The engine never retries; every
//! failure surfaces at the call that caused it.

use thiserror::Error;

use crate::constants::exception_description;

/// Result type used throughout the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors raised by the codec, transports and client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModbusError {
    /// Local validation failed before any bytes were sent
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The transport failed to send or receive
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// A transport I/O call exceeded its deadline
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The received frame is inconsistent (bad CRC, header mismatch, wrong echo)
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// The slave answered with an exception PDU
    #[error("Modbus exception: function=0x{function:02X}, code=0x{code:02X} ({})", exception_name(.code))]
    Exception { function: u8, code: u8 },

    /// The response carried fewer bytes than the request implies
    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },

    /// Connecting failed or the transport is not connected
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Function code outside the supported set
    #[error("Invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },
}

impl ModbusError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    pub fn exception(function: u8, code: u8) -> Self {
        Self::Exception { function, code }
    }

    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Whether repeating the same call could succeed.
    ///
    /// Input errors never succeed on retry; bus or wiring problems might.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidArgument { .. } | Self::InvalidFunction { .. }
        )
    }

    /// Whether the failure came from moving bytes over the bus.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::Frame { .. } | Self::Exception { .. }
        )
    }
}

fn exception_name(code: &u8) -> &'static str {
    exception_description(*code)
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::transport(err.to_string())
    }
}

#[cfg(feature = "rtu")]
impl From<tokio_serial::Error> for ModbusError {
    fn from(err: tokio_serial::Error) -> Self {
        Self::connection(err.to_string())
    }
}
