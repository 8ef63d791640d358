//! # Modbus Transport Layer
//!
//! A transport turns request PDUs into frames for its medium, moves them over
//! the wire, and hands back the payload of the matching response. Two variants
//! ship with the crate:
//!
//! ### Modbus TCP ([`TcpTransport`])
//! - MBAP header with transaction id matching
//! - Stale responses from timed-out transactions are skipped
//!
//! ### Modbus RTU ([`RtuTransport`])
//! - CRC-16/MODBUS trailer, verified on every response
//! - 3.5 character silent interval between frames
//! - Generic over the serial byte link; `tokio-serial` behind the `rtu` feature
//!
//! Timeouts are a transport concern: each variant bounds its own socket or
//! serial I/O with the configured deadline and reports [`ModbusError::Timeout`].
//! The client adds no deadline of its own, so a custom transport whose calls
//! never complete holds the bus until the caller drops the request future.
//!
//! ## Transport Statistics
//!
//! ```rust,no_run
//! # use modbus_master::transport::ModbusTransport;
//! # fn example(transport: &impl ModbusTransport) {
//! let stats = transport.stats();
//! println!("Requests sent: {}", stats.requests_sent);
//! println!("Responses received: {}", stats.responses_received);
//! println!("Timeouts: {}", stats.timeouts);
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusFunction, UnitId};

pub mod rtu;
pub mod tcp;

pub use rtu::{DataBits, Parity, RtuConfig, RtuTransport, SerialLink, StopBits};
pub use tcp::{TcpConfig, TcpTransport};

#[cfg(feature = "rtu")]
pub use rtu::SerialRtuTransport;

/// Capability interface every Modbus transport implements.
///
/// The client drives one transaction at a time:
/// `build_*_frame` → [`deliver`](Self::deliver) → [`read_result`](Self::read_result).
/// Frame builders fix the `[address, function, register, data]` ordering via
/// the codec and add the medium-specific header or trailer.
pub trait ModbusTransport: Send {
    /// Frame a write request carrying `data` after the register address.
    fn build_write_frame(
        &mut self,
        unit: UnitId,
        function: ModbusFunction,
        register: u16,
        data: &[u8],
    ) -> ModbusResult<Vec<u8>>;

    /// Frame a read request for `count` items starting at `start_register`.
    fn build_read_frame(
        &mut self,
        unit: UnitId,
        function: ModbusFunction,
        start_register: u16,
        count: u16,
    ) -> ModbusResult<Vec<u8>>;

    /// Send a frame produced by one of the builders.
    fn deliver(&mut self, frame: &[u8]) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Wait for the response to the last delivered frame.
    ///
    /// Returns the data bytes of a read response (after the byte count) or the
    /// echoed address/value of a write response.
    fn read_result(
        &mut self,
        function: ModbusFunction,
    ) -> impl Future<Output = ModbusResult<Vec<u8>>> + Send;

    /// Establish the physical connection.
    fn connect(&mut self) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Release the physical connection. Best-effort, never fails.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn stats(&self) -> TransportStats;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_response_at: Option<DateTime<Utc>>,
}

impl TransportStats {
    pub(crate) fn record_sent(&mut self, bytes: usize) {
        self.requests_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub(crate) fn record_received(&mut self, bytes: usize) {
        self.responses_received += 1;
        self.bytes_received += bytes as u64;
        self.last_response_at = Some(Utc::now());
    }

    pub(crate) fn record_failure(&mut self, err: &ModbusError) {
        match err {
            ModbusError::Timeout { .. } => self.timeouts += 1,
            _ => self.errors += 1,
        }
    }

    /// Share of sent requests that got an answer, in percent
    pub fn success_rate(&self) -> f64 {
        if self.requests_sent == 0 {
            return 0.0;
        }
        self.responses_received as f64 / self.requests_sent as f64 * 100.0
    }
}

/// Bound an I/O future by `limit`, mapping expiry to [`ModbusError::Timeout`].
pub(crate) async fn with_deadline<T, F>(limit: Duration, operation: &str, io: F) -> ModbusResult<T>
where
    F: Future<Output = ModbusResult<T>>,
{
    match tokio::time::timeout(limit, io).await {
        Ok(result) => result,
        Err(_) => Err(ModbusError::timeout(operation, limit.as_millis() as u64)),
    }
}
