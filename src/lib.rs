//! # Modbus Master - Async Modbus Client Engine
//!
//! An asynchronous Modbus master that reads and writes holding registers and
//! coils on slave devices over Modbus TCP or Modbus RTU.
//!
//! ## Features
//!
//! - **Serialized transactions**: one request/response exchange on the bus at
//!   a time, queued in arrival order; clients are shareable through `Arc`
//! - **Pluggable transports**: TCP (MBAP) and RTU (CRC-16) behind one trait
//! - **Connection observers**: callbacks fire exactly once per state change
//! - **Device limits**: per-device request caps and batch read chunking
//! - **Monitoring**: transport statistics and callback/tracing packet logging
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Client |
//! |------|----------|--------|
//! | 0x01 | Read Coils | ✅ |
//! | 0x03 | Read Holding Registers | ✅ |
//! | 0x04 | Read Input Registers | ✅ |
//! | 0x05 | Write Single Coil | ✅ |
//! | 0x06 | Write Single Register | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modbus_master::{ModbusClient, ModbusResult, ModbusTcpClient};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let client = ModbusTcpClient::from_address("127.0.0.1:502", Duration::from_secs(5)).await?;
//!
//!     let values = client.read_03(1, 0, 10).await?;
//!     println!("Read registers: {:?}", values);
//!
//!     client.write_coil(1, 172, true).await?;
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Error taxonomy and result alias
pub mod error;

/// Protocol constants: function codes, limits, exception codes
pub mod constants;

/// Stack-allocated PDU buffer and builder
pub mod pdu;

/// Function codes, unit addresses and connection state
pub mod protocol;

/// Request framing and response decoding
pub mod codec;

/// FIFO exclusive access around one transaction
pub mod serializer;

/// TCP and RTU transports
pub mod transport;

/// Modbus master client
pub mod client;

/// Callback and tracing logging
pub mod logging;

/// Device-specific request limits
pub mod device_limits;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use modbus_master::tokio) ===
pub use tokio;

// === Core client API ===
pub use client::{ConnectionObserver, GenericModbusClient, ModbusClient, ModbusTcpClient};

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Core types ===
pub use protocol::{ConnectionState, ModbusFunction, UnitId, BROADCAST_UNIT};
pub use serializer::{ExclusiveGuard, RequestSerializer};

// === Transports ===
pub use transport::{
    ModbusTransport, RtuConfig, RtuTransport, TcpConfig, TcpTransport, TransportStats,
};

// === Configuration ===
pub use device_limits::DeviceLimits;

// === Protocol limits ===
pub use constants::{MAX_PDU_SIZE, MAX_READ_ITEMS, MAX_WRITE_REGISTERS};

// === Logging ===
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};

// === PDU (advanced usage) ===
pub use pdu::{ModbusPdu, PduBuilder};

#[cfg(feature = "rtu")]
pub use client::ModbusRtuClient;

#[cfg(feature = "rtu")]
pub use transport::SerialRtuTransport;

/// Default timeout for transport I/O (5 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Modbus Master v{} - async Modbus TCP/RTU client", VERSION)
}
