//! # Device Limits Configuration
//!
//! Per-device request caps and pacing. Some slaves cannot serve the full
//! protocol batch size; a client built with lower limits rejects larger
//! requests locally and batch reads split into smaller chunks.
//!
//! Limits can be lowered but never raised above the protocol caps:
//!
//! - **Read Holding/Input Registers**: 125 per request
//! - **Read Coils**: 125 per request
//! - **Write Multiple Registers**: 123 per request

use crate::constants::{MAX_READ_ITEMS, MAX_WRITE_REGISTERS};

/// Default maximum registers per read operation.
pub const DEFAULT_MAX_READ_REGISTERS: u16 = MAX_READ_ITEMS;

/// Default maximum registers per write operation.
pub const DEFAULT_MAX_WRITE_REGISTERS: u16 = MAX_WRITE_REGISTERS;

/// Default maximum coils per read operation.
pub const DEFAULT_MAX_READ_COILS: u16 = MAX_READ_ITEMS;

/// Default inter-request delay in milliseconds.
pub const DEFAULT_INTER_REQUEST_DELAY_MS: u64 = 0;

/// Device-specific request limits.
///
/// # Example
///
/// ```rust
/// use modbus_master::DeviceLimits;
///
/// let limits = DeviceLimits::new()
///     .with_max_read_registers(50)
///     .with_inter_request_delay_ms(10);
///
/// assert_eq!(limits.max_read_registers, 50);
///
/// // Anything above the protocol cap is clamped
/// let limits = DeviceLimits::new().with_max_read_coils(2000);
/// assert_eq!(limits.max_read_coils, 125);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Maximum registers per read request.
    pub max_read_registers: u16,
    /// Maximum registers per write request.
    pub max_write_registers: u16,
    /// Maximum coils per read request.
    pub max_read_coils: u16,
    /// Pause between chunks of a batch read (milliseconds).
    pub inter_request_delay_ms: u64,
}

impl DeviceLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits for older or slow devices: 50 registers, 50 coils, 10 ms pacing.
    pub fn conservative() -> Self {
        Self {
            max_read_registers: 50,
            max_write_registers: 50,
            max_read_coils: 50,
            inter_request_delay_ms: 10,
        }
    }

    pub fn with_max_read_registers(mut self, count: u16) -> Self {
        self.max_read_registers = count.clamp(1, MAX_READ_ITEMS);
        self
    }

    pub fn with_max_write_registers(mut self, count: u16) -> Self {
        self.max_write_registers = count.clamp(1, MAX_WRITE_REGISTERS);
        self
    }

    pub fn with_max_read_coils(mut self, count: u16) -> Self {
        self.max_read_coils = count.clamp(1, MAX_READ_ITEMS);
        self
    }

    pub fn with_inter_request_delay_ms(mut self, delay_ms: u64) -> Self {
        self.inter_request_delay_ms = delay_ms;
        self
    }

    /// Registers a single read may request.
    ///
    /// The fields are public, so a struct literal can hold any value; the
    /// effective limit is always kept within `1..=125`.
    pub fn read_register_limit(&self) -> u16 {
        self.max_read_registers.clamp(1, MAX_READ_ITEMS)
    }

    /// Registers a single FC16 write may carry, within `1..=123`.
    pub fn write_register_limit(&self) -> u16 {
        self.max_write_registers.clamp(1, MAX_WRITE_REGISTERS)
    }

    /// Coils a single read may request, within `1..=125`.
    pub fn read_coil_limit(&self) -> u16 {
        self.max_read_coils.clamp(1, MAX_READ_ITEMS)
    }

    pub fn is_read_within_limits(&self, register_count: u16) -> bool {
        register_count <= self.read_register_limit()
    }

    pub fn is_write_within_limits(&self, register_count: u16) -> bool {
        register_count <= self.write_register_limit()
    }

    pub fn is_coil_read_within_limits(&self, coil_count: u16) -> bool {
        coil_count <= self.read_coil_limit()
    }
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_read_registers: DEFAULT_MAX_READ_REGISTERS,
            max_write_registers: DEFAULT_MAX_WRITE_REGISTERS,
            max_read_coils: DEFAULT_MAX_READ_COILS,
            inter_request_delay_ms: DEFAULT_INTER_REQUEST_DELAY_MS,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = DeviceLimits::default();
        assert_eq!(limits.max_read_registers, 125);
        assert_eq!(limits.max_write_registers, 123);
        assert_eq!(limits.max_read_coils, 125);
        assert_eq!(limits.inter_request_delay_ms, 0);
    }

    #[test]
    fn test_conservative_limits() {
        let limits = DeviceLimits::conservative();
        assert_eq!(limits.max_read_registers, 50);
        assert_eq!(limits.max_read_coils, 50);
        assert_eq!(limits.inter_request_delay_ms, 10);
    }

    #[test]
    fn test_builder_clamps_to_protocol_caps() {
        let limits = DeviceLimits::new()
            .with_max_read_registers(500)
            .with_max_write_registers(200)
            .with_max_read_coils(0);

        assert_eq!(limits.max_read_registers, 125);
        assert_eq!(limits.max_write_registers, 123);
        assert_eq!(limits.max_read_coils, 1);
    }

    #[test]
    fn test_struct_literal_cannot_exceed_protocol_caps() {
        let limits = DeviceLimits {
            max_read_registers: 200,
            max_write_registers: 500,
            max_read_coils: 0,
            ..Default::default()
        };

        assert_eq!(limits.read_register_limit(), 125);
        assert_eq!(limits.write_register_limit(), 123);
        assert_eq!(limits.read_coil_limit(), 1);
        assert!(limits.is_read_within_limits(125));
        assert!(!limits.is_read_within_limits(126));
        assert!(!limits.is_write_within_limits(124));
        assert!(limits.is_coil_read_within_limits(1));
        assert!(!limits.is_coil_read_within_limits(2));
    }

    #[test]
    fn test_within_limits() {
        let limits = DeviceLimits::new()
            .with_max_read_registers(100)
            .with_max_write_registers(80);

        assert!(limits.is_read_within_limits(100));
        assert!(!limits.is_read_within_limits(101));
        assert!(limits.is_write_within_limits(80));
        assert!(!limits.is_write_within_limits(81));
        assert!(limits.is_coil_read_within_limits(125));
        assert!(!limits.is_coil_read_within_limits(126));
    }
}
