//! Modbus protocol constants relied upon by the master engine
//!
//! Request caps are derived from the 253-byte PDU limit inherited from the
//! RS485 ADU (256 bytes) minus slave address (1) and CRC (2).

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Modbus MBAP header length for TCP, excluding the unit id
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) = 6 bytes
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU (Protocol Data Unit) size
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Largest RTU frame: slave address + PDU + CRC
pub const MAX_RTU_FRAME_SIZE: usize = 1 + MAX_PDU_SIZE + 2;

// ============================================================================
// Request Limits
// ============================================================================

/// Maximum number of registers or coils fetched by a single read request
///
/// Calculation for a register read response PDU:
/// - Function Code: 1 byte
/// - Byte Count: 1 byte
/// - Register Data: N × 2 bytes
/// - Total: 1 + 1 + (N × 2) ≤ 253 → N ≤ 125
///
/// Coil reads share the same cap so callers have a single batch size to reason about.
pub const MAX_READ_ITEMS: u16 = 125;

/// Maximum number of registers for FC16 (Write Multiple Registers)
///
/// - Function Code (1) + Starting Address (2) + Quantity (2) + Byte Count (1) + N × 2 ≤ 253
/// - Therefore: N ≤ 123
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Number of addressable registers or coils (addresses 0x0000..=0xFFFF)
pub const ADDRESS_SPACE: u32 = 0x1_0000;

// ============================================================================
// Coil Encoding
// ============================================================================

/// Payload written for a coil switched on
pub const COIL_ON: [u8; 2] = [0xFF, 0xFF];

/// Payload written for a coil switched off
pub const COIL_OFF: [u8; 2] = [0x00, 0x00];

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Bit set in the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

/// Acknowledge
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;

/// Server Device Busy
pub const EXCEPTION_SERVER_DEVICE_BUSY: u8 = 0x06;

/// Memory Parity Error
pub const EXCEPTION_MEMORY_PARITY_ERROR: u8 = 0x08;

/// Gateway Path Unavailable
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

/// Human-readable name of a Modbus exception code
pub fn exception_description(code: u8) -> &'static str {
    match code {
        EXCEPTION_ILLEGAL_FUNCTION => "Illegal Function",
        EXCEPTION_ILLEGAL_DATA_ADDRESS => "Illegal Data Address",
        EXCEPTION_ILLEGAL_DATA_VALUE => "Illegal Data Value",
        EXCEPTION_SERVER_DEVICE_FAILURE => "Server Device Failure",
        EXCEPTION_ACKNOWLEDGE => "Acknowledge",
        EXCEPTION_SERVER_DEVICE_BUSY => "Server Device Busy",
        EXCEPTION_MEMORY_PARITY_ERROR => "Memory Parity Error",
        EXCEPTION_GATEWAY_PATH_UNAVAILABLE => "Gateway Path Unavailable",
        EXCEPTION_GATEWAY_TARGET_FAILED => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}
