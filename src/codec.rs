//! # Frame Codec
//!
//! Pure translation between Modbus requests/responses and bytes. Nothing here
//! performs I/O or keeps state.
//!
//! Request PDUs always carry `[function, register_hi, register_lo, payload...]`;
//! transports prepend the slave address and add their own header or trailer.
//! Register values travel big-endian whatever the host byte order is.
//!
//! ## Coil encodings
//!
//! | Direction | Encoding |
//! |-----------|----------|
//! | Single coil write | `[0xFF, 0xFF]` on, `[0x00, 0x00]` off |
//! | Coil read response | bit-packed, LSB first, byte-major |
//!
//! The codec trusts request counts; callers enforce the 125-item cap before
//! building a frame.

use tracing::debug;

use crate::constants::{COIL_OFF, COIL_ON, EXCEPTION_FLAG, MAX_WRITE_REGISTERS};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::{ModbusPdu, PduBuilder};
use crate::protocol::ModbusFunction;

// ============================================================================
// Value encoding
// ============================================================================

/// Register value in network byte order
#[inline]
pub fn encode_register_value(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// Single coil write payload
#[inline]
pub fn encode_coil_value(value: bool) -> [u8; 2] {
    if value {
        COIL_ON
    } else {
        COIL_OFF
    }
}

/// FC16 payload: quantity, byte count, then each value big-endian
pub fn encode_register_block(values: &[u16]) -> ModbusResult<Vec<u8>> {
    if values.is_empty() || values.len() > MAX_WRITE_REGISTERS as usize {
        return Err(ModbusError::invalid_argument(format!(
            "Register block must hold 1-{} values, got {}",
            MAX_WRITE_REGISTERS,
            values.len()
        )));
    }

    let mut data = Vec::with_capacity(3 + values.len() * 2);
    data.extend_from_slice(&(values.len() as u16).to_be_bytes());
    data.push((values.len() * 2) as u8);
    for &value in values {
        data.extend_from_slice(&encode_register_value(value));
    }
    Ok(data)
}

// ============================================================================
// Request building
// ============================================================================

/// Build the PDU of a write request: function, register (big-endian), data.
pub fn write_request_pdu(
    function: ModbusFunction,
    register: u16,
    data: &[u8],
) -> ModbusResult<ModbusPdu> {
    if !function.is_write_function() {
        return Err(ModbusError::invalid_function(function.to_u8()));
    }
    Ok(PduBuilder::new(function)
        .address(register)?
        .data(data)?
        .build())
}

/// Build the PDU of a read request: function, start register, count (both big-endian).
pub fn read_request_pdu(
    function: ModbusFunction,
    start_register: u16,
    count: u16,
) -> ModbusResult<ModbusPdu> {
    if !function.is_read_function() {
        return Err(ModbusError::invalid_function(function.to_u8()));
    }
    Ok(PduBuilder::new(function)
        .address(start_register)?
        .quantity(count)?
        .build())
}

// ============================================================================
// Response decoding
// ============================================================================

/// Decode `count` big-endian registers; value `i` sits at byte offset `2 * i`.
pub fn decode_registers(raw: &[u8], count: usize) -> ModbusResult<Vec<u16>> {
    let needed = count * 2;
    if raw.len() < needed {
        return Err(ModbusError::malformed_response(format!(
            "Expected {} bytes for {} registers, got {}",
            needed,
            count,
            raw.len()
        )));
    }

    let registers: Vec<u16> = raw[..needed]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();

    debug!("Decoded {} registers", registers.len());
    Ok(registers)
}

/// Decode `count` coils from bit-packed bytes, LSB first within each byte.
///
/// Only as many bytes as needed to cover `count` are consumed.
pub fn decode_coils(raw: &[u8], count: usize) -> ModbusResult<Vec<bool>> {
    let needed = count.div_ceil(8);
    if raw.len() < needed {
        return Err(ModbusError::malformed_response(format!(
            "Expected {} bytes for {} coils, got {}",
            needed,
            count,
            raw.len()
        )));
    }

    let coils: Vec<bool> = raw[..needed]
        .iter()
        .flat_map(|&byte| (0..8).map(move |bit| byte & (1 << bit) != 0))
        .take(count)
        .collect();

    debug!("Decoded {} coils", coils.len());
    Ok(coils)
}

/// Strip a response PDU down to the bytes the client decodes.
///
/// Read responses yield the data after the byte count; write responses yield
/// the echoed address and value. Exception PDUs become [`ModbusError::Exception`].
pub fn response_payload(function: ModbusFunction, pdu: &[u8]) -> ModbusResult<Vec<u8>> {
    let (&fc, body) = pdu
        .split_first()
        .ok_or_else(|| ModbusError::malformed_response("Empty response PDU"))?;

    if fc == function.to_u8() | EXCEPTION_FLAG {
        let code = body
            .first()
            .copied()
            .ok_or_else(|| ModbusError::malformed_response("Exception response without code"))?;
        return Err(ModbusError::exception(function.to_u8(), code));
    }

    if fc != function.to_u8() {
        return Err(ModbusError::frame(format!(
            "Function code mismatch: sent 0x{:02X}, received 0x{:02X}",
            function.to_u8(),
            fc
        )));
    }

    if function.is_read_function() {
        let (&byte_count, data) = body
            .split_first()
            .ok_or_else(|| ModbusError::malformed_response("Read response without byte count"))?;
        if data.len() != byte_count as usize {
            return Err(ModbusError::malformed_response(format!(
                "Byte count {} does not match {} data bytes",
                byte_count,
                data.len()
            )));
        }
        Ok(data.to_vec())
    } else {
        if body.len() < 4 {
            return Err(ModbusError::malformed_response(format!(
                "Write echo too short: {} bytes",
                body.len()
            )));
        }
        Ok(body[..4].to_vec())
    }
}
