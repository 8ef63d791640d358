//! Request PDU buffer
//!
//! A request PDU is one function code followed by big-endian fields. It never
//! exceeds 253 bytes, so it lives in a fixed array and building one does not
//! allocate. Transports copy it into their frame behind the slave address.

use tracing::trace;

use crate::constants::MAX_PDU_SIZE;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::ModbusFunction;

/// Request PDU: `[function, fields...]`
#[derive(Clone)]
pub struct ModbusPdu {
    bytes: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    fn with_function(function: ModbusFunction) -> Self {
        let mut bytes = [0; MAX_PDU_SIZE];
        bytes[0] = function.to_u8();
        Self { bytes, len: 1 }
    }

    fn put(&mut self, field: &[u8]) -> ModbusResult<()> {
        let end = self.len + field.len();
        if end > MAX_PDU_SIZE {
            return Err(ModbusError::invalid_argument(format!(
                "Request PDU would take {} bytes (max {})",
                end, MAX_PDU_SIZE
            )));
        }
        self.bytes[self.len..end].copy_from_slice(field);
        self.len = end;
        Ok(())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: a request holds at least its function code
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<[u8]> for ModbusPdu {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::fmt::Debug for ModbusPdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModbusPdu({:02X?})", self.as_slice())
    }
}

/// Fluent builder for request PDUs
///
/// ```rust
/// use modbus_master::{ModbusFunction, PduBuilder};
///
/// # fn main() -> modbus_master::ModbusResult<()> {
/// let pdu = PduBuilder::new(ModbusFunction::ReadHoldingRegisters)
///     .address(0x006B)?
///     .quantity(3)?
///     .build();
/// assert_eq!(pdu.as_slice(), &[0x03, 0x00, 0x6B, 0x00, 0x03]);
/// # Ok(())
/// # }
/// ```
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl PduBuilder {
    pub fn new(function: ModbusFunction) -> Self {
        Self {
            pdu: ModbusPdu::with_function(function),
        }
    }

    /// Register or coil address
    pub fn address(mut self, address: u16) -> ModbusResult<Self> {
        self.pdu.put(&address.to_be_bytes())?;
        Ok(self)
    }

    pub fn quantity(mut self, quantity: u16) -> ModbusResult<Self> {
        self.pdu.put(&quantity.to_be_bytes())?;
        Ok(self)
    }

    /// Raw payload bytes, e.g. a value or an FC16 register block
    pub fn data(mut self, data: &[u8]) -> ModbusResult<Self> {
        self.pdu.put(data)?;
        Ok(self)
    }

    pub fn build(self) -> ModbusPdu {
        trace!("request PDU built: {:?}", self.pdu);
        self.pdu
    }
}
