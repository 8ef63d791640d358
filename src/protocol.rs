//! Modbus protocol definitions shared by the codec, transports and client

use std::fmt;

use crate::constants::{
    FC_READ_COILS, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS,
    FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER,
};
use crate::error::{ModbusError, ModbusResult};

/// Modbus device address on a shared bus (1-247, 0 = broadcast)
pub type UnitId = u8;

/// Broadcast address: every slave acts, none answers
pub const BROADCAST_UNIT: UnitId = 0;

/// Function codes issued by the master
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = FC_READ_COILS,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = FC_READ_HOLDING_REGISTERS,
    /// Read Input Registers (0x04)
    ReadInputRegisters = FC_READ_INPUT_REGISTERS,
    /// Write Single Coil (0x05)
    WriteSingleCoil = FC_WRITE_SINGLE_COIL,
    /// Write Single Register (0x06)
    WriteSingleRegister = FC_WRITE_SINGLE_REGISTER,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = FC_WRITE_MULTIPLE_REGISTERS,
}

impl ModbusFunction {
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            FC_READ_COILS => Ok(Self::ReadCoils),
            FC_READ_HOLDING_REGISTERS => Ok(Self::ReadHoldingRegisters),
            FC_READ_INPUT_REGISTERS => Ok(Self::ReadInputRegisters),
            FC_WRITE_SINGLE_COIL => Ok(Self::WriteSingleCoil),
            FC_WRITE_SINGLE_REGISTER => Ok(Self::WriteSingleRegister),
            FC_WRITE_MULTIPLE_REGISTERS => Ok(Self::WriteMultipleRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Read functions answer with a byte count followed by data.
    pub fn is_read_function(self) -> bool {
        matches!(
            self,
            Self::ReadCoils | Self::ReadHoldingRegisters | Self::ReadInputRegisters
        )
    }

    /// Write functions answer by echoing address and value/quantity.
    pub fn is_write_function(self) -> bool {
        !self.is_read_function()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteSingleRegister => "Write Single Register",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.to_u8())
    }
}

/// Connection state owned by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl From<bool> for ConnectionState {
    fn from(connected: bool) -> Self {
        if connected {
            Self::Connected
        } else {
            Self::Disconnected
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}
