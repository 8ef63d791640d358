#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use modbus_master::{codec, ModbusFunction};

#[derive(Debug, Arbitrary)]
struct Input {
    function: u8,
    count: u8,
    pdu: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let Ok(function) = ModbusFunction::from_u8(input.function) else {
        return;
    };
    let count = input.count as usize;

    // Arbitrary slave bytes must never panic the decoder
    if let Ok(payload) = codec::response_payload(function, &input.pdu) {
        match function {
            ModbusFunction::ReadCoils => {
                if let Ok(coils) = codec::decode_coils(&payload, count) {
                    assert_eq!(coils.len(), count);
                }
            }
            ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters => {
                if let Ok(registers) = codec::decode_registers(&payload, count) {
                    assert_eq!(registers.len(), count);
                }
            }
            _ => assert_eq!(payload.len(), 4),
        }
    }
});
