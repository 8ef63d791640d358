#![no_main]

use libfuzzer_sys::fuzz_target;
use modbus_master::transport::rtu::{append_crc, verify_crc};

fuzz_target!(|data: &[u8]| {
    let _ = verify_crc(data);

    if (2..=254).contains(&data.len()) {
        let mut frame = data.to_vec();
        append_crc(&mut frame);
        assert!(verify_crc(&frame).is_ok());
    }
});
