//! Modbus RTU transport
//!
//! Frame: `[unit, pdu..., crc_lo, crc_hi]` with CRC-16/MODBUS over everything
//! before the trailer. RTU has no transaction id, which is why the client never
//! lets two transactions overlap on one bus.
//!
//! The transport is generic over its byte link so the framing can run over a
//! real serial port (`rtu` feature) or any other async stream.

use std::time::{Duration, Instant};

use crc::{Crc, CRC_16_MODBUS};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::{with_deadline, ModbusTransport, TransportStats};
use crate::codec;
use crate::constants::{EXCEPTION_FLAG, MAX_RTU_FRAME_SIZE};
use crate::error::{ModbusError, ModbusResult};
use crate::logging::log_packet;
use crate::pdu::ModbusPdu;
use crate::protocol::{ModbusFunction, UnitId, BROADCAST_UNIT};

/// CRC calculator for RTU
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Above this rate the silent interval is fixed at 1.75 ms
const FIXED_GAP_BAUD_THRESHOLD: u32 = 19_200;

/// Bits on the wire per character (start + 8 data + parity/stop)
const BITS_PER_CHAR: u64 = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    Seven,
    #[default]
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

/// Serial line settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtuConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Deadline for each send/receive
    pub timeout: Duration,
    pub packet_logging: bool,
}

impl RtuConfig {
    /// 8N1 with a one second timeout
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            timeout: Duration::from_secs(1),
            packet_logging: false,
        }
    }

    pub fn with_framing(mut self, data_bits: DataBits, parity: Parity, stop_bits: StopBits) -> Self {
        self.data_bits = data_bits;
        self.parity = parity;
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    /// Silent interval of 3.5 character times between frames
    pub fn frame_gap(&self) -> Duration {
        if self.baud_rate == 0 || self.baud_rate > FIXED_GAP_BAUD_THRESHOLD {
            return Duration::from_micros(1_750);
        }
        Duration::from_micros(BITS_PER_CHAR * 3_500_000 / self.baud_rate as u64)
    }
}

/// Byte link an RTU transport runs over
pub trait SerialLink: AsyncRead + AsyncWrite + Unpin + Send + Sized {
    /// Open the link described by `config`.
    fn open(config: &RtuConfig) -> ModbusResult<Self>;
}

#[cfg(feature = "rtu")]
impl SerialLink for tokio_serial::SerialStream {
    fn open(config: &RtuConfig) -> ModbusResult<Self> {
        use tokio_serial::SerialPortBuilderExt;

        let data_bits = match config.data_bits {
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        };
        let parity = match config.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        };
        let stop_bits = match config.stop_bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        };

        let stream = tokio_serial::new(config.port.as_str(), config.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(config.timeout)
            .open_native_async()?;
        Ok(stream)
    }
}

/// RTU transport over a serial port
#[cfg(feature = "rtu")]
pub type SerialRtuTransport = RtuTransport<tokio_serial::SerialStream>;

/// Append the CRC-16/MODBUS trailer (low byte first)
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = CRC_MODBUS.checksum(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Check the trailer of a complete frame
pub fn verify_crc(frame: &[u8]) -> ModbusResult<()> {
    if frame.len() < 4 {
        return Err(ModbusError::frame(format!(
            "RTU frame too short: {} bytes",
            frame.len()
        )));
    }
    let (body, trailer) = frame.split_at(frame.len() - 2);
    let expected = CRC_MODBUS.checksum(body);
    let received = u16::from_le_bytes([trailer[0], trailer[1]]);
    if expected != received {
        return Err(ModbusError::frame(format!(
            "CRC mismatch: expected 0x{:04X}, received 0x{:04X}",
            expected, received
        )));
    }
    Ok(())
}

/// Modbus RTU transport
#[derive(Debug)]
pub struct RtuTransport<L> {
    config: RtuConfig,
    link: Option<L>,
    pending_unit: Option<UnitId>,
    last_activity: Option<Instant>,
    stats: TransportStats,
}

impl<L: SerialLink> RtuTransport<L> {
    /// Create a transport that opens its link on `connect()`
    pub fn new(config: RtuConfig) -> Self {
        Self {
            config,
            link: None,
            pending_unit: None,
            last_activity: None,
            stats: TransportStats::default(),
        }
    }

    /// Create a transport over an already open link
    pub fn with_link(config: RtuConfig, link: L) -> Self {
        Self {
            link: Some(link),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &RtuConfig {
        &self.config
    }

    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.config.packet_logging = enabled;
    }

    fn encode(unit: UnitId, pdu: &ModbusPdu) -> Vec<u8> {
        let mut frame = Vec::with_capacity(pdu.len() + 3);
        frame.push(unit);
        frame.extend_from_slice(pdu.as_slice());
        append_crc(&mut frame);
        frame
    }

    /// Time the line must still stay quiet before the next frame
    fn remaining_gap(&self) -> Option<Duration> {
        let elapsed = self.last_activity?.elapsed();
        self.config.frame_gap().checked_sub(elapsed)
    }

    /// Read one response frame for `function` from `unit`, CRC included.
    async fn receive(link: &mut L, unit: UnitId, function: ModbusFunction) -> ModbusResult<Vec<u8>> {
        let mut frame = Vec::with_capacity(MAX_RTU_FRAME_SIZE);

        let mut header = [0u8; 2];
        link.read_exact(&mut header).await?;
        frame.extend_from_slice(&header);
        let [address, fc] = header;

        if address != unit {
            return Err(ModbusError::frame(format!(
                "Response from unit {} to request for unit {}",
                address, unit
            )));
        }

        // bytes still to read after [unit, fc], CRC included
        let remaining = if fc == function.to_u8() | EXCEPTION_FLAG {
            1 + 2
        } else if fc != function.to_u8() {
            return Err(ModbusError::frame(format!(
                "Function code mismatch: sent 0x{:02X}, received 0x{:02X}",
                function.to_u8(),
                fc
            )));
        } else if function.is_read_function() {
            let byte_count = link.read_u8().await?;
            frame.push(byte_count);
            byte_count as usize + 2
        } else {
            4 + 2
        };

        let start = frame.len();
        frame.resize(start + remaining, 0);
        link.read_exact(&mut frame[start..]).await?;
        Ok(frame)
    }

    /// Drop input until the line stays quiet for `gap`, giving up after `limit`.
    ///
    /// Returns the number of bytes thrown away. Afterwards the next byte on the
    /// line starts a new frame.
    async fn discard_pending(link: &mut L, gap: Duration, limit: Duration) -> usize {
        let mut scratch = [0u8; MAX_RTU_FRAME_SIZE];
        let mut discarded = 0;
        let drain = async {
            while let Ok(Ok(n)) = tokio::time::timeout(gap, link.read(&mut scratch)).await {
                if n == 0 {
                    break;
                }
                discarded += n;
            }
        };
        let _ = tokio::time::timeout(limit, drain).await;
        discarded
    }
}

impl<L: SerialLink> ModbusTransport for RtuTransport<L> {
    fn build_write_frame(
        &mut self,
        unit: UnitId,
        function: ModbusFunction,
        register: u16,
        data: &[u8],
    ) -> ModbusResult<Vec<u8>> {
        let pdu = codec::write_request_pdu(function, register, data)?;
        Ok(Self::encode(unit, &pdu))
    }

    fn build_read_frame(
        &mut self,
        unit: UnitId,
        function: ModbusFunction,
        start_register: u16,
        count: u16,
    ) -> ModbusResult<Vec<u8>> {
        let pdu = codec::read_request_pdu(function, start_register, count)?;
        Ok(Self::encode(unit, &pdu))
    }

    async fn deliver(&mut self, frame: &[u8]) -> ModbusResult<()> {
        let unit = *frame
            .first()
            .ok_or_else(|| ModbusError::invalid_argument("Empty RTU frame"))?;
        if self.link.is_none() {
            return Err(ModbusError::connection("RTU transport is not connected"));
        }

        if let Some(quiet) = self.remaining_gap() {
            tokio::time::sleep(quiet).await;
        }

        if self.config.packet_logging {
            log_packet("RTU", "TX", Some(unit), frame);
        }

        let timeout = self.config.timeout;
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| ModbusError::connection("RTU transport is not connected"))?;
        let sent = with_deadline(timeout, "send request", async {
            link.write_all(frame).await?;
            link.flush().await?;
            Ok(())
        })
        .await;
        self.last_activity = Some(Instant::now());

        match sent {
            Ok(()) => {
                self.stats.record_sent(frame.len());
                self.pending_unit = Some(unit);
                Ok(())
            }
            Err(err) => {
                self.stats.record_failure(&err);
                Err(err)
            }
        }
    }

    async fn read_result(&mut self, function: ModbusFunction) -> ModbusResult<Vec<u8>> {
        let unit = self
            .pending_unit
            .take()
            .ok_or_else(|| ModbusError::transport("No request awaiting a response"))?;

        if unit == BROADCAST_UNIT {
            debug!("Broadcast {} sent, no response expected", function);
            return Ok(Vec::new());
        }

        let timeout = self.config.timeout;
        let gap = self.config.frame_gap();
        let packet_logging = self.config.packet_logging;
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| ModbusError::connection("RTU transport is not connected"))?;
        let received = with_deadline(timeout, "read response", Self::receive(link, unit, function))
            .await
            .and_then(|frame| {
                if packet_logging {
                    log_packet("RTU", "RX", Some(unit), &frame);
                }
                verify_crc(&frame)?;
                Ok(frame)
            });

        if received.is_err() {
            let discarded = Self::discard_pending(link, gap, timeout).await;
            if discarded > 0 {
                warn!("Discarded {} trailing bytes after a bad response from unit {}", discarded, unit);
            }
        }
        self.last_activity = Some(Instant::now());

        let result = received.and_then(|frame| {
            self.stats.record_received(frame.len());
            codec::response_payload(function, &frame[1..frame.len() - 2])
        });

        if let Err(err) = &result {
            self.stats.record_failure(err);
        }
        result
    }

    async fn connect(&mut self) -> ModbusResult<()> {
        if self.link.is_none() {
            let link = L::open(&self.config)?;
            info!(
                "Opened serial port {} at {} baud",
                self.config.port, self.config.baud_rate
            );
            self.link = Some(link);
        }
        self.pending_unit = None;
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.link.take().is_some() {
            info!("Closed serial port {}", self.config.port);
        }
        self.pending_unit = None;
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;
    use tokio_test::io::{Builder, Mock};

    impl SerialLink for Mock {
        fn open(_config: &RtuConfig) -> ModbusResult<Self> {
            Err(ModbusError::connection("mock links are attached, not opened"))
        }
    }

    impl SerialLink for DuplexStream {
        fn open(_config: &RtuConfig) -> ModbusResult<Self> {
            Err(ModbusError::connection("duplex links are attached, not opened"))
        }
    }

    fn config() -> RtuConfig {
        RtuConfig::new("/dev/ttyUSB0", 115_200).with_timeout(Duration::from_millis(100))
    }

    fn with_crc(bytes: &[u8]) -> Vec<u8> {
        let mut frame = bytes.to_vec();
        append_crc(&mut frame);
        frame
    }

    #[test]
    fn test_known_crc_vectors() {
        assert_eq!(
            with_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]),
            vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]
        );
        assert_eq!(
            with_crc(&[0x01, 0x06, 0x00, 0x01, 0x00, 0x03]),
            vec![0x01, 0x06, 0x00, 0x01, 0x00, 0x03, 0x98, 0x0B]
        );
    }

    #[test]
    fn test_verify_crc() {
        let mut frame = with_crc(&[0x01, 0x03, 0x02, 0x00, 0x2A]);
        assert!(verify_crc(&frame).is_ok());
        frame[3] ^= 0xFF;
        assert!(matches!(verify_crc(&frame), Err(ModbusError::Frame { .. })));
    }

    #[test]
    fn test_frame_gap() {
        assert_eq!(RtuConfig::new("p", 9600).frame_gap(), Duration::from_micros(4010));
        assert_eq!(RtuConfig::new("p", 115_200).frame_gap(), Duration::from_micros(1750));
    }

    #[test]
    fn test_frame_layout() {
        let mut transport = RtuTransport::<Mock>::new(config());
        let frame = transport
            .build_read_frame(1, ModbusFunction::ReadHoldingRegisters, 0, 10)
            .unwrap();
        assert_eq!(frame, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]);
    }

    #[tokio::test]
    async fn test_read_registers_exchange() {
        let request = with_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]);
        let response = with_crc(&[0x01, 0x03, 0x04, 0x12, 0x34, 0xAB, 0xCD]);
        let link = Builder::new().write(&request).read(&response).build();

        let mut transport = RtuTransport::with_link(config(), link);
        let frame = transport
            .build_read_frame(1, ModbusFunction::ReadHoldingRegisters, 0, 2)
            .unwrap();
        transport.deliver(&frame).await.unwrap();
        let payload = transport
            .read_result(ModbusFunction::ReadHoldingRegisters)
            .await
            .unwrap();

        assert_eq!(payload, vec![0x12, 0x34, 0xAB, 0xCD]);
        assert_eq!(transport.stats().responses_received, 1);
    }

    #[tokio::test]
    async fn test_write_coil_exchange() {
        let request = with_crc(&[0x01, 0x05, 0x00, 0xAC, 0xFF, 0xFF]);
        let link = Builder::new().write(&request).read(&request).build();

        let mut transport = RtuTransport::with_link(config(), link);
        let frame = transport
            .build_write_frame(1, ModbusFunction::WriteSingleCoil, 0x00AC, &[0xFF, 0xFF])
            .unwrap();
        transport.deliver(&frame).await.unwrap();
        let echo = transport
            .read_result(ModbusFunction::WriteSingleCoil)
            .await
            .unwrap();

        assert_eq!(echo, vec![0x00, 0xAC, 0xFF, 0xFF]);
    }

    #[tokio::test]
    async fn test_exception_exchange() {
        let request = with_crc(&[0x02, 0x01, 0x00, 0x10, 0x00, 0x08]);
        let response = with_crc(&[0x02, 0x81, 0x02]);
        let link = Builder::new().write(&request).read(&response).build();

        let mut transport = RtuTransport::with_link(config(), link);
        let frame = transport
            .build_read_frame(2, ModbusFunction::ReadCoils, 0x0010, 8)
            .unwrap();
        transport.deliver(&frame).await.unwrap();
        let err = transport.read_result(ModbusFunction::ReadCoils).await.unwrap_err();

        assert_eq!(err, ModbusError::Exception { function: 0x01, code: 0x02 });
    }

    #[tokio::test]
    async fn test_corrupted_crc_is_rejected() {
        let request = with_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]);
        let mut response = with_crc(&[0x01, 0x03, 0x02, 0x00, 0x2A]);
        let last = response.len() - 1;
        response[last] ^= 0x01;
        let link = Builder::new().write(&request).read(&response).build();

        let mut transport = RtuTransport::with_link(config(), link);
        let frame = transport
            .build_read_frame(1, ModbusFunction::ReadHoldingRegisters, 0, 1)
            .unwrap();
        transport.deliver(&frame).await.unwrap();
        let err = transport
            .read_result(ModbusFunction::ReadHoldingRegisters)
            .await
            .unwrap_err();

        assert!(matches!(err, ModbusError::Frame { .. }));
        assert_eq!(transport.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_wrong_unit_reply_is_discarded_before_next_request() {
        let request = with_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]);
        let stray = with_crc(&[0x02, 0x03, 0x02, 0xFF, 0xFF]);
        let good = with_crc(&[0x01, 0x03, 0x02, 0x00, 0x07]);
        let link = Builder::new()
            .write(&request)
            .read(&stray)
            .write(&request)
            .read(&good)
            .build();

        let mut transport = RtuTransport::with_link(config(), link);
        let frame = transport
            .build_read_frame(1, ModbusFunction::ReadHoldingRegisters, 0, 1)
            .unwrap();

        transport.deliver(&frame).await.unwrap();
        let err = transport
            .read_result(ModbusFunction::ReadHoldingRegisters)
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));

        transport.deliver(&frame).await.unwrap();
        let payload = transport
            .read_result(ModbusFunction::ReadHoldingRegisters)
            .await
            .unwrap();
        assert_eq!(payload, vec![0x00, 0x07]);
        assert_eq!(transport.stats().errors, 1);
        assert_eq!(transport.stats().responses_received, 1);
    }

    #[tokio::test]
    async fn test_function_mismatch_is_discarded_before_next_request() {
        let request = with_crc(&[0x01, 0x01, 0x00, 0x00, 0x00, 0x08]);
        let stray = with_crc(&[0x01, 0x03, 0x02, 0x12, 0x34]);
        let good = with_crc(&[0x01, 0x01, 0x01, 0x05]);
        let link = Builder::new()
            .write(&request)
            .read(&stray)
            .write(&request)
            .read(&good)
            .build();

        let mut transport = RtuTransport::with_link(config(), link);
        let frame = transport
            .build_read_frame(1, ModbusFunction::ReadCoils, 0, 8)
            .unwrap();

        transport.deliver(&frame).await.unwrap();
        let err = transport.read_result(ModbusFunction::ReadCoils).await.unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));

        transport.deliver(&frame).await.unwrap();
        let payload = transport.read_result(ModbusFunction::ReadCoils).await.unwrap();
        assert_eq!(payload, vec![0x05]);
    }

    #[tokio::test]
    async fn test_broadcast_skips_response() {
        let request = with_crc(&[0x00, 0x06, 0x00, 0x01, 0x00, 0x03]);
        let link = Builder::new().write(&request).build();

        let mut transport = RtuTransport::with_link(config(), link);
        let frame = transport
            .build_write_frame(0, ModbusFunction::WriteSingleRegister, 1, &[0x00, 0x03])
            .unwrap();
        transport.deliver(&frame).await.unwrap();
        let echo = transport
            .read_result(ModbusFunction::WriteSingleRegister)
            .await
            .unwrap();
        assert!(echo.is_empty());
    }

    #[tokio::test]
    async fn test_silent_slave_times_out() {
        let (link, _peer) = tokio::io::duplex(64);
        let mut transport = RtuTransport::with_link(config(), link);

        let frame = transport
            .build_read_frame(1, ModbusFunction::ReadCoils, 0, 8)
            .unwrap();
        transport.deliver(&frame).await.unwrap();
        let err = transport.read_result(ModbusFunction::ReadCoils).await.unwrap_err();

        assert!(matches!(err, ModbusError::Timeout { timeout_ms: 100, .. }));
        assert_eq!(transport.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn test_connect_uses_link_opener() {
        let mut transport = RtuTransport::<DuplexStream>::new(config());
        assert!(!transport.is_connected());
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }));

        let (link, _peer) = tokio::io::duplex(64);
        let mut transport = RtuTransport::with_link(config(), link);
        transport.connect().await.unwrap();
        assert!(transport.is_connected());
        transport.disconnect();
        assert!(!transport.is_connected());
    }
}
