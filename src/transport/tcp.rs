//! Modbus TCP transport (MBAP framing)
//!
//! Frame: `[tid_hi, tid_lo, 0x00, 0x00, len_hi, len_lo, unit, pdu...]` where
//! `len` counts the unit id plus the PDU.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::{with_deadline, ModbusTransport, TransportStats};
use crate::codec;
use crate::constants::{MAX_MBAP_LENGTH, MBAP_HEADER_LEN};
use crate::error::{ModbusError, ModbusResult};
use crate::logging::log_packet;
use crate::pdu::ModbusPdu;
use crate::protocol::{ModbusFunction, UnitId};

/// MBAP header plus unit id
const MBAP_WITH_UNIT_LEN: usize = MBAP_HEADER_LEN + 1;

/// TCP transport settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    pub address: SocketAddr,
    /// Deadline for connecting and for each send/receive
    pub timeout: Duration,
    pub packet_logging: bool,
}

impl TcpConfig {
    pub fn new(address: SocketAddr, timeout: Duration) -> Self {
        Self {
            address,
            timeout,
            packet_logging: false,
        }
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingTransaction {
    transaction_id: u16,
    unit: UnitId,
}

/// Modbus TCP transport
#[derive(Debug)]
pub struct TcpTransport {
    config: TcpConfig,
    stream: Option<TcpStream>,
    transaction_id: u16,
    pending: Option<PendingTransaction>,
    stats: TransportStats,
}

impl TcpTransport {
    /// Create an unconnected transport
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            stream: None,
            transaction_id: 0,
            pending: None,
            stats: TransportStats::default(),
        }
    }

    pub fn server_address(&self) -> SocketAddr {
        self.config.address
    }

    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.config.packet_logging = enabled;
    }

    /// Next transaction id, wrapping and skipping 0
    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        if self.transaction_id == 0 {
            self.transaction_id = 1;
        }
        self.transaction_id
    }

    fn encode(&mut self, unit: UnitId, pdu: &ModbusPdu) -> Vec<u8> {
        let transaction_id = self.next_transaction_id();
        let mut frame = BytesMut::with_capacity(MBAP_WITH_UNIT_LEN + pdu.len());
        frame.put_u16(transaction_id);
        frame.put_u16(0);
        frame.put_u16((pdu.len() + 1) as u16);
        frame.put_u8(unit);
        frame.put_slice(pdu.as_slice());
        frame.to_vec()
    }

    /// Read frames until the one answering `pending` arrives; return its PDU.
    ///
    /// `at_boundary` is true whenever the stream sits between two frames. It
    /// stays false if reading stops inside a frame (I/O error, deadline, bad
    /// length), in which case the stream can no longer be trusted.
    async fn receive(
        stream: &mut TcpStream,
        pending: PendingTransaction,
        stats: &mut TransportStats,
        packet_logging: bool,
        at_boundary: &mut bool,
    ) -> ModbusResult<Vec<u8>> {
        loop {
            let mut header = [0u8; MBAP_WITH_UNIT_LEN];
            *at_boundary = false;
            stream.read_exact(&mut header).await?;

            let transaction_id = u16::from_be_bytes([header[0], header[1]]);
            let protocol_id = u16::from_be_bytes([header[2], header[3]]);
            let length = u16::from_be_bytes([header[4], header[5]]) as usize;
            let unit = header[6];

            if !(2..=MAX_MBAP_LENGTH).contains(&length) {
                return Err(ModbusError::frame(format!("Invalid MBAP length {}", length)));
            }

            let mut pdu = vec![0u8; length - 1];
            stream.read_exact(&mut pdu).await?;
            *at_boundary = true;
            stats.bytes_received += (MBAP_WITH_UNIT_LEN + pdu.len()) as u64;

            if packet_logging {
                let mut raw = header.to_vec();
                raw.extend_from_slice(&pdu);
                log_packet("TCP", "RX", Some(unit), &raw);
            }

            if protocol_id != 0 {
                return Err(ModbusError::frame(format!(
                    "Unexpected protocol id {}",
                    protocol_id
                )));
            }
            if transaction_id != pending.transaction_id {
                warn!(
                    "Discarding response with transaction id {} (waiting for {})",
                    transaction_id, pending.transaction_id
                );
                continue;
            }
            if unit != pending.unit {
                return Err(ModbusError::frame(format!(
                    "Response from unit {} to request for unit {}",
                    unit, pending.unit
                )));
            }

            return Ok(pdu);
        }
    }
}

impl ModbusTransport for TcpTransport {
    fn build_write_frame(
        &mut self,
        unit: UnitId,
        function: ModbusFunction,
        register: u16,
        data: &[u8],
    ) -> ModbusResult<Vec<u8>> {
        let pdu = codec::write_request_pdu(function, register, data)?;
        Ok(self.encode(unit, &pdu))
    }

    fn build_read_frame(
        &mut self,
        unit: UnitId,
        function: ModbusFunction,
        start_register: u16,
        count: u16,
    ) -> ModbusResult<Vec<u8>> {
        let pdu = codec::read_request_pdu(function, start_register, count)?;
        Ok(self.encode(unit, &pdu))
    }

    async fn deliver(&mut self, frame: &[u8]) -> ModbusResult<()> {
        if frame.len() <= MBAP_WITH_UNIT_LEN {
            return Err(ModbusError::invalid_argument(format!(
                "TCP frame too short: {} bytes",
                frame.len()
            )));
        }
        let pending = PendingTransaction {
            transaction_id: u16::from_be_bytes([frame[0], frame[1]]),
            unit: frame[6],
        };

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("TCP transport is not connected"))?;

        if self.config.packet_logging {
            log_packet("TCP", "TX", Some(pending.unit), frame);
        }

        let sent = with_deadline(self.config.timeout, "send request", async {
            stream.write_all(frame).await?;
            stream.flush().await?;
            Ok(())
        })
        .await;

        match sent {
            Ok(()) => {
                self.stats.record_sent(frame.len());
                self.pending = Some(pending);
                Ok(())
            }
            Err(err) => {
                self.stats.record_failure(&err);
                Err(err)
            }
        }
    }

    async fn read_result(&mut self, function: ModbusFunction) -> ModbusResult<Vec<u8>> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| ModbusError::transport("No request awaiting a response"))?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("TCP transport is not connected"))?;

        let packet_logging = self.config.packet_logging;
        let stats = &mut self.stats;
        let mut at_boundary = true;
        let received = with_deadline(
            self.config.timeout,
            "read response",
            Self::receive(stream, pending, stats, packet_logging, &mut at_boundary),
        )
        .await;

        if received.is_err() && !at_boundary {
            warn!(
                "Lost frame boundary on {}, dropping the connection",
                self.config.address
            );
            self.stream = None;
        }
        let received = received.and_then(|pdu| codec::response_payload(function, &pdu));

        match received {
            Ok(payload) => {
                self.stats.responses_received += 1;
                self.stats.last_response_at = Some(chrono::Utc::now());
                debug!(
                    "TCP response for tid {}: {} payload bytes",
                    pending.transaction_id,
                    payload.len()
                );
                Ok(payload)
            }
            Err(err) => {
                self.stats.record_failure(&err);
                Err(err)
            }
        }
    }

    async fn connect(&mut self) -> ModbusResult<()> {
        let address = self.config.address;
        let stream = with_deadline(self.config.timeout, "connect", async {
            TcpStream::connect(address).await.map_err(|e| {
                ModbusError::connection(format!("Failed to connect to {}: {}", address, e))
            })
        })
        .await
        .map_err(|err| match err {
            ModbusError::Timeout { timeout_ms, .. } => ModbusError::connection(format!(
                "Connecting to {} timed out after {}ms",
                address, timeout_ms
            )),
            other => other,
        })?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY on {}: {}", address, e);
        }

        info!("Connected to Modbus TCP server {}", address);
        self.stream = Some(stream);
        self.pending = None;
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            info!("Disconnected from Modbus TCP server {}", self.config.address);
        }
        self.pending = None;
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
