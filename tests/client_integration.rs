//! End-to-end tests against an in-process Modbus TCP slave and an
//! instrumented transport.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use modbus_master::codec;
use modbus_master::{
    ConnectionState, GenericModbusClient, ModbusClient, ModbusError, ModbusFunction,
    ModbusResult, ModbusTcpClient, ModbusTransport, TcpConfig, TransportStats, UnitId,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// ============================================================================
// Loopback slave
// ============================================================================

const SLAVE_UNIT: u8 = 1;

#[derive(Default)]
struct SlaveMemory {
    registers: Vec<u16>,
    coils: Vec<bool>,
}

impl SlaveMemory {
    fn new() -> Self {
        Self {
            registers: (0..256).map(|i| i * 3).collect(),
            coils: vec![false; 256],
        }
    }

    /// Answer one request PDU the way a Modbus slave would
    fn handle(&mut self, pdu: &[u8]) -> Vec<u8> {
        let function = pdu[0];
        let address = u16::from_be_bytes([pdu[1], pdu[2]]) as usize;
        let operand = u16::from_be_bytes([pdu[3], pdu[4]]);

        match function {
            0x03 | 0x04 => {
                let count = operand as usize;
                if address + count > self.registers.len() {
                    return vec![function | 0x80, 0x02];
                }
                let mut reply = vec![function, (count * 2) as u8];
                for value in &self.registers[address..address + count] {
                    reply.extend_from_slice(&value.to_be_bytes());
                }
                reply
            }
            0x01 => {
                let count = operand as usize;
                let mut bytes = vec![0u8; count.div_ceil(8)];
                for i in 0..count {
                    if self.coils[address + i] {
                        bytes[i / 8] |= 1 << (i % 8);
                    }
                }
                let mut reply = vec![function, bytes.len() as u8];
                reply.extend_from_slice(&bytes);
                reply
            }
            0x05 => {
                self.coils[address] = operand == 0xFFFF;
                pdu[..5].to_vec()
            }
            0x06 => {
                self.registers[address] = operand;
                pdu[..5].to_vec()
            }
            0x10 => {
                let count = operand as usize;
                for i in 0..count {
                    self.registers[address + i] =
                        u16::from_be_bytes([pdu[6 + 2 * i], pdu[7 + 2 * i]]);
                }
                pdu[..5].to_vec()
            }
            _ => vec![function | 0x80, 0x01],
        }
    }
}

async fn serve(mut socket: TcpStream, memory: Arc<Mutex<SlaveMemory>>) {
    loop {
        let mut header = [0u8; 7];
        if socket.read_exact(&mut header).await.is_err() {
            return;
        }
        let len = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut pdu = vec![0u8; len - 1];
        if socket.read_exact(&mut pdu).await.is_err() {
            return;
        }

        let reply = memory.lock().unwrap().handle(&pdu);

        let mut frame = header[..4].to_vec();
        frame.extend_from_slice(&((reply.len() + 1) as u16).to_be_bytes());
        frame.push(SLAVE_UNIT);
        frame.extend_from_slice(&reply);
        if socket.write_all(&frame).await.is_err() {
            return;
        }
    }
}

async fn start_slave() -> (SocketAddr, Arc<Mutex<SlaveMemory>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let memory = Arc::new(Mutex::new(SlaveMemory::new()));
    let shared = memory.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve(socket, shared.clone()));
        }
    });
    (address, memory)
}

// ============================================================================
// TCP end to end
// ============================================================================

#[tokio::test]
async fn test_tcp_register_and_coil_round_trip() {
    let (address, memory) = start_slave().await;
    let client = ModbusTcpClient::from_address(&address.to_string(), Duration::from_secs(2))
        .await
        .unwrap();
    assert!(client.is_connected());

    let values = client.read_holding_registers(SLAVE_UNIT, 10, 4).await.unwrap();
    assert_eq!(values, vec![30, 33, 36, 39]);

    client.write_holding_register(SLAVE_UNIT, 10, 0xBEEF).await.unwrap();
    assert_eq!(memory.lock().unwrap().registers[10], 0xBEEF);
    assert_eq!(client.read_03(SLAVE_UNIT, 10, 1).await.unwrap(), vec![0xBEEF]);

    client.write_coil(SLAVE_UNIT, 172, true).await.unwrap();
    client.write_coil(SLAVE_UNIT, 174, true).await.unwrap();
    let coils = client.read_coils(SLAVE_UNIT, 170, 6).await.unwrap();
    assert_eq!(coils, vec![false, false, true, false, true, false]);

    client.write_coil(SLAVE_UNIT, 172, false).await.unwrap();
    assert!(!memory.lock().unwrap().coils[172]);

    client.write_10(SLAVE_UNIT, 20, &[1, 2, 3]).await.unwrap();
    assert_eq!(client.read_04(SLAVE_UNIT, 20, 3).await.unwrap(), vec![1, 2, 3]);

    let stats = client.stats().await;
    assert_eq!(stats.requests_sent, 9);
    assert_eq!(stats.responses_received, 9);

    client.disconnect().await;
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_tcp_slave_exception() {
    let (address, _memory) = start_slave().await;
    let client = ModbusTcpClient::from_address(&address.to_string(), Duration::from_secs(2))
        .await
        .unwrap();

    let err = client.read_holding_registers(SLAVE_UNIT, 250, 10).await.unwrap_err();
    assert_eq!(err, ModbusError::exception(0x03, 0x02));

    // The connection stays usable after an exception response
    assert_eq!(client.read_holding_registers(SLAVE_UNIT, 1, 1).await.unwrap(), vec![3]);
}

#[tokio::test]
async fn test_tcp_batch_read_spans_requests() {
    let (address, _memory) = start_slave().await;
    let client = ModbusTcpClient::from_address(&address.to_string(), Duration::from_secs(2))
        .await
        .unwrap();

    let values = client.read_holding_registers_batch(SLAVE_UNIT, 0, 200).await.unwrap();

    assert_eq!(values, (0..200).map(|i| i * 3).collect::<Vec<u16>>());
    assert_eq!(client.stats().await.requests_sent, 2);
}

#[tokio::test]
async fn test_tcp_shared_client_answers_every_caller() {
    let (address, _memory) = start_slave().await;
    let client = Arc::new(
        ModbusTcpClient::from_address(&address.to_string(), Duration::from_secs(2))
            .await
            .unwrap(),
    );

    let mut handles = Vec::new();
    for caller in 0..16u16 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let values = client.read_holding_registers(SLAVE_UNIT, caller, 1).await?;
            Ok::<_, ModbusError>((caller, values))
        }));
    }

    for handle in handles {
        let (caller, values) = handle.await.unwrap().unwrap();
        assert_eq!(values, vec![caller * 3]);
    }
}

#[tokio::test]
async fn test_tcp_connect_failure_reports_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let mut client = ModbusTcpClient::tcp(TcpConfig::new(address, Duration::from_millis(500)));
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    client.on_connection_change(move |state| sink.lock().unwrap().push(state));

    let err = client.connect().await.unwrap_err();

    assert!(matches!(err, ModbusError::Connection { .. }));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert!(events.lock().unwrap().is_empty());
}

// ============================================================================
// Serialization under concurrency
// ============================================================================

/// Counts how many transactions are between deliver() and read_result()
#[derive(Clone, Default)]
struct InFlightCounter {
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

struct SlowTransport {
    counter: InFlightCounter,
    fail_every: usize,
    calls: usize,
}

impl ModbusTransport for SlowTransport {
    fn build_write_frame(
        &mut self,
        unit: UnitId,
        function: ModbusFunction,
        register: u16,
        data: &[u8],
    ) -> ModbusResult<Vec<u8>> {
        let pdu = codec::write_request_pdu(function, register, data)?;
        let mut frame = vec![unit];
        frame.extend_from_slice(pdu.as_slice());
        Ok(frame)
    }

    fn build_read_frame(
        &mut self,
        unit: UnitId,
        function: ModbusFunction,
        start_register: u16,
        count: u16,
    ) -> ModbusResult<Vec<u8>> {
        let pdu = codec::read_request_pdu(function, start_register, count)?;
        let mut frame = vec![unit];
        frame.extend_from_slice(pdu.as_slice());
        Ok(frame)
    }

    fn deliver(&mut self, _frame: &[u8]) -> impl Future<Output = ModbusResult<()>> + Send {
        let counter = self.counter.clone();
        async move {
            let now = counter.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            counter.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(())
        }
    }

    fn read_result(
        &mut self,
        _function: ModbusFunction,
    ) -> impl Future<Output = ModbusResult<Vec<u8>>> + Send {
        self.calls += 1;
        let fail = self.fail_every > 0 && self.calls % self.fail_every == 0;
        let counter = self.counter.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(2)).await;
            counter.in_flight.fetch_sub(1, Ordering::SeqCst);
            counter.completed.fetch_add(1, Ordering::SeqCst);
            if fail {
                Err(ModbusError::timeout("read response", 2))
            } else {
                Ok(vec![0x00, 0x07])
            }
        }
    }

    async fn connect(&mut self) -> ModbusResult<()> {
        Ok(())
    }

    fn disconnect(&mut self) {}

    fn is_connected(&self) -> bool {
        true
    }

    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transactions_never_overlap() {
    let counter = InFlightCounter::default();
    let client = Arc::new(GenericModbusClient::new(SlowTransport {
        counter: counter.clone(),
        fail_every: 3,
        calls: 0,
    }));

    let mut handles = Vec::new();
    for task in 0..24u16 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            if task % 2 == 0 {
                client.read_holding_registers(1, task, 1).await.map(|_| ())
            } else {
                client.write_holding_register(1, task, task).await
            }
        }));
    }

    let mut failures = 0;
    for handle in handles {
        if handle.await.unwrap().is_err() {
            failures += 1;
        }
    }

    assert_eq!(counter.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(counter.completed.load(Ordering::SeqCst), 24);
    assert_eq!(failures, 8);
}
