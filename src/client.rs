//! Modbus master client
//!
//! The client owns one transport and serializes every operation on it: a
//! transaction builds its frame, delivers it and reads the answer while
//! holding the bus, so a response always belongs to the request just sent.
//! Clients take `&self`, so one instance can be shared between tasks behind
//! an `Arc`; concurrent calls queue up in arrival order.
//!
//! # API Naming Convention
//!
//! | Function Code | Primary Name | Code Alias |
//! |---------------|--------------|------------|
//! | 0x01 | `read_coils()` | `read_01()` |
//! | 0x03 | `read_holding_registers()` | `read_03()` |
//! | 0x04 | `read_input_registers()` | `read_04()` |
//! | 0x05 | `write_coil()` | `write_05()` |
//! | 0x06 | `write_holding_register()` | `write_06()` |
//! | 0x10 | `write_holding_registers()` | `write_10()` |
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use modbus_master::{ModbusClient, ModbusTcpClient, ModbusResult};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let client = ModbusTcpClient::from_address("127.0.0.1:502", Duration::from_secs(5)).await?;
//!
//!     let registers = client.read_holding_registers(1, 0, 10).await?;
//!     println!("Registers: {:?}", registers);
//!
//!     client.write_holding_register(1, 100, 0x1234).await?;
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::codec;
use crate::constants::ADDRESS_SPACE;
use crate::device_limits::DeviceLimits;
use crate::error::{ModbusError, ModbusResult};
use crate::logging::CallbackLogger;
use crate::protocol::{ConnectionState, ModbusFunction, UnitId};
use crate::serializer::RequestSerializer;
use crate::transport::{ModbusTransport, TcpConfig, TcpTransport, TransportStats};

#[cfg(feature = "rtu")]
use crate::transport::{RtuConfig, RtuTransport, SerialRtuTransport};

/// Observer invoked on every connection state transition
pub type ConnectionObserver = Box<dyn Fn(ConnectionState) + Send + Sync>;

/// Public Modbus master operations.
///
/// Every operation validates its inputs before touching the bus and runs as
/// one exclusive transaction.
///
/// # Protocol Limits
///
/// | Operation | Limit |
/// |-----------|-------|
/// | Read Coils (0x01) | 125 coils |
/// | Read Holding Registers (0x03) | 125 registers |
/// | Read Input Registers (0x04) | 125 registers |
/// | Write Multiple Registers (0x10) | 123 registers |
pub trait ModbusClient: Send + Sync {
    /// Write one holding register (function code 0x06).
    fn write_holding_register(
        &self,
        unit: UnitId,
        register: u16,
        value: u16,
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Read `count` holding registers (function code 0x03).
    ///
    /// Fails with [`ModbusError::InvalidArgument`] before any I/O when `count`
    /// exceeds the configured limit (at most 125).
    fn read_holding_registers(
        &self,
        unit: UnitId,
        start_register: u16,
        count: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Switch one coil on or off (function code 0x05).
    fn write_coil(
        &self,
        unit: UnitId,
        register: u16,
        value: bool,
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Read `count` coils (function code 0x01).
    fn read_coils(
        &self,
        unit: UnitId,
        start_coil: u16,
        count: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send;

    /// Read `count` input registers (function code 0x04).
    fn read_input_registers(
        &self,
        unit: UnitId,
        start_register: u16,
        count: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Write a block of holding registers (function code 0x10).
    fn write_holding_registers(
        &self,
        unit: UnitId,
        start_register: u16,
        values: &[u16],
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Open the transport. Fires a notification only on an actual transition.
    fn connect(&self) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Release the transport. Best-effort, never fails.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;

    fn is_connected(&self) -> bool;

    /// Request caps and pacing in effect for this client
    fn limits(&self) -> DeviceLimits;

    // ===== Function code aliases =====

    fn read_01(
        &self,
        unit: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send
    where
        Self: Sized,
    {
        self.read_coils(unit, address, quantity)
    }

    fn read_03(
        &self,
        unit: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send
    where
        Self: Sized,
    {
        self.read_holding_registers(unit, address, quantity)
    }

    fn read_04(
        &self,
        unit: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send
    where
        Self: Sized,
    {
        self.read_input_registers(unit, address, quantity)
    }

    fn write_05(
        &self,
        unit: UnitId,
        address: u16,
        value: bool,
    ) -> impl Future<Output = ModbusResult<()>> + Send
    where
        Self: Sized,
    {
        self.write_coil(unit, address, value)
    }

    fn write_06(
        &self,
        unit: UnitId,
        address: u16,
        value: u16,
    ) -> impl Future<Output = ModbusResult<()>> + Send
    where
        Self: Sized,
    {
        self.write_holding_register(unit, address, value)
    }

    fn write_10(
        &self,
        unit: UnitId,
        address: u16,
        values: &[u16],
    ) -> impl Future<Output = ModbusResult<()>> + Send
    where
        Self: Sized,
    {
        self.write_holding_registers(unit, address, values)
    }

    // ===== Batch read operations =====

    /// Read any number of holding registers, split into requests of at most
    /// `limits().read_register_limit()`.
    ///
    /// Each chunk is its own transaction; other callers may interleave
    /// between chunks.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use modbus_master::{ModbusClient, ModbusTcpClient};
    /// use std::time::Duration;
    ///
    /// # async fn example() -> modbus_master::ModbusResult<()> {
    /// let client = ModbusTcpClient::from_address("127.0.0.1:502", Duration::from_secs(5)).await?;
    ///
    /// // 500 registers → 4 requests of at most 125 each
    /// let registers = client.read_holding_registers_batch(1, 0, 500).await?;
    /// # Ok(())
    /// # }
    /// ```
    fn read_holding_registers_batch(
        &self,
        unit: UnitId,
        start_register: u16,
        count: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send
    where
        Self: Sized,
    {
        let limits = self.limits();
        async move {
            check_span(start_register, count)?;
            let mut result = Vec::with_capacity(count as usize);
            let mut address = start_register;
            let mut remaining = count;

            while remaining > 0 {
                let chunk = remaining.min(limits.read_register_limit());
                let values = self.read_holding_registers(unit, address, chunk).await?;
                result.extend_from_slice(&values);

                address = address.wrapping_add(chunk);
                remaining -= chunk;

                if limits.inter_request_delay_ms > 0 && remaining > 0 {
                    tokio::time::sleep(Duration::from_millis(limits.inter_request_delay_ms)).await;
                }
            }

            Ok(result)
        }
    }

    /// Read any number of coils, split into requests of at most
    /// `limits().read_coil_limit()`.
    fn read_coils_batch(
        &self,
        unit: UnitId,
        start_coil: u16,
        count: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send
    where
        Self: Sized,
    {
        let limits = self.limits();
        async move {
            check_span(start_coil, count)?;
            let mut result = Vec::with_capacity(count as usize);
            let mut address = start_coil;
            let mut remaining = count;

            while remaining > 0 {
                let chunk = remaining.min(limits.read_coil_limit());
                let coils = self.read_coils(unit, address, chunk).await?;
                result.extend_from_slice(&coils);

                address = address.wrapping_add(chunk);
                remaining -= chunk;

                if limits.inter_request_delay_ms > 0 && remaining > 0 {
                    tokio::time::sleep(Duration::from_millis(limits.inter_request_delay_ms)).await;
                }
            }

            Ok(result)
        }
    }
}

/// Reject a batch whose last item would lie beyond address 0xFFFF
fn check_span(start: u16, count: u16) -> ModbusResult<()> {
    if start as u32 + count as u32 > ADDRESS_SPACE {
        return Err(ModbusError::invalid_argument(format!(
            "{} items from address {} run past the end of the address space",
            count, start
        )));
    }
    Ok(())
}

/// Everything a transaction touches; only reachable through the serializer
struct Session<T> {
    transport: T,
    observers: Vec<ConnectionObserver>,
    logger: Option<CallbackLogger>,
}

impl<T: ModbusTransport> Session<T> {
    /// Deliver `frame` and wait for the payload answering it.
    async fn exchange(
        &mut self,
        unit: UnitId,
        function: ModbusFunction,
        frame: Vec<u8>,
    ) -> ModbusResult<Vec<u8>> {
        if let Some(logger) = &self.logger {
            logger.log_request(unit, function.to_u8(), &frame);
        }

        let outcome: ModbusResult<Vec<u8>> = async {
            self.transport.deliver(&frame).await?;
            self.transport.read_result(function).await
        }
        .await;

        match &outcome {
            Ok(payload) => {
                if let Some(logger) = &self.logger {
                    logger.log_response(unit, function.to_u8(), payload);
                }
            }
            Err(err) => warn!("{} to unit {} failed: {}", function, unit, err),
        }
        outcome
    }
}

/// Modbus master over any [`ModbusTransport`]
pub struct GenericModbusClient<T: ModbusTransport> {
    serializer: RequestSerializer<Session<T>>,
    /// Written only while holding the serializer
    connected: AtomicBool,
    limits: DeviceLimits,
}

impl<T: ModbusTransport> GenericModbusClient<T> {
    /// Create a disconnected client over `transport`
    pub fn new(transport: T) -> Self {
        Self {
            serializer: RequestSerializer::new(Session {
                transport,
                observers: Vec::new(),
                logger: None,
            }),
            connected: AtomicBool::new(false),
            limits: DeviceLimits::default(),
        }
    }

    /// Create a client that reports traffic to `logger`
    pub fn with_logger(transport: T, logger: CallbackLogger) -> Self {
        let mut client = Self::new(transport);
        client.serializer.get_mut().logger = Some(logger);
        client
    }

    /// Apply device-specific request caps
    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Register an observer for connection state transitions.
    ///
    /// Observers run synchronously, in registration order, exactly once per
    /// transition.
    pub fn on_connection_change<F>(&mut self, observer: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.serializer.get_mut().observers.push(Box::new(observer));
    }

    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from(self.connected.load(Ordering::SeqCst))
    }

    /// Transport statistics; waits for any transaction in flight
    pub async fn stats(&self) -> TransportStats {
        self.serializer.acquire().await.transport.stats()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.serializer.get_mut().transport
    }

    pub fn into_transport(self) -> T {
        self.serializer.into_inner().transport
    }

    /// Record a new state and notify observers if it differs from the old one.
    /// Callers hold the serializer.
    fn transition(&self, session: &Session<T>, state: ConnectionState) {
        let previous = self.connected.swap(state.is_connected(), Ordering::SeqCst);
        if previous == state.is_connected() {
            return;
        }
        info!("Modbus client {}", state);
        for observer in &session.observers {
            observer(state);
        }
    }

    /// Mark the client disconnected if the transport dropped its link during
    /// a transaction, so observers hear about it and `connect()` reopens it.
    fn sync_link_state(&self, session: &Session<T>) {
        if self.connected.load(Ordering::SeqCst) && !session.transport.is_connected() {
            warn!("Transport lost its connection");
            self.transition(session, ConnectionState::Disconnected);
        }
    }

    fn too_many(what: &str, action: &str, limit: u16, requested: usize) -> ModbusError {
        ModbusError::invalid_argument(format!(
            "A maximum of {} {} can be {} at one time, requested {}",
            limit, what, action, requested
        ))
    }

    async fn read_registers(
        &self,
        unit: UnitId,
        function: ModbusFunction,
        start_register: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>> {
        if !self.limits.is_read_within_limits(count) {
            let limit = self.limits.read_register_limit();
            return Err(Self::too_many("registers", "read", limit, count as usize));
        }

        self.serializer
            .run_exclusive(|mut session| async move {
                let frame = session
                    .transport
                    .build_read_frame(unit, function, start_register, count)?;
                let payload = session.exchange(unit, function, frame).await;
                self.sync_link_state(&session);
                codec::decode_registers(&payload?, count as usize)
            })
            .await
    }

    async fn write(
        &self,
        unit: UnitId,
        function: ModbusFunction,
        register: u16,
        data: Vec<u8>,
    ) -> ModbusResult<()> {
        self.serializer
            .run_exclusive(|mut session| async move {
                let frame = session
                    .transport
                    .build_write_frame(unit, function, register, &data)?;
                let echo = session.exchange(unit, function, frame).await;
                self.sync_link_state(&session);
                let echo = echo?;
                debug!("{} acknowledged: {:02X?}", function, echo);
                Ok(())
            })
            .await
    }
}

impl<T: ModbusTransport> ModbusClient for GenericModbusClient<T> {
    async fn write_holding_register(
        &self,
        unit: UnitId,
        register: u16,
        value: u16,
    ) -> ModbusResult<()> {
        let data = codec::encode_register_value(value).to_vec();
        self.write(unit, ModbusFunction::WriteSingleRegister, register, data)
            .await
    }

    async fn read_holding_registers(
        &self,
        unit: UnitId,
        start_register: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.read_registers(unit, ModbusFunction::ReadHoldingRegisters, start_register, count)
            .await
    }

    async fn write_coil(&self, unit: UnitId, register: u16, value: bool) -> ModbusResult<()> {
        let data = codec::encode_coil_value(value).to_vec();
        self.write(unit, ModbusFunction::WriteSingleCoil, register, data)
            .await
    }

    async fn read_coils(
        &self,
        unit: UnitId,
        start_coil: u16,
        count: u16,
    ) -> ModbusResult<Vec<bool>> {
        if !self.limits.is_coil_read_within_limits(count) {
            let limit = self.limits.read_coil_limit();
            return Err(Self::too_many("coils", "read", limit, count as usize));
        }

        self.serializer
            .run_exclusive(|mut session| async move {
                let function = ModbusFunction::ReadCoils;
                let frame = session
                    .transport
                    .build_read_frame(unit, function, start_coil, count)?;
                let payload = session.exchange(unit, function, frame).await;
                self.sync_link_state(&session);
                codec::decode_coils(&payload?, count as usize)
            })
            .await
    }

    async fn read_input_registers(
        &self,
        unit: UnitId,
        start_register: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.read_registers(unit, ModbusFunction::ReadInputRegisters, start_register, count)
            .await
    }

    async fn write_holding_registers(
        &self,
        unit: UnitId,
        start_register: u16,
        values: &[u16],
    ) -> ModbusResult<()> {
        let within =
            u16::try_from(values.len()).is_ok_and(|count| self.limits.is_write_within_limits(count));
        if !within {
            let limit = self.limits.write_register_limit();
            return Err(Self::too_many("registers", "written", limit, values.len()));
        }
        let data = codec::encode_register_block(values)?;
        self.write(unit, ModbusFunction::WriteMultipleRegisters, start_register, data)
            .await
    }

    async fn connect(&self) -> ModbusResult<()> {
        self.serializer
            .run_exclusive(|mut session| async move {
                if self.connected.load(Ordering::SeqCst) {
                    debug!("Connect requested while already connected");
                    return Ok(());
                }

                match session.transport.connect().await {
                    Ok(()) => {
                        self.transition(&session, ConnectionState::Connected);
                        Ok(())
                    }
                    Err(err) => {
                        warn!("Connect failed: {}", err);
                        Err(match err {
                            ModbusError::Connection { .. } => err,
                            other => ModbusError::connection(other.to_string()),
                        })
                    }
                }
            })
            .await
    }

    async fn disconnect(&self) {
        self.serializer
            .run_exclusive(|mut session| async move {
                session.transport.disconnect();
                self.transition(&session, ConnectionState::Disconnected);
            })
            .await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }
}

/// Modbus TCP client
pub type ModbusTcpClient = GenericModbusClient<TcpTransport>;

impl GenericModbusClient<TcpTransport> {
    /// Create a disconnected TCP client
    pub fn tcp(config: TcpConfig) -> Self {
        Self::new(TcpTransport::new(config))
    }

    /// Resolve `address`, then create and connect a TCP client
    pub async fn from_address(address: &str, timeout: Duration) -> ModbusResult<Self> {
        let socket_address = tokio::net::lookup_host(address)
            .await
            .map_err(|e| ModbusError::connection(format!("Cannot resolve {}: {}", address, e)))?
            .next()
            .ok_or_else(|| ModbusError::connection(format!("No address found for {}", address)))?;

        let client = Self::tcp(TcpConfig::new(socket_address, timeout));
        client.connect().await?;
        Ok(client)
    }
}

/// Modbus RTU client over a serial port
#[cfg(feature = "rtu")]
pub type ModbusRtuClient = GenericModbusClient<SerialRtuTransport>;

#[cfg(feature = "rtu")]
impl GenericModbusClient<SerialRtuTransport> {
    /// Create a client for `config` and open its serial port
    pub async fn open(config: RtuConfig) -> ModbusResult<Self> {
        let client = Self::new(RtuTransport::new(config));
        client.connect().await?;
        Ok(client)
    }
}
