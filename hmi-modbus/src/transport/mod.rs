//! Transport abstraction over Modbus TCP and Modbus RTU.
//!
//! Every call is bounded by the configured timeout and reports failures as
//! [`CommError::Timeout`], [`CommError::Transport`] or
//! [`CommError::Protocol`]. Values are returned raw: one `bool` per bit or
//! one `u16` per register, exactly `count` of them.

mod modbus;
#[cfg(test)]
pub(crate) mod mock;

pub use modbus::ModbusTransport;

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::error::Result;

/// Capability set shared by the TCP and RTU transports.
#[async_trait]
pub trait Transport: Send {
    /// Open the link. Fails with `Timeout` or `Transport`.
    async fn connect(&mut self) -> Result<()>;

    /// Close the link. Never fails; errors while closing are logged.
    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>>;

    async fn read_discrete_inputs(&mut self, address: u16, count: u16) -> Result<Vec<bool>>;

    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;

    async fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;

    async fn write_coil(&mut self, address: u16, value: bool) -> Result<()>;

    async fn write_coils(&mut self, address: u16, values: &[bool]) -> Result<()>;

    async fn write_register(&mut self, address: u16, value: u16) -> Result<()>;
}

/// Builds a transport for a connection configuration.
pub type TransportFactory = Box<dyn Fn(&ConnectionConfig) -> Box<dyn Transport> + Send + Sync>;

/// Factory producing [`ModbusTransport`]s (TCP or RTU by endpoint).
pub fn modbus_factory() -> TransportFactory {
    Box::new(|config: &ConnectionConfig| Box::new(ModbusTransport::new(config.clone())) as Box<dyn Transport>)
}

/// A single operation forwarded through the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    ReadCoils { address: u16, count: u16 },
    ReadDiscreteInputs { address: u16, count: u16 },
    ReadHoldingRegisters { address: u16, count: u16 },
    ReadInputRegisters { address: u16, count: u16 },
    WriteCoil { address: u16, value: bool },
    WriteCoils { address: u16, values: Vec<bool> },
    WriteRegister { address: u16, value: u16 },
}

/// Raw result of a [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Bits(Vec<bool>),
    Words(Vec<u16>),
    Written,
}

impl Request {
    /// Run this request on a transport.
    pub async fn dispatch(&self, transport: &mut dyn Transport) -> Result<Response> {
        match self {
            Request::ReadCoils { address, count } => transport
                .read_coils(*address, *count)
                .await
                .map(Response::Bits),
            Request::ReadDiscreteInputs { address, count } => transport
                .read_discrete_inputs(*address, *count)
                .await
                .map(Response::Bits),
            Request::ReadHoldingRegisters { address, count } => transport
                .read_holding_registers(*address, *count)
                .await
                .map(Response::Words),
            Request::ReadInputRegisters { address, count } => transport
                .read_input_registers(*address, *count)
                .await
                .map(Response::Words),
            Request::WriteCoil { address, value } => transport
                .write_coil(*address, *value)
                .await
                .map(|_| Response::Written),
            Request::WriteCoils { address, values } => transport
                .write_coils(*address, values)
                .await
                .map(|_| Response::Written),
            Request::WriteRegister { address, value } => transport
                .write_register(*address, *value)
                .await
                .map(|_| Response::Written),
        }
    }
}
