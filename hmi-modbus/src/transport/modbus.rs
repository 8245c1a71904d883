//! tokio-modbus backed transport for TCP and RTU endpoints.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::{debug, info};

use super::Transport;
use crate::config::{ConnectionConfig, Endpoint, Parity};
use crate::error::{CommError, Result};

/// A Modbus master connection to one device.
///
/// A request that times out leaves its reply in flight, and the device may
/// still send it later. The context is then discarded and reopened before
/// the next request, so a late frame is never read as the answer to a
/// different request. The link still counts as connected meanwhile.
pub struct ModbusTransport {
    config: ConnectionConfig,
    ctx: Option<Context>,
    reopen: bool,
}

impl ModbusTransport {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            ctx: None,
            reopen: false,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The live context, reopening it first after a timed-out request.
    async fn context(&mut self) -> Result<&mut Context> {
        if self.ctx.is_none() && self.reopen {
            debug!(endpoint = %self.config.endpoint, "Reopening Modbus link after timeout");
            self.reopen = false;
            let ctx = open(&self.config)
                .await
                .map_err(|e| CommError::transport(format!("Reopen after timeout failed: {}", e)))?;
            self.ctx = Some(ctx);
        }
        self.ctx.as_mut().ok_or(CommError::NotConnected)
    }

    /// Track link health after a call and check the response length.
    fn settle<T>(&mut self, result: Result<Vec<T>>, count: u16) -> Result<Vec<T>> {
        match self.settle_write(result)? {
            values if values.len() < count as usize => {
                self.ctx = None;
                Err(CommError::transport(format!(
                    "Malformed response: expected {} values, got {}",
                    count,
                    values.len()
                )))
            }
            mut values => {
                values.truncate(count as usize);
                Ok(values)
            }
        }
    }

    fn settle_write<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Err(CommError::Timeout) => {
                self.ctx = None;
                self.reopen = true;
            }
            Err(e) if e.is_link_failure() => self.ctx = None,
            _ => {}
        }
        result
    }
}

async fn open(config: &ConnectionConfig) -> Result<Context> {
    let timeout = config.timeout;
    let slave = Slave(config.unit_id);

    match &config.endpoint {
        Endpoint::Tcp { host, port } => {
            let addr = tokio::time::timeout(timeout, tokio::net::lookup_host((host.as_str(), *port)))
                .await??
                .next()
                .ok_or_else(|| CommError::transport(format!("No address found for {}", host)))?;

            let ctx = tokio::time::timeout(timeout, tcp::connect_slave(addr, slave)).await??;
            Ok(ctx)
        }
        Endpoint::Rtu {
            port,
            baud_rate,
            data_bits,
            parity,
            stop_bits,
        } => {
            let builder = tokio_serial::new(port, *baud_rate)
                .parity(match parity {
                    Parity::None => tokio_serial::Parity::None,
                    Parity::Even => tokio_serial::Parity::Even,
                    Parity::Odd => tokio_serial::Parity::Odd,
                })
                .stop_bits(if *stop_bits == 2 {
                    tokio_serial::StopBits::Two
                } else {
                    tokio_serial::StopBits::One
                })
                .data_bits(match data_bits {
                    5 => tokio_serial::DataBits::Five,
                    6 => tokio_serial::DataBits::Six,
                    7 => tokio_serial::DataBits::Seven,
                    _ => tokio_serial::DataBits::Eight,
                })
                .timeout(timeout);

            let serial = tokio_serial::SerialStream::open(&builder)
                .map_err(|e| CommError::transport(format!("Serial open failed: {}", e)))?;

            Ok(rtu::attach_slave(serial, slave))
        }
    }
}

/// Bound a tokio-modbus call by `timeout` and flatten its nested result.
async fn guarded<T>(
    timeout: Duration,
    call: impl Future<Output = tokio_modbus::Result<T>>,
) -> Result<T> {
    let response = tokio::time::timeout(timeout, call).await??;
    Ok(response?)
}

#[async_trait]
impl Transport for ModbusTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.ctx.is_some() {
            return Ok(());
        }
        let ctx = open(&self.config).await?;
        info!(endpoint = %self.config.endpoint, unit_id = self.config.unit_id, "Modbus link open");
        self.ctx = Some(ctx);
        self.reopen = false;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.reopen = false;
        if let Some(mut ctx) = self.ctx.take() {
            let timeout = self.config.timeout;
            match tokio::time::timeout(timeout, ctx.disconnect()).await {
                Ok(Ok(_)) => debug!(endpoint = %self.config.endpoint, "Modbus link closed"),
                Ok(Err(e)) => debug!(endpoint = %self.config.endpoint, error = %e, "Error closing Modbus link"),
                Err(_) => debug!(endpoint = %self.config.endpoint, "Timed out closing Modbus link"),
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some() || self.reopen
    }

    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>> {
        let timeout = self.config.timeout;
        let ctx = self.context().await?;
        let result = guarded(timeout, ctx.read_coils(address, count)).await;
        self.settle(result, count)
    }

    async fn read_discrete_inputs(&mut self, address: u16, count: u16) -> Result<Vec<bool>> {
        let timeout = self.config.timeout;
        let ctx = self.context().await?;
        let result = guarded(timeout, ctx.read_discrete_inputs(address, count)).await;
        self.settle(result, count)
    }

    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let timeout = self.config.timeout;
        let ctx = self.context().await?;
        let result = guarded(timeout, ctx.read_holding_registers(address, count)).await;
        self.settle(result, count)
    }

    async fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let timeout = self.config.timeout;
        let ctx = self.context().await?;
        let result = guarded(timeout, ctx.read_input_registers(address, count)).await;
        self.settle(result, count)
    }

    async fn write_coil(&mut self, address: u16, value: bool) -> Result<()> {
        let timeout = self.config.timeout;
        let ctx = self.context().await?;
        let result = guarded(timeout, ctx.write_single_coil(address, value)).await;
        self.settle_write(result)
    }

    async fn write_coils(&mut self, address: u16, values: &[bool]) -> Result<()> {
        let timeout = self.config.timeout;
        let ctx = self.context().await?;
        let result = guarded(timeout, ctx.write_multiple_coils(address, values)).await;
        self.settle_write(result)
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        let timeout = self.config.timeout;
        let ctx = self.context().await?;
        let result = guarded(timeout, ctx.write_single_register(address, value)).await;
        self.settle_write(result)
    }
}
