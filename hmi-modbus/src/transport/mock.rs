//! In-memory transport with call counters and scripted failures.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{Request, Transport, TransportFactory};
use crate::config::ConnectionConfig;
use crate::error::{CommError, Result};

/// Register table addressed by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Table {
    Coils,
    DiscreteInputs,
    Holding,
    Input,
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub connected: bool,
    pub connect_calls: usize,
    pub disconnect_calls: usize,
    /// Errors returned by the next connect attempts, in order.
    pub connect_failures: VecDeque<CommError>,
    /// Every read/write that reached the transport.
    pub calls: Vec<Request>,
    pub bits: HashMap<(Table, u16), bool>,
    pub words: HashMap<(Table, u16), u16>,
    /// Error returned for every access at this point.
    pub failing: HashMap<(Table, u16), CommError>,
    /// Reads starting at this point take this long to answer.
    pub delays: HashMap<(Table, u16), Duration>,
}

/// Shared handle to the mock's state, kept by the test.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockHandle(Arc<Mutex<MockState>>);

impl MockHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap()
    }

    pub fn set_word(&self, table: Table, address: u16, value: u16) {
        self.state().words.insert((table, address), value);
    }

    pub fn set_bit(&self, table: Table, address: u16, value: bool) {
        self.state().bits.insert((table, address), value);
    }

    pub fn fail(&self, table: Table, address: u16, error: CommError) {
        self.state().failing.insert((table, address), error);
    }

    pub fn slow(&self, table: Table, address: u16, delay: Duration) {
        self.state().delays.insert((table, address), delay);
    }

    pub fn fail_connects(&self, errors: impl IntoIterator<Item = CommError>) {
        self.state().connect_failures.extend(errors);
    }

    /// Simulate the peer dropping the link.
    pub fn drop_link(&self) {
        self.state().connected = false;
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    pub fn calls(&self) -> Vec<Request> {
        self.state().calls.clone()
    }

    pub fn transport(&self) -> MockTransport {
        MockTransport(self.clone())
    }

    /// Factory handing out transports that share this state.
    pub fn factory(&self) -> TransportFactory {
        let handle = self.clone();
        Box::new(move |_: &ConnectionConfig| Box::new(handle.transport()) as Box<dyn Transport>)
    }
}

pub(crate) struct MockTransport(MockHandle);

impl MockTransport {
    async fn pause(&self, table: Table, address: u16) {
        let delay = self.0.state().delays.get(&(table, address)).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn record(&self, request: Request, table: Table, address: u16, count: u16) -> Result<()> {
        let mut state = self.0.state();
        if !state.connected {
            return Err(CommError::NotConnected);
        }
        state.calls.push(request);
        for addr in address..address.saturating_add(count) {
            if let Some(err) = state.failing.get(&(table, addr)).cloned() {
                if err.is_link_failure() {
                    state.connected = false;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn read_bits(&self, request: Request, table: Table, address: u16, count: u16) -> Result<Vec<bool>> {
        self.record(request, table, address, count)?;
        let state = self.0.state();
        Ok((address..address + count)
            .map(|a| state.bits.get(&(table, a)).copied().unwrap_or(false))
            .collect())
    }

    fn read_words(&self, request: Request, table: Table, address: u16, count: u16) -> Result<Vec<u16>> {
        self.record(request, table, address, count)?;
        let state = self.0.state();
        Ok((address..address + count)
            .map(|a| state.words.get(&(table, a)).copied().unwrap_or(0))
            .collect())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.0.state();
        state.connect_calls += 1;
        if let Some(err) = state.connect_failures.pop_front() {
            return Err(err);
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        let mut state = self.0.state();
        state.disconnect_calls += 1;
        state.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.0.state().connected
    }

    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>> {
        self.pause(Table::Coils, address).await;
        self.read_bits(Request::ReadCoils { address, count }, Table::Coils, address, count)
    }

    async fn read_discrete_inputs(&mut self, address: u16, count: u16) -> Result<Vec<bool>> {
        self.pause(Table::DiscreteInputs, address).await;
        self.read_bits(
            Request::ReadDiscreteInputs { address, count },
            Table::DiscreteInputs,
            address,
            count,
        )
    }

    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.pause(Table::Holding, address).await;
        self.read_words(
            Request::ReadHoldingRegisters { address, count },
            Table::Holding,
            address,
            count,
        )
    }

    async fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.pause(Table::Input, address).await;
        self.read_words(
            Request::ReadInputRegisters { address, count },
            Table::Input,
            address,
            count,
        )
    }

    async fn write_coil(&mut self, address: u16, value: bool) -> Result<()> {
        self.record(Request::WriteCoil { address, value }, Table::Coils, address, 1)?;
        self.0.set_bit(Table::Coils, address, value);
        Ok(())
    }

    async fn write_coils(&mut self, address: u16, values: &[bool]) -> Result<()> {
        self.record(
            Request::WriteCoils {
                address,
                values: values.to_vec(),
            },
            Table::Coils,
            address,
            values.len() as u16,
        )?;
        for (i, value) in values.iter().enumerate() {
            self.0.set_bit(Table::Coils, address + i as u16, *value);
        }
        Ok(())
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        self.record(Request::WriteRegister { address, value }, Table::Holding, address, 1)?;
        self.0.set_word(Table::Holding, address, value);
        Ok(())
    }
}
