//! Communication worker and its cloneable handle.
//!
//! One task owns the [`ConnectionManager`]. Commands from any number of
//! [`CommHandle`]s are processed strictly in order, interleaved with the
//! periodic poll tick and reconnect maintenance. A due tick runs at the next
//! command boundary, so a steady stream of writes cannot starve polling.
//! Nothing preempts a request in flight; `stop()` only raises an abort flag
//! the poll scheduler checks between requests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hmi_common::{ConnectionStatus, Value};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, PollConfig, VariableKind};
use crate::connection::ConnectionManager;
use crate::error::{CommError, Result};
use crate::poller::{self, TickReport};
use crate::registry::{Variable, VariableRegistry};
use crate::retry::ReconnectBackoff;
use crate::transport::TransportFactory;
use crate::writer::{self, WriteValue};

const TICK_CHANNEL_CAPACITY: usize = 16;

enum Command {
    SetConnection {
        config: Option<ConnectionConfig>,
        reply: oneshot::Sender<()>,
    },
    Start {
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Retry {
        reply: oneshot::Sender<Result<()>>,
    },
    Tick {
        reply: oneshot::Sender<Result<TickReport>>,
    },
    Write {
        name: String,
        value: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    WriteRaw {
        kind: VariableKind,
        address: u16,
        value: WriteValue,
        reply: oneshot::Sender<Result<()>>,
    },
    Register {
        variable: Variable,
        reply: oneshot::Sender<Result<()>>,
    },
    Update {
        name: String,
        variable: Variable,
        reply: oneshot::Sender<Result<()>>,
    },
    Deregister {
        name: String,
        reply: oneshot::Sender<Result<Variable>>,
    },
    ReplaceVariables {
        variables: Vec<Variable>,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// The worker task state.
pub struct CommService {
    conn: ConnectionManager,
    registry: Arc<VariableRegistry>,
    connection: Option<ConnectionConfig>,
    poll: PollConfig,
    abort: Arc<AtomicBool>,
    ticks: broadcast::Sender<TickReport>,
}

impl CommService {
    /// Spawn the worker on the current runtime and return a handle to it.
    ///
    /// `connection` is the active protocol block, if any; communication only
    /// begins on [`CommHandle::start`].
    pub fn spawn(
        poll: PollConfig,
        connection: Option<ConnectionConfig>,
        registry: Arc<VariableRegistry>,
        factory: TransportFactory,
    ) -> CommHandle {
        let conn = ConnectionManager::new(
            factory,
            ReconnectBackoff::from_poll(&poll),
        );
        let status = conn.subscribe();
        let abort = Arc::new(AtomicBool::new(false));
        let (ticks, _) = broadcast::channel(TICK_CHANNEL_CAPACITY);
        let (tx, rx) = mpsc::channel(poll.queue_depth.max(1));

        let service = CommService {
            conn,
            registry: registry.clone(),
            connection,
            poll,
            abort: abort.clone(),
            ticks: ticks.clone(),
        };
        tokio::spawn(service.run(rx));

        CommHandle {
            tx,
            registry,
            status,
            ticks,
            abort,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let period = self.poll.interval();
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(interval_ms = self.poll.interval_ms, "Communication worker started");

        loop {
            tokio::select! {
                biased;
                _ = interval.tick() => {
                    self.conn.maintain().await;
                    if self.conn.is_usable() {
                        // Errors here only mean the link dropped before the tick
                        let _ = self.poll().await;
                    }
                }
                command = rx.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.conn.stop().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        self.conn.stop().await;
                        break;
                    }
                },
            }
        }

        debug!("Communication worker stopped");
    }

    async fn poll(&mut self) -> Result<TickReport> {
        let report = poller::tick(&mut self.conn, &self.registry, &self.abort).await?;
        // No subscribers is fine
        let _ = self.ticks.send(report.clone());
        Ok(report)
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::SetConnection { config, reply } => {
                self.connection = config;
                let _ = reply.send(());
            }
            Command::Start { reply } => {
                let result = match self.connection.clone() {
                    Some(config) => {
                        self.abort.store(false, Ordering::Release);
                        self.conn.start(config).await
                    }
                    None => Err(CommError::config("No active connection configured")),
                };
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                self.conn.stop().await;
                let _ = reply.send(());
            }
            Command::Retry { reply } => {
                let _ = reply.send(self.conn.retry().await);
            }
            Command::Tick { reply } => {
                let _ = reply.send(self.poll().await);
            }
            Command::Write { name, value, reply } => {
                let result = match self.registry.get(&name) {
                    Some(variable) => match writer::encode_named(&variable, value) {
                        Ok(raw) => writer::write(&mut self.conn, &variable.kind, variable.address, raw).await,
                        Err(e) => Err(e),
                    },
                    None => Err(CommError::UnknownVariable(name)),
                };
                let _ = reply.send(result);
            }
            Command::WriteRaw {
                kind,
                address,
                value,
                reply,
            } => {
                let _ = reply.send(writer::write(&mut self.conn, &kind, address, value).await);
            }
            Command::Register { variable, reply } => {
                let _ = reply.send(self.registry.insert(reset(variable)));
            }
            Command::Update {
                name,
                variable,
                reply,
            } => {
                let _ = reply.send(self.registry.update(&name, variable));
            }
            Command::Deregister { name, reply } => {
                let result = self
                    .registry
                    .remove(&name)
                    .ok_or(CommError::UnknownVariable(name));
                let _ = reply.send(result);
            }
            Command::ReplaceVariables { variables, reply } => {
                let variables = variables.into_iter().map(reset).collect();
                let _ = reply.send(self.registry.replace_all(variables));
            }
            Command::Shutdown { reply } => {
                // Handled by the run loop
                let _ = reply.send(());
            }
        }
    }
}

/// New definitions start without a value.
fn reset(mut variable: Variable) -> Variable {
    variable.value = Value::Unknown;
    variable.updated_at = None;
    variable.fault = None;
    variable
}

/// Cloneable handle to the communication worker.
///
/// Reads go straight to the shared registry; everything else is queued to
/// the worker and answered in order.
#[derive(Clone)]
pub struct CommHandle {
    tx: mpsc::Sender<Command>,
    registry: Arc<VariableRegistry>,
    status: watch::Receiver<ConnectionStatus>,
    ticks: broadcast::Sender<TickReport>,
    abort: Arc<AtomicBool>,
}

impl CommHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| CommError::ServiceClosed)?;
        rx.await.map_err(|_| CommError::ServiceClosed)
    }

    /// Replace the connection used by the next `start()`.
    pub async fn set_connection(&self, config: Option<ConnectionConfig>) -> Result<()> {
        self.request(|reply| Command::SetConnection { config, reply }).await
    }

    /// Start communicating with the configured device.
    ///
    /// A failed first connect is returned, but the worker keeps retrying.
    pub async fn start(&self) -> Result<()> {
        self.request(|reply| Command::Start { reply }).await?
    }

    /// Abort the current tick and disconnect.
    pub async fn stop(&self) -> Result<()> {
        self.abort.store(true, Ordering::Release);
        info!("Stop requested");
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Reconnect now instead of waiting for the backoff.
    pub async fn retry(&self) -> Result<()> {
        self.request(|reply| Command::Retry { reply }).await?
    }

    /// Whether communication has been started and not stopped.
    pub fn is_running(&self) -> bool {
        self.status.borrow().state.is_running()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Last-known value of `name`; `Unknown` when not registered.
    pub fn read(&self, name: &str) -> Value {
        self.registry.value(name)
    }

    pub fn variables(&self) -> Vec<Variable> {
        self.registry.snapshot()
    }

    /// Write an engineering value to a named variable.
    pub async fn write(&self, name: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let (name, value) = (name.into(), value.into());
        self.request(|reply| Command::Write { name, value, reply })
            .await?
    }

    /// Write a raw value by kind and address.
    pub async fn write_raw(&self, kind: VariableKind, address: u16, value: WriteValue) -> Result<()> {
        self.request(|reply| Command::WriteRaw {
            kind,
            address,
            value,
            reply,
        })
        .await?
    }

    pub async fn register(&self, variable: Variable) -> Result<()> {
        self.request(|reply| Command::Register { variable, reply }).await?
    }

    /// Replace a variable's definition; a rename is allowed.
    pub async fn update(&self, name: impl Into<String>, variable: Variable) -> Result<()> {
        let name = name.into();
        self.request(|reply| Command::Update {
            name,
            variable,
            reply,
        })
        .await?
    }

    pub async fn deregister(&self, name: impl Into<String>) -> Result<Variable> {
        let name = name.into();
        self.request(|reply| Command::Deregister { name, reply }).await?
    }

    pub async fn replace_variables(&self, variables: Vec<Variable>) -> Result<()> {
        self.request(|reply| Command::ReplaceVariables { variables, reply })
            .await?
    }

    /// Run one poll tick now.
    pub async fn tick(&self) -> Result<TickReport> {
        self.request(|reply| Command::Tick { reply }).await?
    }

    /// Receive a report after every completed tick.
    pub fn subscribe_ticks(&self) -> broadcast::Receiver<TickReport> {
        self.ticks.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Disconnect and end the worker. Later calls fail with `ServiceClosed`.
    pub async fn shutdown(&self) -> Result<()> {
        self.abort.store(true, Ordering::Release);
        match self.request(|reply| Command::Shutdown { reply }).await {
            Ok(()) | Err(CommError::ServiceClosed) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Shutdown failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataType, Endpoint, VariableFormat};
    use crate::transport::Request;
    use crate::transport::mock::{MockHandle, Table};
    use hmi_common::ConnectionState;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn connection() -> ConnectionConfig {
        ConnectionConfig {
            endpoint: Endpoint::Tcp {
                host: "127.0.0.1".to_string(),
                port: 5020,
            },
            unit_id: 1,
            timeout: Duration::from_secs(2),
        }
    }

    /// Long poll interval so only explicit ticks run.
    fn quiet_poll() -> PollConfig {
        PollConfig {
            interval_ms: 3_600_000,
            ..Default::default()
        }
    }

    fn spawn(mock: &MockHandle, poll: PollConfig) -> CommHandle {
        let registry = Arc::new(VariableRegistry::new());
        registry.insert(Variable::new("temp", "holding_register", 0)).unwrap();
        CommService::spawn(poll, Some(connection()), registry, mock.factory())
    }

    #[tokio::test]
    async fn test_start_tick_read() {
        let mock = MockHandle::new();
        mock.set_word(Table::Holding, 0, 42);
        let handle = spawn(&mock, quiet_poll());

        assert!(!handle.is_running());
        handle.start().await.unwrap();
        assert_eq!(handle.status().state, ConnectionState::Connected);

        let report = handle.tick().await.unwrap();
        assert_eq!(report.polled, 1);
        assert_eq!(handle.read("temp"), Value::Integer(42));
        assert_eq!(handle.read("missing"), Value::Unknown);
    }

    #[tokio::test]
    async fn test_after_stop_requests_fail_fast() {
        let mock = MockHandle::new();
        let handle = spawn(&mock, quiet_poll());
        handle.start().await.unwrap();

        handle.stop().await.unwrap();
        let calls = mock.call_count();

        assert!(!handle.is_running());
        assert_eq!(handle.tick().await, Err(CommError::NotConnected));
        assert_eq!(handle.write("temp", 1i64).await, Err(CommError::NotConnected));
        assert_eq!(mock.call_count(), calls);
    }

    #[tokio::test]
    async fn test_start_without_connection() {
        let mock = MockHandle::new();
        let handle = CommService::spawn(
            quiet_poll(),
            None,
            Arc::new(VariableRegistry::new()),
            mock.factory(),
        );

        assert!(matches!(handle.start().await, Err(CommError::Config(_))));

        assert_ok!(handle.set_connection(Some(connection())).await);
        assert_ok!(handle.start().await);
        assert!(handle.is_running());
    }

    #[tokio::test]
    async fn test_register_and_deregister() {
        let mock = MockHandle::new();
        let handle = spawn(&mock, quiet_poll());

        handle.register(Variable::new("pump", "coil", 2)).await.unwrap();
        assert!(matches!(
            handle.register(Variable::new("pump", "coil", 3)).await,
            Err(CommError::DuplicateVariable(_))
        ));
        assert_eq!(handle.variables().len(), 2);

        let removed = handle.deregister("pump").await.unwrap();
        assert_eq!(removed.address, 2);
        assert!(matches!(
            handle.deregister("pump").await,
            Err(CommError::UnknownVariable(_))
        ));
    }

    #[tokio::test]
    async fn test_replace_variables_resets_values() {
        let mock = MockHandle::new();
        let handle = spawn(&mock, quiet_poll());

        let mut stale = Variable::new("level", "input_register", 1);
        stale.value = Value::Integer(5);
        handle.replace_variables(vec![stale]).await.unwrap();

        let names: Vec<_> = handle.variables().into_iter().map(|v| v.name).collect();
        assert_eq!(names, vec!["level"]);
        assert_eq!(handle.read("level"), Value::Unknown);
    }

    #[tokio::test]
    async fn test_named_write_scales() {
        let mock = MockHandle::new();
        let handle = spawn(&mock, quiet_poll());
        handle
            .register(Variable::new("setpoint", "holding_register", 4).with_format(VariableFormat {
                data_type: DataType::U16,
                scale: 0.5,
                offset: 0.0,
            }))
            .await
            .unwrap();
        handle.start().await.unwrap();

        handle.write("setpoint", 21.0).await.unwrap();

        assert_eq!(mock.calls(), vec![Request::WriteRegister { address: 4, value: 42 }]);
        // Writes never update the registry
        assert_eq!(handle.read("setpoint"), Value::Unknown);
        assert!(matches!(
            handle.write("nope", 1.0).await,
            Err(CommError::UnknownVariable(_))
        ));
    }

    #[tokio::test]
    async fn test_write_raw_read_only_kind() {
        let mock = MockHandle::new();
        let handle = spawn(&mock, quiet_poll());
        handle.start().await.unwrap();

        let result = handle
            .write_raw(VariableKind::InputRegister, 0, WriteValue::Register(1))
            .await;

        assert!(matches!(result, Err(CommError::InvalidKind(_))));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_ticks_are_broadcast() {
        let mock = MockHandle::new();
        mock.set_word(Table::Holding, 0, 7);
        let handle = spawn(
            &mock,
            PollConfig {
                interval_ms: 100,
                ..Default::default()
            },
        );
        let mut ticks = handle.subscribe_ticks();

        handle.start().await.unwrap();
        let report = ticks.recv().await.unwrap();

        assert_eq!(report.polled, 1);
        assert_eq!(handle.read("temp"), Value::Integer(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_link_loss() {
        let mock = MockHandle::new();
        let handle = spawn(
            &mock,
            PollConfig {
                interval_ms: 100,
                reconnect_min_ms: 1000,
                reconnect_max_ms: 4000,
                ..Default::default()
            },
        );
        let mut status = handle.subscribe_status();

        handle.start().await.unwrap();
        mock.fail(Table::Holding, 0, CommError::transport("connection reset"));

        status
            .wait_for(|s| s.state == ConnectionState::Faulted)
            .await
            .unwrap();
        assert!(handle.is_running());
        assert_eq!(handle.read("temp"), Value::Unknown);

        mock.state().failing.clear();
        status
            .wait_for(|s| s.state == ConnectionState::Connected)
            .await
            .unwrap();
        assert_eq!(mock.state().connect_calls, 2);
    }

    #[tokio::test]
    async fn test_explicit_retry() {
        let mock = MockHandle::new();
        mock.fail_connects([CommError::transport("refused")]);
        let handle = spawn(&mock, quiet_poll());

        assert!(handle.start().await.is_err());
        assert_eq!(handle.status().state, ConnectionState::Faulted);
        assert!(handle.status().last_error.is_some());

        handle.retry().await.unwrap();
        assert_eq!(handle.status().state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_ticks_keep_running_under_a_stream_of_writes() {
        let mock = MockHandle::new();
        let handle = spawn(
            &mock,
            PollConfig {
                interval_ms: 20,
                ..Default::default()
            },
        );
        handle.start().await.unwrap();
        let mut ticks = handle.subscribe_ticks();

        let writers: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move {
                    loop {
                        let _ = handle
                            .write_raw(VariableKind::HoldingRegister, 1, WriteValue::Register(1))
                            .await;
                    }
                })
            })
            .collect();

        let polled = tokio::time::timeout(Duration::from_secs(2), async {
            let mut seen = 0;
            while seen < 5 {
                if ticks.recv().await.is_ok() {
                    seen += 1;
                }
            }
        })
        .await;

        for writer in writers {
            writer.abort();
        }
        assert!(polled.is_ok(), "poll ticks starved by writes");
        assert!(mock.call_count() > 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_tick_in_flight() {
        let mock = MockHandle::new();
        mock.slow(Table::Holding, 0, Duration::from_millis(500));
        let handle = spawn(&mock, quiet_poll());
        handle
            .register(Variable::new("flow", "holding_register", 1))
            .await
            .unwrap();
        handle.start().await.unwrap();

        let in_flight = tokio::spawn({
            let handle = handle.clone();
            async move { handle.tick().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await.unwrap();

        assert_eq!(handle.status().state, ConnectionState::Disconnected);
        let report = in_flight.await.unwrap().unwrap();
        assert!(report.aborted);
        assert_eq!(mock.calls(), vec![Request::ReadHoldingRegisters { address: 0, count: 1 }]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_service() {
        let mock = MockHandle::new();
        let handle = spawn(&mock, quiet_poll());
        handle.start().await.unwrap();

        handle.shutdown().await.unwrap();

        assert!(!handle.is_running());
        assert_eq!(handle.tick().await, Err(CommError::ServiceClosed));
        // Idempotent
        handle.shutdown().await.unwrap();
    }
}
