//! Connection manager: owns the transport and its state machine.
//!
//! ```text
//! Disconnected --start--> Connecting --ok--> Connected
//!                              |                 |
//!                            error        transport error
//!                              v                 v
//!                           Faulted <------------+
//!                              |
//!                  backoff elapsed / retry()  --> Connecting
//!
//! stop() from any state --> Disconnected
//! ```

use hmi_common::{ConnectionState, ConnectionStatus};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{CommError, Result};
use crate::retry::ReconnectBackoff;
use crate::transport::{Request, Response, Transport, TransportFactory};

/// Owns the device link and decides when to (re)connect.
pub struct ConnectionManager {
    factory: TransportFactory,
    backoff: ReconnectBackoff,
    transport: Option<Box<dyn Transport>>,
    config: Option<ConnectionConfig>,
    state: ConnectionState,
    last_error: Option<String>,
    attempts: u32,
    next_retry: Option<Instant>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl ConnectionManager {
    pub fn new(factory: TransportFactory, backoff: ReconnectBackoff) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        Self {
            factory,
            backoff,
            transport: None,
            config: None,
            state: ConnectionState::Disconnected,
            last_error: None,
            attempts: 0,
            next_retry: None,
            status_tx,
        }
    }

    /// Observe state changes without going through the worker.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn config(&self) -> Option<&ConnectionConfig> {
        self.config.as_ref()
    }

    /// True only while `Connected`.
    pub fn is_usable(&self) -> bool {
        self.state.is_usable()
    }

    /// Instant of the next automatic reconnect, while `Faulted`.
    pub fn next_retry(&self) -> Option<Instant> {
        self.next_retry
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_tx.borrow().clone()
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Connection state change");
        }
        self.state = state;

        let mut status = ConnectionStatus::new(state);
        status.last_error = self.last_error.clone();
        status.reconnect_attempts = self.attempts;
        self.status_tx.send_replace(status);
    }

    fn fault(&mut self, error: &CommError) {
        self.last_error = Some(error.to_string());
        self.set_state(ConnectionState::Faulted);
    }

    /// Start communicating with `config`.
    ///
    /// Returns the connect error when the first attempt fails; the manager is
    /// then `Faulted` and retries on its own.
    pub async fn start(&mut self, config: ConnectionConfig) -> Result<()> {
        if self.state.is_running() {
            if self.config.as_ref() == Some(&config) {
                return Ok(());
            }
            info!("Connection settings changed, restarting");
            self.stop().await;
        }

        info!(endpoint = %config.endpoint, timeout_ms = config.timeout.as_millis() as u64, "Starting communication");

        self.transport = Some((self.factory)(&config));
        self.config = Some(config);
        self.attempts = 0;
        self.backoff.reset();
        self.connect().await
    }

    /// Stop communicating and release the transport.
    pub async fn stop(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.disconnect().await;
        }
        if self.state.is_running() {
            info!("Communication stopped");
        }
        self.config = None;
        self.last_error = None;
        self.attempts = 0;
        self.next_retry = None;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Reconnect now instead of waiting for the backoff.
    pub async fn retry(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Disconnected => Err(CommError::NotConnected),
            ConnectionState::Connecting | ConnectionState::Faulted => self.connect().await,
        }
    }

    /// Perform a due automatic reconnect. Returns whether an attempt was made.
    pub async fn maintain(&mut self) -> bool {
        if self.state != ConnectionState::Faulted {
            return false;
        }
        match self.next_retry {
            Some(at) if Instant::now() >= at => {
                debug!(attempt = self.attempts + 1, "Reconnecting");
                // The outcome is recorded in the state
                let _ = self.connect().await;
                true
            }
            _ => false,
        }
    }

    async fn connect(&mut self) -> Result<()> {
        self.set_state(ConnectionState::Connecting);

        let Some(transport) = self.transport.as_mut() else {
            self.set_state(ConnectionState::Disconnected);
            return Err(CommError::NotConnected);
        };

        match transport.connect().await {
            Ok(()) => {
                self.attempts = 0;
                self.backoff.reset();
                self.next_retry = None;
                self.last_error = None;
                self.set_state(ConnectionState::Connected);
                info!("Connected");
                Ok(())
            }
            Err(e) => {
                self.attempts += 1;
                let delay = self.backoff.on_connect_failed();
                self.next_retry = Some(Instant::now() + delay);
                warn!(
                    error = %e,
                    attempt = self.attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    "Connect failed"
                );
                self.fault(&e);
                Err(e)
            }
        }
    }

    /// Forward a request to the transport when the link is usable.
    ///
    /// Fails fast with `NotConnected` otherwise. A transport-level failure
    /// moves the manager to `Faulted` and is also returned to the caller.
    pub async fn execute(&mut self, request: &Request) -> Result<Response> {
        if !self.is_usable() {
            return Err(CommError::NotConnected);
        }
        let Some(transport) = self.transport.as_mut() else {
            return Err(CommError::NotConnected);
        };

        match request.dispatch(transport.as_mut()).await {
            Ok(response) => Ok(response),
            Err(CommError::NotConnected) => {
                // Transport lost its link without us noticing
                let e = CommError::transport("link closed");
                self.link_lost(&e).await;
                Err(e)
            }
            Err(e) => {
                if e.is_link_failure() {
                    self.link_lost(&e).await;
                }
                Err(e)
            }
        }
    }

    async fn link_lost(&mut self, error: &CommError) {
        if let Some(transport) = self.transport.as_mut() {
            transport.disconnect().await;
        }
        let delay = self.backoff.on_link_lost();
        self.next_retry = Some(Instant::now() + delay);
        warn!(error = %error, retry_in_ms = delay.as_millis() as u64, "Link lost");
        self.fault(error);
    }
}
