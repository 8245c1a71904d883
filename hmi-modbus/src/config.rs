//! Configuration for the communication core.

use hmi_common::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::project::{CommunicationSettings, VariableRecord, validate_records};

/// Errors from loading or validating configuration and project files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Load(#[from] hmi_common::Error),
    #[error("Failed to parse project: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete configuration for the headless runner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HmiConfig {
    /// Communication block (protocol settings, unit id).
    #[serde(default)]
    pub communication: CommunicationSettings,

    /// Variables to poll, in display order.
    #[serde(default)]
    pub variables: Vec<VariableRecord>,

    /// Poll cadence and reconnect policy.
    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Poll cadence and reconnect policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Poll tick period in milliseconds (default: 100)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// First reconnect delay after a fault, in milliseconds
    #[serde(default = "default_reconnect_min_ms")]
    pub reconnect_min_ms: u64,

    /// Upper bound for the doubling reconnect delay, in milliseconds
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Capacity of the worker command queue
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_interval_ms() -> u64 {
    100
}

fn default_reconnect_min_ms() -> u64 {
    1000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_queue_depth() -> usize {
    64
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            reconnect_min_ms: default_reconnect_min_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            queue_depth: default_queue_depth(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn reconnect_min(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    /// Validate the poll settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "poll.interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.reconnect_min_ms == 0 || self.reconnect_min_ms > self.reconnect_max_ms {
            return Err(ConfigError::Validation(format!(
                "poll: reconnect_min_ms ({}) must be in 1..=reconnect_max_ms ({})",
                self.reconnect_min_ms, self.reconnect_max_ms
            )));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::Validation(
                "poll.queue_depth must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Runtime connection configuration for exactly one transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Where and how to connect.
    pub endpoint: Endpoint,
    /// Unit identifier sent with every request.
    pub unit_id: u8,
    /// Bound for connect and for every request.
    pub timeout: Duration,
}

/// Transport endpoint (TCP or RTU).
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    Tcp {
        host: String,
        port: u16,
    },
    /// Serial line; `port` is a device path such as `/dev/ttyS0`.
    Rtu {
        port: String,
        baud_rate: u32,
        data_bits: u8,
        parity: Parity,
        stop_bits: u8,
    },
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Endpoint::Rtu {
                port, baud_rate, ..
            } => write!(f, "rtu://{}@{}", port, baud_rate),
        }
    }
}

/// Serial parity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Modbus register kinds.
///
/// Unrecognised kind strings are kept as [`VariableKind::Unsupported`] so the
/// poll scheduler can flag them instead of guessing a kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VariableKind {
    /// Writable bit.
    Coil,
    DiscreteInput,
    /// Writable word.
    HoldingRegister,
    InputRegister,
    /// Anything else found in a project file.
    Unsupported(String),
}

impl VariableKind {
    /// Return the string name for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            VariableKind::Coil => "coil",
            VariableKind::DiscreteInput => "discrete_input",
            VariableKind::HoldingRegister => "holding_register",
            VariableKind::InputRegister => "input_register",
            VariableKind::Unsupported(other) => other,
        }
    }

    /// Coils and holding registers accept writes.
    pub fn is_writable(&self) -> bool {
        matches!(self, VariableKind::Coil | VariableKind::HoldingRegister)
    }

    /// 1-bit kinds.
    pub fn is_bit(&self) -> bool {
        matches!(self, VariableKind::Coil | VariableKind::DiscreteInput)
    }
}

impl From<String> for VariableKind {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "coil" | "co" => VariableKind::Coil,
            "discrete_input" | "discrete" | "di" => VariableKind::DiscreteInput,
            "holding_register" | "holding" | "hr" => VariableKind::HoldingRegister,
            "input_register" | "input" | "ir" => VariableKind::InputRegister,
            _ => VariableKind::Unsupported(s),
        }
    }
}

impl From<&str> for VariableKind {
    fn from(s: &str) -> Self {
        VariableKind::from(s.to_string())
    }
}

impl From<VariableKind> for String {
    fn from(kind: VariableKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for VariableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the raw register words of a variable are interpreted.
///
/// 32-bit types span two consecutive registers. Plain names put the high
/// word first; the `Le` variants swap the words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    U16,
    I16,
    U32,
    I32,
    F32,
    U32Le,
    I32Le,
    F32Le,
}

impl DataType {
    /// Number of 16-bit registers one value occupies.
    pub fn registers(&self) -> u16 {
        match self {
            DataType::U16 | DataType::I16 => 1,
            _ => 2,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F32Le)
    }
}

/// Register value interpretation: raw * scale + offset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariableFormat {
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl Default for VariableFormat {
    fn default() -> Self {
        Self {
            data_type: DataType::default(),
            scale: default_scale(),
            offset: 0.0,
        }
    }
}

impl VariableFormat {
    /// Integer data type without scaling: values stay integers.
    pub fn is_identity(&self) -> bool {
        !self.data_type.is_float() && self.scale == 1.0 && self.offset == 0.0
    }

    /// Reject formats that cannot be inverted for a named write.
    pub fn check(&self) -> Result<(), String> {
        if !self.scale.is_finite() || self.scale == 0.0 {
            return Err(format!("scale must be a finite, non-zero number, got {}", self.scale));
        }
        if !self.offset.is_finite() {
            return Err(format!("offset must be finite, got {}", self.offset));
        }
        Ok(())
    }
}

impl HmiConfig {
    /// Read `path` as JSON5 and validate it.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: HmiConfig = hmi_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Check poll settings, the communication block and every variable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.poll.validate()?;
        self.communication.validate()?;
        validate_records(&self.variables)
    }
}
