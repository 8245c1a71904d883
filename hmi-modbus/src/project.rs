//! Persisted project state consumed and produced at the UI boundary.
//!
//! Only the parts the communication core needs to resume are modelled here:
//! the communication block and the ordered variable list. Runtime values
//! (`waarde`) are never persisted.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::config::{ConfigError, ConnectionConfig, DataType, Endpoint, Parity, VariableFormat, VariableKind};

/// Communication block of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationSettings {
    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Configured protocol blocks; at most one may be active.
    #[serde(default)]
    pub protocols: Vec<ProtocolBlock>,
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout() -> u64 {
    2
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

/// One protocol block, tagged by `protocol`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum ProtocolBlock {
    /// Modbus TCP settings
    Tcp {
        #[serde(default)]
        active: bool,
        ip: String,
        port: u16,
        /// Timeout in seconds
        #[serde(default = "default_timeout")]
        timeout: u64,
    },
    /// Modbus RTU settings
    Rtu {
        #[serde(default)]
        active: bool,
        com_port: String,
        baudrate: u32,
        /// Timeout in seconds
        #[serde(default = "default_timeout")]
        timeout: u64,
        #[serde(default)]
        parity: Parity,
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
        #[serde(default = "default_data_bits")]
        data_bits: u8,
    },
}

impl ProtocolBlock {
    pub fn is_active(&self) -> bool {
        match self {
            ProtocolBlock::Tcp { active, .. } | ProtocolBlock::Rtu { active, .. } => *active,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProtocolBlock::Tcp { .. } => "tcp",
            ProtocolBlock::Rtu { .. } => "rtu",
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            ProtocolBlock::Tcp {
                ip, port, timeout, ..
            } => {
                if ip.trim().is_empty() {
                    return Err(ConfigError::Validation("tcp: ip cannot be empty".to_string()));
                }
                if *port == 0 {
                    return Err(ConfigError::Validation(
                        "tcp: port must be 1-65535".to_string(),
                    ));
                }
                if *timeout == 0 {
                    return Err(ConfigError::Validation(
                        "tcp: timeout must be greater than 0".to_string(),
                    ));
                }
            }
            ProtocolBlock::Rtu {
                com_port,
                baudrate,
                timeout,
                stop_bits,
                data_bits,
                ..
            } => {
                if com_port.trim().is_empty() {
                    return Err(ConfigError::Validation(
                        "rtu: com_port cannot be empty".to_string(),
                    ));
                }
                if *baudrate == 0 {
                    return Err(ConfigError::Validation(
                        "rtu: baudrate must be greater than 0".to_string(),
                    ));
                }
                if *timeout == 0 {
                    return Err(ConfigError::Validation(
                        "rtu: timeout must be greater than 0".to_string(),
                    ));
                }
                if !matches!(stop_bits, 1 | 2) {
                    return Err(ConfigError::Validation(format!(
                        "rtu: invalid stop_bits {} (use 1 or 2)",
                        stop_bits
                    )));
                }
                if !(5..=8).contains(data_bits) {
                    return Err(ConfigError::Validation(format!(
                        "rtu: invalid data_bits {} (use 5-8)",
                        data_bits
                    )));
                }
            }
        }
        Ok(())
    }

    fn to_connection(&self, unit_id: u8) -> ConnectionConfig {
        match self {
            ProtocolBlock::Tcp {
                ip, port, timeout, ..
            } => ConnectionConfig {
                endpoint: Endpoint::Tcp {
                    host: ip.clone(),
                    port: *port,
                },
                unit_id,
                timeout: Duration::from_secs(*timeout),
            },
            ProtocolBlock::Rtu {
                com_port,
                baudrate,
                timeout,
                parity,
                stop_bits,
                data_bits,
                ..
            } => ConnectionConfig {
                endpoint: Endpoint::Rtu {
                    port: com_port.clone(),
                    baud_rate: *baudrate,
                    data_bits: *data_bits,
                    parity: *parity,
                    stop_bits: *stop_bits,
                },
                unit_id,
                timeout: Duration::from_secs(*timeout),
            },
        }
    }
}

impl Default for CommunicationSettings {
    fn default() -> Self {
        Self {
            unit_id: default_unit_id(),
            protocols: vec![
                ProtocolBlock::Tcp {
                    active: false,
                    ip: "127.0.0.1".to_string(),
                    port: 5020,
                    timeout: default_timeout(),
                },
                ProtocolBlock::Rtu {
                    active: false,
                    com_port: "COM1".to_string(),
                    baudrate: 9600,
                    timeout: default_timeout(),
                    parity: Parity::None,
                    stop_bits: default_stop_bits(),
                    data_bits: default_data_bits(),
                },
            ],
        }
    }
}

impl CommunicationSettings {
    /// Validate every block and the single-active rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.unit_id == 0 || self.unit_id > 247 {
            return Err(ConfigError::Validation(format!(
                "communication: unit_id {} must be 1-247",
                self.unit_id
            )));
        }

        for block in &self.protocols {
            block.validate()?;
        }

        let active: Vec<&str> = self
            .protocols
            .iter()
            .filter(|b| b.is_active())
            .map(|b| b.name())
            .collect();
        if active.len() > 1 {
            return Err(ConfigError::Validation(format!(
                "communication: only one protocol may be active, found {}",
                active.join(", ")
            )));
        }

        Ok(())
    }

    /// The connection to start with, if a block is active.
    pub fn active_connection(&self) -> Result<Option<ConnectionConfig>, ConfigError> {
        self.validate()?;
        Ok(self
            .protocols
            .iter()
            .find(|b| b.is_active())
            .map(|b| b.to_connection(self.unit_id)))
    }
}

/// A variable as stored in the project file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRecord {
    pub naam: String,
    #[serde(rename = "type")]
    pub kind: VariableKind,
    pub adres: u16,
    #[serde(default)]
    pub beschrijving: String,
    #[serde(default, skip_serializing_if = "is_default_data_type")]
    pub data_type: DataType,
    #[serde(default = "default_scale", skip_serializing_if = "is_unit_scale")]
    pub schaal: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub offset: f64,
}

fn default_scale() -> f64 {
    1.0
}

fn is_default_data_type(data_type: &DataType) -> bool {
    *data_type == DataType::default()
}

fn is_unit_scale(scale: &f64) -> bool {
    *scale == 1.0
}

fn is_zero(offset: &f64) -> bool {
    *offset == 0.0
}

impl VariableRecord {
    /// Create a record with the default register format.
    pub fn new(
        naam: impl Into<String>,
        kind: impl Into<VariableKind>,
        adres: u16,
        beschrijving: impl Into<String>,
    ) -> Self {
        Self {
            naam: naam.into(),
            kind: kind.into(),
            adres,
            beschrijving: beschrijving.into(),
            data_type: DataType::default(),
            schaal: default_scale(),
            offset: 0.0,
        }
    }

    /// Name and format checks for a single record.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.naam.trim().is_empty() {
            return Err(ConfigError::Validation("Variable name cannot be empty".to_string()));
        }
        self.format()
            .check()
            .map_err(|e| ConfigError::Validation(format!("Variable '{}': {}", self.naam, e)))
    }

    pub fn format(&self) -> VariableFormat {
        VariableFormat {
            data_type: self.data_type,
            scale: self.schaal,
            offset: self.offset,
        }
    }
}

/// The slice of a project the communication core resumes from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    #[serde(default)]
    pub communication: CommunicationSettings,
    #[serde(default)]
    pub variables: Vec<VariableRecord>,
}

/// Check every record and that names are unique.
pub fn validate_records(records: &[VariableRecord]) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for record in records {
        record.validate()?;
        if !seen.insert(record.naam.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate variable name '{}'",
                record.naam
            )));
        }
    }
    Ok(())
}

impl ProjectState {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let state: ProjectState = serde_json::from_str(json)?;
        state.validate()?;
        Ok(state)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.communication.validate()?;
        validate_records(&self.variables)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a project document from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Write the project document to disk.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp(active: bool) -> ProtocolBlock {
        ProtocolBlock::Tcp {
            active,
            ip: "127.0.0.1".to_string(),
            port: 5020,
            timeout: 2,
        }
    }

    fn rtu(active: bool) -> ProtocolBlock {
        ProtocolBlock::Rtu {
            active,
            com_port: "/dev/ttyUSB0".to_string(),
            baudrate: 19200,
            timeout: 1,
            parity: Parity::Even,
            stop_bits: 1,
            data_bits: 8,
        }
    }

    #[test]
    fn test_record_roundtrip() {
        let record = VariableRecord::new("temp", "holding_register", 0, "Boiler temperature");

        let json = serde_json::to_string(&record).unwrap();
        let back: VariableRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(
            (back.naam.as_str(), back.kind.as_str(), back.adres, back.beschrijving.as_str()),
            ("temp", "holding_register", 0, "Boiler temperature")
        );
    }

    #[test]
    fn test_record_omits_default_format() {
        let record = VariableRecord::new("lamp", "coil", 3, "");
        let json = serde_json::to_string(&record).unwrap();

        assert_eq!(
            json,
            r#"{"naam":"lamp","type":"coil","adres":3,"beschrijving":""}"#
        );
    }

    #[test]
    fn test_record_ignores_runtime_value() {
        let json = r#"{"naam":"speed","type":"ir","adres":7,"beschrijving":"rpm","waarde":1200}"#;
        let record: VariableRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.kind, VariableKind::InputRegister);
        assert_eq!(record.adres, 7);
        assert!(!serde_json::to_string(&record).unwrap().contains("waarde"));
    }

    #[test]
    fn test_record_with_scaling() {
        let json = r#"{"naam":"flow","type":"holding_register","adres":10,"data_type":"i16","schaal":0.1,"offset":-5.0}"#;
        let record: VariableRecord = serde_json::from_str(json).unwrap();
        let format = record.format();

        assert_eq!(format.data_type, DataType::I16);
        assert_eq!(format.scale, 0.1);
        assert_eq!(format.offset, -5.0);
        assert_eq!(record.beschrijving, "");
    }

    #[test]
    fn test_single_active_block() {
        let settings = CommunicationSettings {
            unit_id: 1,
            protocols: vec![tcp(false), rtu(true)],
        };

        let connection = settings.active_connection().unwrap().unwrap();
        assert_eq!(connection.timeout, Duration::from_secs(1));
        assert!(matches!(
            connection.endpoint,
            Endpoint::Rtu { baud_rate: 19200, parity: Parity::Even, .. }
        ));
    }

    #[test]
    fn test_both_active_is_rejected() {
        let settings = CommunicationSettings {
            unit_id: 1,
            protocols: vec![tcp(true), rtu(true)],
        };

        assert!(matches!(
            settings.active_connection(),
            Err(ConfigError::Validation(msg)) if msg.contains("only one")
        ));
    }

    #[test]
    fn test_invalid_port_and_timeout() {
        let zero_port = CommunicationSettings {
            unit_id: 1,
            protocols: vec![ProtocolBlock::Tcp {
                active: true,
                ip: "10.0.0.2".to_string(),
                port: 0,
                timeout: 2,
            }],
        };
        assert!(zero_port.validate().is_err());

        let zero_timeout = CommunicationSettings {
            unit_id: 1,
            protocols: vec![ProtocolBlock::Tcp {
                active: true,
                ip: "10.0.0.2".to_string(),
                port: 502,
                timeout: 0,
            }],
        };
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn test_defaults_are_inactive() {
        let settings = CommunicationSettings::default();
        assert_eq!(settings.protocols.len(), 2);
        assert!(settings.active_connection().unwrap().is_none());
    }

    #[test]
    fn test_project_roundtrip() {
        let state = ProjectState {
            communication: CommunicationSettings {
                unit_id: 2,
                protocols: vec![tcp(true)],
            },
            variables: vec![
                VariableRecord::new("temp", "holding_register", 0, "Boiler"),
                VariableRecord::new("pump", "coil", 1, "Pump on/off"),
            ],
        };

        let json = state.to_json().unwrap();
        assert!(json.contains("\"protocol\": \"tcp\""));

        let back = ProjectState::from_json(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        let state = ProjectState {
            communication: CommunicationSettings {
                unit_id: 3,
                protocols: vec![tcp(true)],
            },
            variables: vec![VariableRecord::new("level", "input_register", 7, "Tank level")],
        };

        state.save(&path).unwrap();

        assert_eq!(ProjectState::load(&path).unwrap(), state);
        assert!(matches!(
            ProjectState::load(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_project_rejects_bad_variables() {
        let zero_scale = r#"{
            "variables": [
                {"naam": "flow", "type": "holding_register", "adres": 3, "schaal": 0}
            ]
        }"#;
        let duplicate = r#"{
            "variables": [
                {"naam": "flow", "type": "holding_register", "adres": 3},
                {"naam": "flow", "type": "coil", "adres": 4}
            ]
        }"#;

        let err = ProjectState::from_json(zero_scale).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(msg) if msg.contains("flow")));
        assert!(matches!(
            ProjectState::from_json(duplicate),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_project_rejects_two_active_blocks() {
        let json = r#"{
            "communication": {
                "protocols": [
                    {"protocol": "tcp", "active": true, "ip": "127.0.0.1", "port": 502},
                    {"protocol": "rtu", "active": true, "com_port": "COM3", "baudrate": 9600}
                ]
            }
        }"#;

        assert!(ProjectState::from_json(json).is_err());
    }
}
