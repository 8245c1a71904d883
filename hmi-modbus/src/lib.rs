//! Modbus communication and polling core for the SCADA HMI.
//!
//! The core connects to one field device over Modbus TCP or Modbus RTU,
//! polls a registry of named variables on a fixed cadence and performs
//! writes on request. A display layer talks to it through a cloneable
//! [`CommHandle`] and reads values straight from the shared
//! [`VariableRegistry`].
//!
//! ```text
//! CommHandle ──mpsc──▶ CommService (one task)
//!                        ├─ ConnectionManager ─▶ Transport (TCP | RTU)
//!                        └─ poller::tick ──────▶ VariableRegistry ◀── reads
//! ```
//!
//! # Variable kinds
//!
//! | Kind               | Access     | Value                    |
//! |--------------------|------------|--------------------------|
//! | `coil`             | read/write | bool                     |
//! | `discrete_input`   | read       | bool                     |
//! | `holding_register` | read/write | integer or scaled float  |
//! | `input_register`   | read       | integer or scaled float  |

pub mod args;
pub mod config;
pub mod connection;
pub mod error;
pub mod poller;
pub mod project;
pub mod registry;
pub mod retry;
pub mod service;
pub mod transport;
pub mod writer;

pub use config::{
    ConfigError, ConnectionConfig, DataType, Endpoint, HmiConfig, Parity, PollConfig,
    VariableFormat, VariableKind,
};
pub use connection::ConnectionManager;
pub use error::{CommError, Result};
pub use poller::TickReport;
pub use project::{CommunicationSettings, ProjectState, ProtocolBlock, VariableRecord};
pub use registry::{Variable, VariableRegistry};
pub use retry::ReconnectBackoff;
pub use service::{CommHandle, CommService};
pub use transport::{ModbusTransport, Request, Response, Transport, TransportFactory, modbus_factory};
pub use writer::WriteValue;
