//! Write path: raw writes by kind/address and named writes with inverse scaling.

use hmi_common::Value;
use tracing::debug;

use crate::config::{DataType, VariableKind};
use crate::connection::ConnectionManager;
use crate::error::{CommError, Result};
use crate::registry::Variable;
use crate::transport::Request;

/// Value carried by a raw write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteValue {
    Coil(bool),
    Coils(Vec<bool>),
    Register(u16),
}

/// Build the single transport request for a write.
///
/// Read-only and unsupported kinds fail with `InvalidKind`, shape mismatches
/// with `InvalidValue`. Nothing is sent.
pub fn write_request(kind: &VariableKind, address: u16, value: WriteValue) -> Result<Request> {
    if !kind.is_writable() {
        return Err(CommError::InvalidKind(kind.to_string()));
    }

    match (kind, value) {
        (VariableKind::Coil, WriteValue::Coil(value)) => Ok(Request::WriteCoil { address, value }),
        (VariableKind::Coil, WriteValue::Coils(values)) => {
            if values.is_empty() {
                return Err(CommError::InvalidValue("empty coil list".to_string()));
            }
            if address as usize + values.len() > u16::MAX as usize + 1 {
                return Err(CommError::InvalidValue(format!(
                    "{} coils at {} exceed the address space",
                    values.len(),
                    address
                )));
            }
            Ok(Request::WriteCoils { address, values })
        }
        (VariableKind::HoldingRegister, WriteValue::Register(value)) => {
            Ok(Request::WriteRegister { address, value })
        }
        (kind, value) => Err(CommError::InvalidValue(format!(
            "{:?} cannot be written to a {}",
            value, kind
        ))),
    }
}

/// Perform exactly one transport write. The registry is not touched.
pub async fn write(
    conn: &mut ConnectionManager,
    kind: &VariableKind,
    address: u16,
    value: WriteValue,
) -> Result<()> {
    let request = write_request(kind, address, value)?;
    conn.execute(&request).await?;
    debug!(kind = %kind, address, "Write complete");
    Ok(())
}

/// Convert an engineering value into the raw write for `variable`.
pub fn encode_named(variable: &Variable, value: Value) -> Result<WriteValue> {
    match &variable.kind {
        VariableKind::Coil => value
            .as_bool()
            .map(WriteValue::Coil)
            .ok_or_else(|| CommError::InvalidValue(format!("'{}' needs a boolean", variable.name))),
        VariableKind::HoldingRegister => {
            let engineering = value
                .as_f64()
                .filter(|v| v.is_finite())
                .ok_or_else(|| CommError::InvalidValue(format!("'{}' needs a number", variable.name)))?;

            let format = &variable.format;
            let raw = ((engineering - format.offset) / format.scale).round();

            let word = match format.data_type {
                DataType::U16 if (0.0..=u16::MAX as f64).contains(&raw) => raw as u16,
                DataType::I16 if (i16::MIN as f64..=i16::MAX as f64).contains(&raw) => {
                    raw as i16 as u16
                }
                DataType::U16 | DataType::I16 => {
                    return Err(CommError::InvalidValue(format!(
                        "{} is out of range for '{}'",
                        engineering, variable.name
                    )));
                }
                other => {
                    return Err(CommError::InvalidValue(format!(
                        "'{}' uses {:?}, which cannot be written by name",
                        variable.name, other
                    )));
                }
            };
            Ok(WriteValue::Register(word))
        }
        other => Err(CommError::InvalidKind(other.to_string())),
    }
}
