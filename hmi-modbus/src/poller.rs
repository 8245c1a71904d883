//! Poll scheduler: one pass over the registry per tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hmi_common::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{DataType, VariableFormat, VariableKind};
use crate::connection::ConnectionManager;
use crate::error::{CommError, Result};
use crate::registry::{PollTarget, VariableRegistry};
use crate::transport::{Request, Response};

/// Outcome of one poll tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Variables read successfully.
    pub polled: usize,
    /// Variables whose read failed and are now `Unknown`.
    pub failed: usize,
    /// Variables skipped because of an unsupported kind.
    pub skipped: usize,
    /// The tick ended before visiting every variable.
    pub aborted: bool,
    pub duration: Duration,
}

/// Read every variable once, in registry order.
///
/// Fails with `NotConnected` without touching the registry when the
/// connection is not usable at the start of the tick.
pub async fn tick(
    conn: &mut ConnectionManager,
    registry: &VariableRegistry,
    abort: &AtomicBool,
) -> Result<TickReport> {
    if !conn.is_usable() {
        return Err(CommError::NotConnected);
    }

    let started = Instant::now();
    let mut report = TickReport::default();

    for target in registry.poll_targets() {
        if abort.load(Ordering::Acquire) || !conn.is_usable() {
            report.aborted = true;
            break;
        }

        let Some(request) = read_request(&target) else {
            warn!(variable = %target.name, kind = %target.kind, "Skipping variable with unsupported kind");
            registry.flag(&target, format!("unsupported kind '{}'", target.kind));
            report.skipped += 1;
            continue;
        };

        let value = conn
            .execute(&request)
            .await
            .and_then(|response| decode(&target, response));

        match value {
            Ok(value) => {
                registry.store(&target, value);
                report.polled += 1;
            }
            Err(e) => {
                debug!(variable = %target.name, address = target.address, error = %e, "Read failed");
                registry.store(&target, Value::Unknown);
                report.failed += 1;
            }
        }
    }

    report.duration = started.elapsed();
    debug!(
        polled = report.polled,
        failed = report.failed,
        skipped = report.skipped,
        aborted = report.aborted,
        duration_ms = report.duration.as_millis() as u64,
        "Tick complete"
    );
    Ok(report)
}

/// The read matching a variable's kind, `None` for unsupported kinds.
fn read_request(target: &PollTarget) -> Option<Request> {
    let (address, count) = (target.address, target.count);
    match target.kind {
        VariableKind::Coil => Some(Request::ReadCoils { address, count }),
        VariableKind::DiscreteInput => Some(Request::ReadDiscreteInputs { address, count }),
        VariableKind::HoldingRegister => Some(Request::ReadHoldingRegisters { address, count }),
        VariableKind::InputRegister => Some(Request::ReadInputRegisters { address, count }),
        VariableKind::Unsupported(_) => None,
    }
}

fn decode(target: &PollTarget, response: Response) -> Result<Value> {
    match response {
        Response::Bits(bits) => bits
            .first()
            .map(|b| Value::Bool(*b))
            .ok_or_else(|| CommError::transport("Malformed response: no bits")),
        Response::Words(words) => decode_registers(&words, &target.format),
        Response::Written => Err(CommError::transport("Unexpected write response to a read")),
    }
}

/// Interpret raw registers according to a variable's format.
///
/// Integer types without scaling stay integers; anything else becomes
/// `raw * scale + offset` as a float.
pub fn decode_registers(words: &[u16], format: &VariableFormat) -> Result<Value> {
    let needed = format.data_type.registers() as usize;
    if words.len() < needed {
        return Err(CommError::transport(format!(
            "Malformed response: expected {} registers, got {}",
            needed,
            words.len()
        )));
    }

    let (hi, lo) = match format.data_type {
        DataType::U16 | DataType::I16 => (0, words[0]),
        DataType::U32 | DataType::I32 | DataType::F32 => (words[0], words[1]),
        DataType::U32Le | DataType::I32Le | DataType::F32Le => (words[1], words[0]),
    };
    let bits = ((hi as u32) << 16) | (lo as u32);

    let raw = match format.data_type {
        DataType::U16 => Raw::Int(lo as i64),
        DataType::I16 => Raw::Int(lo as i16 as i64),
        DataType::U32 | DataType::U32Le => Raw::Int(bits as i64),
        DataType::I32 | DataType::I32Le => Raw::Int(bits as i32 as i64),
        DataType::F32 | DataType::F32Le => Raw::Float(f32::from_bits(bits) as f64),
    };

    Ok(match raw {
        Raw::Int(n) if format.is_identity() => Value::Integer(n),
        Raw::Int(n) => Value::Float(n as f64 * format.scale + format.offset),
        Raw::Float(f) => Value::Float(f * format.scale + format.offset),
    })
}

enum Raw {
    Int(i64),
    Float(f64),
}
