//! Variable registry: name → (kind, address, format, last-known value).
//!
//! The registry is shared between the communication worker, which writes
//! values, and the display layer, which only reads. Definition edits made
//! through a [`CommHandle`](crate::service::CommHandle) are serialized with
//! the poll cycle by the worker's command queue.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use hmi_common::{Value, current_timestamp_millis};
use serde::Serialize;

use crate::config::{VariableFormat, VariableKind};
use crate::error::{CommError, Result};
use crate::project::VariableRecord;

/// A named point of interest on the device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variable {
    pub name: String,
    pub kind: VariableKind,
    pub address: u16,
    pub description: String,
    pub format: VariableFormat,
    /// Last-known value, `Unknown` until a read succeeds.
    pub value: Value,
    /// Timestamp of the last successful read (millis since epoch).
    pub updated_at: Option<i64>,
    /// Configuration fault found while polling.
    pub fault: Option<String>,
}

impl Variable {
    pub fn new(name: impl Into<String>, kind: impl Into<VariableKind>, address: u16) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            address,
            description: String::new(),
            format: VariableFormat::default(),
            value: Value::Unknown,
            updated_at: None,
            fault: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_format(mut self, format: VariableFormat) -> Self {
        self.format = format;
        self
    }

    /// Number of raw values one read of this variable returns.
    pub fn read_count(&self) -> u16 {
        if self.kind.is_bit() {
            1
        } else {
            self.format.data_type.registers()
        }
    }

    fn same_point(&self, target: &PollTarget) -> bool {
        self.kind == target.kind && self.address == target.address && self.format == target.format
    }
}

impl From<&VariableRecord> for Variable {
    fn from(record: &VariableRecord) -> Self {
        Variable::new(record.naam.clone(), record.kind.clone(), record.adres)
            .with_description(record.beschrijving.clone())
            .with_format(record.format())
    }
}

impl From<&Variable> for VariableRecord {
    fn from(var: &Variable) -> Self {
        VariableRecord {
            naam: var.name.clone(),
            kind: var.kind.clone(),
            adres: var.address,
            beschrijving: var.description.clone(),
            data_type: var.format.data_type,
            schaal: var.format.scale,
            offset: var.format.offset,
        }
    }
}

/// Definition snapshot handed to the poll scheduler.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PollTarget {
    pub name: String,
    pub kind: VariableKind,
    pub address: u16,
    pub format: VariableFormat,
    pub count: u16,
}

#[derive(Debug, Default)]
struct Inner {
    variables: Vec<Variable>,
    index: HashMap<String, usize>,
}

impl Inner {
    fn reindex(&mut self) {
        self.index = self
            .variables
            .iter()
            .enumerate()
            .map(|(i, v)| (v.name.clone(), i))
            .collect();
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Variable> {
        let idx = *self.index.get(name)?;
        self.variables.get_mut(idx)
    }
}

/// Ordered, name-unique set of variables.
#[derive(Debug, Default)]
pub struct VariableRegistry {
    inner: RwLock<Inner>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from persisted records, preserving their order.
    pub fn from_records(records: &[VariableRecord]) -> Result<Self> {
        let registry = Self::new();
        registry.replace_all(records.iter().map(Variable::from).collect())?;
        Ok(registry)
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a variable at the end of the registry.
    pub fn insert(&self, variable: Variable) -> Result<()> {
        check(&variable)?;
        let mut inner = self.write();
        if inner.index.contains_key(&variable.name) {
            return Err(CommError::DuplicateVariable(variable.name));
        }
        let idx = inner.variables.len();
        inner.index.insert(variable.name.clone(), idx);
        inner.variables.push(variable);
        Ok(())
    }

    /// Remove a variable by name.
    pub fn remove(&self, name: &str) -> Option<Variable> {
        let mut inner = self.write();
        let idx = inner.index.remove(name)?;
        let removed = inner.variables.remove(idx);
        inner.reindex();
        Some(removed)
    }

    /// Replace the definition of `name` (rename allowed), keeping its position.
    ///
    /// The cached value is reset to `Unknown` unless the point is unchanged.
    pub fn update(&self, name: &str, mut variable: Variable) -> Result<()> {
        check(&variable)?;
        let mut inner = self.write();
        let idx = *inner
            .index
            .get(name)
            .ok_or_else(|| CommError::UnknownVariable(name.to_string()))?;

        if variable.name != name && inner.index.contains_key(&variable.name) {
            return Err(CommError::DuplicateVariable(variable.name));
        }

        let old = &inner.variables[idx];
        if old.kind == variable.kind && old.address == variable.address && old.format == variable.format {
            variable.value = old.value;
            variable.updated_at = old.updated_at;
        } else {
            variable.value = Value::Unknown;
            variable.updated_at = None;
        }
        variable.fault = None;

        inner.variables[idx] = variable;
        inner.reindex();
        Ok(())
    }

    /// Replace every variable (project load / reset).
    pub fn replace_all(&self, variables: Vec<Variable>) -> Result<()> {
        let mut index = HashMap::with_capacity(variables.len());
        for (i, var) in variables.iter().enumerate() {
            check(var)?;
            if index.insert(var.name.clone(), i).is_some() {
                return Err(CommError::DuplicateVariable(var.name.clone()));
            }
        }
        let mut inner = self.write();
        inner.variables = variables;
        inner.index = index;
        Ok(())
    }

    /// Last-known value, `Unknown` for unregistered names.
    pub fn value(&self, name: &str) -> Value {
        self.get(name).map(|v| v.value).unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<Variable> {
        let inner = self.read();
        inner
            .index
            .get(name)
            .and_then(|&i| inner.variables.get(i))
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().index.contains_key(name)
    }

    /// Copy of all variables in registry order.
    pub fn snapshot(&self) -> Vec<Variable> {
        self.read().variables.clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.read().variables.iter().map(|v| v.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().variables.is_empty()
    }

    /// Persisted form of all variables, in order.
    pub fn to_records(&self) -> Vec<VariableRecord> {
        self.read().variables.iter().map(VariableRecord::from).collect()
    }

    pub(crate) fn poll_targets(&self) -> Vec<PollTarget> {
        self.read()
            .variables
            .iter()
            .map(|v| PollTarget {
                name: v.name.clone(),
                kind: v.kind.clone(),
                address: v.address,
                format: v.format,
                count: v.read_count(),
            })
            .collect()
    }

    /// Store a read result, unless the definition changed since `target` was taken.
    pub(crate) fn store(&self, target: &PollTarget, value: Value) {
        let mut inner = self.write();
        match inner.get_mut(&target.name) {
            Some(var) if var.same_point(target) => {
                var.updated_at = (!value.is_unknown()).then(current_timestamp_millis);
                var.value = value;
                var.fault = None;
            }
            _ => {}
        }
    }

    /// Mark a variable as misconfigured; its value becomes `Unknown`.
    pub(crate) fn flag(&self, target: &PollTarget, fault: impl Into<String>) {
        let mut inner = self.write();
        match inner.get_mut(&target.name) {
            Some(var) if var.same_point(target) => {
                var.value = Value::Unknown;
                var.fault = Some(fault.into());
            }
            _ => {}
        }
    }
}

fn check(variable: &Variable) -> Result<()> {
    if variable.name.trim().is_empty() {
        return Err(CommError::InvalidValue("variable name cannot be empty".to_string()));
    }
    variable
        .format
        .check()
        .map_err(|e| CommError::InvalidValue(format!("'{}': {}", variable.name, e)))
}
