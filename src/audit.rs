//! Field-level audit trail.
//!
//! Mutations stage [`PendingAudit`] records holding raw values and hand the
//! whole batch to [`AuditRecorder::commit`]. Redaction happens there, so the
//! values a caller passes are always the real ones and the values a sink
//! sees never are (for secret fields).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::row_model::value_to_string;
use crate::table_schema::{FieldSchema, PASSWORD_FIELD};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Add,
    Set,
    Del,
    Move,
    Action,
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuditKind::Add => "add",
            AuditKind::Set => "set",
            AuditKind::Del => "del",
            AuditKind::Move => "move",
            AuditKind::Action => "action",
        };
        f.write_str(name)
    }
}

/// One immutable audit record, already redacted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub table: String,
    pub kind: AuditKind,
    /// `parentRowId/rowId/field`, `rowId/field` or `rowId`.
    pub id: String,
    pub new_value: String,
    /// Only `set` and `move` carry a previous value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
}

/// Raw, unredacted record staged by a mutation before commit.
#[derive(Debug, Clone)]
pub struct PendingAudit {
    pub kind: AuditKind,
    pub id: String,
    pub field: Option<FieldSchema>,
    /// Field the value belongs to; `None` for row-level and action entries.
    pub field_name: Option<String>,
    pub new_value: JsonValue,
    pub old_value: Option<JsonValue>,
}

impl PendingAudit {
    pub fn new(kind: AuditKind, id: impl Into<String>, new_value: JsonValue) -> Self {
        Self {
            kind,
            id: id.into(),
            field: None,
            field_name: None,
            new_value,
            old_value: None,
        }
    }

    pub fn field(mut self, schema: &FieldSchema) -> Self {
        self.field_name = Some(schema.name.clone());
        self.field = Some(schema.clone());
        self
    }

    /// Names the field of a value that has no schema attached.
    pub fn field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = Some(name.into());
        self
    }

    pub fn old(mut self, old_value: JsonValue) -> Self {
        self.old_value = Some(old_value);
        self
    }
}

/// Append-only destination of audit entries.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> Result<()>;

    /// Appends every entry or none of them.
    fn append_batch(&self, entries: &[AuditEntry]) -> Result<()> {
        for entry in entries {
            self.append(entry)?;
        }
        Ok(())
    }
}

/// Sink that keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    fn append_batch(&self, entries: &[AuditEntry]) -> Result<()> {
        self.entries.lock().extend_from_slice(entries);
        Ok(())
    }
}

/// Shared on/off switch for auditing. Read on every record.
#[derive(Debug, Clone)]
pub struct AuditSwitch(Arc<AtomicBool>);

impl AuditSwitch {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::SeqCst);
    }
}

pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
    switch: AuditSwitch,
    mask: String,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>, switch: AuditSwitch, mask: impl Into<String>) -> Self {
        Self {
            sink,
            switch,
            mask: mask.into(),
        }
    }

    pub fn switch(&self) -> &AuditSwitch {
        &self.switch
    }

    pub fn is_enabled(&self) -> bool {
        self.switch.is_enabled()
    }

    /// Records a single event.
    pub fn record(&self, table: &str, pending: &PendingAudit) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.sink.append(&self.entry(table, pending))
    }

    /// Redacts and appends a staged batch in one go.
    pub fn commit(&self, table: &str, pending: &[PendingAudit]) -> Result<()> {
        if pending.is_empty() || !self.is_enabled() {
            return Ok(());
        }
        let entries: Vec<AuditEntry> = pending.iter().map(|p| self.entry(table, p)).collect();
        self.sink.append_batch(&entries)
    }

    fn entry(&self, table: &str, pending: &PendingAudit) -> AuditEntry {
        let field = pending.field.as_ref();
        let field_name = pending.field_name.as_deref();
        AuditEntry {
            table: table.to_string(),
            kind: pending.kind,
            id: pending.id.clone(),
            new_value: redact(field, field_name, &pending.new_value, &self.mask),
            old_value: pending
                .old_value
                .as_ref()
                .map(|old| redact(field, field_name, old, &self.mask)),
        }
    }
}

/// Applies the type-driven redaction rules to one raw value.
pub fn redact(field: Option<&FieldSchema>, field_name: Option<&str>, value: &JsonValue, mask: &str) -> String {
    let secret = field.is_some_and(FieldSchema::is_secret) || field_name == Some(PASSWORD_FIELD);
    if secret {
        let text = value_to_string(value);
        return if text.is_empty() { text } else { mask.to_string() };
    }

    if field.is_some_and(FieldSchema::is_boolean) {
        return if is_truthy(value) { "1" } else { "0" }.to_string();
    }

    value_to_string(value)
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        JsonValue::String(s) => matches!(s.trim(), "1" | "true" | "on" | "yes"),
        _ => false,
    }
}
