//! Row data model.
//!
//! A [`Row`] is the unit the store owns: an immutable [`RowId`], the field
//! values keyed by field name, an optional weak link to its parent row and
//! the ordered child collections it owns.
//!
//! # Examples
//!
//! ```rust
//! use table_sync_core::row_model::{Row, RowId};
//! use serde_json::json;
//!
//! let mut row = Row::new(RowId(7), None);
//! row.fields.insert("name".to_string(), json!("eth0"));
//! row.fields.insert("enabled".to_string(), json!(true));
//!
//! assert_eq!(row.id.to_string(), "7");
//! assert_eq!(row.display_value("enabled"), "1");
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::SyncError;

/// Field values keyed by field name.
pub type FieldMap = serde_json::Map<String, JsonValue>;

/// Identifier of a row, unique within its table for the table's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub u64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RowId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(RowId)
            .map_err(|e| SyncError::invalid(format!("invalid row id '{s}': {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Assigned by the store at creation, never changes.
    pub id: RowId,

    pub fields: FieldMap,

    /// Weak reference: the parent may be gone, the id stays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<RowId>,

    /// Child rows owned by this row, per collection name, in display order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, Vec<RowId>>,
}

impl Row {
    pub fn new(id: RowId, parent: Option<RowId>) -> Self {
        Self {
            id,
            fields: FieldMap::new(),
            parent,
            children: BTreeMap::new(),
        }
    }

    pub fn value(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field)
    }

    /// Plain-text form of a field value, as used for filtering and auditing.
    pub fn display_value(&self, field: &str) -> String {
        self.fields.get(field).map(value_to_string).unwrap_or_default()
    }

    pub fn child_ids(&self) -> impl Iterator<Item = RowId> + '_ {
        self.children.values().flatten().copied()
    }
}

/// Renders a stored value the way the audit trail and filters see it.
pub fn value_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::Bool(true) => "1".to_string(),
        JsonValue::Bool(false) => "0".to_string(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
