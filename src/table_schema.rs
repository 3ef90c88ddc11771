//! Table definitions: field schema, built-in action set and the
//! non-serializable hooks a host attaches to a table.
//!
//! A table is declared in two halves. [`TableDefinition`] is plain data and
//! round-trips through JSON, so it can cross the FFI boundary.
//! [`TableHooks`] carries closures (custom actions, a custom id producer,
//! the filter adapter and the dependent-state checker) and is only available
//! to Rust hosts.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Result, SyncError};
use crate::request::RESERVED_PARAMS;
use crate::row_model::{FieldMap, RowId};
use crate::row_store::RowStore;

/// Field name that is always redacted, whatever its declared kind.
pub const PASSWORD_FIELD: &str = "password";

/// Kind of a field, as far as diffing and redaction need to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Integer,
    Boolean,
    Password,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    /// When false, markup characters are rejected on input.
    #[serde(default)]
    pub allows_unsafe_input: bool,
    /// Mask the value in the audit trail regardless of kind.
    #[serde(default)]
    pub redact: bool,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            allows_unsafe_input: false,
            redact: false,
        }
    }

    pub fn allow_unsafe_input(mut self) -> Self {
        self.allows_unsafe_input = true;
        self
    }

    pub fn redacted(mut self) -> Self {
        self.redact = true;
        self
    }

    pub fn is_boolean(&self) -> bool {
        self.kind == FieldKind::Boolean
    }

    /// Password-kind fields and fields literally named `password` never
    /// reach the audit trail in clear.
    pub fn is_secret(&self) -> bool {
        self.redact || self.kind == FieldKind::Password || self.name == PASSWORD_FIELD
    }

    /// Converts a raw transport value into the stored representation.
    ///
    /// `None` is only meaningful for boolean fields, where an absent
    /// checkbox parameter means `false`.
    pub fn parse_input(&self, raw: Option<&str>) -> Result<Option<JsonValue>> {
        if self.is_boolean() {
            let truthy = matches!(raw.map(str::trim), Some("1" | "true" | "on" | "yes"));
            return Ok(Some(JsonValue::Bool(truthy)));
        }

        let Some(raw) = raw else {
            return Ok(None);
        };

        if !self.allows_unsafe_input && raw.contains(['<', '>']) {
            return Err(SyncError::invalid(format!(
                "field '{}' does not accept markup",
                self.name
            )));
        }

        match self.kind {
            FieldKind::Integer => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Ok(Some(JsonValue::Null));
                }
                trimmed
                    .parse::<i64>()
                    .map(|n| Some(JsonValue::from(n)))
                    .map_err(|e| {
                        SyncError::invalid(format!("field '{}' expects an integer: {e}", self.name))
                    })
            }
            _ => Ok(Some(JsonValue::String(raw.to_string()))),
        }
    }
}

/// Actions every table may enable without registering a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinAction {
    /// Render one page, read-only.
    Page,
    Add,
    Edit,
    Delete,
    Move,
    Toggle,
}

impl BuiltinAction {
    pub const ALL: [BuiltinAction; 6] = [
        BuiltinAction::Page,
        BuiltinAction::Add,
        BuiltinAction::Edit,
        BuiltinAction::Delete,
        BuiltinAction::Move,
        BuiltinAction::Toggle,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "page" => Some(BuiltinAction::Page),
            "add" => Some(BuiltinAction::Add),
            "edit" | "set" => Some(BuiltinAction::Edit),
            "delete" | "del" | "remove" => Some(BuiltinAction::Delete),
            "move" => Some(BuiltinAction::Move),
            "toggle" => Some(BuiltinAction::Toggle),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinAction::Page => "page",
            BuiltinAction::Add => "add",
            BuiltinAction::Edit => "edit",
            BuiltinAction::Delete => "delete",
            BuiltinAction::Move => "move",
            BuiltinAction::Toggle => "toggle",
        }
    }

    pub fn is_mutation(self) -> bool {
        self != BuiltinAction::Page
    }
}

impl fmt::Display for BuiltinAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn default_actions() -> BTreeSet<BuiltinAction> {
    BuiltinAction::ALL.into_iter().collect()
}

/// Serializable description of a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub fields: Vec<FieldSchema>,
    /// Page size used until a request overrides it; falls back to the
    /// engine default when absent.
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub movable: bool,
    #[serde(default)]
    pub custom_filter: bool,
    #[serde(default = "default_actions")]
    pub actions: BTreeSet<BuiltinAction>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self {
            name: name.into(),
            fields,
            page_size: None,
            movable: false,
            custom_filter: false,
            actions: default_actions(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn movable(mut self) -> Self {
        self.movable = true;
        self
    }

    pub fn with_custom_filter(mut self) -> Self {
        self.custom_filter = true;
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn supports(&self, action: BuiltinAction) -> bool {
        self.actions.contains(&action)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SyncError::invalid("table name must not be empty"));
        }
        if self.page_size == Some(0) {
            return Err(SyncError::invalid(format!(
                "table '{}' declares a zero page size",
                self.name
            )));
        }
        let mut seen = BTreeSet::new();
        for field in &self.fields {
            if field.name.is_empty() || field.name.contains('/') {
                return Err(SyncError::invalid(format!(
                    "table '{}' has an invalid field name '{}'",
                    self.name, field.name
                )));
            }
            if RESERVED_PARAMS.contains(&field.name.as_str()) {
                return Err(SyncError::invalid(format!(
                    "table '{}' uses reserved parameter name '{}' for a field",
                    self.name, field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SyncError::invalid(format!(
                    "table '{}' declares field '{}' twice",
                    self.name, field.name
                )));
            }
        }
        Ok(())
    }
}

/// What a custom action needs before it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationPolicy {
    None,
    /// The request must carry `confirmed=1`; otherwise the prompt is
    /// returned to the client and nothing runs.
    Required(String),
}

/// Mutable view handed to a custom action handler.
///
/// `store` is a working copy: it replaces the table's store only if the
/// handler returns `Ok`.
pub struct ActionContext<'a> {
    pub store: &'a mut RowStore,
    pub target: Option<RowId>,
    pub params: &'a BTreeMap<String, String>,
    pub message: Option<String>,
    pub redirect: Option<String>,
    /// Ask the dispatcher to redraw the current page.
    pub reload: bool,
}

pub type ActionHandler = Arc<dyn Fn(&mut ActionContext<'_>) -> Result<()> + Send + Sync>;
pub type IdProducer = Arc<dyn Fn(&RowStore, &str) -> Vec<RowId> + Send + Sync>;
pub type FilterAdapter = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Clone)]
pub struct CustomAction {
    pub handler: ActionHandler,
    pub confirmation: ConfirmationPolicy,
}

impl CustomAction {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&mut ActionContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            confirmation: ConfirmationPolicy::None,
        }
    }

    pub fn confirm(mut self, prompt: impl Into<String>) -> Self {
        self.confirmation = ConfirmationPolicy::Required(prompt.into());
        self
    }
}

/// Answers whether deleting a row would orphan state held elsewhere.
pub trait DependentsChecker: Send + Sync {
    fn has_dependents(&self, row_id: RowId) -> bool;
}

/// Checker used when the host registers none.
pub struct NoDependents;

impl DependentsChecker for NoDependents {
    fn has_dependents(&self, _row_id: RowId) -> bool {
        false
    }
}

/// Closures and collaborators attached to one table.
#[derive(Clone)]
pub struct TableHooks {
    pub custom_actions: BTreeMap<String, CustomAction>,
    pub id_producer: Option<IdProducer>,
    pub filter_adapter: Option<FilterAdapter>,
    pub dependents: Arc<dyn DependentsChecker>,
}

impl Default for TableHooks {
    fn default() -> Self {
        Self {
            custom_actions: BTreeMap::new(),
            id_producer: None,
            filter_adapter: None,
            dependents: Arc::new(NoDependents),
        }
    }
}

impl TableHooks {
    pub fn with_action(mut self, name: impl Into<String>, action: CustomAction) -> Self {
        self.custom_actions.insert(name.into(), action);
        self
    }

    pub fn with_id_producer<F>(mut self, producer: F) -> Self
    where
        F: Fn(&RowStore, &str) -> Vec<RowId> + Send + Sync + 'static,
    {
        self.id_producer = Some(Arc::new(producer));
        self
    }

    pub fn with_filter_adapter<F>(mut self, adapter: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.filter_adapter = Some(Arc::new(adapter));
        self
    }

    pub fn with_dependents(mut self, checker: impl DependentsChecker + 'static) -> Self {
        self.dependents = Arc::new(checker);
        self
    }
}

/// A registered table: definition plus hooks, validated together.
#[derive(Clone)]
pub struct Table {
    pub definition: TableDefinition,
    pub hooks: TableHooks,
}

impl Table {
    /// Validates the pair so that an unknown or clashing action fails here
    /// rather than at dispatch time.
    pub fn new(definition: TableDefinition, hooks: TableHooks) -> Result<Self> {
        definition.validate()?;

        for name in hooks.custom_actions.keys() {
            if name.trim().is_empty() {
                return Err(SyncError::invalid(format!(
                    "table '{}' registers a custom action without a name",
                    definition.name
                )));
            }
            if BuiltinAction::from_name(name).is_some() {
                return Err(SyncError::invalid(format!(
                    "custom action '{name}' on table '{}' shadows a built-in action",
                    definition.name
                )));
            }
        }

        if definition.custom_filter && hooks.id_producer.is_none() {
            return Err(SyncError::invalid(format!(
                "table '{}' uses a custom filter but registers no id producer",
                definition.name
            )));
        }

        Ok(Self { definition, hooks })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.definition.field(name)
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.definition.fields
    }

    pub fn custom_action(&self, name: &str) -> Option<&CustomAction> {
        self.hooks.custom_actions.get(name)
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("definition", &self.definition)
            .field("custom_actions", &self.hooks.custom_actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builds a field map from string pairs; used by hosts seeding rows.
pub fn parse_fields<'a, I>(table: &Table, pairs: I) -> Result<FieldMap>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut map = FieldMap::new();
    for (name, raw) in pairs {
        let schema = table
            .field(name)
            .ok_or_else(|| SyncError::not_found(format!("field '{name}' on table '{}'", table.name())))?;
        if let Some(value) = schema.parse_input(Some(raw))? {
            map.insert(name.to_string(), value);
        }
    }
    Ok(map)
}
