//! Row mutations and the deltas they produce.
//!
//! Every operation follows the same order: validate, stage audit records
//! with raw values, commit the audit batch, then apply the row store change.
//! Validation happens before anything is written and the store change cannot
//! fail once the audit batch is in, so a failing operation leaves neither a
//! partial row write nor an audit entry behind.

use log::{debug, warn};
use serde_json::Value as JsonValue;

use crate::audit::{AuditKind, AuditRecorder, PendingAudit};
use crate::delta::{Anchor, ChangedTarget, Delta, Reload};
use crate::error::{Result, SyncError};
use crate::pagination::{page_count, pagination_delta, printed_range};
use crate::request::{Params, ViewRequest};
use crate::row_model::{FieldMap, Row, RowId};
use crate::row_store::{composite_id, RowStore};
use crate::table_schema::{ActionContext, CustomAction, FieldSchema, Table};
use crate::view_index::visible_ids;

/// Where a new row goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddTarget {
    TopLevel,
    Child { parent: RowId, collection: String },
}

/// Result of a custom action: the delta plus a message for the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    pub delta: Delta,
    pub message: Option<String>,
}

/// Runs one mutation against a borrowed store.
pub struct MutationEngine<'a> {
    table: &'a Table,
    store: &'a mut RowStore,
    recorder: &'a AuditRecorder,
    view: &'a ViewRequest,
}

impl<'a> MutationEngine<'a> {
    pub fn new(table: &'a Table, store: &'a mut RowStore, recorder: &'a AuditRecorder, view: &'a ViewRequest) -> Self {
        Self {
            table,
            store,
            recorder,
            view,
        }
    }

    fn visible(&self) -> Vec<RowId> {
        visible_ids(self.table, &*self.store, &self.view.filter)
    }

    fn page_size(&self) -> usize {
        self.view.page.page_size
    }

    fn commit_audit(&self, pending: &[PendingAudit]) -> Result<()> {
        self.recorder.commit(self.table.name(), pending).map_err(|e| {
            warn!("Audit commit failed on table '{}': {e}", self.table.name());
            e
        })
    }

    fn schema(&self, field: &str) -> Result<&'a FieldSchema> {
        self.table
            .field(field)
            .ok_or_else(|| SyncError::not_found(format!("field '{field}' on table '{}'", self.table.name())))
    }

    /// Parses every schema field present in `params` (booleans always).
    fn collect_fields(&self, params: &Params) -> Result<FieldMap> {
        let mut fields = FieldMap::new();
        for schema in self.table.fields() {
            if let Some(value) = schema.parse_input(params.get(&schema.name).map(String::as_str))? {
                fields.insert(schema.name.clone(), value);
            }
        }
        Ok(fields)
    }

    pub fn add(&mut self, target: AddTarget, params: &Params) -> Result<Delta> {
        let fields = self.collect_fields(params)?;
        let new_id = self.store.peek_next_id();
        let parent = match &target {
            AddTarget::TopLevel => None,
            AddTarget::Child { parent, .. } => {
                self.store.get(*parent)?;
                Some(*parent)
            }
        };

        let mut pending: Vec<PendingAudit> = fields
            .iter()
            .map(|(name, value)| {
                let entry = PendingAudit::new(AuditKind::Add, composite_id(parent, new_id, Some(name.as_str())), value.clone());
                match self.table.field(name) {
                    Some(schema) => entry.field(schema),
                    None => entry.field_name(name.as_str()),
                }
            })
            .collect();
        if pending.is_empty() {
            pending.push(PendingAudit::new(
                AuditKind::Add,
                composite_id(parent, new_id, None),
                JsonValue::Null,
            ));
        }

        if let AddTarget::Child { parent, collection } = target {
            if collection.is_empty() {
                return Err(SyncError::invalid("child collection name must not be empty"));
            }
            self.commit_audit(&pending)?;
            let id = self.store.create_child(parent, &collection, fields)?;
            debug!("Added row {id} under {parent}/{collection} on table '{}'", self.table.name());
            return Ok(Delta::changed(parent, None));
        }

        let request = self.view.page;
        let table_was_empty = self.store.is_empty();
        let old_visible = self.visible();
        let old_count = page_count(old_visible.len(), self.page_size());
        let old_range = printed_range(old_visible.len(), request);

        self.commit_audit(&pending)?;
        let id = self.store.create(fields);
        if id != new_id {
            return Err(SyncError::Internal(format!("row store assigned {id}, expected {new_id}")));
        }
        debug!("Added row {id} on table '{}'", self.table.name());

        let new_visible = self.visible();
        let mut delta = Delta {
            pagination_change: pagination_delta(old_count, new_visible.len(), request),
            ..Delta::default()
        };

        // Nothing on screen to anchor an insert to.
        if table_was_empty || new_visible.len() == 1 {
            delta.reload = Some(Reload::All);
            return Ok(delta);
        }

        let Some(position) = new_visible.iter().position(|r| *r == id) else {
            return Ok(delta);
        };

        // Only rows landing among those already printed can be spliced in.
        let printed = old_range.is_some_and(|(begin, end)| position >= begin && position <= end);
        if !printed {
            delta.reload = Some(Reload::Page(position / self.page_size()));
            return Ok(delta);
        }

        let anchor = if position == request.first_slot() {
            Anchor::Prepend
        } else {
            Anchor::After(new_visible[position - 1])
        };

        // One in, one out: a full page drops its last printed row.
        if let Some((_, end)) = old_range {
            if end == request.last_slot() {
                let pushed_out = old_visible
                    .get(end)
                    .ok_or_else(|| SyncError::Internal(format!("visible index {end} out of range")))?;
                delta.removed.push(*pushed_out);
            }
        }
        delta.added.push((anchor, id));
        Ok(delta)
    }

    fn deletion_audit(&self, row: &Row) -> Result<Vec<PendingAudit>> {
        let mut pending = Vec::new();
        let mut rows = vec![row.id];
        rows.extend(self.store.descendants(row.id));

        for id in rows {
            let current = self.store.get(id)?;
            if current.fields.is_empty() {
                pending.push(PendingAudit::new(
                    AuditKind::Del,
                    self.store.audit_id(id, None)?,
                    JsonValue::Null,
                ));
                continue;
            }
            for (name, value) in &current.fields {
                let entry = PendingAudit::new(AuditKind::Del, self.store.audit_id(id, Some(name.as_str()))?, value.clone());
                pending.push(match self.table.field(name) {
                    Some(schema) => entry.field(schema),
                    None => entry.field_name(name.as_str()),
                });
            }
        }
        Ok(pending)
    }

    pub fn delete(&mut self, id: RowId, force: bool) -> Result<Delta> {
        let row = self.store.get(id)?.clone();
        let dependents = &*self.table.hooks.dependents;
        if !force && dependents.has_dependents(id) {
            return Err(SyncError::InUse(id.to_string()));
        }

        // Audit ids need the parent link, gone once the row is removed.
        let pending = self.deletion_audit(&row)?;

        if let Some(parent) = row.parent {
            self.commit_audit(&pending)?;
            self.store.delete(id, force, dependents)?;
            return Ok(Delta::changed(parent, None));
        }

        let request = self.view.page;
        let old_visible = self.visible();
        let old_count = page_count(old_visible.len(), self.page_size());
        let old_position = old_visible.iter().position(|r| *r == id);

        self.commit_audit(&pending)?;
        self.store.delete(id, force, dependents)?;
        debug!("Deleted row {id} on table '{}'", self.table.name());

        let new_visible = self.visible();
        let new_count = page_count(new_visible.len(), self.page_size());
        let mut delta = Delta {
            pagination_change: pagination_delta(old_count, new_visible.len(), request),
            ..Delta::default()
        };

        if new_visible.is_empty() {
            delta.removed.push(id);
            delta.reload = Some(Reload::All);
            return Ok(delta);
        }

        // The page being viewed no longer exists: redraw the previous one.
        if new_count < old_count && request.page >= new_count {
            delta.reload = Some(Reload::Page(request.page.saturating_sub(1)));
            return Ok(delta);
        }

        delta.removed.push(id);
        match old_position {
            Some(position) if position < request.first_slot() => {
                delta.reload = Some(Reload::Page(request.page));
            }
            Some(position) if request.holds_slot(position) => {
                let more_pages_follow = request.page.saturating_add(1) < old_count;
                if more_pages_follow {
                    if let Some(shifted_up) = new_visible.get(request.last_slot()) {
                        delta.added.push((Anchor::Append, *shifted_up));
                    }
                }
            }
            _ => {}
        }
        Ok(delta)
    }

    /// Updates the fields present in `params`; with `only_field` set, just
    /// that field and only its fragment is regenerated.
    pub fn edit(&mut self, id: RowId, params: &Params, only_field: Option<&str>) -> Result<Delta> {
        let row = self.store.get(id)?;
        let schemas: Vec<&FieldSchema> = match only_field {
            Some(field) => vec![self.schema(field)?],
            None => self.table.fields().iter().collect(),
        };

        let mut changes = FieldMap::new();
        let mut pending = Vec::new();
        for schema in schemas {
            let Some(new_value) = schema.parse_input(params.get(&schema.name).map(String::as_str))? else {
                continue;
            };
            let old_value = match row.value(&schema.name) {
                Some(value) => value.clone(),
                None if schema.is_boolean() => JsonValue::Bool(false),
                None => JsonValue::Null,
            };
            if new_value == old_value {
                continue;
            }
            pending.push(
                PendingAudit::new(AuditKind::Set, self.store.audit_id(id, Some(schema.name.as_str()))?, new_value.clone())
                    .field(schema)
                    .old(old_value),
            );
            changes.insert(schema.name.clone(), new_value);
        }

        self.commit_audit(&pending)?;
        if !changes.is_empty() {
            debug!("Updated {} field(s) of row {id} on table '{}'", changes.len(), self.table.name());
            self.store.update(id, changes)?;
        }
        Ok(Delta::changed(id, only_field.map(str::to_string)))
    }

    /// Flips a boolean field.
    pub fn toggle(&mut self, id: RowId, field: &str) -> Result<Delta> {
        let schema = self.schema(field)?;
        if !schema.is_boolean() {
            return Err(SyncError::invalid(format!("field '{field}' is not a boolean")));
        }
        let row = self.store.get(id)?;
        let old_value = row.value(field).and_then(JsonValue::as_bool).unwrap_or(false);
        let new_value = JsonValue::Bool(!old_value);

        let pending = [
            PendingAudit::new(AuditKind::Set, self.store.audit_id(id, Some(field))?, new_value.clone())
                .field(schema)
                .old(JsonValue::Bool(old_value)),
        ];
        self.commit_audit(&pending)?;

        let mut changes = FieldMap::new();
        changes.insert(field.to_string(), new_value);
        self.store.update(id, changes)?;
        Ok(Delta::changed(id, Some(field.to_string())))
    }

    /// Reorders a row; the client already shows the new order, so the delta
    /// is empty.
    pub fn move_row(&mut self, id: RowId, before: Option<RowId>, after: Option<RowId>) -> Result<Delta> {
        if !self.table.definition.movable {
            return Err(SyncError::UnsupportedAction(format!(
                "move on table '{}' with fixed row order",
                self.table.name()
            )));
        }

        let (old_position, new_position) = self.store.plan_move(id, before, after)?;
        if old_position != new_position {
            let pending = [PendingAudit::new(
                AuditKind::Move,
                self.store.audit_id(id, None)?,
                JsonValue::from(new_position),
            )
            .old(JsonValue::from(old_position))];
            self.commit_audit(&pending)?;
        }

        self.store.move_row(id, before, after)?;
        debug!("Moved row {id} from {old_position} to {new_position} on table '{}'", self.table.name());
        Ok(Delta::default())
    }

    /// Runs a custom action on a working copy of the store and swaps it in
    /// only once the handler and the audit both succeeded.
    pub fn custom_action(
        &mut self,
        name: &str,
        action: &CustomAction,
        target: Option<RowId>,
        params: &Params,
    ) -> Result<ActionOutcome> {
        let audit_id = match target {
            Some(id) => self.store.audit_id(id, None)?,
            None => self.table.name().to_string(),
        };

        let old_count = page_count(self.visible().len(), self.page_size());

        let mut scratch = self.store.clone();
        let (message, redirect, reload) = {
            let mut ctx = ActionContext {
                store: &mut scratch,
                target,
                params,
                message: None,
                redirect: None,
                reload: false,
            };
            (action.handler)(&mut ctx).map_err(|e| {
                warn!("Custom action '{name}' failed on table '{}': {e}", self.table.name());
                e
            })?;
            (ctx.message, ctx.redirect, ctx.reload)
        };

        let pending = [PendingAudit::new(
            AuditKind::Action,
            audit_id,
            JsonValue::String(name.to_string()),
        )];
        self.commit_audit(&pending)?;
        *self.store = scratch;
        debug!("Ran custom action '{name}' on table '{}'", self.table.name());

        let new_len = self.visible().len();
        let mut delta = Delta {
            pagination_change: pagination_delta(old_count, new_len, self.view.page),
            redirect,
            ..Delta::default()
        };
        if delta.redirect.is_none() {
            match target {
                Some(id) if !reload && self.store.contains(id) => {
                    delta.changed_in_place.push(ChangedTarget { id, field: None });
                }
                _ => {
                    let page = delta.pagination_change.map_or(self.view.page.page, |c| c.page);
                    delta.reload = Some(Reload::Page(page));
                }
            }
        }

        Ok(ActionOutcome { delta, message })
    }
}
