//! Ordered in-memory row collection for one table instance.
//!
//! The store owns row identity and lifetime. Top-level rows keep their
//! insertion order (changed only by [`RowStore::move_row`]); child rows live
//! in the same id space but are reachable only through their parent's
//! collections and are removed together with it.

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::row_model::{FieldMap, Row, RowId};
use crate::table_schema::DependentsChecker;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowStore {
    rows: HashMap<RowId, Row>,
    order: Vec<RowId>,
    /// Last id handed out; ids are never reused, even after deletion.
    last_id: u64,
}

impl RowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of top-level rows.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of rows including nested ones.
    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }

    /// Top-level ids in display order.
    pub fn order(&self) -> &[RowId] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &Row> + '_ {
        self.order.iter().filter_map(|id| self.rows.get(id))
    }

    pub fn contains(&self, id: RowId) -> bool {
        self.rows.contains_key(&id)
    }

    pub fn get(&self, id: RowId) -> Result<&Row> {
        self.rows
            .get(&id)
            .ok_or_else(|| SyncError::not_found(format!("row {id}")))
    }

    fn next_id(&mut self) -> RowId {
        self.last_id += 1;
        RowId(self.last_id)
    }

    /// Appends a top-level row and returns its new id.
    pub fn create(&mut self, fields: FieldMap) -> RowId {
        let id = self.next_id();
        let mut row = Row::new(id, None);
        row.fields = fields;
        self.rows.insert(id, row);
        self.order.push(id);
        debug!("Created row {id}");
        id
    }

    /// Appends a row to one of `parent`'s child collections.
    pub fn create_child(&mut self, parent: RowId, collection: &str, fields: FieldMap) -> Result<RowId> {
        if !self.rows.contains_key(&parent) {
            return Err(SyncError::not_found(format!("parent row {parent}")));
        }
        if collection.is_empty() {
            return Err(SyncError::invalid("child collection name must not be empty"));
        }

        let id = self.next_id();
        let mut row = Row::new(id, Some(parent));
        row.fields = fields;
        self.rows.insert(id, row);

        if let Some(parent_row) = self.rows.get_mut(&parent) {
            parent_row
                .children
                .entry(collection.to_string())
                .or_default()
                .push(id);
        }
        debug!("Created row {id} under {parent}/{collection}");
        Ok(id)
    }

    /// Replaces the named fields only; the others keep their value.
    pub fn update(&mut self, id: RowId, fields: FieldMap) -> Result<()> {
        let row = self
            .rows
            .get_mut(&id)
            .ok_or_else(|| SyncError::not_found(format!("row {id}")))?;
        for (name, value) in fields {
            row.fields.insert(name, value);
        }
        Ok(())
    }

    /// Removes a row and, recursively, every child it owns.
    ///
    /// Returns the removed rows, the requested one first.
    pub fn delete(&mut self, id: RowId, force: bool, dependents: &dyn DependentsChecker) -> Result<Vec<Row>> {
        if !self.rows.contains_key(&id) {
            return Err(SyncError::not_found(format!("row {id}")));
        }
        if !force && dependents.has_dependents(id) {
            return Err(SyncError::InUse(id.to_string()));
        }

        self.siblings_mut(id)?.retain(|r| *r != id);

        let mut removed = Vec::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(row) = self.rows.remove(&next) {
                pending.extend(row.child_ids());
                removed.push(row);
            }
        }
        debug!("Deleted row {id} ({} rows in total)", removed.len());
        Ok(removed)
    }

    /// Position of a row among its siblings.
    pub fn position(&self, id: RowId) -> Option<usize> {
        let row = self.rows.get(&id)?;
        match row.parent {
            None => self.order.iter().position(|r| *r == id),
            Some(parent) => self
                .rows
                .get(&parent)?
                .children
                .values()
                .find_map(|list| list.iter().position(|r| *r == id)),
        }
    }

    /// Moves `id` directly before `before`, or directly after `after`.
    ///
    /// When both anchors are given `before` wins. The anchor must be a
    /// sibling of the moved row. Returns `(old_position, new_position)`.
    pub fn move_row(&mut self, id: RowId, before: Option<RowId>, after: Option<RowId>) -> Result<(usize, usize)> {
        let (anchor, place_before) = self.move_anchor(id, before, after)?;
        relocate(self.siblings_mut(id)?, id, anchor, place_before)
    }

    /// Positions [`RowStore::move_row`] would report, without moving.
    pub fn plan_move(&self, id: RowId, before: Option<RowId>, after: Option<RowId>) -> Result<(usize, usize)> {
        let (anchor, place_before) = self.move_anchor(id, before, after)?;
        let mut siblings = self.siblings(id)?.to_vec();
        relocate(&mut siblings, id, anchor, place_before)
    }

    fn move_anchor(&self, id: RowId, before: Option<RowId>, after: Option<RowId>) -> Result<(RowId, bool)> {
        let (anchor, place_before) = match (before, after) {
            (Some(b), _) => (b, true),
            (None, Some(a)) => (a, false),
            (None, None) => {
                return Err(SyncError::invalid("move needs a 'before' or 'after' row"));
            }
        };
        if anchor == id {
            return Err(SyncError::invalid(format!("row {id} cannot be moved relative to itself")));
        }
        if !self.rows.contains_key(&id) {
            return Err(SyncError::not_found(format!("row {id}")));
        }
        if !self.rows.contains_key(&anchor) {
            return Err(SyncError::not_found(format!("row {anchor}")));
        }
        Ok((anchor, place_before))
    }

    /// Id the next created row will receive.
    pub fn peek_next_id(&self) -> RowId {
        RowId(self.last_id + 1)
    }

    /// Every row owned, directly or not, by `id`.
    pub fn descendants(&self, id: RowId) -> Vec<RowId> {
        let mut out = Vec::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(row) = self.rows.get(&next) {
                for child in row.child_ids() {
                    out.push(child);
                    pending.push(child);
                }
            }
        }
        out
    }

    /// Audit id of a row, or of one of its fields:
    /// `parentRowId/rowId/field` for nested rows, `rowId[/field]` otherwise.
    pub fn audit_id(&self, id: RowId, field: Option<&str>) -> Result<String> {
        let row = self.get(id)?;
        Ok(composite_id(row.parent, id, field))
    }

    fn siblings(&self, id: RowId) -> Result<&[RowId]> {
        let parent = self.get(id)?.parent;
        match parent {
            None => Ok(&self.order),
            Some(parent) => self
                .rows
                .get(&parent)
                .and_then(|p| p.children.values().find(|list| list.contains(&id)))
                .map(Vec::as_slice)
                .ok_or_else(|| SyncError::Internal(format!("row {id} is detached from parent {parent}"))),
        }
    }

    fn siblings_mut(&mut self, id: RowId) -> Result<&mut Vec<RowId>> {
        let parent = self
            .rows
            .get(&id)
            .ok_or_else(|| SyncError::not_found(format!("row {id}")))?
            .parent;

        match parent {
            None => Ok(&mut self.order),
            Some(parent) => self
                .rows
                .get_mut(&parent)
                .and_then(|p| p.children.values_mut().find(|list| list.contains(&id)))
                .ok_or_else(|| SyncError::Internal(format!("row {id} is detached from parent {parent}"))),
        }
    }
}

/// Builds `parent/row/field`, leaving out the parts that do not apply.
pub fn composite_id(parent: Option<RowId>, id: RowId, field: Option<&str>) -> String {
    let mut composite = match parent {
        Some(parent) => format!("{parent}/{id}"),
        None => id.to_string(),
    };
    if let Some(field) = field {
        composite.push('/');
        composite.push_str(field);
    }
    composite
}

fn relocate(siblings: &mut Vec<RowId>, id: RowId, anchor: RowId, place_before: bool) -> Result<(usize, usize)> {
    let old_position = siblings
        .iter()
        .position(|r| *r == id)
        .ok_or_else(|| SyncError::Internal(format!("row {id} missing from its collection")))?;
    siblings.remove(old_position);

    let Some(anchor_position) = siblings.iter().position(|r| *r == anchor) else {
        siblings.insert(old_position, id);
        return Err(SyncError::invalid(format!("rows {id} and {anchor} are not siblings")));
    };

    let new_position = if place_before {
        anchor_position
    } else {
        anchor_position + 1
    };
    siblings.insert(new_position, id);
    Ok((old_position, new_position))
}
