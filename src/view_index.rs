//! Visible id computation.
//!
//! The visible list is recomputed on every call; a mutation may have just
//! changed which rows match.

use crate::row_model::{Row, RowId};
use crate::row_store::RowStore;
use crate::table_schema::Table;

/// Parsed standard-regime filter.
///
/// `text` matches any non-secret field by case-insensitive substring;
/// `field:text` restricts the match to one field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Filter {
    pub field: Option<String>,
    pub needle: String,
}

impl Filter {
    pub fn parse(raw: &str, table: &Table) -> Self {
        let raw = raw.trim();
        if let Some((field, needle)) = raw.split_once(':') {
            if table.field(field).is_some() {
                return Self {
                    field: Some(field.to_string()),
                    needle: needle.to_lowercase(),
                };
            }
        }
        Self {
            field: None,
            needle: raw.to_lowercase(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.needle.is_empty()
    }

    pub fn matches(&self, table: &Table, row: &Row) -> bool {
        if self.is_empty() {
            return true;
        }
        match &self.field {
            Some(field) => row.display_value(field).to_lowercase().contains(&self.needle),
            None => table
                .fields()
                .iter()
                .filter(|f| !f.is_secret())
                .any(|f| row.display_value(&f.name).to_lowercase().contains(&self.needle)),
        }
    }
}

/// Ordered ids of the top-level rows the filter lets through.
pub fn visible_ids(table: &Table, store: &RowStore, filter: &str) -> Vec<RowId> {
    if table.definition.custom_filter {
        if let Some(producer) = &table.hooks.id_producer {
            let adapted = match &table.hooks.filter_adapter {
                Some(adapt) => adapt(filter),
                None => filter.to_string(),
            };
            return producer(store, &adapted);
        }
    }

    let filter = Filter::parse(filter, table);
    store
        .iter()
        .filter(|row| filter.matches(table, row))
        .map(|row| row.id)
        .collect()
}
