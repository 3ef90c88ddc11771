//! Row rendering contract.
//!
//! The engine never inspects fragments; it only places them in the response.
//! [`JsonRowRenderer`] is the default used when the host supplies nothing.

use serde_json::{json, Value as JsonValue};

use crate::audit::redact;
use crate::pagination::PageRequest;
use crate::row_model::Row;
use crate::table_schema::Table;

/// Opaque rendered piece of view.
pub type Fragment = String;

/// Context the renderer receives alongside the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    pub page: PageRequest,
    pub filter: String,
}

/// Must be deterministic for identical row state and context.
pub trait RowRenderer: Send + Sync {
    fn render_row(&self, table: &Table, row: &Row, ctx: &RenderContext) -> Fragment;

    fn render_field(&self, table: &Table, row: &Row, field: &str, ctx: &RenderContext) -> Fragment;

    /// Whole page, used for reload responses.
    fn render_page(&self, table: &Table, rows: &[&Row], page_count: usize, ctx: &RenderContext) -> Fragment;
}

/// Renders rows as compact JSON objects; secret fields are masked.
#[derive(Debug, Clone)]
pub struct JsonRowRenderer {
    mask: String,
}

impl JsonRowRenderer {
    pub fn new(mask: impl Into<String>) -> Self {
        Self { mask: mask.into() }
    }

    fn row_value(&self, table: &Table, row: &Row) -> JsonValue {
        let mut fields = serde_json::Map::new();
        for schema in table.fields() {
            let value = row.value(&schema.name).cloned().unwrap_or(JsonValue::Null);
            let shown = if schema.is_secret() {
                JsonValue::String(redact(Some(schema), Some(&schema.name), &value, &self.mask))
            } else {
                value
            };
            fields.insert(schema.name.clone(), shown);
        }

        let mut out = json!({ "id": row.id, "fields": fields });
        if !row.children.is_empty() {
            out["children"] = json!(row.children);
        }
        out
    }
}

impl RowRenderer for JsonRowRenderer {
    fn render_row(&self, table: &Table, row: &Row, _ctx: &RenderContext) -> Fragment {
        self.row_value(table, row).to_string()
    }

    fn render_field(&self, table: &Table, row: &Row, field: &str, _ctx: &RenderContext) -> Fragment {
        let value = row.value(field).cloned().unwrap_or(JsonValue::Null);
        let shown = match table.field(field) {
            Some(schema) if schema.is_secret() => {
                JsonValue::String(redact(Some(schema), Some(field), &value, &self.mask))
            }
            _ => value,
        };
        json!({ "id": row.id, "field": field, "value": shown }).to_string()
    }

    fn render_page(&self, table: &Table, rows: &[&Row], page_count: usize, ctx: &RenderContext) -> Fragment {
        let rows: Vec<JsonValue> = rows.iter().map(|row| self.row_value(table, row)).collect();
        json!({
            "table": table.name(),
            "page": ctx.page.page,
            "page_count": page_count,
            "filter": ctx.filter,
            "rows": rows,
        })
        .to_string()
    }
}
