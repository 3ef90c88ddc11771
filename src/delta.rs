//! Minimal client-side change set produced by one mutation.

use serde::{Deserialize, Serialize};

use crate::pagination::PaginationChange;
use crate::row_model::RowId;

/// Where an added row goes in the client's current page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    /// Top of the printed page.
    Prepend,
    /// Directly after a row already printed.
    After(RowId),
    /// Bottom of the printed page.
    Append,
}

/// Part of the view that has to be redrawn wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reload {
    All,
    Page(usize),
}

/// A row (or a single field of it) whose fragment must be regenerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedTarget {
    pub id: RowId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub added: Vec<(Anchor, RowId)>,
    pub removed: Vec<RowId>,
    pub changed_in_place: Vec<ChangedTarget>,
    pub pagination_change: Option<PaginationChange>,
    pub reload: Option<Reload>,
    pub redirect: Option<String>,
}

impl Delta {
    pub fn reload(target: Reload) -> Self {
        Self {
            reload: Some(target),
            ..Self::default()
        }
    }

    pub fn changed(id: RowId, field: Option<String>) -> Self {
        Self {
            changed_in_place: vec![ChangedTarget { id, field }],
            ..Self::default()
        }
    }

    pub fn is_full_reload(&self) -> bool {
        self.reload == Some(Reload::All)
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
