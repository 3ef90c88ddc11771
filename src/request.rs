//! Typed access to the string parameters of an inbound action.

use std::collections::BTreeMap;

use crate::error::{Result, SyncError};
use crate::pagination::PageRequest;
use crate::row_model::RowId;

/// Raw parameters as received from the transport.
pub type Params = BTreeMap<String, String>;

pub const PARAM_ID: &str = "id";
pub const PARAM_FILTER: &str = "filter";
pub const PARAM_PAGE: &str = "page";
pub const PARAM_PAGE_SIZE: &str = "pageSize";
pub const PARAM_FIELD: &str = "field";
pub const PARAM_BEFORE: &str = "before";
pub const PARAM_AFTER: &str = "after";
pub const PARAM_FORCE: &str = "force";
pub const PARAM_PARENT: &str = "parent";
pub const PARAM_COLLECTION: &str = "collection";
pub const PARAM_CONFIRMED: &str = "confirmed";

/// Parameter names a field may not use, since field values travel in the
/// same map.
pub const RESERVED_PARAMS: [&str; 11] = [
    PARAM_ID,
    PARAM_FILTER,
    PARAM_PAGE,
    PARAM_PAGE_SIZE,
    PARAM_FIELD,
    PARAM_BEFORE,
    PARAM_AFTER,
    PARAM_FORCE,
    PARAM_PARENT,
    PARAM_COLLECTION,
    PARAM_CONFIRMED,
];

/// Filter and page the client is currently looking at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRequest {
    pub filter: String,
    pub page: PageRequest,
}

impl ViewRequest {
    pub fn new(filter: impl Into<String>, page: usize, page_size: usize) -> Self {
        Self {
            filter: filter.into(),
            page: PageRequest::new(page, page_size),
        }
    }

    /// Reads `filter`, `page` and `pageSize`, falling back to `page_size`.
    pub fn from_params(params: &Params, page_size: usize) -> Result<Self> {
        let page = match non_empty(params, PARAM_PAGE) {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|e| SyncError::invalid(format!("invalid page '{raw}': {e}")))?,
            None => 0,
        };

        let page_size = match non_empty(params, PARAM_PAGE_SIZE) {
            Some(raw) => match raw.parse::<usize>() {
                Ok(0) => return Err(SyncError::invalid("pageSize must be greater than zero")),
                Ok(n) => n,
                Err(e) => return Err(SyncError::invalid(format!("invalid pageSize '{raw}': {e}"))),
            },
            None => page_size,
        };

        let request = PageRequest::new(page, page_size);
        if !request.is_addressable() {
            return Err(SyncError::invalid(format!(
                "page {page} with pageSize {page_size} is out of range"
            )));
        }

        let filter = params.get(PARAM_FILTER).cloned().unwrap_or_default();
        Ok(Self { filter, page: request })
    }
}

fn non_empty<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).map(|s| s.trim()).filter(|s| !s.is_empty())
}

pub fn optional_id(params: &Params, key: &str) -> Result<Option<RowId>> {
    non_empty(params, key).map(str::parse::<RowId>).transpose()
}

pub fn required_id(params: &Params, key: &str) -> Result<RowId> {
    optional_id(params, key)?.ok_or_else(|| SyncError::invalid(format!("missing parameter '{key}'")))
}

pub fn optional_str<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    non_empty(params, key)
}

pub fn flag(params: &Params, key: &str) -> bool {
    matches!(non_empty(params, key), Some("1" | "true" | "on" | "yes"))
}
