use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::delta::Anchor;
use crate::error::SyncError;
use crate::pagination::PaginationChange;
use crate::renderer::Fragment;
use crate::row_model::RowId;

/// Machine-readable failure class carried next to the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    InUse,
    UnsupportedAction,
    Internal,
    StorageError,
    SerializationError,
    BadRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedFragment {
    pub anchor: Anchor,
    pub id: RowId,
    pub fragment: Fragment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFragment {
    pub id: RowId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub fragment: Fragment,
}

/// Structured answer to one inbound action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// Full page fragment, present when the client must redraw.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reload: Option<Fragment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<AddedFragment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<RowId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<ChangedFragment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination_changes: Option<PaginationChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    /// Prompt to show before re-sending the action with `confirmed=1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm: Option<String>,
}

impl Display for ResponsePayload {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (self.success, &self.message) {
            (true, Some(msg)) => write!(f, "Ok: {}", msg),
            (true, None) => write!(f, "Ok"),
            (false, Some(msg)) => write!(f, "Failed: {}", msg),
            (false, None) => write!(f, "Failed"),
        }
    }
}

impl From<&SyncError> for ErrorKind {
    fn from(err: &SyncError) -> Self {
        match err {
            SyncError::NotFound(_) | SyncError::DataFileMissing(_) => ErrorKind::NotFound,
            SyncError::InvalidInput(_) => ErrorKind::InvalidInput,
            SyncError::InUse(_) => ErrorKind::InUse,
            SyncError::UnsupportedAction(_) => ErrorKind::UnsupportedAction,
            SyncError::Internal(_) => ErrorKind::Internal,
            SyncError::Storage(_) | SyncError::Io(_) => ErrorKind::StorageError,
            SyncError::Serialization(_) => ErrorKind::SerializationError,
        }
    }
}

impl From<SyncError> for ResponsePayload {
    fn from(err: SyncError) -> Self {
        ResponsePayload {
            success: false,
            message: Some(err.to_string()),
            error: Some(ErrorKind::from(&err)),
            ..ResponsePayload::default()
        }
    }
}

impl ResponsePayload {
    pub fn success() -> Self {
        ResponsePayload {
            success: true,
            ..ResponsePayload::default()
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        ResponsePayload {
            success: false,
            message: Some(msg.into()),
            error: Some(ErrorKind::BadRequest),
            ..ResponsePayload::default()
        }
    }

    pub fn needs_confirmation(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        ResponsePayload {
            success: false,
            message: Some(prompt.clone()),
            confirm: Some(prompt),
            ..ResponsePayload::default()
        }
    }
}
