//! Engine configuration, loaded from JSON with every field defaulted.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_REDACTION_MASK: &str = "********";
/// 64 MiB, enough for a long audit history.
pub const DEFAULT_AUDIT_MAP_SIZE: usize = 64 * 1024 * 1024;

/// What to do when a derived-views aggregation finds nothing ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyViewsPolicy {
    /// Report that the backing data has to be saved before views exist.
    #[default]
    FlagSaveNeeded,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audit_enabled: bool,
    pub redaction_mask: String,
    pub default_page_size: usize,
    /// Directory of the LMDB audit log; in-memory audit when absent.
    pub audit_db_path: Option<PathBuf>,
    pub audit_map_size: usize,
    pub empty_views_policy: EmptyViewsPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            audit_enabled: true,
            redaction_mask: DEFAULT_REDACTION_MASK.to_string(),
            default_page_size: DEFAULT_PAGE_SIZE,
            audit_db_path: None,
            audit_map_size: DEFAULT_AUDIT_MAP_SIZE,
            empty_views_policy: EmptyViewsPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_page_size == 0 {
            return Err(SyncError::invalid("default_page_size must be greater than zero"));
        }
        if self.redaction_mask.is_empty() {
            return Err(SyncError::invalid("redaction_mask must not be empty"));
        }
        if self.audit_map_size == 0 {
            return Err(SyncError::invalid("audit_map_size must be greater than zero"));
        }
        Ok(())
    }
}
