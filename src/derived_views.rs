//! Read-only aggregation of derived data views.
//!
//! A source whose backing file is absent is logged and skipped; any other
//! failure aborts the whole aggregation.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::config::EmptyViewsPolicy;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedView {
    pub name: String,
    pub data: JsonValue,
}

pub trait DerivedSource {
    fn name(&self) -> &str;

    fn load(&self) -> Result<DerivedView>;
}

/// Source backed by one JSON file on disk.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    name: String,
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl DerivedSource for JsonFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<DerivedView> {
        let bytes = fs::read(&self.path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SyncError::DataFileMissing(self.path.clone()),
            _ => SyncError::Io(e),
        })?;
        Ok(DerivedView {
            name: self.name.clone(),
            data: serde_json::from_slice(&bytes)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedViews {
    pub views: Vec<DerivedView>,
    /// Sources skipped because their data file is missing.
    pub skipped: Vec<String>,
    /// Nothing was ready and the policy asks for the data to be saved first.
    pub needs_save: bool,
}

pub fn collect_derived_views<'s, I>(sources: I, policy: EmptyViewsPolicy) -> Result<DerivedViews>
where
    I: IntoIterator<Item = &'s dyn DerivedSource>,
{
    let mut out = DerivedViews::default();

    for source in sources {
        match source.load() {
            Ok(view) => out.views.push(view),
            Err(SyncError::DataFileMissing(path)) => {
                warn!("Skipping derived view '{}': {} is missing", source.name(), path.display());
                out.skipped.push(source.name().to_string());
            }
            Err(e) => {
                warn!("Derived view '{}' failed: {e}", source.name());
                return Err(e);
            }
        }
    }

    if out.views.is_empty() && policy == EmptyViewsPolicy::FlagSaveNeeded {
        info!("No derived view ready; data must be saved first");
        out.needs_save = true;
    }
    Ok(out)
}
