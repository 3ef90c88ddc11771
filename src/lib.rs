//! # Table Sync Core
//!
//! A paginated table synchronization engine. Clients mutate rows of a
//! server-held, ordered table (add, edit, delete, reorder, toggle a boolean,
//! run a custom row action) and get back the minimal set of changes needed to
//! keep their filtered, paginated view in step, instead of the whole table.
//! Every mutation is paired with field-level audit entries, with sensitive
//! values redacted.
//!
//! ## Features
//!
//! - **Incremental deltas**: added/removed/changed rows, page reloads and
//!   page-count changes computed against the client's current page
//! - **Audit trail**: one entry per changed field, committed together with
//!   the row change, backed by memory or LMDB
//! - **Per-table locking**: mutations on one table are serialized, tables are
//!   independent
//! - **FFI-friendly**: C functions taking and returning JSON strings
//!
//! ## Quick Start
//!
//! ```rust
//! use table_sync_core::{
//!     config::EngineConfig,
//!     request::Params,
//!     sync_engine::SyncEngine,
//!     table_schema::{FieldKind, FieldSchema, TableDefinition, TableHooks},
//! };
//!
//! let engine = SyncEngine::new(EngineConfig::default())?;
//! let definition = TableDefinition::new(
//!     "interfaces",
//!     vec![
//!         FieldSchema::new("name", FieldKind::Text),
//!         FieldSchema::new("enabled", FieldKind::Boolean),
//!     ],
//! )
//! .with_page_size(10);
//! engine.register_table(definition, TableHooks::default())?;
//!
//! let mut params = Params::new();
//! params.insert("name".to_string(), "eth0".to_string());
//! params.insert("enabled".to_string(), "1".to_string());
//!
//! let response = engine.execute_action("interfaces", "add", &params);
//! assert!(response.success);
//! # Ok::<(), table_sync_core::error::SyncError>(())
//! ```
//!
//! ## FFI Functions
//!
//! - [`create_sync_engine`] - Build an engine from a JSON configuration
//! - [`register_table`] - Register a table from a JSON definition
//! - [`execute_action`] - Run an action and get the JSON response payload
//! - [`free_response`] - Release a string returned by this library
//! - [`close_sync_engine`] - Drop an engine

pub mod app_response;
pub mod audit;
pub mod audit_store;
pub mod config;
pub mod delta;
pub mod derived_views;
pub mod dispatcher;
pub mod error;
pub mod mutation;
pub mod pagination;
pub mod renderer;
pub mod request;
pub mod row_model;
pub mod row_store;
pub mod sync_engine;
pub mod table_schema;
pub mod view_index;
mod test;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use log::{info, warn};
use serde_json::Value as JsonValue;

use crate::app_response::ResponsePayload;
use crate::config::EngineConfig;
use crate::request::Params;
use crate::sync_engine::SyncEngine;
use crate::table_schema::{TableDefinition, TableHooks};

/// Creates a new engine from a JSON configuration.
///
/// A null pointer selects the default configuration.
///
/// # Returns
///
/// A pointer to the [`SyncEngine`], or null when the configuration is
/// invalid or the audit log cannot be opened. Release it with
/// [`close_sync_engine`].
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use table_sync_core::create_sync_engine;
///
/// let config = CString::new(r#"{"audit_enabled":true,"default_page_size":25}"#).unwrap();
/// let engine = create_sync_engine(config.as_ptr());
/// assert!(!engine.is_null());
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn create_sync_engine(config_json: *const c_char) -> *mut SyncEngine {
    let config = if config_json.is_null() {
        EngineConfig::default()
    } else {
        let json = match unsafe { CStr::from_ptr(config_json).to_str() } {
            Ok(s) => s,
            Err(e) => {
                warn!("Invalid UTF-8 in engine configuration: {e}");
                return std::ptr::null_mut();
            }
        };
        match EngineConfig::from_json_str(json) {
            Ok(config) => config,
            Err(e) => {
                warn!("❌ Invalid engine configuration: {e}");
                return std::ptr::null_mut();
            }
        }
    };

    match SyncEngine::new(config) {
        Ok(engine) => {
            info!("✅ Sync engine initialized successfully");
            Box::into_raw(Box::new(engine))
        }
        Err(e) => {
            warn!("❌ Failed to initialize sync engine: {e}");
            std::ptr::null_mut()
        }
    }
}

/// Registers a table described by a JSON [`TableDefinition`].
///
/// Tables registered this way have no custom actions or custom filter;
/// those need closures and are only available to Rust hosts.
///
/// # JSON Format
///
/// ```json
/// {
///   "name": "users",
///   "fields": [
///     { "name": "login", "kind": "text" },
///     { "name": "password", "kind": "password" },
///     { "name": "active", "kind": "boolean" }
///   ],
///   "page_size": 20,
///   "movable": true
/// }
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn register_table(engine: *mut SyncEngine, definition_json: *const c_char) -> *const c_char {
    let engine = match unsafe { engine.as_ref() } {
        Some(e) => e,
        None => return response_to_c_string(&ResponsePayload::bad_request("Null engine pointer")),
    };

    let json = match c_ptr_to_string(definition_json, "definition") {
        Ok(json) => json,
        Err(err) => return err,
    };

    let definition: TableDefinition = match serde_json::from_str(&json) {
        Ok(d) => d,
        Err(e) => {
            let error = ResponsePayload::bad_request(format!("Invalid table definition: {e}"));
            return response_to_c_string(&error);
        }
    };

    match engine.register_table(definition, TableHooks::default()) {
        Ok(_) => response_to_c_string(&ResponsePayload::success()),
        Err(e) => response_to_c_string(&ResponsePayload::from(e)),
    }
}

/// Runs `action` on `table` and returns the JSON response payload.
///
/// `params_json` is a JSON object; string, number and boolean values are
/// accepted, `null` means absent. A null pointer means no parameters.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use table_sync_core::{create_sync_engine, execute_action, free_response};
///
/// let engine = create_sync_engine(std::ptr::null());
/// let table = CString::new("users").unwrap();
/// let action = CString::new("delete").unwrap();
/// let params = CString::new(r#"{"id":"3","page":"0","pageSize":"20"}"#).unwrap();
///
/// let response = execute_action(engine, table.as_ptr(), action.as_ptr(), params.as_ptr());
/// free_response(response as *mut _);
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn execute_action(
    engine: *mut SyncEngine,
    table: *const c_char,
    action: *const c_char,
    params_json: *const c_char,
) -> *const c_char {
    let engine = match unsafe { engine.as_ref() } {
        Some(e) => e,
        None => return response_to_c_string(&ResponsePayload::bad_request("Null engine pointer")),
    };

    let table = match c_ptr_to_string(table, "table") {
        Ok(t) => t,
        Err(err) => return err,
    };
    let action = match c_ptr_to_string(action, "action") {
        Ok(a) => a,
        Err(err) => return err,
    };

    let params = if params_json.is_null() {
        Params::new()
    } else {
        let json = match c_ptr_to_string(params_json, "params") {
            Ok(json) => json,
            Err(err) => return err,
        };
        match params_from_json(&json) {
            Ok(params) => params,
            Err(msg) => return response_to_c_string(&ResponsePayload::bad_request(msg)),
        }
    };

    let response = engine.execute_action(&table, &action, &params);
    response_to_c_string(&response)
}

/// Releases a string returned by this library.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn free_response(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    drop(unsafe { CString::from_raw(ptr) });
}

/// Drops an engine created by [`create_sync_engine`].
///
/// The pointer must not be used afterwards.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn close_sync_engine(engine: *mut SyncEngine) -> *const c_char {
    if engine.is_null() {
        return response_to_c_string(&ResponsePayload::bad_request(
            "Null engine pointer passed to close_sync_engine",
        ));
    }
    drop(unsafe { Box::from_raw(engine) });
    info!("Sync engine closed");
    response_to_c_string(&ResponsePayload::success())
}

/// Flattens a JSON object into transport parameters.
fn params_from_json(json: &str) -> Result<Params, String> {
    let value: JsonValue = serde_json::from_str(json).map_err(|e| format!("Invalid params JSON: {e}"))?;
    let JsonValue::Object(map) = value else {
        return Err("Params must be a JSON object".to_string());
    };

    let mut params = Params::new();
    for (key, value) in map {
        let raw = match value {
            JsonValue::Null => continue,
            JsonValue::String(s) => s,
            JsonValue::Bool(b) => (if b { "1" } else { "0" }).to_string(),
            JsonValue::Number(n) => n.to_string(),
            other => return Err(format!("Unsupported value for param '{key}': {other}")),
        };
        params.insert(key, raw);
    }
    Ok(params)
}

/// Serializes a response into a C string owned by the caller.
fn response_to_c_string(response: &ResponsePayload) -> *const c_char {
    let json = match serde_json::to_string(response) {
        Ok(j) => j,
        Err(e) => {
            warn!("Error serializing response: {e}");
            return std::ptr::null();
        }
    };

    match CString::new(json) {
        Ok(c_str) => c_str.into_raw(),
        Err(e) => {
            warn!("Error creating CString: {e}");
            std::ptr::null()
        }
    }
}

/// Converts a C string pointer into a `String`, or into a ready-made error
/// response when the pointer is null or not UTF-8.
fn c_ptr_to_string(ptr: *const c_char, field_name: &str) -> Result<String, *const c_char> {
    if ptr.is_null() {
        let error = ResponsePayload::bad_request(format!("Null {field_name} pointer"));
        return Err(response_to_c_string(&error));
    }

    match unsafe { CStr::from_ptr(ptr).to_str() } {
        Ok(s) => Ok(s.to_string()),
        Err(e) => {
            let error = ResponsePayload::bad_request(format!("Invalid UTF-8 in {field_name}: {e}"));
            Err(response_to_c_string(&error))
        }
    }
}
