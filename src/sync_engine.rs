//! Table registry and the `execute_action` entry point.
//!
//! Each table sits behind its own reader-writer lock: mutations hold the
//! write side for the whole read-mutate-recompute cycle, page renders share
//! the read side. Tables never contend with each other; the registry lock is
//! only held to look a table up or register one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::app_response::ResponsePayload;
use crate::audit::{AuditRecorder, AuditSink, AuditSwitch, MemoryAuditSink};
use crate::audit_store::LmdbAuditSink;
use crate::config::EngineConfig;
use crate::derived_views::{collect_derived_views, DerivedSource, DerivedViews};
use crate::dispatcher::{package, resolve, Dispatched, Dispatcher, ResolvedAction};
use crate::error::{Result, SyncError};
use crate::renderer::{JsonRowRenderer, RowRenderer};
use crate::request::{Params, ViewRequest};
use crate::row_model::{FieldMap, RowId};
use crate::row_store::RowStore;
use crate::table_schema::{Table, TableDefinition, TableHooks};
use crate::view_index::visible_ids;

/// One registered table and its session state.
pub struct TableHandle {
    table: Table,
    store: RwLock<RowStore>,
    page_size: AtomicUsize,
    pending_message: Mutex<Option<String>>,
}

impl TableHandle {
    fn new(table: Table, page_size: usize) -> Self {
        Self {
            table,
            store: RwLock::new(RowStore::new()),
            page_size: AtomicUsize::new(page_size),
            pending_message: Mutex::new(None),
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn page_size(&self) -> usize {
        self.page_size.load(Ordering::SeqCst)
    }

    /// Runs `f` with shared access to the rows.
    pub fn read<R>(&self, f: impl FnOnce(&RowStore) -> R) -> R {
        let store = self.store.read();
        f(&*store)
    }

    /// Inserts a row without going through an action: no delta, no audit.
    /// Meant for loading existing data at startup.
    pub fn seed(&self, fields: FieldMap) -> RowId {
        self.store.write().create(fields)
    }

    /// Queues a message for the next structured response.
    pub fn set_message(&self, message: impl Into<String>) {
        *self.pending_message.lock() = Some(message.into());
    }

    pub fn pending_message(&self) -> Option<String> {
        self.pending_message.lock().clone()
    }

    fn view_request(&self, params: &Params) -> Result<ViewRequest> {
        let view = ViewRequest::from_params(params, self.page_size())?;
        self.page_size.store(view.page.page_size, Ordering::SeqCst);
        Ok(view)
    }
}

pub struct SyncEngine {
    config: EngineConfig,
    recorder: AuditRecorder,
    renderer: Arc<dyn RowRenderer>,
    tables: RwLock<HashMap<String, Arc<TableHandle>>>,
}

impl SyncEngine {
    /// Builds an engine with the collaborators the configuration asks for:
    /// an LMDB audit log when `audit_db_path` is set, in-memory otherwise,
    /// and the JSON renderer.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let sink: Arc<dyn AuditSink> = match &config.audit_db_path {
            Some(path) => Arc::new(LmdbAuditSink::open(path, config.audit_map_size)?),
            None => Arc::new(MemoryAuditSink::new()),
        };
        let renderer = Arc::new(JsonRowRenderer::new(config.redaction_mask.clone()));
        Self::with_collaborators(config, sink, renderer)
    }

    pub fn with_collaborators(
        config: EngineConfig,
        sink: Arc<dyn AuditSink>,
        renderer: Arc<dyn RowRenderer>,
    ) -> Result<Self> {
        config.validate()?;
        let switch = AuditSwitch::new(config.audit_enabled);
        let recorder = AuditRecorder::new(sink, switch, config.redaction_mask.clone());
        info!(
            "Sync engine ready (audit {})",
            if config.audit_enabled { "enabled" } else { "disabled" }
        );
        Ok(Self {
            config,
            recorder,
            renderer,
            tables: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Switch shared with the audit recorder; flipping it takes effect on
    /// the next mutation.
    pub fn audit_switch(&self) -> &AuditSwitch {
        self.recorder.switch()
    }

    pub fn register_table(&self, definition: TableDefinition, hooks: TableHooks) -> Result<Arc<TableHandle>> {
        let page_size = definition.page_size.unwrap_or(self.config.default_page_size);
        let table = Table::new(definition, hooks)?;
        let name = table.name().to_string();

        let mut tables = self.tables.write();
        if tables.contains_key(&name) {
            return Err(SyncError::invalid(format!("table '{name}' is already registered")));
        }
        let handle = Arc::new(TableHandle::new(table, page_size));
        tables.insert(name.clone(), Arc::clone(&handle));
        info!("Registered table '{name}' (page size {page_size})");
        Ok(handle)
    }

    pub fn table(&self, name: &str) -> Result<Arc<TableHandle>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::not_found(format!("table '{name}'")))
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn visible_ids(&self, table: &str, filter: &str) -> Result<Vec<RowId>> {
        let handle = self.table(table)?;
        let store = handle.store.read();
        Ok(visible_ids(&handle.table, &store, filter))
    }

    /// Resolves and runs an action, returning the unrendered outcome.
    pub fn dispatch(&self, table: &str, action: &str, params: &Params) -> Result<Dispatched> {
        let handle = self.table(table)?;
        let view = handle.view_request(params)?;
        let resolved = resolve(&handle.table, action)?;
        let dispatcher = Dispatcher::new(&handle.table, &self.recorder);

        match &resolved {
            ResolvedAction::Builtin(builtin) if resolved.is_read_only() => dispatcher.dispatch_read(*builtin, &view),
            _ => {
                let mut store = handle.store.write();
                dispatcher.dispatch(&mut store, &resolved, params, &view)
            }
        }
    }

    /// Runs an action and packages the result; failures become
    /// `success: false` payloads.
    pub fn execute_action(&self, table: &str, action: &str, params: &Params) -> ResponsePayload {
        match self.try_execute_action(table, action, params) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Action '{action}' on table '{table}' failed: {e}");
                ResponsePayload::from(e)
            }
        }
    }

    fn try_execute_action(&self, table: &str, action: &str, params: &Params) -> Result<ResponsePayload> {
        let handle = self.table(table)?;
        let result = self.run_action(&handle, action, params);
        if result.is_err() {
            // A failure is the structured response the message was waiting for.
            if let Some(dropped) = handle.pending_message.lock().take() {
                debug!("Cleared pending message on table '{table}': {dropped}");
            }
        }
        result
    }

    fn run_action(&self, handle: &TableHandle, action: &str, params: &Params) -> Result<ResponsePayload> {
        let view = handle.view_request(params)?;
        let resolved = resolve(&handle.table, action)?;
        let dispatcher = Dispatcher::new(&handle.table, &self.recorder);
        debug!("Dispatching '{action}' on table '{}'", handle.table.name());

        match &resolved {
            ResolvedAction::Builtin(builtin) if resolved.is_read_only() => {
                let store = handle.store.read();
                let dispatched = dispatcher.dispatch_read(*builtin, &view)?;
                self.deliver(handle, &store, &view, dispatched)
            }
            _ => {
                let mut store = handle.store.write();
                let dispatched = dispatcher.dispatch(&mut store, &resolved, params, &view)?;
                self.deliver(handle, &store, &view, dispatched)
            }
        }
    }

    /// Packages a dispatched action. The pending message is consumed only
    /// when the response can carry it; a confirmation prompt leaves it queued.
    fn deliver(
        &self,
        handle: &TableHandle,
        store: &RowStore,
        view: &ViewRequest,
        dispatched: Dispatched,
    ) -> Result<ResponsePayload> {
        let pending = if dispatched.confirm.is_none() {
            handle.pending_message.lock().take()
        } else {
            None
        };
        package(&handle.table, store, self.renderer.as_ref(), view, dispatched, pending)
    }

    /// Collects derived views, applying the configured empty-result policy.
    pub fn collect_derived_views<'s, I>(&self, sources: I) -> Result<DerivedViews>
    where
        I: IntoIterator<Item = &'s dyn DerivedSource>,
    {
        collect_derived_views(sources, self.config.empty_views_policy)
    }
}
