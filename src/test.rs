//! # Test Suite for Table Sync Core
//!
//! Covers the delta computation, the audit trail, the action dispatcher and
//! the C ABI surface of the engine.
//!
//! ## Test Categories
//!
//! ### 1. Pagination Tests
//! - Page count and printed range arithmetic
//! - Page count tracking across adds and deletes
//!
//! ### 2. Delta Tests
//! - Adds: empty table, in-page insert, off-page insert, push-out
//! - Deletes: replacement row, last page collapse, single row
//! - Edits, toggles, moves and child rows
//!
//! ### 3. Audit Tests
//! - Boolean and password redaction
//! - Composite ids of nested rows
//! - Runtime switch and LMDB persistence
//!
//! ### 4. Dispatcher Tests
//! - Unsupported actions, custom actions, confirmation, rollback
//! - Transient messages
//!
//! ### 5. FFI Function Tests
//! - `create_sync_engine`, `register_table`, `execute_action`,
//!   `free_response`, `close_sync_engine`
//!
//! ### 6. Concurrency Tests
//! - Concurrent writers and readers on one table
//!
//! ## Running the Tests
//!
//! ```bash
//! cargo test
//! cargo test test_ffi_           # FFI tests
//! cargo test test_delete_        # Delete delta tests
//! cargo test test_concurrent_    # Concurrency tests
//! ```

#[cfg(test)]
pub mod tests {
    use std::ffi::{CStr, CString};
    use std::fs;
    use std::os::raw::c_char;
    use std::sync::Arc;
    use std::thread;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::app_response::ErrorKind;
    use crate::audit::{
        AuditEntry, AuditKind, AuditRecorder, AuditSink, AuditSwitch, MemoryAuditSink, PendingAudit,
    };
    use crate::audit_store::LmdbAuditSink;
    use crate::config::{EmptyViewsPolicy, EngineConfig, DEFAULT_AUDIT_MAP_SIZE, DEFAULT_REDACTION_MASK};
    use crate::delta::{Anchor, ChangedTarget, Reload};
    use crate::derived_views::{collect_derived_views, DerivedSource, JsonFileSource};
    use crate::error::SyncError;
    use crate::pagination::{page_count, pagination_delta, printed_range, PageRequest, PaginationChange};
    use crate::renderer::JsonRowRenderer;
    use crate::request::{Params, ViewRequest};
    use crate::row_model::{FieldMap, RowId};
    use crate::row_store::RowStore;
    use crate::sync_engine::{SyncEngine, TableHandle};
    use crate::table_schema::{
        parse_fields, CustomAction, DependentsChecker, FieldKind, FieldSchema, NoDependents, Table,
        TableDefinition, TableHooks,
    };
    use crate::{close_sync_engine, create_sync_engine, execute_action, free_response, register_table};

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn interfaces(page_size: usize) -> TableDefinition {
        TableDefinition::new(
            "interfaces",
            vec![
                FieldSchema::new("name", FieldKind::Text),
                FieldSchema::new("enabled", FieldKind::Boolean),
                FieldSchema::new("password", FieldKind::Password),
            ],
        )
        .with_page_size(page_size)
    }

    fn engine_with_sink() -> (SyncEngine, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        let renderer = Arc::new(JsonRowRenderer::new(DEFAULT_REDACTION_MASK));
        let engine = SyncEngine::with_collaborators(EngineConfig::default(), sink.clone(), renderer).unwrap();
        (engine, sink)
    }

    fn seed_rows(handle: &TableHandle, names: &[&str]) -> Vec<RowId> {
        names
            .iter()
            .map(|name| {
                let fields = parse_fields(handle.table(), [("name", *name), ("enabled", "1")]).unwrap();
                handle.seed(fields)
            })
            .collect()
    }

    fn ids(raw: &[u64]) -> Vec<RowId> {
        raw.iter().copied().map(RowId).collect()
    }

    fn engine_with_failing_sink() -> SyncEngine {
        let renderer = Arc::new(JsonRowRenderer::new(DEFAULT_REDACTION_MASK));
        SyncEngine::with_collaborators(EngineConfig::default(), Arc::new(FailingSink), renderer).unwrap()
    }

    /// Snapshot of the visible order and every field value.
    fn dump(handle: &TableHandle) -> Vec<(RowId, String, String)> {
        handle.read(|store| {
            store
                .iter()
                .map(|row| (row.id, row.display_value("name"), row.display_value("enabled")))
                .collect()
        })
    }

    /// Sink whose backing log is gone.
    struct FailingSink;

    impl AuditSink for FailingSink {
        fn append(&self, _entry: &AuditEntry) -> Result<(), SyncError> {
            Err(SyncError::Internal("audit log unavailable".to_string()))
        }

        fn append_batch(&self, _entries: &[AuditEntry]) -> Result<(), SyncError> {
            Err(SyncError::Internal("audit log unavailable".to_string()))
        }
    }

    struct Pinned(RowId);

    impl DependentsChecker for Pinned {
        fn has_dependents(&self, row_id: RowId) -> bool {
            row_id == self.0
        }
    }

    // ===============================
    // PAGINATION TESTS
    // ===============================

    #[test]
    fn test_page_count_and_printed_range() {
        assert_eq!(page_count(0, 5), 0);
        assert_eq!(page_count(5, 5), 1);
        assert_eq!(page_count(6, 5), 2);

        assert_eq!(printed_range(0, PageRequest::new(0, 5)), None);
        assert_eq!(printed_range(7, PageRequest::new(0, 5)), Some((0, 4)));
        assert_eq!(printed_range(7, PageRequest::new(1, 5)), Some((5, 6)));
        assert_eq!(printed_range(7, PageRequest::new(2, 5)), None);
    }

    #[test]
    fn test_page_request_slots_saturate() {
        let huge = PageRequest::new(usize::MAX, 2);
        assert_eq!(huge.first_slot(), usize::MAX);
        assert_eq!(huge.last_slot(), usize::MAX - 1);
        assert!(!huge.is_addressable());

        let normal = PageRequest::new(3, 4);
        assert_eq!((normal.first_slot(), normal.last_slot()), (12, 15));
        assert!(normal.is_addressable());
    }

    #[test]
    fn test_out_of_range_page_is_rejected() {
        let (engine, _) = engine_with_sink();
        let handle = engine.register_table(interfaces(4), TableHooks::default()).unwrap();
        seed_rows(&handle, &["eth0", "eth1"]);
        let page = (usize::MAX / 2).to_string();

        for action in ["page", "add", "delete"] {
            let response = engine.execute_action(
                "interfaces",
                action,
                &params(&[("page", page.as_str()), ("pageSize", "4"), ("id", "1"), ("name", "eth2")]),
            );
            assert!(!response.success);
            assert_eq!(response.error, Some(ErrorKind::InvalidInput));
        }
        assert_eq!(handle.read(|store| store.len()), 2);
        assert_eq!(handle.page_size(), 4);
    }

    #[test]
    fn test_pagination_delta_falls_back_to_previous_page() {
        // Page 1 of size 2 emptied out: 3 rows became 2.
        let change = pagination_delta(2, 2, PageRequest::new(1, 2));
        assert_eq!(change, Some(PaginationChange { page: 0, page_count: 1 }));

        assert_eq!(pagination_delta(1, 2, PageRequest::new(0, 2)), None);
    }

    #[test]
    fn test_page_count_tracks_every_add_and_delete() {
        for page_size in 1..=4 {
            let (engine, _) = engine_with_sink();
            engine.register_table(interfaces(page_size), TableHooks::default()).unwrap();
            let size = page_size.to_string();

            for n in 1..=9usize {
                let name = format!("if{n}");
                let dispatched = engine
                    .dispatch("interfaces", "add", &params(&[("name", name.as_str()), ("pageSize", size.as_str())]))
                    .unwrap();
                let visible = engine.visible_ids("interfaces", "").unwrap();
                assert_eq!(visible.len(), n);
                let expected = n.div_ceil(page_size);
                if expected != (n - 1).div_ceil(page_size) {
                    assert_eq!(dispatched.delta.pagination_change.map(|c| c.page_count), Some(expected));
                } else {
                    assert_eq!(dispatched.delta.pagination_change, None);
                }
            }

            for id in 1..=9u64 {
                let dispatched = engine
                    .dispatch("interfaces", "delete", &params(&[("id", id.to_string().as_str()), ("pageSize", size.as_str())]))
                    .unwrap();
                let remaining = 9 - id as usize;
                if remaining.div_ceil(page_size) != (remaining + 1).div_ceil(page_size) {
                    assert_eq!(
                        dispatched.delta.pagination_change.map(|c| c.page_count),
                        Some(remaining.div_ceil(page_size))
                    );
                }
            }
        }
    }

    // ===============================
    // ADD DELTA TESTS
    // ===============================

    #[test]
    fn test_add_to_empty_table_reloads_everything() {
        let (engine, _) = engine_with_sink();
        engine.register_table(interfaces(5), TableHooks::default()).unwrap();

        let dispatched = engine.dispatch("interfaces", "add", &params(&[("name", "eth0")])).unwrap();
        assert_eq!(dispatched.delta.reload, Some(Reload::All));
        assert!(dispatched.delta.added.is_empty());
        assert_eq!(
            dispatched.delta.pagination_change,
            Some(PaginationChange { page: 0, page_count: 1 })
        );
    }

    #[test]
    fn test_add_on_current_page_anchors_after_previous_row() {
        // Sorted by name, so "b" lands between the two printed rows.
        let hooks = TableHooks::default().with_id_producer(|store: &RowStore, _filter: &str| {
            let mut rows: Vec<(String, RowId)> = store.iter().map(|row| (row.display_value("name"), row.id)).collect();
            rows.sort();
            rows.into_iter().map(|(_, id)| id).collect()
        });
        let (engine, _) = engine_with_sink();
        let handle = engine
            .register_table(interfaces(5).with_custom_filter(), hooks)
            .unwrap();
        seed_rows(&handle, &["a", "c"]);

        let dispatched = engine.dispatch("interfaces", "add", &params(&[("name", "b")])).unwrap();
        assert_eq!(dispatched.delta.added, vec![(Anchor::After(RowId(1)), RowId(3))]);
        assert!(dispatched.delta.removed.is_empty());
        assert_eq!(dispatched.delta.reload, None);
    }

    #[test]
    fn test_add_after_short_page_reloads_it() {
        // The new row follows the last printed one, outside the old range.
        let (engine, _) = engine_with_sink();
        let handle = engine.register_table(interfaces(5), TableHooks::default()).unwrap();
        seed_rows(&handle, &["eth0"]);

        let dispatched = engine.dispatch("interfaces", "add", &params(&[("name", "eth1")])).unwrap();
        assert_eq!(dispatched.delta.reload, Some(Reload::Page(0)));
        assert!(dispatched.delta.added.is_empty());
        assert!(dispatched.delta.removed.is_empty());
    }

    #[test]
    fn test_add_beyond_current_page_reloads_landing_page() {
        let (engine, _) = engine_with_sink();
        let handle = engine.register_table(interfaces(5), TableHooks::default()).unwrap();
        seed_rows(&handle, &["a", "b", "c", "d", "e", "f", "g"]);

        let dispatched = engine
            .dispatch("interfaces", "add", &params(&[("name", "h"), ("page", "0")]))
            .unwrap();
        assert_eq!(dispatched.delta.reload, Some(Reload::Page(1)));
        assert!(dispatched.delta.added.is_empty());
        assert_eq!(dispatched.delta.pagination_change, None);
    }

    #[test]
    fn test_add_to_full_page_pushes_last_row_out() {
        // Newest first, so a new row lands on top of page 0.
        let hooks = TableHooks::default().with_id_producer(|store: &RowStore, _filter: &str| {
            store.order().iter().rev().copied().collect()
        });
        let (engine, _) = engine_with_sink();
        let handle = engine
            .register_table(interfaces(2).with_custom_filter(), hooks)
            .unwrap();
        seed_rows(&handle, &["a", "b"]);

        let dispatched = engine.dispatch("interfaces", "add", &params(&[("name", "c")])).unwrap();
        assert_eq!(dispatched.delta.added, vec![(Anchor::Prepend, RowId(3))]);
        assert_eq!(dispatched.delta.removed, ids(&[1]));
        assert_eq!(
            dispatched.delta.pagination_change,
            Some(PaginationChange { page: 0, page_count: 2 })
        );
    }

    #[test]
    fn test_add_hidden_by_filter_only_reports_pagination() {
        let (engine, _) = engine_with_sink();
        let handle = engine.register_table(interfaces(5), TableHooks::default()).unwrap();
        seed_rows(&handle, &["eth0", "eth1"]);

        let dispatched = engine
            .dispatch("interfaces", "add", &params(&[("name", "wlan0"), ("filter", "eth")]))
            .unwrap();
        assert!(dispatched.delta.added.is_empty());
        assert_eq!(dispatched.delta.reload, None);
        assert_eq!(handle.read(|store| store.len()), 3);
    }

    #[test]
    fn test_add_rejects_markup() {
        let (engine, sink) = engine_with_sink();
        engine.register_table(interfaces(5), TableHooks::default()).unwrap();

        let err = engine
            .dispatch("interfaces", "add", &params(&[("name", "<script>")]))
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
        assert!(sink.is_empty());
    }

    // ===============================
    // DELETE DELTA TESTS
    // ===============================

    #[test]
    fn test_delete_from_first_page_appends_replacement() {
        let (engine, _) = engine_with_sink();
        let handle = engine.register_table(interfaces(2), TableHooks::default()).unwrap();
        seed_rows(&handle, &["a", "b", "c", "d", "e"]);

        let dispatched = engine
            .dispatch("interfaces", "delete", &params(&[("id", "2"), ("page", "0")]))
            .unwrap();
        assert_eq!(dispatched.delta.removed, ids(&[2]));
        assert_eq!(dispatched.delta.added, vec![(Anchor::Append, RowId(3))]);
        assert_eq!(dispatched.delta.reload, None);
        // Five rows on three pages became four rows on two.
        assert_eq!(
            dispatched.delta.pagination_change,
            Some(PaginationChange { page: 0, page_count: 2 })
        );
    }

    #[test]
    fn test_delete_from_middle_page_appends_row_at_last_slot() {
        let (engine, _) = engine_with_sink();
        let handle = engine.register_table(interfaces(3), TableHooks::default()).unwrap();
        seed_rows(&handle, &["a", "b", "c", "d", "e", "f", "g"]);

        let dispatched = engine
            .dispatch("interfaces", "delete", &params(&[("id", "5"), ("page", "1")]))
            .unwrap();
        // New index (pageSize - 1) + page * pageSize = 5.
        let visible = engine.visible_ids("interfaces", "").unwrap();
        assert_eq!(dispatched.delta.added, vec![(Anchor::Append, visible[5])]);
        assert_eq!(visible[5], RowId(7));
        assert_eq!(dispatched.delta.removed, ids(&[5]));
    }

    #[test]
    fn test_delete_only_row_on_last_page_reloads_previous_page() {
        let (engine, _) = engine_with_sink();
        let handle = engine.register_table(interfaces(2), TableHooks::default()).unwrap();
        seed_rows(&handle, &["a", "b", "c"]);

        let dispatched = engine
            .dispatch("interfaces", "delete", &params(&[("id", "3"), ("page", "1")]))
            .unwrap();
        assert_eq!(dispatched.delta.reload, Some(Reload::Page(0)));
        assert_eq!(
            dispatched.delta.pagination_change,
            Some(PaginationChange { page: 0, page_count: 1 })
        );
    }

    #[test]
    fn test_delete_single_row_reloads_everything() {
        let (engine, _) = engine_with_sink();
        let handle = engine.register_table(interfaces(2), TableHooks::default()).unwrap();
        seed_rows(&handle, &["only"]);

        let dispatched = engine.dispatch("interfaces", "delete", &params(&[("id", "1")])).unwrap();
        assert!(dispatched.delta.is_full_reload());
        assert_eq!(dispatched.delta.removed, ids(&[1]));
        assert_eq!(
            dispatched.delta.pagination_change,
            Some(PaginationChange { page: 0, page_count: 0 })
        );
    }

    #[test]
    fn test_delete_before_current_page_reloads_it() {
        let (engine, _) = engine_with_sink();
        let handle = engine.register_table(interfaces(2), TableHooks::default()).unwrap();
        seed_rows(&handle, &["a", "b", "c", "d", "e", "f"]);

        let dispatched = engine
            .dispatch("interfaces", "delete", &params(&[("id", "1"), ("page", "1")]))
            .unwrap();
        assert_eq!(dispatched.delta.reload, Some(Reload::Page(1)));
        assert_eq!(dispatched.delta.removed, ids(&[1]));
    }

    #[test]
    fn test_delete_in_use_needs_force() {
        let (engine, sink) = engine_with_sink();
        let hooks = TableHooks::default().with_dependents(Pinned(RowId(1)));
        let handle = engine.register_table(interfaces(5), hooks).unwrap();
        seed_rows(&handle, &["a", "b"]);

        let err = engine.dispatch("interfaces", "delete", &params(&[("id", "1")])).unwrap_err();
        assert!(matches!(err, SyncError::InUse(_)));
        assert_eq!(handle.read(|store| store.len()), 2);
        assert!(sink.is_empty());

        engine
            .dispatch("interfaces", "delete", &params(&[("id", "1"), ("force", "1")]))
            .unwrap();
        assert_eq!(handle.read(|store| store.order().to_vec()), ids(&[2]));
    }

    #[test]
    fn test_delete_unknown_row_is_not_found() {
        let (engine, _) = engine_with_sink();
        engine.register_table(interfaces(5), TableHooks::default()).unwrap();

        let response = engine.execute_action("interfaces", "delete", &params(&[("id", "42")]));
        assert!(!response.success);
        assert_eq!(response.error, Some(ErrorKind::NotFound));
    }

    // ===============================
    // EDIT, TOGGLE AND MOVE TESTS
    // ===============================

    #[test]
    fn test_boolean_edit_audits_one_and_zero() {
        let (engine, sink) = engine_with_sink();
        let handle = engine.register_table(interfaces(5), TableHooks::default()).unwrap();
        seed_rows(&handle, &["eth0"]);

        // Unchecked checkbox: the parameter is simply absent.
        let dispatched = engine
            .dispatch("interfaces", "edit", &params(&[("id", "1"), ("name", "eth0")]))
            .unwrap();
        assert_eq!(
            dispatched.delta.changed_in_place,
            vec![ChangedTarget { id: RowId(1), field: None }]
        );

        assert_eq!(
            sink.entries(),
            vec![AuditEntry {
                table: "interfaces".to_string(),
                kind: AuditKind::Set,
                id: "1/enabled".to_string(),
                new_value: "0".to_string(),
                old_value: Some("1".to_string()),
            }]
        );
    }

    #[test]
    fn test_password_edit_is_masked() {
        let (engine, sink) = engine_with_sink();
        let handle = engine.register_table(interfaces(5), TableHooks::default()).unwrap();
        let fields = parse_fields(handle.table(), [("name", "eth0"), ("password", "hunter2")]).unwrap();
        handle.seed(fields);

        let response = engine.execute_action(
            "interfaces",
            "edit",
            &params(&[("id", "1"), ("field", "password"), ("password", "s3cret")]),
        );
        assert!(response.success);
        assert_eq!(response.changed.len(), 1);
        assert_eq!(response.changed[0].field.as_deref(), Some("password"));
        assert!(!response.changed[0].fragment.contains("s3cret"));

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].new_value, DEFAULT_REDACTION_MASK);
        assert_eq!(entries[0].old_value.as_deref(), Some(DEFAULT_REDACTION_MASK));
        assert!(entries.iter().all(|e| !e.new_value.contains("s3cret")));
    }

    #[test]
    fn test_toggle_flips_boolean_only() {
        let (engine, sink) = engine_with_sink();
        let handle = engine.register_table(interfaces(5), TableHooks::default()).unwrap();
        seed_rows(&handle, &["eth0"]);

        let dispatched = engine
            .dispatch("interfaces", "toggle", &params(&[("id", "1"), ("field", "enabled")]))
            .unwrap();
        assert_eq!(
            dispatched.delta.changed_in_place,
            vec![ChangedTarget { id: RowId(1), field: Some("enabled".to_string()) }]
        );
        let enabled = handle.read(|store| store.get(RowId(1)).unwrap().display_value("enabled"));
        assert_eq!(enabled, "0");
        assert_eq!(sink.len(), 1);

        let err = engine
            .dispatch("interfaces", "toggle", &params(&[("id", "1"), ("field", "name")]))
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
    }

    #[test]
    fn test_move_places_row_before_anchor() {
        let (engine, sink) = engine_with_sink();
        let handle = engine.register_table(interfaces(5).movable(), TableHooks::default()).unwrap();
        seed_rows(&handle, &["a", "b", "c"]);

        let dispatched = engine
            .dispatch("interfaces", "move", &params(&[("id", "3"), ("before", "1")]))
            .unwrap();
        assert!(dispatched.delta.is_empty());

        let visible = engine.visible_ids("interfaces", "").unwrap();
        assert_eq!(visible, ids(&[3, 1, 2]));

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, AuditKind::Move);
        assert_eq!(entries[0].old_value.as_deref(), Some("2"));
        assert_eq!(entries[0].new_value, "0");
    }

    #[test]
    fn test_row_store_move_reports_positions() {
        let mut store = RowStore::new();
        let a = store.create(FieldMap::new());
        let b = store.create(FieldMap::new());
        let c = store.create(FieldMap::new());

        assert_eq!(store.move_row(a, None, Some(c)).unwrap(), (0, 2));
        assert_eq!(store.order(), &[b, c, a]);

        let err = store.move_row(a, Some(a), None).unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
        assert!(store.move_row(a, None, None).is_err());
    }

    #[test]
    fn test_move_on_fixed_order_table_is_unsupported() {
        let (engine, _) = engine_with_sink();
        let handle = engine.register_table(interfaces(5), TableHooks::default()).unwrap();
        seed_rows(&handle, &["a", "b"]);

        let err = engine
            .dispatch("interfaces", "move", &params(&[("id", "2"), ("before", "1")]))
            .unwrap_err();
        assert!(matches!(err, SyncError::UnsupportedAction(_)));
    }

    // ===============================
    // CHILD ROW TESTS
    // ===============================

    #[test]
    fn test_child_rows_use_composite_audit_ids() {
        let (engine, sink) = engine_with_sink();
        let handle = engine.register_table(interfaces(5), TableHooks::default()).unwrap();
        seed_rows(&handle, &["bridge0"]);

        let dispatched = engine
            .dispatch(
                "interfaces",
                "add",
                &params(&[("parent", "1"), ("collection", "ports"), ("name", "eth0")]),
            )
            .unwrap();
        assert_eq!(
            dispatched.delta.changed_in_place,
            vec![ChangedTarget { id: RowId(1), field: None }]
        );
        assert_eq!(handle.read(|store| store.len()), 1);
        assert_eq!(handle.read(|store| store.total_rows()), 2);

        let audit_ids: Vec<String> = sink.entries().into_iter().map(|e| e.id).collect();
        assert!(audit_ids.contains(&"1/2/name".to_string()));

        // Deleting the parent takes the child with it.
        engine.dispatch("interfaces", "delete", &params(&[("id", "1")])).unwrap();
        assert_eq!(handle.read(|store| store.total_rows()), 0);
        let deletions: Vec<String> = sink
            .entries()
            .into_iter()
            .filter(|e| e.kind == AuditKind::Del)
            .map(|e| e.id)
            .collect();
        assert!(deletions.contains(&"1/name".to_string()));
        assert!(deletions.contains(&"1/2/name".to_string()));
    }

    #[test]
    fn test_child_add_needs_collection() {
        let (engine, _) = engine_with_sink();
        let handle = engine.register_table(interfaces(5), TableHooks::default()).unwrap();
        seed_rows(&handle, &["bridge0"]);

        let err = engine
            .dispatch("interfaces", "add", &params(&[("parent", "1"), ("name", "eth0")]))
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
    }

    // ===============================
    // FILTER TESTS
    // ===============================

    #[test]
    fn test_standard_filter_skips_secret_fields() {
        let (engine, _) = engine_with_sink();
        let handle = engine.register_table(interfaces(5), TableHooks::default()).unwrap();
        seed_rows(&handle, &["eth0"]);
        let fields = parse_fields(handle.table(), [("name", "wlan0"), ("password", "eth-secret")]).unwrap();
        handle.seed(fields);
        seed_rows(&handle, &["ETH1"]);

        assert_eq!(engine.visible_ids("interfaces", "eth").unwrap(), ids(&[1, 3]));
        assert_eq!(engine.visible_ids("interfaces", "name:wlan").unwrap(), ids(&[2]));
        assert!(engine.visible_ids("interfaces", "secret").unwrap().is_empty());
    }

    #[test]
    fn test_custom_filter_uses_adapter_and_producer() {
        let hooks = TableHooks::default()
            .with_filter_adapter(|filter: &str| filter.trim().to_lowercase())
            .with_id_producer(|store: &RowStore, filter: &str| {
                let mut ids: Vec<RowId> = store
                    .iter()
                    .filter(|row| row.display_value("name").starts_with(filter))
                    .map(|row| row.id)
                    .collect();
                ids.reverse();
                ids
            });
        let (engine, _) = engine_with_sink();
        let handle = engine
            .register_table(interfaces(5).with_custom_filter(), hooks)
            .unwrap();
        seed_rows(&handle, &["eth0", "wlan0", "eth1"]);

        assert_eq!(engine.visible_ids("interfaces", "  ETH ").unwrap(), ids(&[3, 1]));
    }

    #[test]
    fn test_custom_filter_requires_producer() {
        let err = Table::new(interfaces(5).with_custom_filter(), TableHooks::default()).unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
    }

    // ===============================
    // AUDIT TESTS
    // ===============================

    #[test]
    fn test_audit_switch_disables_recording() {
        let (engine, sink) = engine_with_sink();
        engine.register_table(interfaces(5), TableHooks::default()).unwrap();

        engine.audit_switch().set(false);
        engine.dispatch("interfaces", "add", &params(&[("name", "eth0")])).unwrap();
        assert!(sink.is_empty());

        engine.audit_switch().set(true);
        engine.dispatch("interfaces", "add", &params(&[("name", "eth1")])).unwrap();
        let entries = sink.entries();
        assert!(!entries.is_empty());
        assert!(entries.iter().all(|e| e.kind == AuditKind::Add && e.id.starts_with("2/")));
    }

    #[test]
    fn test_recorder_redacts_single_records() {
        let sink = Arc::new(MemoryAuditSink::new());
        let recorder = AuditRecorder::new(sink.clone(), AuditSwitch::new(true), "xxx");
        let secret = FieldSchema::new("psk", FieldKind::Text).redacted();

        recorder
            .record("wifi", &PendingAudit::new(AuditKind::Set, "4/psk", json!("abc")).field(&secret).old(json!("")))
            .unwrap();
        // Named `password` without a schema still gets masked.
        recorder
            .record(
                "wifi",
                &PendingAudit::new(AuditKind::Add, "4/password", json!("hunter2")).field_name("password"),
            )
            .unwrap();
        // Row-level entries carry no field, whatever their id looks like.
        recorder
            .record("wifi", &PendingAudit::new(AuditKind::Action, "password", json!("rotate")))
            .unwrap();

        let entries = sink.entries();
        assert_eq!(entries[0].new_value, "xxx");
        assert_eq!(entries[0].old_value.as_deref(), Some(""));
        assert_eq!(entries[1].new_value, "xxx");
        assert_eq!(entries[2].new_value, "rotate");
    }

    #[test]
    fn test_action_on_table_named_password_is_not_masked() {
        let hooks = TableHooks::default().with_action("rotate", CustomAction::new(|_ctx| Ok(())));
        let (engine, sink) = engine_with_sink();
        let definition = TableDefinition::new("password", vec![FieldSchema::new("name", FieldKind::Text)]);
        engine.register_table(definition, hooks).unwrap();

        let response = engine.execute_action("password", "rotate", &Params::new());
        assert!(response.success);

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "password");
        assert_eq!(entries[0].new_value, "rotate");
    }

    #[test]
    fn test_fresh_lmdb_audit_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LmdbAuditSink::open(dir.path(), DEFAULT_AUDIT_MAP_SIZE).unwrap();

        assert_eq!(sink.entries().unwrap(), Vec::new());
        assert_eq!(sink.len().unwrap(), 0);
        assert!(sink.is_empty().unwrap());
    }

    #[test]
    fn test_failed_audit_leaves_rows_untouched() {
        let engine = engine_with_failing_sink();
        let handle = engine.register_table(interfaces(5).movable(), TableHooks::default()).unwrap();
        seed_rows(&handle, &["a", "b", "c"]);
        let before = dump(&handle);
        let order = handle.read(|store| store.order().to_vec());

        let attempts: [(&str, &[(&str, &str)]); 5] = [
            ("add", &[("name", "d")]),
            ("delete", &[("id", "2")]),
            ("edit", &[("id", "1"), ("name", "z")]),
            ("toggle", &[("id", "1"), ("field", "enabled")]),
            ("move", &[("id", "3"), ("before", "1")]),
        ];
        for (action, pairs) in attempts {
            let response = engine.execute_action("interfaces", action, &params(pairs));
            assert!(!response.success, "{action} succeeded without an audit trail");
            assert_eq!(response.error, Some(ErrorKind::Internal));
            assert_eq!(dump(&handle), before, "{action} changed rows");
            assert_eq!(handle.read(|store| store.order().to_vec()), order, "{action} changed order");
            assert_eq!(handle.read(|store| store.total_rows()), 3);
        }
    }

    #[test]
    fn test_lmdb_audit_sink_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let entry = |id: &str| AuditEntry {
            table: "interfaces".to_string(),
            kind: AuditKind::Add,
            id: id.to_string(),
            new_value: "eth0".to_string(),
            old_value: None,
        };

        {
            let sink = LmdbAuditSink::open(dir.path(), DEFAULT_AUDIT_MAP_SIZE).unwrap();
            assert!(sink.is_empty().unwrap());
            sink.append_batch(&[entry("1/name"), entry("2/name")]).unwrap();
        }

        let sink = LmdbAuditSink::open(dir.path(), DEFAULT_AUDIT_MAP_SIZE).unwrap();
        sink.append(&entry("3/name")).unwrap();
        let stored = sink.entries().unwrap();
        let seqs: Vec<u64> = stored.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(stored[2].1, entry("3/name"));
    }

    #[test]
    fn test_engine_with_lmdb_audit_log() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            audit_db_path: Some(dir.path().join("audit")),
            ..EngineConfig::default()
        };
        let engine = SyncEngine::new(config).unwrap();
        engine.register_table(interfaces(5), TableHooks::default()).unwrap();

        let response = engine.execute_action("interfaces", "add", &params(&[("name", "eth0")]));
        assert!(response.success);
        drop(engine);

        let sink = LmdbAuditSink::open(&dir.path().join("audit"), DEFAULT_AUDIT_MAP_SIZE).unwrap();
        assert!(!sink.is_empty().unwrap());
    }

    // ===============================
    // DISPATCHER TESTS
    // ===============================

    #[test]
    fn test_unknown_and_disabled_actions_are_unsupported() {
        let (engine, _) = engine_with_sink();
        let mut definition = interfaces(5);
        definition.actions.remove(&crate::table_schema::BuiltinAction::Delete);
        let handle = engine.register_table(definition, TableHooks::default()).unwrap();
        seed_rows(&handle, &["eth0"]);

        let response = engine.execute_action("interfaces", "frobnicate", &Params::new());
        assert_eq!(response.error, Some(ErrorKind::UnsupportedAction));

        let response = engine.execute_action("interfaces", "delete", &params(&[("id", "1")]));
        assert_eq!(response.error, Some(ErrorKind::UnsupportedAction));
        assert_eq!(handle.read(|store| store.len()), 1);
    }

    #[test]
    fn test_custom_action_shadowing_builtin_is_rejected() {
        let hooks = TableHooks::default().with_action("delete", CustomAction::new(|_ctx| Ok(())));
        let err = Table::new(interfaces(5), hooks).unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
    }

    #[test]
    fn test_reserved_field_names_are_rejected() {
        let definition = TableDefinition::new("bad", vec![FieldSchema::new("page", FieldKind::Integer)]);
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_custom_action_changes_target_row() {
        let hooks = TableHooks::default().with_action(
            "disable",
            CustomAction::new(|ctx| {
                let id = ctx.target.ok_or_else(|| SyncError::invalid("no target row"))?;
                let mut changes = FieldMap::new();
                changes.insert("enabled".to_string(), json!(false));
                ctx.store.update(id, changes)?;
                ctx.message = Some("Interface disabled".to_string());
                Ok(())
            }),
        );
        let (engine, sink) = engine_with_sink();
        let handle = engine.register_table(interfaces(5), hooks).unwrap();
        seed_rows(&handle, &["eth0"]);

        let response = engine.execute_action("interfaces", "disable", &params(&[("id", "1")]));
        assert!(response.success);
        assert_eq!(response.message.as_deref(), Some("Interface disabled"));
        assert_eq!(response.changed.len(), 1);
        assert_eq!(response.changed[0].id, RowId(1));

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, AuditKind::Action);
        assert_eq!(entries[0].id, "1");
        assert_eq!(entries[0].new_value, "disable");
    }

    #[test]
    fn test_custom_action_waits_for_confirmation() {
        let hooks = TableHooks::default().with_action(
            "purge",
            CustomAction::new(|ctx| {
                let ids: Vec<RowId> = ctx.store.order().to_vec();
                for id in ids {
                    ctx.store.delete(id, true, &NoDependents)?;
                }
                Ok(())
            })
            .confirm("Delete every interface?"),
        );
        let (engine, _) = engine_with_sink();
        let handle = engine.register_table(interfaces(2), hooks).unwrap();
        seed_rows(&handle, &["a", "b", "c"]);

        let response = engine.execute_action("interfaces", "purge", &Params::new());
        assert!(!response.success);
        assert_eq!(response.confirm.as_deref(), Some("Delete every interface?"));
        assert_eq!(handle.read(|store| store.len()), 3);

        let response = engine.execute_action("interfaces", "purge", &params(&[("confirmed", "1")]));
        assert!(response.success);
        assert_eq!(handle.read(|store| store.len()), 0);
        assert_eq!(
            response.pagination_changes,
            Some(PaginationChange { page: 0, page_count: 0 })
        );
        assert!(response.reload.is_some());
    }

    #[test]
    fn test_failed_custom_action_leaves_no_trace() {
        let hooks = TableHooks::default().with_action(
            "explode",
            CustomAction::new(|ctx| {
                ctx.store.create(FieldMap::new());
                Err(SyncError::Internal("boom".to_string()))
            }),
        );
        let (engine, sink) = engine_with_sink();
        let handle = engine.register_table(interfaces(5), hooks).unwrap();
        seed_rows(&handle, &["eth0"]);

        let response = engine.execute_action("interfaces", "explode", &Params::new());
        assert!(!response.success);
        assert_eq!(response.error, Some(ErrorKind::Internal));
        assert_eq!(handle.read(|store| store.total_rows()), 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_message_is_delivered_once() {
        let (engine, _) = engine_with_sink();
        let handle = engine.register_table(interfaces(5), TableHooks::default()).unwrap();
        handle.set_message("Configuration saved");

        let first = engine.execute_action("interfaces", "page", &Params::new());
        assert_eq!(first.message.as_deref(), Some("Configuration saved"));
        assert!(first.reload.is_some());

        let second = engine.execute_action("interfaces", "page", &Params::new());
        assert_eq!(second.message, None);
        assert_eq!(handle.pending_message(), None);
    }

    #[test]
    fn test_message_survives_confirmation_prompt() {
        let hooks = TableHooks::default().with_action(
            "purge",
            CustomAction::new(|_ctx| Ok(())).confirm("Delete every interface?"),
        );
        let (engine, _) = engine_with_sink();
        let handle = engine.register_table(interfaces(5), hooks).unwrap();
        handle.set_message("Configuration saved");

        let prompt = engine.execute_action("interfaces", "purge", &Params::new());
        assert_eq!(prompt.confirm.as_deref(), Some("Delete every interface?"));
        assert_eq!(handle.pending_message().as_deref(), Some("Configuration saved"));

        let next = engine.execute_action("interfaces", "page", &Params::new());
        assert_eq!(next.message.as_deref(), Some("Configuration saved"));
        assert_eq!(handle.pending_message(), None);
    }

    #[test]
    fn test_message_is_cleared_by_failed_action() {
        let (engine, _) = engine_with_sink();
        let handle = engine.register_table(interfaces(5), TableHooks::default()).unwrap();
        handle.set_message("Configuration saved");

        let failed = engine.execute_action("interfaces", "delete", &params(&[("id", "42")]));
        assert_eq!(failed.error, Some(ErrorKind::NotFound));
        assert_eq!(handle.pending_message(), None);

        let next = engine.execute_action("interfaces", "page", &Params::new());
        assert_eq!(next.message, None);
    }

    #[test]
    fn test_page_size_sticks_for_the_session() {
        let (engine, _) = engine_with_sink();
        let handle = engine.register_table(interfaces(5), TableHooks::default()).unwrap();
        assert_eq!(handle.page_size(), 5);

        engine.execute_action("interfaces", "page", &params(&[("pageSize", "10")]));
        assert_eq!(handle.page_size(), 10);

        let response = engine.execute_action("interfaces", "page", &params(&[("pageSize", "0")]));
        assert_eq!(response.error, Some(ErrorKind::InvalidInput));
        assert_eq!(handle.page_size(), 10);
    }

    #[test]
    fn test_view_request_parsing() {
        let view = ViewRequest::from_params(&params(&[("page", "2"), ("filter", "eth")]), 20).unwrap();
        assert_eq!(view, ViewRequest::new("eth", 2, 20));

        assert!(ViewRequest::from_params(&params(&[("page", "-1")]), 20).is_err());
        assert!(ViewRequest::from_params(&params(&[("pageSize", "abc")]), 20).is_err());
    }

    #[test]
    fn test_duplicate_table_registration_fails() {
        let (engine, _) = engine_with_sink();
        engine.register_table(interfaces(5), TableHooks::default()).unwrap();
        assert!(engine.register_table(interfaces(5), TableHooks::default()).is_err());
        assert_eq!(engine.table_names(), vec!["interfaces".to_string()]);
    }

    // ===============================
    // CONFIG AND DERIVED VIEW TESTS
    // ===============================

    #[test]
    fn test_config_defaults_and_validation() {
        let config = EngineConfig::from_json_str(r#"{"default_page_size": 50}"#).unwrap();
        assert_eq!(config.default_page_size, 50);
        assert!(config.audit_enabled);
        assert_eq!(config.redaction_mask, DEFAULT_REDACTION_MASK);

        let err = EngineConfig::from_json_str(r#"{"default_page_size": 0}"#).unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
        assert!(EngineConfig::from_json_str("not json").is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{"empty_views_policy": "ignore"}"#).unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.empty_views_policy, EmptyViewsPolicy::Ignore);
    }

    #[test]
    fn test_derived_views_skip_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("traffic.json");
        fs::write(&present, r#"{"rx": 10, "tx": 20}"#).unwrap();

        let traffic = JsonFileSource::new("traffic", &present);
        let errors = JsonFileSource::new("errors", dir.path().join("errors.json"));
        let sources: Vec<&dyn DerivedSource> = vec![&traffic as &dyn DerivedSource, &errors];

        let views = collect_derived_views(sources, EmptyViewsPolicy::FlagSaveNeeded).unwrap();
        assert_eq!(views.views.len(), 1);
        assert_eq!(views.views[0].data, json!({"rx": 10, "tx": 20}));
        assert_eq!(views.skipped, vec!["errors".to_string()]);
        assert!(!views.needs_save);
    }

    #[test]
    fn test_derived_views_abort_on_corrupt_data() {
        let dir = tempfile::tempdir().unwrap();
        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, "{ not json").unwrap();

        let source = JsonFileSource::new("corrupt", &corrupt);
        let err = collect_derived_views([&source as &dyn DerivedSource], EmptyViewsPolicy::Ignore).unwrap_err();
        assert!(matches!(err, SyncError::Serialization(_)));
    }

    #[test]
    fn test_derived_views_empty_policy() {
        let dir = tempfile::tempdir().unwrap();
        let missing = JsonFileSource::new("missing", dir.path().join("missing.json"));

        let (engine, _) = engine_with_sink();
        let views = engine.collect_derived_views([&missing as &dyn DerivedSource]).unwrap();
        assert!(views.needs_save);

        let views = collect_derived_views([&missing as &dyn DerivedSource], EmptyViewsPolicy::Ignore).unwrap();
        assert!(!views.needs_save);
        assert!(views.views.is_empty());
    }

    // ===============================
    // FFI FUNCTION TESTS
    // ===============================

    fn take_response(ptr: *const c_char) -> serde_json::Value {
        assert!(!ptr.is_null(), "Response pointer should not be null");
        let json = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        free_response(ptr as *mut c_char);
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_ffi_round_trip() {
        let engine = create_sync_engine(std::ptr::null());
        assert!(!engine.is_null(), "Engine pointer should not be null");

        let definition = CString::new(
            r#"{"name":"users","fields":[{"name":"login","kind":"text"},{"name":"active","kind":"boolean"}],"page_size":10}"#,
        )
        .unwrap();
        let response = take_response(register_table(engine, definition.as_ptr()));
        assert_eq!(response["success"], json!(true));

        let table = CString::new("users").unwrap();
        let add = CString::new("add").unwrap();
        let add_params = CString::new(r#"{"login":"alice","active":true}"#).unwrap();
        let response = take_response(execute_action(engine, table.as_ptr(), add.as_ptr(), add_params.as_ptr()));
        assert_eq!(response["success"], json!(true));
        assert!(response["reload"].as_str().unwrap().contains("alice"));
        assert_eq!(response["pagination_changes"]["page_count"], json!(1));

        let delete = CString::new("delete").unwrap();
        let delete_params = CString::new(r#"{"id":1}"#).unwrap();
        let response = take_response(execute_action(
            engine,
            table.as_ptr(),
            delete.as_ptr(),
            delete_params.as_ptr(),
        ));
        assert_eq!(response["success"], json!(true));
        assert_eq!(response["removed"], json!([1]));
        assert_eq!(response["pagination_changes"]["page_count"], json!(0));

        let response = take_response(close_sync_engine(engine));
        assert_eq!(response["success"], json!(true));
    }

    #[test]
    fn test_ffi_create_sync_engine_invalid_config() {
        let config = CString::new(r#"{"default_page_size":0}"#).unwrap();
        assert!(create_sync_engine(config.as_ptr()).is_null());

        let config = CString::new("not json").unwrap();
        assert!(create_sync_engine(config.as_ptr()).is_null());
    }

    #[test]
    fn test_ffi_null_pointers() {
        let response = take_response(register_table(std::ptr::null_mut(), std::ptr::null()));
        assert_eq!(response["error"], json!("bad_request"));

        let response = take_response(close_sync_engine(std::ptr::null_mut()));
        assert_eq!(response["success"], json!(false));

        let engine = create_sync_engine(std::ptr::null());
        let response = take_response(execute_action(
            engine,
            std::ptr::null(),
            std::ptr::null(),
            std::ptr::null(),
        ));
        assert_eq!(response["error"], json!("bad_request"));

        free_response(std::ptr::null_mut());
        take_response(close_sync_engine(engine));
    }

    #[test]
    fn test_ffi_unknown_table_and_bad_params() {
        let engine = create_sync_engine(std::ptr::null());
        let table = CString::new("missing").unwrap();
        let action = CString::new("page").unwrap();

        let response = take_response(execute_action(engine, table.as_ptr(), action.as_ptr(), std::ptr::null()));
        assert_eq!(response["success"], json!(false));
        assert_eq!(response["error"], json!("not_found"));

        let bad = CString::new("[1, 2]").unwrap();
        let response = take_response(execute_action(engine, table.as_ptr(), action.as_ptr(), bad.as_ptr()));
        assert_eq!(response["error"], json!("bad_request"));

        take_response(close_sync_engine(engine));
    }

    // ===============================
    // CONCURRENCY TESTS
    // ===============================

    #[test]
    fn test_concurrent_writers_and_readers() {
        let sink = Arc::new(MemoryAuditSink::new());
        let renderer = Arc::new(JsonRowRenderer::new(DEFAULT_REDACTION_MASK));
        let engine = Arc::new(SyncEngine::with_collaborators(EngineConfig::default(), sink.clone(), renderer).unwrap());
        let definition = TableDefinition::new(
            "ports",
            vec![
                FieldSchema::new("name", FieldKind::Text),
                FieldSchema::new("enabled", FieldKind::Boolean),
            ],
        );
        engine.register_table(definition, TableHooks::default()).unwrap();

        let mut workers = Vec::new();
        for writer in 0..4 {
            let engine = Arc::clone(&engine);
            workers.push(thread::spawn(move || {
                for n in 0..25 {
                    let name = format!("port-{writer}-{n}");
                    let response = engine.execute_action("ports", "add", &params(&[("name", name.as_str())]));
                    assert!(response.success, "add failed: {response}");
                }
            }));
        }
        for _ in 0..2 {
            let engine = Arc::clone(&engine);
            workers.push(thread::spawn(move || {
                for _ in 0..25 {
                    let response = engine.execute_action("ports", "page", &Params::new());
                    assert!(response.success);
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        let mut visible = engine.visible_ids("ports", "").unwrap();
        assert_eq!(visible.len(), 100);
        visible.sort();
        visible.dedup();
        assert_eq!(visible.len(), 100);
        // name and enabled for every row.
        assert_eq!(sink.len(), 200);
    }

    #[test]
    fn test_concurrent_tables_are_independent() {
        let engine = Arc::new(SyncEngine::new(EngineConfig::default()).unwrap());
        for name in ["left", "right"] {
            let definition = TableDefinition::new(name, vec![FieldSchema::new("name", FieldKind::Text)]);
            engine.register_table(definition, TableHooks::default()).unwrap();
        }

        let handles: Vec<_> = ["left", "right"]
            .into_iter()
            .map(|table| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for n in 0..20 {
                        let name = format!("{table}{n}");
                        engine.execute_action(table, "add", &params(&[("name", name.as_str())]));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for table in ["left", "right"] {
            let handle = engine.table(table).unwrap();
            assert_eq!(handle.read(|store| store.len()), 20);
            assert_eq!(handle.read(|store| store.order().first().copied()), Some(RowId(1)));
        }
    }
}
