//! Action resolution and response packaging.
//!
//! Built-in actions are a closed enum checked against the table's enabled
//! set; anything else must be a custom action registered with the table.
//! Unknown names fail with `UnsupportedAction`.

use log::debug;

use crate::app_response::{AddedFragment, ChangedFragment, ResponsePayload};
use crate::audit::AuditRecorder;
use crate::delta::{Delta, Reload};
use crate::error::{Result, SyncError};
use crate::mutation::{AddTarget, MutationEngine};
use crate::pagination::{page_count, printed_range, PageRequest};
use crate::renderer::{RenderContext, RowRenderer};
use crate::request::{
    flag, optional_id, optional_str, required_id, Params, ViewRequest, PARAM_AFTER, PARAM_BEFORE,
    PARAM_COLLECTION, PARAM_CONFIRMED, PARAM_FIELD, PARAM_FORCE, PARAM_ID, PARAM_PARENT,
};
use crate::row_model::{Row, RowId};
use crate::row_store::RowStore;
use crate::table_schema::{BuiltinAction, ConfirmationPolicy, CustomAction, Table};
use crate::view_index::visible_ids;

/// Handler an action name resolved to.
#[derive(Clone)]
pub enum ResolvedAction<'t> {
    Builtin(BuiltinAction),
    Custom(&'t str, &'t CustomAction),
}

impl ResolvedAction<'_> {
    pub fn is_read_only(&self) -> bool {
        matches!(self, ResolvedAction::Builtin(action) if !action.is_mutation())
    }
}

pub fn resolve<'t>(table: &'t Table, name: &str) -> Result<ResolvedAction<'t>> {
    if let Some(action) = BuiltinAction::from_name(name) {
        if table.definition.supports(action) {
            return Ok(ResolvedAction::Builtin(action));
        }
    }
    if let Some((name, action)) = table.hooks.custom_actions.get_key_value(name) {
        return Ok(ResolvedAction::Custom(name.as_str(), action));
    }
    Err(SyncError::UnsupportedAction(format!(
        "'{name}' on table '{}'",
        table.name()
    )))
}

/// Outcome of a dispatched action, before rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dispatched {
    pub delta: Delta,
    pub message: Option<String>,
    pub confirm: Option<String>,
}

impl From<Delta> for Dispatched {
    fn from(delta: Delta) -> Self {
        Self {
            delta,
            ..Self::default()
        }
    }
}

pub struct Dispatcher<'a> {
    table: &'a Table,
    recorder: &'a AuditRecorder,
}

impl<'a> Dispatcher<'a> {
    pub fn new(table: &'a Table, recorder: &'a AuditRecorder) -> Self {
        Self { table, recorder }
    }

    /// Read-only actions; the store is not borrowed mutably.
    pub fn dispatch_read(&self, action: BuiltinAction, view: &ViewRequest) -> Result<Dispatched> {
        match action {
            BuiltinAction::Page => Ok(Delta::reload(Reload::Page(view.page.page)).into()),
            other => Err(SyncError::Internal(format!("'{other}' is not read-only"))),
        }
    }

    pub fn dispatch(
        &self,
        store: &mut RowStore,
        action: &ResolvedAction<'_>,
        params: &Params,
        view: &ViewRequest,
    ) -> Result<Dispatched> {
        let mut engine = MutationEngine::new(self.table, store, self.recorder, view);

        let dispatched = match action {
            ResolvedAction::Builtin(BuiltinAction::Page) => self.dispatch_read(BuiltinAction::Page, view)?,
            ResolvedAction::Builtin(BuiltinAction::Add) => {
                let target = match optional_id(params, PARAM_PARENT)? {
                    Some(parent) => AddTarget::Child {
                        parent,
                        collection: optional_str(params, PARAM_COLLECTION)
                            .ok_or_else(|| SyncError::invalid(format!("missing parameter '{PARAM_COLLECTION}'")))?
                            .to_string(),
                    },
                    None => AddTarget::TopLevel,
                };
                engine.add(target, params)?.into()
            }
            ResolvedAction::Builtin(BuiltinAction::Edit) => {
                let id = required_id(params, PARAM_ID)?;
                engine.edit(id, params, optional_str(params, PARAM_FIELD))?.into()
            }
            ResolvedAction::Builtin(BuiltinAction::Delete) => {
                let id = required_id(params, PARAM_ID)?;
                engine.delete(id, flag(params, PARAM_FORCE))?.into()
            }
            ResolvedAction::Builtin(BuiltinAction::Move) => {
                let id = required_id(params, PARAM_ID)?;
                let before = optional_id(params, PARAM_BEFORE)?;
                let after = optional_id(params, PARAM_AFTER)?;
                engine.move_row(id, before, after)?.into()
            }
            ResolvedAction::Builtin(BuiltinAction::Toggle) => {
                let id = required_id(params, PARAM_ID)?;
                let field = optional_str(params, PARAM_FIELD)
                    .ok_or_else(|| SyncError::invalid(format!("missing parameter '{PARAM_FIELD}'")))?;
                engine.toggle(id, field)?.into()
            }
            ResolvedAction::Custom(name, custom) => {
                if let ConfirmationPolicy::Required(prompt) = &custom.confirmation {
                    if !flag(params, PARAM_CONFIRMED) {
                        debug!("Custom action '{name}' awaits confirmation");
                        return Ok(Dispatched {
                            confirm: Some(prompt.clone()),
                            ..Dispatched::default()
                        });
                    }
                }
                let target = optional_id(params, PARAM_ID)?;
                let outcome = engine.custom_action(name, custom, target, params)?;
                Dispatched {
                    delta: outcome.delta,
                    message: outcome.message,
                    confirm: None,
                }
            }
        };
        Ok(dispatched)
    }
}

fn row<'s>(store: &'s RowStore, id: RowId) -> Result<&'s Row> {
    store
        .get(id)
        .map_err(|_| SyncError::Internal(format!("delta references missing row {id}")))
}

/// Renders the rows a delta names and fills the response payload.
///
/// `pending_message` is the transient user message of the table, already
/// taken off the table by the caller. Confirmation prompts never carry it.
pub fn package(
    table: &Table,
    store: &RowStore,
    renderer: &dyn RowRenderer,
    view: &ViewRequest,
    dispatched: Dispatched,
    pending_message: Option<String>,
) -> Result<ResponsePayload> {
    let Dispatched { delta, message, confirm } = dispatched;
    if let Some(prompt) = confirm {
        return Ok(ResponsePayload::needs_confirmation(prompt));
    }

    let mut payload = ResponsePayload::success();
    payload.message = message.or(pending_message);
    payload.pagination_changes = delta.pagination_change;
    payload.redirect = delta.redirect;
    payload.removed = delta.removed;

    if let Some(reload) = delta.reload {
        let page = match reload {
            Reload::Page(page) => page,
            Reload::All => delta.pagination_change.map_or(0, |c| c.page),
        };
        let request = PageRequest::new(page, view.page.page_size);
        let ctx = RenderContext {
            page: request,
            filter: view.filter.clone(),
        };
        let visible = visible_ids(table, store, &view.filter);
        let rows = match printed_range(visible.len(), request) {
            Some((begin, end)) => visible[begin..=end]
                .iter()
                .map(|id| row(store, *id))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        let count = page_count(visible.len(), request.page_size);
        payload.reload = Some(renderer.render_page(table, &rows, count, &ctx));
    }

    let ctx = RenderContext {
        page: view.page,
        filter: view.filter.clone(),
    };

    for (anchor, id) in delta.added {
        payload.added.push(AddedFragment {
            anchor,
            id,
            fragment: renderer.render_row(table, row(store, id)?, &ctx),
        });
    }

    for target in delta.changed_in_place {
        let current = row(store, target.id)?;
        let fragment = match &target.field {
            Some(field) => renderer.render_field(table, current, field, &ctx),
            None => renderer.render_row(table, current, &ctx),
        };
        payload.changed.push(ChangedFragment {
            id: target.id,
            field: target.field,
            fragment,
        });
    }

    Ok(payload)
}
