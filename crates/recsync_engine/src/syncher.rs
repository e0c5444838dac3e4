//! Up and down sync for one entity type.

use crate::callback::SyncCallback;
use crate::chain::ChainResolver;
use crate::config::SyncConfig;
use crate::cursor::Watermark;
use crate::error::{SyncError, SyncResult};
use crate::options::SyncOptions;
use crate::state::{RunState, SyncHandleId, SyncOutcome, SyncState, SyncStatus};
use crate::store::{LocalStore, Predicate};
use crate::transport::{build_query, StatusReceiver, SyncDownTarget, SyncTransport, SyncUpTarget};
use parking_lot::Mutex;
use recsync_model::{field, EntityDescriptor};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
struct Session {
    scope: String,
    handle: Option<SyncHandleId>,
    run_state: RunState,
    last_query: Option<String>,
}

/// Drives sync up and down for one entity type.
///
/// A syncher holds the entity's incremental down-sync handle: the first
/// down-sync builds a query and creates the handle, every later one re-syncs
/// by handle. Up and down entry points never overlap on one instance.
///
/// Failures never escape: they are logged and reported as
/// [`SyncOutcome::Aborted`].
pub struct EntitySyncher<S, T> {
    descriptor: Arc<EntityDescriptor>,
    store: Arc<S>,
    transport: Arc<T>,
    callback: Arc<dyn SyncCallback>,
    config: SyncConfig,
    resolver: Option<ChainResolver<S>>,
    gate: tokio::sync::Mutex<()>,
    session: Mutex<Session>,
}

impl<S: LocalStore, T: SyncTransport> EntitySyncher<S, T> {
    /// Creates a syncher whose down-sync scope starts at the current time.
    pub fn new(
        descriptor: Arc<EntityDescriptor>,
        store: Arc<S>,
        transport: Arc<T>,
        callback: Arc<dyn SyncCallback>,
        config: SyncConfig,
    ) -> Self {
        let scope = scope_for(&descriptor, &Watermark::now());
        Self {
            descriptor,
            store,
            transport,
            callback,
            config,
            resolver: None,
            gate: tokio::sync::Mutex::new(()),
            session: Mutex::new(Session {
                scope,
                handle: None,
                run_state: RunState::Idle,
                last_query: None,
            }),
        }
    }

    /// Makes this a chained syncher: references are resolved before every
    /// up-sync.
    pub fn with_resolver(mut self, resolver: ChainResolver<S>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// The entity descriptor.
    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    /// Local table name.
    pub fn table(&self) -> &str {
        self.descriptor.object_name()
    }

    /// Returns true if the entity's local table exists.
    pub fn has_table(&self) -> bool {
        self.store.has_table(self.table())
    }

    /// Returns true if references are resolved before up-sync.
    pub fn is_chained(&self) -> bool {
        self.resolver.is_some()
    }

    /// The incremental down-sync handle, once created.
    pub fn handle(&self) -> Option<SyncHandleId> {
        self.session.lock().handle
    }

    /// State of the current or last invocation.
    pub fn state(&self) -> RunState {
        self.session.lock().run_state
    }

    /// The down-sync query that created the handle.
    pub fn last_query(&self) -> Option<String> {
        self.session.lock().last_query.clone()
    }

    /// Current down-sync scope, without the `WHERE` keyword.
    pub fn scope(&self) -> String {
        self.session.lock().scope.clone()
    }

    /// Scopes future handle-creating down-syncs to records modified after
    /// `watermark`, plus the entity's own predicate.
    pub fn set_watermark(&self, watermark: &Watermark) {
        self.session.lock().scope = scope_for(&self.descriptor, watermark);
    }

    /// Pushes dirty records.
    pub async fn sync_up(&self) -> SyncOutcome {
        self.up_sync(None, false).await
    }

    /// Pushes dirty records, then pulls.
    pub async fn sync_up_and_down(&self) -> SyncOutcome {
        self.up_sync(None, true).await
    }

    /// Pushes local changes.
    ///
    /// With `record_id`, only the local record whose `Id` matches is pushed;
    /// when no such record exists every dirty record is pushed instead. With
    /// `and_then_down`, a successful push is followed by a down-sync and the
    /// down-sync outcome is returned.
    ///
    /// When that follow-up down-sync is the first one of this syncher, the
    /// handle it creates is scoped to `Id = '<record_id>'`, and every later
    /// down-sync re-syncs that one record only. Call [`down_sync`] first to
    /// bind the handle to the watermark scope instead.
    ///
    /// [`down_sync`]: EntitySyncher::down_sync
    pub async fn up_sync(&self, record_id: Option<&str>, and_then_down: bool) -> SyncOutcome {
        let _gate = self.gate.lock().await;
        self.set_run_state(RunState::Running);

        let outcome = match self.run_up(record_id, and_then_down).await {
            Ok(outcome) => outcome,
            Err(e) => self.abort("up-sync", e),
        };
        self.set_run_state(outcome.run_state());
        outcome
    }

    /// Pulls remote changes.
    pub async fn down_sync(&self) -> SyncOutcome {
        let _gate = self.gate.lock().await;
        self.set_run_state(RunState::Running);

        let outcome = match self.run_down(None).await {
            Ok(outcome) => outcome,
            Err(e) => self.abort("down-sync", e),
        };
        self.set_run_state(outcome.run_state());
        outcome
    }

    fn set_run_state(&self, state: RunState) {
        self.session.lock().run_state = state;
    }

    fn abort(&self, operation: &str, e: SyncError) -> SyncOutcome {
        error!(
            entity = self.descriptor.entity(),
            operation,
            error = %e,
            retryable = e.is_retryable(),
            "sync aborted"
        );
        SyncOutcome::Aborted(e.to_string())
    }

    async fn run_up(&self, record_id: Option<&str>, and_then_down: bool) -> SyncResult<SyncOutcome> {
        let entity = self.descriptor.entity();
        let table = self.table();

        if let Some(resolver) = &self.resolver {
            if let Err(e) = resolver.resolve(&self.descriptor) {
                warn!(entity, error = %e, "reference resolution failed; pushing anyway");
            }
        }

        let options = SyncOptions::for_sync_up(
            self.descriptor.fields_create(),
            self.descriptor.fields_update(),
            self.config.merge_mode,
        )?;
        let target = self.up_target(record_id)?;
        let single = match &target {
            SyncUpTarget::Single(record) => Some(record.clone()),
            SyncUpTarget::Dirty => None,
        };

        debug!(entity, table, single = single.is_some(), "starting up-sync");
        let (tx, rx) = mpsc::unbounded_channel();
        self.transport.sync_up(target, options, table, tx).await?;
        let state = await_terminal(rx, table).await?;

        if state.status == SyncStatus::Failed {
            warn!(entity, table, handle = %state.id, "up-sync failed");
            self.callback.on_up_failure(&state, single.as_ref());
            return Ok(SyncOutcome::Failed(state));
        }

        info!(entity, table, total = state.total_size, "up-sync done");
        self.callback.on_up_success(&state);
        if !and_then_down {
            return Ok(SyncOutcome::Done(state));
        }

        let scope = match (record_id, &single) {
            (Some(id), Some(_)) => Some(format!("{} = '{}'", field::ID, id.replace('\'', "\\'"))),
            _ => None,
        };
        self.run_down(scope).await
    }

    fn up_target(&self, record_id: Option<&str>) -> SyncResult<SyncUpTarget> {
        let Some(id) = record_id else {
            return Ok(SyncUpTarget::Dirty);
        };
        let found = self
            .store
            .query(self.table(), &Predicate::field_eq(field::ID, id))?;
        match found.into_iter().next() {
            Some(record) => Ok(SyncUpTarget::Single(record)),
            None => {
                debug!(entity = self.descriptor.entity(), id, "no local record with id; pushing dirty records");
                Ok(SyncUpTarget::Dirty)
            }
        }
    }

    /// Down-sync body; the caller holds the gate.
    async fn run_down(&self, scope: Option<String>) -> SyncResult<SyncOutcome> {
        let entity = self.descriptor.entity();
        let table = self.table();
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = self.session.lock().handle;
        match handle {
            Some(handle) => {
                debug!(entity, handle = %handle, "re-syncing by handle");
                self.transport.resync(handle, tx).await?;
            }
            None => {
                self.store
                    .register_table(table, &self.descriptor.index_specs())?;
                let scope = scope.unwrap_or_else(|| self.scope());
                let query = build_query(
                    &self.descriptor.fields_down(),
                    self.descriptor.object_name(),
                    &scope,
                    self.config.max_rows,
                );
                debug!(entity, query = %query, "creating down-sync");
                self.session.lock().last_query = Some(query.clone());

                let options = SyncOptions::for_sync_down(self.config.merge_mode);
                let handle = self
                    .transport
                    .sync_down(SyncDownTarget::Query(query), options, table, tx)
                    .await?;
                self.session.lock().handle = Some(handle);
            }
        }

        let state = await_terminal(rx, table).await?;
        if state.status == SyncStatus::Failed {
            warn!(entity, table, handle = %state.id, "down-sync failed");
            self.callback.on_down_failure(&state);
            return Ok(SyncOutcome::Failed(state));
        }

        info!(entity, table, handle = %state.id, total = state.total_size, "down-sync done");
        self.callback.on_down_success(&state, state.total_size);
        Ok(SyncOutcome::Done(state))
    }
}

fn scope_for(descriptor: &EntityDescriptor, watermark: &Watermark) -> String {
    let mut scope = format!(
        "{} > {}",
        field::LAST_MODIFIED_DATE,
        watermark.to_query_string()
    );
    if let Some(predicate) = descriptor.predicate() {
        scope.push_str(" AND ");
        scope.push_str(predicate);
    }
    scope
}

/// Skips `Running` updates until a terminal one arrives.
async fn await_terminal(mut rx: StatusReceiver, table: &str) -> SyncResult<SyncState> {
    while let Some(state) = rx.recv().await {
        if state.status.is_terminal() {
            return Ok(state);
        }
    }
    Err(SyncError::StatusStreamClosed {
        table: table.to_string(),
    })
}
