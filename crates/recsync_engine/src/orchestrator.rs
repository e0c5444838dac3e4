//! Sync pass orchestration across registered entity types.

use crate::callback::SyncCallback;
use crate::chain::ChainResolver;
use crate::config::SyncConfig;
use crate::cursor::{CursorStore, Watermark};
use crate::error::{SyncError, SyncResult};
use crate::state::SyncOutcome;
use crate::store::LocalStore;
use crate::syncher::EntitySyncher;
use crate::transport::SyncTransport;
use recsync_model::DescriptorProvider;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How an entity type takes part in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncKind {
    /// Synced concurrently with every other independent entity.
    Independent,
    /// Synced one at a time, in registration order, after reference
    /// resolution.
    Chained,
}

struct Registration<S, T> {
    entity: String,
    kind: SyncKind,
    syncher: Arc<EntitySyncher<S, T>>,
}

/// Outcome of one entity within a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityReport {
    /// Entity type name.
    pub entity: String,
    /// How it was synced.
    pub kind: SyncKind,
    /// Final outcome.
    pub outcome: SyncOutcome,
}

/// Results of a finished pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// Watermark that bounded the pass.
    pub watermark: Watermark,
    /// Independent entities first, then chained ones, each in registration
    /// order.
    pub entities: Vec<EntityReport>,
}

impl PassReport {
    /// Outcome for one entity type.
    pub fn outcome(&self, entity: &str) -> Option<&SyncOutcome> {
        self.entities
            .iter()
            .find(|r| r.entity == entity)
            .map(|r| &r.outcome)
    }

    /// Returns true if every entity finished with `Done`.
    pub fn all_done(&self) -> bool {
        self.entities.iter().all(|r| r.outcome.is_done())
    }
}

/// A pass in flight.
///
/// Dropping it does not cancel the spawned work.
#[must_use = "a pass runs in the background; join it to observe outcomes"]
pub struct SyncPass {
    watermark: Watermark,
    independent: Vec<(String, JoinHandle<SyncOutcome>)>,
    chained: Option<JoinHandle<Vec<(String, SyncOutcome)>>>,
}

impl SyncPass {
    /// Watermark that bounds this pass.
    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// Waits for every entity of the pass.
    pub async fn join(self) -> PassReport {
        let mut entities = Vec::with_capacity(self.independent.len());

        for (entity, task) in self.independent {
            let outcome = task
                .await
                .unwrap_or_else(|e| SyncOutcome::Aborted(e.to_string()));
            entities.push(EntityReport {
                entity,
                kind: SyncKind::Independent,
                outcome,
            });
        }

        if let Some(task) = self.chained {
            match task.await {
                Ok(outcomes) => {
                    entities.extend(outcomes.into_iter().map(|(entity, outcome)| EntityReport {
                        entity,
                        kind: SyncKind::Chained,
                        outcome,
                    }))
                }
                Err(e) => warn!(error = %e, "chained sync task failed"),
            }
        }

        PassReport {
            watermark: self.watermark,
            entities,
        }
    }
}

/// Runs sync passes over an ordered list of entity types.
///
/// Synchers are created once at registration and reused across passes, so
/// every entity keeps its incremental down-sync handle. The orchestrator
/// owns the cursor store holding the pass watermark.
///
/// # Example
///
/// ```rust,no_run
/// use recsync_engine::{
///     MemoryCursorStore, MemoryStore, MockTransport, NoopCallback, SyncConfig, SyncKind,
///     SyncOrchestrator,
/// };
/// use recsync_model::{EntityDescriptor, ModelRegistry};
/// use std::sync::Arc;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = ModelRegistry::new()
///     .with(EntityDescriptor::builder("Account", "Account").field("Name").build()?)?;
/// let store = Arc::new(MemoryStore::new());
/// let transport = Arc::new(MockTransport::with_store(store.clone()));
///
/// let mut orchestrator = SyncOrchestrator::new(
///     store,
///     transport,
///     Arc::new(registry),
///     Arc::new(MemoryCursorStore::new()),
///     Arc::new(NoopCallback),
///     SyncConfig::new(),
/// );
/// orchestrator.register("Account", SyncKind::Independent)?;
///
/// let report = orchestrator.perform_sync()?.join().await;
/// assert!(report.all_done());
/// # Ok(())
/// # }
/// ```
pub struct SyncOrchestrator<S, T, C> {
    store: Arc<S>,
    transport: Arc<T>,
    provider: Arc<dyn DescriptorProvider>,
    cursor: Arc<dyn CursorStore>,
    callback: Arc<C>,
    config: SyncConfig,
    runtime: Option<Handle>,
    registrations: Vec<Registration<S, T>>,
}

impl<S, T, C> SyncOrchestrator<S, T, C>
where
    S: LocalStore + 'static,
    T: SyncTransport + 'static,
    C: SyncCallback + 'static,
{
    /// Creates an orchestrator with no registered entities.
    pub fn new(
        store: Arc<S>,
        transport: Arc<T>,
        provider: Arc<dyn DescriptorProvider>,
        cursor: Arc<dyn CursorStore>,
        callback: Arc<C>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            transport,
            provider,
            cursor,
            callback,
            config,
            runtime: None,
            registrations: Vec::new(),
        }
    }

    /// Spawns pass tasks on `runtime` instead of the ambient one.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// The callback shared by every syncher.
    pub fn callback(&self) -> &Arc<C> {
        &self.callback
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Adds an entity type to every future pass.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownEntity`] if the provider has no
    /// descriptor for `entity`, or [`SyncError::DuplicateRegistration`] if
    /// it is already registered.
    pub fn register(&mut self, entity: &str, kind: SyncKind) -> SyncResult<()> {
        if self.registrations.iter().any(|r| r.entity == entity) {
            return Err(SyncError::DuplicateRegistration(entity.to_string()));
        }
        let descriptor = self
            .provider
            .descriptor(entity)
            .ok_or_else(|| SyncError::UnknownEntity(entity.to_string()))?;

        let callback: Arc<dyn SyncCallback> = self.callback.clone();
        let mut syncher = EntitySyncher::new(
            descriptor,
            self.store.clone(),
            self.transport.clone(),
            callback,
            self.config.clone(),
        );
        if kind == SyncKind::Chained {
            syncher = syncher.with_resolver(ChainResolver::new(
                self.store.clone(),
                self.provider.clone(),
                self.config.remote_id_max_len,
            ));
        }

        debug!(entity, ?kind, "registered entity");
        self.registrations.push(Registration {
            entity: entity.to_string(),
            kind,
            syncher: Arc::new(syncher),
        });
        Ok(())
    }

    /// Number of registered entity types.
    pub fn registered_count(&self) -> usize {
        self.registrations.len()
    }

    /// The syncher of a registered entity.
    pub fn syncher(&self, entity: &str) -> Option<&Arc<EntitySyncher<S, T>>> {
        self.registrations
            .iter()
            .find(|r| r.entity == entity)
            .map(|r| &r.syncher)
    }

    /// Reads the stored watermark, falling back to the epoch.
    pub fn watermark(&self) -> Watermark {
        match self.cursor.get(&self.config.cursor_key) {
            Ok(raw) => Watermark::from_stored(raw.as_deref()),
            Err(e) => {
                warn!(key = %self.config.cursor_key, error = %e, "cursor read failed; syncing from epoch");
                Watermark::epoch()
            }
        }
    }

    /// Starts a pass and returns without waiting for it.
    ///
    /// Independent entities run concurrently; chained entities run one at
    /// a time in registration order on a single task. The new watermark is
    /// written to the cursor store before any spawned work starts.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoRuntime`] when called outside a tokio runtime
    /// and no runtime handle was configured.
    pub fn perform_sync(&mut self) -> SyncResult<SyncPass> {
        let runtime = match &self.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|e| SyncError::NoRuntime(e.to_string()))?,
        };

        let watermark = self.watermark();
        info!(
            watermark = %watermark.to_query_string(),
            entities = self.registrations.len(),
            "starting sync pass"
        );

        let (release, released) = watch::channel(false);
        let mut independent = Vec::new();
        let mut finished = Vec::new();
        let mut chained = Vec::new();

        for registration in &self.registrations {
            registration.syncher.set_watermark(&watermark);
            match registration.kind {
                SyncKind::Independent => {
                    let syncher = registration.syncher.clone();
                    let mut go = released.clone();
                    let done = if self.config.await_independent {
                        let (tx, rx) = oneshot::channel::<()>();
                        finished.push(rx);
                        Some(tx)
                    } else {
                        None
                    };
                    let task = runtime.spawn(async move {
                        let _ = go.wait_for(|released| *released).await;
                        let outcome = run_entity(&syncher).await;
                        if let Some(done) = done {
                            let _ = done.send(());
                        }
                        outcome
                    });
                    independent.push((registration.entity.clone(), task));
                }
                SyncKind::Chained => {
                    chained.push((registration.entity.clone(), registration.syncher.clone()));
                }
            }
        }

        let chained = (!chained.is_empty()).then(|| {
            let mut go = released.clone();
            runtime.spawn(async move {
                let _ = go.wait_for(|released| *released).await;
                for rx in finished {
                    let _ = rx.await;
                }
                let mut outcomes = Vec::with_capacity(chained.len());
                for (entity, syncher) in chained {
                    let outcome = run_entity(&syncher).await;
                    outcomes.push((entity, outcome));
                }
                outcomes
            })
        });

        let now = Watermark::now();
        if let Err(e) = self.cursor.set(&self.config.cursor_key, &now.to_stored_string()) {
            warn!(key = %self.config.cursor_key, error = %e, "failed to persist watermark");
        }
        let _ = release.send(true);

        Ok(SyncPass {
            watermark,
            independent,
            chained,
        })
    }
}

/// Cold start pulls only; otherwise push, then pull.
async fn run_entity<S: LocalStore, T: SyncTransport>(syncher: &EntitySyncher<S, T>) -> SyncOutcome {
    if syncher.has_table() {
        syncher.up_sync(None, true).await
    } else {
        syncher.down_sync().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::NoopCallback;
    use crate::cursor::MemoryCursorStore;
    use crate::store::MemoryStore;
    use crate::transport::MockTransport;
    use recsync_model::{EntityDescriptor, ModelRegistry};

    type TestOrchestrator = SyncOrchestrator<MemoryStore, MockTransport, NoopCallback>;

    fn orchestrator(cursor: Arc<dyn CursorStore>) -> TestOrchestrator {
        let registry = ModelRegistry::new()
            .with(EntityDescriptor::builder("Account", "Account").field("Name").build().unwrap())
            .unwrap();
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::with_store(store.clone()));
        SyncOrchestrator::new(
            store,
            transport,
            Arc::new(registry),
            cursor,
            Arc::new(NoopCallback),
            SyncConfig::new(),
        )
    }

    #[test]
    fn register_rejects_unknown_and_duplicate() {
        let mut orch = orchestrator(Arc::new(MemoryCursorStore::new()));

        orch.register("Account", SyncKind::Independent).unwrap();
        assert_eq!(orch.registered_count(), 1);
        assert!(orch.syncher("Account").is_some());

        assert!(matches!(
            orch.register("Account", SyncKind::Chained),
            Err(SyncError::DuplicateRegistration(_))
        ));
        assert!(matches!(
            orch.register("Opportunity", SyncKind::Independent),
            Err(SyncError::UnknownEntity(_))
        ));
        assert_eq!(orch.registered_count(), 1);
    }

    #[test]
    fn watermark_falls_back_to_epoch() {
        let orch = orchestrator(Arc::new(MemoryCursorStore::with_value("lastSync", "not-a-date")));
        assert_eq!(orch.watermark(), Watermark::epoch());

        let orch = orchestrator(Arc::new(MemoryCursorStore::new()));
        assert_eq!(orch.watermark(), Watermark::epoch());

        let orch = orchestrator(Arc::new(MemoryCursorStore::with_value(
            "lastSync",
            "05-03-2024 14:07:09",
        )));
        assert_eq!(orch.watermark().to_query_string(), "2024-03-05T14:07:09Z");
    }

    #[test]
    fn perform_sync_outside_runtime_fails() {
        let mut orch = orchestrator(Arc::new(MemoryCursorStore::new()));
        assert!(matches!(orch.perform_sync(), Err(SyncError::NoRuntime(_))));
    }

    #[test]
    fn perform_sync_with_explicit_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let cursor = Arc::new(MemoryCursorStore::new());
        let mut orch = orchestrator(cursor.clone()).with_runtime(runtime.handle().clone());
        orch.register("Account", SyncKind::Independent).unwrap();

        let pass = orch.perform_sync().unwrap();
        assert_eq!(pass.watermark(), Watermark::epoch());
        assert!(cursor.get("lastSync").unwrap().is_some());

        let report = runtime.block_on(pass.join());
        assert!(report.all_done());
        assert_eq!(report.entities[0].kind, SyncKind::Independent);
    }

    #[tokio::test]
    async fn cursor_written_before_work_starts() {
        let cursor = Arc::new(MemoryCursorStore::new());
        let mut orch = orchestrator(cursor.clone());
        orch.register("Account", SyncKind::Independent).unwrap();

        let pass = orch.perform_sync().unwrap();
        let stored = cursor.get("lastSync").unwrap();
        assert!(orch.syncher("Account").unwrap().handle().is_none());

        let report = pass.join().await;
        assert!(report.outcome("Account").unwrap().is_done());
        assert!(stored.is_some());
        assert!(orch.watermark() > Watermark::epoch());
    }
}
