//! Remote transport abstraction for sync up / down.
//!
//! A transport reports progress by pushing [`SyncState`] updates into the
//! sender it is handed; the entity syncher consumes them until a terminal
//! status arrives.

use crate::error::{SyncError, SyncResult};
use crate::options::SyncOptions;
use crate::state::{SyncHandleId, SyncState};
use crate::store::{LocalRecord, LocalStore, MemoryStore, Predicate};
use async_trait::async_trait;
use parking_lot::Mutex;
use recsync_model::field;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Sending half of a status stream.
pub type StatusSender = mpsc::UnboundedSender<SyncState>;

/// Receiving half of a status stream.
pub type StatusReceiver = mpsc::UnboundedReceiver<SyncState>;

/// What to push upward.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncUpTarget {
    /// Every record of the table with local changes.
    Dirty,
    /// One specific record.
    Single(LocalRecord),
}

/// What to pull downward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncDownTarget {
    /// Records returned by a remote query.
    Query(String),
}

impl SyncDownTarget {
    /// The query text.
    pub fn query(&self) -> &str {
        match self {
            SyncDownTarget::Query(q) => q,
        }
    }
}

/// Builds a down-sync query.
///
/// ```rust
/// use recsync_engine::build_query;
///
/// let fields = vec!["Id".to_string(), "Name".to_string()];
/// assert_eq!(
///     build_query(&fields, "Account", "Id = 'A1'", 10),
///     "SELECT Id, Name FROM Account WHERE Id = 'A1' LIMIT 10"
/// );
/// ```
pub fn build_query(fields: &[String], object_name: &str, scope: &str, limit: u32) -> String {
    format!(
        "SELECT {} FROM {object_name} WHERE {scope} LIMIT {limit}",
        fields.join(", ")
    )
}

/// A remote transport handles communication with the record API.
///
/// Each call receives a status sender and must eventually send a terminal
/// update (or drop the sender) for the operation it started.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Pushes local changes of `table`.
    async fn sync_up(
        &self,
        target: SyncUpTarget,
        options: SyncOptions,
        table: &str,
        updates: StatusSender,
    ) -> SyncResult<()>;

    /// Starts an incremental down-sync and returns its handle.
    async fn sync_down(
        &self,
        target: SyncDownTarget,
        options: SyncOptions,
        table: &str,
        updates: StatusSender,
    ) -> SyncResult<SyncHandleId>;

    /// Re-runs an existing down-sync, fetching only what changed.
    async fn resync(&self, handle: SyncHandleId, updates: StatusSender) -> SyncResult<()>;
}

/// One record handed to [`MockTransport::sync_up`].
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    /// Local table.
    pub table: String,
    /// Fields actually sent.
    pub payload: Map<String, Value>,
    /// Whether the record already had a remote identity.
    pub exists_remotely: bool,
    /// Whether the record was a local delete.
    pub deleted: bool,
}

#[derive(Debug, Clone)]
struct DownSession {
    table: String,
    options: SyncOptions,
}

#[derive(Debug, Default)]
struct Script {
    remote_rows: HashMap<String, Vec<Map<String, Value>>>,
    fail_up: HashSet<String>,
    fail_down: HashSet<String>,
    drop_status: HashSet<String>,
}

#[derive(Debug, Default)]
struct Log {
    queries: Vec<(String, String)>,
    resyncs: Vec<SyncHandleId>,
    uploads: Vec<Upload>,
}

/// A scripted in-process transport.
///
/// Remote rows and failures are configured per table. When a store is
/// attached, down-syncs are written into it and up-syncs give locally
/// created records an 18-character remote id.
#[derive(Debug)]
pub struct MockTransport {
    online: AtomicBool,
    next_handle: AtomicI64,
    next_remote_id: AtomicI64,
    script: Mutex<Script>,
    log: Mutex<Log>,
    sessions: Mutex<HashMap<SyncHandleId, DownSession>>,
    store: Option<Arc<MemoryStore>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a transport with no remote data.
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            next_handle: AtomicI64::new(1),
            next_remote_id: AtomicI64::new(1),
            script: Mutex::new(Script::default()),
            log: Mutex::new(Log::default()),
            sessions: Mutex::new(HashMap::new()),
            store: None,
        }
    }

    /// Creates a transport that loops results back into `store`.
    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new()
        }
    }

    /// Sets the rows the remote side returns for `table`.
    ///
    /// Non-object values are ignored.
    pub fn set_remote_rows(&self, table: &str, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.script.lock().remote_rows.insert(table.to_string(), rows);
    }

    /// Makes every up-sync of `table` report `Failed`.
    pub fn fail_up(&self, table: &str) {
        self.script.lock().fail_up.insert(table.to_string());
    }

    /// Makes every down-sync and resync of `table` report `Failed`.
    pub fn fail_down(&self, table: &str) {
        self.script.lock().fail_down.insert(table.to_string());
    }

    /// Makes operations on `table` drop their status stream after `Running`.
    pub fn drop_status(&self, table: &str) {
        self.script.lock().drop_status.insert(table.to_string());
    }

    /// Clears every scripted failure.
    pub fn clear_failures(&self) {
        let mut script = self.script.lock();
        script.fail_up.clear();
        script.fail_down.clear();
        script.drop_status.clear();
    }

    /// Sets whether calls reach the remote side at all.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Every `(table, query)` issued through `sync_down`.
    pub fn queries(&self) -> Vec<(String, String)> {
        self.log.lock().queries.clone()
    }

    /// Queries issued for one table.
    pub fn queries_for(&self, table: &str) -> Vec<String> {
        self.log
            .lock()
            .queries
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, q)| q.clone())
            .collect()
    }

    /// Every handle passed to `resync`.
    pub fn resyncs(&self) -> Vec<SyncHandleId> {
        self.log.lock().resyncs.clone()
    }

    /// Every record pushed through `sync_up`.
    pub fn uploads(&self) -> Vec<Upload> {
        self.log.lock().uploads.clone()
    }

    fn ensure_online(&self) -> SyncResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::transport_retryable("remote unreachable"))
        }
    }

    fn assign_remote_id(&self) -> String {
        let n = self.next_remote_id.fetch_add(1, Ordering::SeqCst);
        format!("R{:017}", n)
    }

    /// Sends the table's remote rows for a down-sync session.
    fn deliver(&self, handle: SyncHandleId, session: &DownSession, updates: &StatusSender) -> SyncResult<()> {
        let table = session.table.as_str();
        send(updates, SyncState::running(handle, table))?;

        let (failed, dropped, rows) = {
            let script = self.script.lock();
            (
                script.fail_down.contains(table),
                script.drop_status.contains(table),
                script.remote_rows.get(table).cloned().unwrap_or_default(),
            )
        };
        if dropped {
            return Ok(());
        }
        if failed {
            return send(updates, SyncState::failed(handle, table));
        }

        if let Some(store) = &self.store {
            for row in &rows {
                store.upsert_remote(table, row.clone(), session.options.merge_mode())?;
            }
        }
        debug!(table, handle = %handle, total = rows.len(), "delivered remote rows");
        send(updates, SyncState::done(handle, rows.len() as u64, table))
    }

    fn push_record(&self, table: &str, mut record: LocalRecord, options: &SyncOptions) -> SyncResult<()> {
        let exists_remotely = !record.is_locally_created();
        let upload = Upload {
            table: table.to_string(),
            payload: record.payload(options.fields_for(exists_remotely)),
            exists_remotely,
            deleted: record.is_locally_deleted(),
        };
        self.log.lock().uploads.push(upload);

        if let Some(store) = &self.store {
            if !exists_remotely {
                record.set(field::ID, self.assign_remote_id());
            }
            record.mark_synced();
            store.update_record(table, &record, record.entry_id())?;
        }
        Ok(())
    }
}

fn send(updates: &StatusSender, state: SyncState) -> SyncResult<()> {
    updates
        .send(state)
        .map_err(|e| SyncError::StatusStreamClosed { table: e.0.table })
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn sync_up(
        &self,
        target: SyncUpTarget,
        options: SyncOptions,
        table: &str,
        updates: StatusSender,
    ) -> SyncResult<()> {
        self.ensure_online()?;
        let handle = SyncHandleId(self.next_handle.fetch_add(1, Ordering::SeqCst));
        send(&updates, SyncState::running(handle, table))?;

        let (failed, dropped) = {
            let script = self.script.lock();
            (script.fail_up.contains(table), script.drop_status.contains(table))
        };
        if dropped {
            return Ok(());
        }
        if failed {
            return send(&updates, SyncState::failed(handle, table));
        }

        let records = match target {
            SyncUpTarget::Single(record) => vec![record],
            SyncUpTarget::Dirty => match &self.store {
                Some(store) => store.query(table, &Predicate::Dirty)?,
                None => Vec::new(),
            },
        };
        let total = records.len() as u64;
        for record in records {
            self.push_record(table, record, &options)?;
        }
        send(&updates, SyncState::done(handle, total, table))
    }

    async fn sync_down(
        &self,
        target: SyncDownTarget,
        options: SyncOptions,
        table: &str,
        updates: StatusSender,
    ) -> SyncResult<SyncHandleId> {
        self.ensure_online()?;
        self.log
            .lock()
            .queries
            .push((table.to_string(), target.query().to_string()));

        let handle = SyncHandleId(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let session = DownSession {
            table: table.to_string(),
            options,
        };
        self.sessions.lock().insert(handle, session.clone());
        self.deliver(handle, &session, &updates)?;
        Ok(handle)
    }

    async fn resync(&self, handle: SyncHandleId, updates: StatusSender) -> SyncResult<()> {
        self.ensure_online()?;
        self.log.lock().resyncs.push(handle);

        let session = self
            .sessions
            .lock()
            .get(&handle)
            .cloned()
            .ok_or_else(|| SyncError::transport_fatal(format!("unknown sync handle {handle}")))?;
        self.deliver(handle, &session, &updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::MergeMode;
    use crate::state::SyncStatus;
    use serde_json::json;

    fn drain(mut rx: StatusReceiver) -> Vec<SyncStatus> {
        let mut seen = Vec::new();
        while let Ok(state) = rx.try_recv() {
            seen.push(state.status);
        }
        seen
    }

    #[tokio::test]
    async fn down_sync_records_query_and_loops_back() {
        let store = Arc::new(MemoryStore::new());
        store.register_table("Account", &[]).unwrap();
        let transport = MockTransport::with_store(store.clone());
        transport.set_remote_rows("Account", vec![json!({"Id": "A1"}), json!({"Id": "A2"})]);

        let (tx, rx) = mpsc::unbounded_channel();
        let target = SyncDownTarget::Query("SELECT Id FROM Account WHERE x LIMIT 1".into());
        let handle = transport
            .sync_down(target, SyncOptions::for_sync_down(MergeMode::Overwrite), "Account", tx)
            .await
            .unwrap();

        assert_eq!(drain(rx), vec![SyncStatus::Running, SyncStatus::Done]);
        assert_eq!(store.records("Account").len(), 2);
        assert_eq!(transport.queries_for("Account").len(), 1);

        let (tx, rx) = mpsc::unbounded_channel();
        transport.resync(handle, tx).await.unwrap();
        assert_eq!(drain(rx), vec![SyncStatus::Running, SyncStatus::Done]);
        assert_eq!(transport.resyncs(), vec![handle]);
        assert_eq!(store.records("Account").len(), 2);
    }

    #[tokio::test]
    async fn scripted_failure_reports_failed() {
        let transport = MockTransport::new();
        transport.fail_down("Account");

        let (tx, rx) = mpsc::unbounded_channel();
        transport
            .sync_down(
                SyncDownTarget::Query("q".into()),
                SyncOptions::for_sync_down(MergeMode::Overwrite),
                "Account",
                tx,
            )
            .await
            .unwrap();
        assert_eq!(drain(rx), vec![SyncStatus::Running, SyncStatus::Failed]);
    }

    #[tokio::test]
    async fn unknown_handle_is_fatal() {
        let transport = MockTransport::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = transport.resync(SyncHandleId(42), tx).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn offline_is_retryable() {
        let transport = MockTransport::new();
        transport.set_online(false);
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = transport
            .sync_up(
                SyncUpTarget::Dirty,
                SyncOptions::for_sync_down(MergeMode::Overwrite),
                "Account",
                tx,
            )
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn sync_up_assigns_remote_ids_to_new_records() {
        let store = Arc::new(MemoryStore::new());
        store.register_table("Contact", &[]).unwrap();
        let created = store
            .insert_local("Contact", json!({"LastName": "Doe", "OwnerId": "005"}))
            .unwrap();
        store
            .insert("Contact", json!({"Id": "C1", "LastName": "Roe", "OwnerId": "005", "__local__": true}))
            .unwrap();
        let transport = MockTransport::with_store(store.clone());

        let options = SyncOptions::for_sync_up(
            vec!["LastName".into(), "OwnerId".into()],
            vec!["LastName".into()],
            MergeMode::Overwrite,
        )
        .unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        transport
            .sync_up(SyncUpTarget::Dirty, options, "Contact", tx)
            .await
            .unwrap();
        assert_eq!(drain(rx), vec![SyncStatus::Running, SyncStatus::Done]);

        let uploads = transport.uploads();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].payload.len(), 2);
        assert!(!uploads[0].exists_remotely);
        assert_eq!(Value::Object(uploads[1].payload.clone()), json!({"LastName": "Roe"}));

        let record = store.lookup_by_row_id("Contact", created).unwrap().unwrap();
        assert_eq!(record.remote_id().unwrap().len(), 18);
        assert!(!record.is_dirty());
        assert!(store.query("Contact", &Predicate::Dirty).unwrap().is_empty());
    }

    #[test]
    fn query_shape() {
        let fields = vec!["Id".to_string(), "LastModifiedDate".to_string()];
        let q = build_query(&fields, "Contact", "LastModifiedDate > 1970-01-01T00:00:00Z", 50_000);
        assert_eq!(
            q,
            "SELECT Id, LastModifiedDate FROM Contact WHERE LastModifiedDate > 1970-01-01T00:00:00Z LIMIT 50000"
        );
    }
}
