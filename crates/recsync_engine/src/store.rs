//! Local object store abstraction.
//!
//! The engine never owns the embedded store; it reads and writes records
//! through [`LocalStore`]. [`MemoryStore`] is a thread-safe in-memory
//! implementation used by tests and by embedders that keep a cache.

use crate::error::{SyncError, SyncResult};
use crate::options::MergeMode;
use parking_lot::RwLock;
use recsync_model::{field, IndexSpec};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Field under which the local row id is exposed in JSON payloads.
pub const ENTRY_ID_FIELD: &str = "_soupEntryId";

const PLACEHOLDER_PREFIX: &str = "local_";

/// Local numeric row id assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(pub i64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record held in the local store.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRecord {
    entry_id: RowId,
    fields: Map<String, Value>,
}

impl LocalRecord {
    /// Creates a record.
    pub fn new(entry_id: RowId, fields: Map<String, Value>) -> Self {
        Self { entry_id, fields }
    }

    /// Local row id.
    pub fn entry_id(&self) -> RowId {
        self.entry_id
    }

    /// All fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// A field value; JSON null is returned as `Some(Value::Null)`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns true if the field is absent or null.
    pub fn is_null(&self, name: &str) -> bool {
        self.fields.get(name).map_or(true, Value::is_null)
    }

    /// Sets a field.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Sets a field to JSON null.
    pub fn clear(&mut self, name: &str) {
        self.fields.insert(name.to_string(), Value::Null);
    }

    /// Remote identifier, when present.
    pub fn remote_id(&self) -> Option<&str> {
        self.fields.get(field::ID).and_then(Value::as_str)
    }

    fn flag(&self, name: &str) -> bool {
        self.fields.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Returns true if the record carries unsynced local changes.
    pub fn is_dirty(&self) -> bool {
        self.flag(field::LOCAL)
    }

    /// Returns true if the record was created locally and never pushed.
    pub fn is_locally_created(&self) -> bool {
        self.flag(field::LOCALLY_CREATED)
    }

    /// Returns true if the record was deleted locally.
    pub fn is_locally_deleted(&self) -> bool {
        self.flag(field::LOCALLY_DELETED)
    }

    /// Flags the record as locally updated.
    pub fn mark_updated(&mut self) {
        self.set(field::LOCAL, true);
        if !self.is_locally_created() {
            self.set(field::LOCALLY_UPDATED, true);
        }
    }

    /// Flags the record as a fresh local creation.
    pub fn mark_created(&mut self) {
        self.set(field::LOCAL, true);
        self.set(field::LOCALLY_CREATED, true);
        self.set(field::LOCALLY_UPDATED, false);
        self.set(field::LOCALLY_DELETED, false);
    }

    /// Clears every local flag.
    pub fn mark_synced(&mut self) {
        for name in [
            field::LOCAL,
            field::LOCALLY_CREATED,
            field::LOCALLY_UPDATED,
            field::LOCALLY_DELETED,
        ] {
            self.set(name, false);
        }
    }

    /// The subset of `names` present on the record, for upload.
    pub fn payload(&self, names: &[String]) -> Map<String, Value> {
        names
            .iter()
            .filter_map(|n| self.fields.get(n).map(|v| (n.clone(), v.clone())))
            .collect()
    }

    /// Full JSON form including the row id.
    pub fn to_json(&self) -> Value {
        let mut object = self.fields.clone();
        object.insert(ENTRY_ID_FIELD.to_string(), Value::from(self.entry_id.0));
        Value::Object(object)
    }
}

/// Builds the placeholder remote id given to locally created records.
///
/// The result is always longer than the 18-character remote id format, so
/// the chain resolver defers children of such records.
pub fn placeholder_id(seed: i64) -> String {
    format!("{PLACEHOLDER_PREFIX}{:013}", seed.unsigned_abs())
}

/// Record filter understood by every store.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Every record.
    All,
    /// Records with local changes.
    Dirty,
    /// Records whose field equals a value.
    FieldEq {
        /// Field name.
        field: String,
        /// Expected value.
        value: Value,
    },
}

impl Predicate {
    /// Shorthand for a field equality filter.
    pub fn field_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::FieldEq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Returns true if the record satisfies the predicate.
    pub fn matches(&self, record: &LocalRecord) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Dirty => record.is_dirty(),
            Predicate::FieldEq { field, value } => record.get(field) == Some(value),
        }
    }
}

/// The embedded local object store.
///
/// Reads may run concurrently; the engine serializes writes per chained
/// entity itself.
pub trait LocalStore: Send + Sync {
    /// Returns true if the table has been registered.
    fn has_table(&self, name: &str) -> bool;

    /// Registers a table with its indexes. Registering twice is a no-op.
    fn register_table(&self, name: &str, indexes: &[IndexSpec]) -> SyncResult<()>;

    /// Returns every record of `table` matching `predicate`, in row order.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not registered.
    fn query(&self, table: &str, predicate: &Predicate) -> SyncResult<Vec<LocalRecord>>;

    /// Replaces the stored fields of `row_id` with those of `record`.
    fn update_record(&self, table: &str, record: &LocalRecord, row_id: RowId) -> SyncResult<()>;

    /// Looks up one record. Returns `None` if the table or row is missing.
    fn lookup_by_row_id(&self, table: &str, row_id: RowId) -> SyncResult<Option<LocalRecord>>;
}

#[derive(Debug, Default)]
struct Table {
    indexes: Vec<IndexSpec>,
    rows: BTreeMap<RowId, Map<String, Value>>,
    next_row: i64,
}

impl Table {
    fn insert(&mut self, fields: Map<String, Value>) -> RowId {
        self.next_row += 1;
        let row = RowId(self.next_row);
        self.rows.insert(row, fields);
        row
    }
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, Table>,
    writes: u64,
}

/// An in-memory [`LocalStore`].
///
/// Row ids are assigned per table starting at 1.
///
/// # Example
///
/// ```rust
/// use recsync_engine::{LocalStore, MemoryStore, Predicate};
/// use serde_json::json;
///
/// let store = MemoryStore::new();
/// store.register_table("Account", &[]).unwrap();
/// let row = store.insert("Account", json!({"Id": "A1", "Name": "Acme"})).unwrap();
/// assert_eq!(row.0, 1);
/// assert_eq!(store.query("Account", &Predicate::All).unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record as-is and returns its row id.
    ///
    /// `fields` must be a JSON object.
    pub fn insert(&self, table: &str, fields: Value) -> SyncResult<RowId> {
        let fields = into_object(table, fields)?;
        let mut inner = self.inner.write();
        let t = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| SyncError::store(table, "table not registered"))?;
        let row = t.insert(fields);
        inner.writes += 1;
        Ok(row)
    }

    /// Inserts a locally created record: flags it dirty and gives it a
    /// placeholder remote id unless one is supplied.
    pub fn insert_local(&self, table: &str, fields: Value) -> SyncResult<RowId> {
        let fields = into_object(table, fields)?;
        let mut inner = self.inner.write();
        let t = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| SyncError::store(table, "table not registered"))?;
        let seed = chrono::Utc::now().timestamp_millis() + t.next_row + 1;
        let mut record = LocalRecord::new(RowId(0), fields);
        if record.is_null(field::ID) {
            record.set(field::ID, placeholder_id(seed));
        }
        record.mark_created();
        let row = t.insert(record.fields);
        inner.writes += 1;
        Ok(row)
    }

    /// Writes a record received from the remote side, matching on `Id`.
    ///
    /// Returns the row id and whether the row was written. With
    /// [`MergeMode::LeaveIfChanged`] a dirty local row is kept.
    pub fn upsert_remote(
        &self,
        table: &str,
        fields: Map<String, Value>,
        merge_mode: MergeMode,
    ) -> SyncResult<(RowId, bool)> {
        let mut inner = self.inner.write();
        let t = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| SyncError::store(table, "table not registered"))?;

        let mut incoming = LocalRecord::new(RowId(0), fields);
        incoming.mark_synced();
        let remote_id = incoming.remote_id().map(str::to_string);

        let existing = remote_id.as_deref().and_then(|id| {
            t.rows
                .iter()
                .find(|(_, f)| f.get(field::ID).and_then(Value::as_str) == Some(id))
                .map(|(row, _)| *row)
        });

        let result = match existing {
            Some(row) => {
                let current = LocalRecord::new(row, t.rows[&row].clone());
                if merge_mode == MergeMode::LeaveIfChanged && current.is_dirty() {
                    (row, false)
                } else {
                    let mut merged = current.fields;
                    merged.extend(incoming.fields);
                    t.rows.insert(row, merged);
                    (row, true)
                }
            }
            None => (t.insert(incoming.fields), true),
        };
        if result.1 {
            inner.writes += 1;
        }
        Ok(result)
    }

    /// Every record of `table` in row order. Empty if the table is missing.
    pub fn records(&self, table: &str) -> Vec<LocalRecord> {
        self.inner
            .read()
            .tables
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .map(|(row, f)| LocalRecord::new(*row, f.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Indexes registered for `table`.
    pub fn indexes(&self, table: &str) -> Vec<IndexSpec> {
        self.inner
            .read()
            .tables
            .get(table)
            .map(|t| t.indexes.clone())
            .unwrap_or_default()
    }

    /// Total number of writes performed since creation.
    pub fn write_count(&self) -> u64 {
        self.inner.read().writes
    }
}

fn into_object(table: &str, value: Value) -> SyncResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(SyncError::store(
            table,
            format!("expected a JSON object, got {other}"),
        )),
    }
}

impl LocalStore for MemoryStore {
    fn has_table(&self, name: &str) -> bool {
        self.inner.read().tables.contains_key(name)
    }

    fn register_table(&self, name: &str, indexes: &[IndexSpec]) -> SyncResult<()> {
        if name.is_empty() {
            return Err(SyncError::store(name, "table name must not be empty"));
        }
        self.inner
            .write()
            .tables
            .entry(name.to_string())
            .or_insert_with(|| Table {
                indexes: indexes.to_vec(),
                ..Table::default()
            });
        Ok(())
    }

    fn query(&self, table: &str, predicate: &Predicate) -> SyncResult<Vec<LocalRecord>> {
        let inner = self.inner.read();
        let t = inner
            .tables
            .get(table)
            .ok_or_else(|| SyncError::store(table, "table not registered"))?;
        Ok(t.rows
            .iter()
            .map(|(row, f)| LocalRecord::new(*row, f.clone()))
            .filter(|r| predicate.matches(r))
            .collect())
    }

    fn update_record(&self, table: &str, record: &LocalRecord, row_id: RowId) -> SyncResult<()> {
        let mut inner = self.inner.write();
        let t = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| SyncError::store(table, "table not registered"))?;
        let slot = t
            .rows
            .get_mut(&row_id)
            .ok_or_else(|| SyncError::store(table, format!("no row {row_id}")))?;
        *slot = record.fields.clone();
        inner.writes += 1;
        Ok(())
    }

    fn lookup_by_row_id(&self, table: &str, row_id: RowId) -> SyncResult<Option<LocalRecord>> {
        Ok(self
            .inner
            .read()
            .tables
            .get(table)
            .and_then(|t| t.rows.get(&row_id))
            .map(|f| LocalRecord::new(row_id, f.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with(table: &str) -> MemoryStore {
        let store = MemoryStore::new();
        store.register_table(table, &[IndexSpec::string("Id")]).unwrap();
        store
    }

    #[test]
    fn register_is_idempotent() {
        let store = store_with("Account");
        store.insert("Account", json!({"Id": "A1"})).unwrap();
        store.register_table("Account", &[]).unwrap();

        assert!(store.has_table("Account"));
        assert_eq!(store.records("Account").len(), 1);
        assert_eq!(store.indexes("Account").len(), 1);
    }

    #[test]
    fn row_ids_are_per_table() {
        let store = store_with("Account");
        store.register_table("Contact", &[]).unwrap();

        assert_eq!(store.insert("Account", json!({})).unwrap(), RowId(1));
        assert_eq!(store.insert("Account", json!({})).unwrap(), RowId(2));
        assert_eq!(store.insert("Contact", json!({})).unwrap(), RowId(1));
    }

    #[test]
    fn insert_requires_registration() {
        let store = MemoryStore::new();
        let err = store.insert("Account", json!({})).unwrap_err();
        assert!(matches!(err, SyncError::Store { .. }));

        let store = store_with("Account");
        assert!(store.insert("Account", json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn insert_local_assigns_placeholder() {
        let store = store_with("Account");
        let row = store.insert_local("Account", json!({"Name": "Acme"})).unwrap();
        let record = store.lookup_by_row_id("Account", row).unwrap().unwrap();

        assert!(record.is_dirty());
        assert!(record.is_locally_created());
        assert!(record.remote_id().unwrap().len() > 18);
        assert!(record.remote_id().unwrap().starts_with("local_"));
    }

    #[test]
    fn query_by_predicate() {
        let store = store_with("Account");
        store.insert("Account", json!({"Id": "A1", "__local__": false})).unwrap();
        store.insert("Account", json!({"Id": "A2", "__local__": true})).unwrap();

        let dirty = store.query("Account", &Predicate::Dirty).unwrap();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].remote_id(), Some("A2"));

        let by_id = store
            .query("Account", &Predicate::field_eq("Id", "A1"))
            .unwrap();
        assert_eq!(by_id[0].entry_id(), RowId(1));

        assert!(store.query("Missing", &Predicate::All).is_err());
    }

    #[test]
    fn update_and_lookup() {
        let store = store_with("Account");
        let row = store.insert("Account", json!({"Name": "Acme"})).unwrap();

        let mut record = store.lookup_by_row_id("Account", row).unwrap().unwrap();
        record.set("Name", "Acme Corp");
        record.mark_updated();
        store.update_record("Account", &record, row).unwrap();

        let stored = store.lookup_by_row_id("Account", row).unwrap().unwrap();
        assert_eq!(stored.get("Name"), Some(&json!("Acme Corp")));
        assert!(stored.is_dirty());
        assert_eq!(stored.get("__locally_updated__"), Some(&json!(true)));

        assert!(store.lookup_by_row_id("Account", RowId(99)).unwrap().is_none());
        assert!(store.lookup_by_row_id("Missing", row).unwrap().is_none());
        assert!(store.update_record("Account", &record, RowId(99)).is_err());
    }

    #[test]
    fn upsert_remote_matches_on_id() {
        let store = store_with("Account");
        let fields = |name: &str| {
            json!({"Id": "A1", "Name": name})
                .as_object()
                .cloned()
                .unwrap()
        };

        let (row, written) = store
            .upsert_remote("Account", fields("Acme"), MergeMode::Overwrite)
            .unwrap();
        assert!(written);
        let (again, written) = store
            .upsert_remote("Account", fields("Acme Corp"), MergeMode::Overwrite)
            .unwrap();
        assert!(written);
        assert_eq!(row, again);
        assert_eq!(store.records("Account").len(), 1);
        assert!(!store.records("Account")[0].is_dirty());
    }

    #[test]
    fn leave_if_changed_keeps_dirty_rows() {
        let store = store_with("Account");
        let row = store
            .insert("Account", json!({"Id": "A1", "Name": "Local edit", "__local__": true}))
            .unwrap();
        let incoming = json!({"Id": "A1", "Name": "Remote"}).as_object().cloned().unwrap();

        let (matched, written) = store
            .upsert_remote("Account", incoming, MergeMode::LeaveIfChanged)
            .unwrap();
        assert_eq!(matched, row);
        assert!(!written);
        assert_eq!(
            store.records("Account")[0].get("Name"),
            Some(&json!("Local edit"))
        );
    }

    #[test]
    fn payload_and_json() {
        let record = LocalRecord::new(
            RowId(7),
            json!({"Id": "A1", "Name": "Acme", "__local__": true})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let payload = record.payload(&["Name".to_string(), "Missing".to_string()]);
        assert_eq!(Value::Object(payload), json!({"Name": "Acme"}));
        assert_eq!(record.to_json()["_soupEntryId"], json!(7));
    }

    #[test]
    fn placeholder_is_longer_than_remote_ids() {
        assert_eq!(placeholder_id(1_700_000_000_000).len(), 19);
        assert_eq!(placeholder_id(5).len(), 19);
    }
}
