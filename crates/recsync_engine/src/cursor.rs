//! Pass watermark and the cursor store that persists it.
//!
//! A [`FileCursorStore`] keeps its values in a directory:
//!
//! ```text
//! <cursor_dir>/
//! ├─ LOCK      # Advisory lock for single-writer
//! └─ CURSOR    # JSON object of key → value
//! ```

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Format of the timestamp kept in the cursor store.
pub const STORED_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// Format of the timestamp embedded in down-sync queries.
pub const QUERY_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const LOCK_FILE: &str = "LOCK";
const CURSOR_FILE: &str = "CURSOR";
const CURSOR_TEMP: &str = "CURSOR.tmp";

/// The "modified since" instant bounding every down-sync of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    /// The Unix epoch, used when nothing usable is stored.
    pub fn epoch() -> Self {
        Self(DateTime::<Utc>::default())
    }

    /// The current instant.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Wraps an instant.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    /// Parses a stored value, falling back to [`Watermark::epoch`] when the
    /// value is missing or malformed.
    pub fn from_stored(raw: Option<&str>) -> Self {
        raw.and_then(|s| NaiveDateTime::parse_from_str(s.trim(), STORED_FORMAT).ok())
            .map(|naive| Self(Utc.from_utc_datetime(&naive)))
            .unwrap_or_else(Self::epoch)
    }

    /// The wrapped instant.
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Formats for storage.
    pub fn to_stored_string(&self) -> String {
        self.0.format(STORED_FORMAT).to_string()
    }

    /// Formats for a query literal.
    pub fn to_query_string(&self) -> String {
        self.0.format(QUERY_FORMAT).to_string()
    }
}

/// Persists the last-sync timestamp (and any other string values).
pub trait CursorStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &str) -> SyncResult<Option<String>>;

    /// Writes a value, replacing any previous one atomically.
    fn set(&self, key: &str, value: &str) -> SyncResult<()>;
}

/// A cursor store held in memory.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryCursorStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding one value.
    pub fn with_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        let store = Self::new();
        store.values.write().insert(key.into(), value.into());
        store
    }
}

impl CursorStore for MemoryCursorStore {
    fn get(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// A cursor store persisted to a directory.
///
/// # Thread Safety
///
/// The store holds an exclusive lock on its directory for its whole
/// lifetime; only one instance per directory can exist at a time.
#[derive(Debug)]
pub struct FileCursorStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
    _lock_file: File,
}

impl FileCursorStore {
    /// Opens or creates a cursor directory.
    ///
    /// An unreadable `CURSOR` file is logged and treated as empty, which
    /// makes the next pass start from the epoch.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CursorLocked`] if another instance holds the
    /// lock, or an I/O error.
    pub fn open(path: &Path) -> SyncResult<Self> {
        fs::create_dir_all(path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(SyncError::CursorLocked);
        }

        let values = Self::load(&path.join(CURSOR_FILE))?;

        Ok(Self {
            path: path.to_path_buf(),
            values: RwLock::new(values),
            _lock_file: lock_file,
        })
    }

    /// Directory holding the cursor files.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(file: &Path) -> SyncResult<BTreeMap<String, String>> {
        if !file.exists() {
            return Ok(BTreeMap::new());
        }
        let data = fs::read(file)?;
        if data.is_empty() {
            return Ok(BTreeMap::new());
        }
        match serde_json::from_slice(&data) {
            Ok(values) => Ok(values),
            Err(e) => {
                warn!(file = %file.display(), error = %e, "discarding unreadable cursor file");
                Ok(BTreeMap::new())
            }
        }
    }

    /// Write-then-rename so a crash never leaves a torn `CURSOR` file.
    fn save(&self, values: &BTreeMap<String, String>) -> SyncResult<()> {
        let temp_path = self.path.join(CURSOR_TEMP);
        let data = serde_json::to_vec(values)?;

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.path.join(CURSOR_FILE))?;
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> SyncResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> SyncResult<()> {
        Ok(())
    }
}

impl CursorStore for FileCursorStore {
    fn get(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        let mut values = self.values.write();
        let mut next = values.clone();
        next.insert(key.to_string(), value.to_string());
        self.save(&next)?;
        *values = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn stored_value_is_reformatted_for_queries() {
        let watermark = Watermark::from_stored(Some("05-03-2024 14:07:09"));
        assert_eq!(watermark.to_query_string(), "2024-03-05T14:07:09Z");
        assert_eq!(watermark.to_stored_string(), "05-03-2024 14:07:09");
    }

    #[test]
    fn malformed_or_missing_value_is_epoch() {
        assert_eq!(Watermark::from_stored(Some("not-a-date")), Watermark::epoch());
        assert_eq!(Watermark::from_stored(Some("")), Watermark::epoch());
        assert_eq!(Watermark::from_stored(None), Watermark::epoch());
        assert_eq!(Watermark::epoch().to_query_string(), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn now_round_trips_at_second_precision() {
        let now = Watermark::now();
        let parsed = Watermark::from_stored(Some(&now.to_stored_string()));
        assert_eq!(parsed.to_query_string(), now.to_query_string());
    }

    #[test]
    fn memory_store_get_set() {
        let store = MemoryCursorStore::with_value("lastSync", "01-01-2024 00:00:00");
        assert_eq!(store.get("lastSync").unwrap().as_deref(), Some("01-01-2024 00:00:00"));
        store.set("lastSync", "02-01-2024 00:00:00").unwrap();
        assert_eq!(store.get("lastSync").unwrap().as_deref(), Some("02-01-2024 00:00:00"));
        assert!(store.get("other").unwrap().is_none());
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("cursor");

        {
            let store = FileCursorStore::open(&path).unwrap();
            assert!(store.get("lastSync").unwrap().is_none());
            store.set("lastSync", "05-03-2024 14:07:09").unwrap();
        }

        let store = FileCursorStore::open(&path).unwrap();
        assert_eq!(store.get("lastSync").unwrap().as_deref(), Some("05-03-2024 14:07:09"));
        assert!(!path.join(CURSOR_TEMP).exists());
    }

    #[test]
    fn file_store_lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("locked");

        let _first = FileCursorStore::open(&path).unwrap();
        let second = FileCursorStore::open(&path);
        assert!(matches!(second, Err(SyncError::CursorLocked)));
    }

    #[test]
    fn file_store_lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("reopen");

        {
            let _store = FileCursorStore::open(&path).unwrap();
        }
        let _again = FileCursorStore::open(&path).unwrap();
    }

    #[test]
    fn corrupt_cursor_file_starts_empty() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("corrupt");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join(CURSOR_FILE), b"{ not json").unwrap();

        let store = FileCursorStore::open(&path).unwrap();
        assert!(store.get("lastSync").unwrap().is_none());
    }

    proptest! {
        #[test]
        fn arbitrary_stored_text_never_panics(raw in ".{0,40}") {
            let watermark = Watermark::from_stored(Some(&raw));
            prop_assert_eq!(watermark.to_query_string().len(), 20);
        }

        #[test]
        fn valid_stored_values_round_trip(
            day in 1u32..=28, month in 1u32..=12, year in 1971i32..=2099,
            hour in 0u32..24, minute in 0u32..60, second in 0u32..60,
        ) {
            let raw = format!("{day:02}-{month:02}-{year} {hour:02}:{minute:02}:{second:02}");
            let watermark = Watermark::from_stored(Some(&raw));
            prop_assert_eq!(watermark.to_stored_string(), raw);
            prop_assert!(watermark > Watermark::epoch());
        }
    }
}
