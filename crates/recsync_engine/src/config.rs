//! Configuration for the sync engine.

use crate::options::MergeMode;

/// Default row cap for a down-sync query.
pub const DEFAULT_MAX_ROWS: u32 = 50_000;

/// Default length above which a remote id is a local placeholder.
pub const DEFAULT_REMOTE_ID_MAX_LEN: usize = 18;

/// Default cursor key holding the last pass timestamp.
pub const DEFAULT_CURSOR_KEY: &str = "lastSync";

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of rows a down-sync query may return.
    pub max_rows: u32,
    /// Remote ids longer than this many bytes are treated as not yet synced.
    ///
    /// Remote ids are ASCII, so bytes and characters agree for real ids.
    pub remote_id_max_len: usize,
    /// Cursor store key for the pass watermark.
    pub cursor_key: String,
    /// Merge mode for both directions.
    pub merge_mode: MergeMode,
    /// When set, chained entities wait for every independent entity of the
    /// same pass to finish before resolving references.
    pub await_independent: bool,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            remote_id_max_len: DEFAULT_REMOTE_ID_MAX_LEN,
            cursor_key: DEFAULT_CURSOR_KEY.to_string(),
            merge_mode: MergeMode::Overwrite,
            await_independent: false,
        }
    }

    /// Sets the down-sync row cap.
    pub fn with_max_rows(mut self, max_rows: u32) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Sets the placeholder threshold for remote ids.
    pub fn with_remote_id_max_len(mut self, len: usize) -> Self {
        self.remote_id_max_len = len;
        self
    }

    /// Sets the cursor key.
    pub fn with_cursor_key(mut self, key: impl Into<String>) -> Self {
        self.cursor_key = key.into();
        self
    }

    /// Sets the merge mode.
    pub fn with_merge_mode(mut self, mode: MergeMode) -> Self {
        self.merge_mode = mode;
        self
    }

    /// Makes chained entities wait for independent completion.
    pub fn with_await_independent(mut self, wait: bool) -> Self {
        self.await_independent = wait;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.max_rows, 50_000);
        assert_eq!(config.remote_id_max_len, 18);
        assert_eq!(config.cursor_key, "lastSync");
        assert_eq!(config.merge_mode, MergeMode::Overwrite);
        assert!(!config.await_independent);
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_max_rows(200)
            .with_remote_id_max_len(15)
            .with_cursor_key("lastSync:user42")
            .with_merge_mode(MergeMode::LeaveIfChanged)
            .with_await_independent(true);

        assert_eq!(config.max_rows, 200);
        assert_eq!(config.remote_id_max_len, 15);
        assert_eq!(config.cursor_key, "lastSync:user42");
        assert_eq!(config.merge_mode, MergeMode::LeaveIfChanged);
        assert!(config.await_independent);
    }
}
