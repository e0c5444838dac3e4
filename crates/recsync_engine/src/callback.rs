//! Completion callbacks for entity synchers.

use crate::state::SyncState;
use crate::store::LocalRecord;
use parking_lot::Mutex;
use serde_json::Value;

/// Receives terminal outcomes of up and down syncs.
///
/// Every method defaults to doing nothing. Callbacks run on the task that
/// drove the sync and must not block.
pub trait SyncCallback: Send + Sync {
    /// An up-sync finished with `Done`.
    fn on_up_success(&self, _state: &SyncState) {}

    /// An up-sync finished with `Failed`. `record` is set when a single
    /// record drove the up-sync.
    fn on_up_failure(&self, _state: &SyncState, _record: Option<&LocalRecord>) {}

    /// A down-sync finished with `Done` after receiving `total` rows.
    fn on_down_success(&self, _state: &SyncState, _total: u64) {}

    /// A down-sync finished with `Failed`.
    fn on_down_failure(&self, _state: &SyncState) {}
}

/// A callback that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallback;

impl SyncCallback for NoopCallback {}

/// An event seen by [`RecordingCallback`].
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackEvent {
    /// Up-sync succeeded.
    UpSuccess {
        /// Table synced.
        table: String,
    },
    /// Up-sync failed.
    UpFailure {
        /// Table synced.
        table: String,
        /// JSON form of the offending record, if any.
        record: Option<Value>,
    },
    /// Down-sync succeeded.
    DownSuccess {
        /// Table synced.
        table: String,
        /// Rows received.
        total: u64,
    },
    /// Down-sync failed.
    DownFailure {
        /// Table synced.
        table: String,
    },
}

impl CallbackEvent {
    /// Table the event refers to.
    pub fn table(&self) -> &str {
        match self {
            CallbackEvent::UpSuccess { table }
            | CallbackEvent::UpFailure { table, .. }
            | CallbackEvent::DownSuccess { table, .. }
            | CallbackEvent::DownFailure { table } => table,
        }
    }
}

/// A callback that keeps every event in arrival order.
#[derive(Debug, Default)]
pub struct RecordingCallback {
    events: Mutex<Vec<CallbackEvent>>,
}

impl RecordingCallback {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events so far.
    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().clone()
    }

    /// Events for one table.
    pub fn events_for(&self, table: &str) -> Vec<CallbackEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.table() == table)
            .cloned()
            .collect()
    }

    fn push(&self, event: CallbackEvent) {
        self.events.lock().push(event);
    }
}

impl SyncCallback for RecordingCallback {
    fn on_up_success(&self, state: &SyncState) {
        self.push(CallbackEvent::UpSuccess {
            table: state.table.clone(),
        });
    }

    fn on_up_failure(&self, state: &SyncState, record: Option<&LocalRecord>) {
        self.push(CallbackEvent::UpFailure {
            table: state.table.clone(),
            record: record.map(LocalRecord::to_json),
        });
    }

    fn on_down_success(&self, state: &SyncState, total: u64) {
        self.push(CallbackEvent::DownSuccess {
            table: state.table.clone(),
            total,
        });
    }

    fn on_down_failure(&self, state: &SyncState) {
        self.push(CallbackEvent::DownFailure {
            table: state.table.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SyncHandleId;

    #[test]
    fn recorder_keeps_order_and_filters() {
        let recorder = RecordingCallback::new();
        recorder.on_down_success(&SyncState::done(SyncHandleId(1), 3, "Account"), 3);
        recorder.on_up_failure(&SyncState::failed(SyncHandleId(2), "Contact"), None);

        assert_eq!(recorder.events().len(), 2);
        assert_eq!(
            recorder.events_for("Account"),
            vec![CallbackEvent::DownSuccess {
                table: "Account".into(),
                total: 3
            }]
        );
    }

    #[test]
    fn noop_accepts_everything() {
        let state = SyncState::done(SyncHandleId(1), 0, "Account");
        NoopCallback.on_up_success(&state);
        NoopCallback.on_down_failure(&state);
    }
}
