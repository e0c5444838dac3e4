//! Sync status reported by the transport and per-invocation run state.

use std::fmt;

/// Identifier of an incremental down-sync handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncHandleId(pub i64);

impl fmt::Display for SyncHandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote status of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Still in flight.
    Running,
    /// Completed successfully.
    Done,
    /// Completed with an error.
    Failed,
}

impl SyncStatus {
    /// Returns true for `Done` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Done | SyncStatus::Failed)
    }
}

/// A status update delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    /// Handle of the sync this update belongs to.
    pub id: SyncHandleId,
    /// Current status.
    pub status: SyncStatus,
    /// Total rows involved, when known.
    pub total_size: u64,
    /// Local table name.
    pub table: String,
}

impl SyncState {
    /// Creates a status update.
    pub fn new(id: SyncHandleId, status: SyncStatus, total_size: u64, table: impl Into<String>) -> Self {
        Self {
            id,
            status,
            total_size,
            table: table.into(),
        }
    }

    /// Running update.
    pub fn running(id: SyncHandleId, table: impl Into<String>) -> Self {
        Self::new(id, SyncStatus::Running, 0, table)
    }

    /// Successful terminal update.
    pub fn done(id: SyncHandleId, total_size: u64, table: impl Into<String>) -> Self {
        Self::new(id, SyncStatus::Done, total_size, table)
    }

    /// Failed terminal update.
    pub fn failed(id: SyncHandleId, table: impl Into<String>) -> Self {
        Self::new(id, SyncStatus::Failed, 0, table)
    }
}

/// State of one entity syncher across its current invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Nothing has run yet.
    Idle,
    /// An up or down sync is in flight.
    Running,
    /// The last invocation finished with `Done`.
    Done,
    /// The last invocation failed or was aborted.
    Failed,
}

impl RunState {
    /// Returns true while an invocation is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Running)
    }
}

/// Final result of an entity syncher invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The remote reported `Done`.
    Done(SyncState),
    /// The remote reported `Failed`.
    Failed(SyncState),
    /// The operation never reached the remote, or its status stream broke.
    Aborted(String),
}

impl SyncOutcome {
    /// Returns true for `Done`.
    pub fn is_done(&self) -> bool {
        matches!(self, SyncOutcome::Done(_))
    }

    /// The terminal state, if the remote reported one.
    pub fn state(&self) -> Option<&SyncState> {
        match self {
            SyncOutcome::Done(state) | SyncOutcome::Failed(state) => Some(state),
            SyncOutcome::Aborted(_) => None,
        }
    }

    pub(crate) fn run_state(&self) -> RunState {
        if self.is_done() {
            RunState::Done
        } else {
            RunState::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_checks() {
        assert!(SyncStatus::Done.is_terminal());
        assert!(SyncStatus::Failed.is_terminal());
        assert!(!SyncStatus::Running.is_terminal());

        assert!(RunState::Running.is_active());
        assert!(!RunState::Idle.is_active());
        assert!(!RunState::Failed.is_active());
    }

    #[test]
    fn outcome_accessors() {
        let done = SyncOutcome::Done(SyncState::done(SyncHandleId(3), 12, "Account"));
        assert!(done.is_done());
        assert_eq!(done.state().unwrap().total_size, 12);
        assert_eq!(done.run_state(), RunState::Done);

        let aborted = SyncOutcome::Aborted("no runtime".into());
        assert!(aborted.state().is_none());
        assert_eq!(aborted.run_state(), RunState::Failed);
    }
}
