//! # recsync Engine
//!
//! Bidirectional sync between a local object store and a remote
//! record-oriented API.
//!
//! This crate provides:
//! - Entity synchers (push dirty records, pull with incremental handles)
//! - Chain resolution of local parent pointers into remote ids
//! - Pass orchestration over independent and chained entity types
//! - A persistent cursor store for the pass watermark
//! - Store and transport abstractions with in-memory implementations
//!
//! ## Architecture
//!
//! A pass runs in three stages:
//! 1. Read the watermark from the cursor store (epoch if absent)
//! 2. Sync independent entities concurrently, chained entities one at a
//!    time after resolving their references
//! 3. Persist the pass start time as the next watermark
//!
//! The watermark is written before any entity work is released, so no
//! completion callback of a pass can observe the previous value.
//!
//! ## Key Invariants
//!
//! - A syncher never rebuilds its down-sync query once it holds a handle
//! - Chained entities never push placeholder parent ids
//! - Errors inside a syncher never escape it
//! - One pass at a time per orchestrator

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod callback;
mod chain;
mod config;
mod cursor;
mod error;
mod options;
mod orchestrator;
mod state;
mod store;
mod syncher;
mod transport;

pub use callback::{CallbackEvent, NoopCallback, RecordingCallback, SyncCallback};
pub use chain::{ChainResolver, ResolveReport};
pub use config::{SyncConfig, DEFAULT_CURSOR_KEY, DEFAULT_MAX_ROWS, DEFAULT_REMOTE_ID_MAX_LEN};
pub use cursor::{CursorStore, FileCursorStore, MemoryCursorStore, Watermark, QUERY_FORMAT, STORED_FORMAT};
pub use error::{SyncError, SyncResult};
pub use options::{MergeMode, SyncOptions};
pub use orchestrator::{EntityReport, PassReport, SyncKind, SyncOrchestrator, SyncPass};
pub use state::{RunState, SyncHandleId, SyncOutcome, SyncState, SyncStatus};
pub use store::{placeholder_id, LocalRecord, LocalStore, MemoryStore, Predicate, RowId, ENTRY_ID_FIELD};
pub use syncher::EntitySyncher;
pub use transport::{
    build_query, MockTransport, StatusReceiver, StatusSender, SyncDownTarget, SyncTransport,
    SyncUpTarget, Upload,
};
