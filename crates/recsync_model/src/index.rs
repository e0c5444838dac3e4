//! Index specifications handed to the local store when a table is registered.

use serde::{Deserialize, Serialize};

/// Index column type understood by the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Text column.
    String,
    /// Integer column.
    Integer,
    /// Floating point column.
    Floating,
    /// Full-text searchable column.
    FullText,
    /// JSON extraction index.
    Json1,
}

/// One index on a local table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Field path being indexed.
    pub path: String,
    /// Column type.
    pub kind: IndexKind,
}

impl IndexSpec {
    /// Creates an index spec.
    pub fn new(path: impl Into<String>, kind: IndexKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Shorthand for a string index.
    pub fn string(path: impl Into<String>) -> Self {
        Self::new(path, IndexKind::String)
    }

    /// Shorthand for an integer index.
    pub fn integer(path: impl Into<String>) -> Self {
        Self::new(path, IndexKind::Integer)
    }

    /// Shorthand for a full-text index.
    pub fn full_text(path: impl Into<String>) -> Self {
        Self::new(path, IndexKind::FullText)
    }
}
