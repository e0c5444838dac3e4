//! Field declarations and well-known field names.

use serde::{Deserialize, Serialize};

/// Remote identifier field.
pub const ID: &str = "Id";
/// Remote last-modified timestamp field.
pub const LAST_MODIFIED_DATE: &str = "LastModifiedDate";
/// Set when the record carries local changes not yet pushed.
pub const LOCAL: &str = "__local__";
/// Set when the record was created locally.
pub const LOCALLY_CREATED: &str = "__locally_created__";
/// Set when the record was updated locally.
pub const LOCALLY_UPDATED: &str = "__locally_updated__";
/// Set when the record was deleted locally.
pub const LOCALLY_DELETED: &str = "__locally_deleted__";

/// Which direction a field travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldAccess {
    /// Pulled down, sent on create and on update.
    ReadWrite,
    /// Pulled down only.
    ReadOnly,
    /// Pulled down, sent on create but never on update.
    CreateOnly,
}

impl FieldAccess {
    /// Returns true if the field is part of the create list.
    pub fn on_create(&self) -> bool {
        matches!(self, FieldAccess::ReadWrite | FieldAccess::CreateOnly)
    }

    /// Returns true if the field is part of the update list.
    pub fn on_update(&self) -> bool {
        matches!(self, FieldAccess::ReadWrite)
    }
}

/// A declared syncable field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Remote field name.
    pub name: String,
    /// Direction.
    pub access: FieldAccess,
}

impl FieldSpec {
    /// Creates a field spec.
    pub fn new(name: impl Into<String>, access: FieldAccess) -> Self {
        Self {
            name: name.into(),
            access,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_lists() {
        assert!(FieldAccess::ReadWrite.on_create());
        assert!(FieldAccess::ReadWrite.on_update());
        assert!(FieldAccess::CreateOnly.on_create());
        assert!(!FieldAccess::CreateOnly.on_update());
        assert!(!FieldAccess::ReadOnly.on_create());
        assert!(!FieldAccess::ReadOnly.on_update());
    }
}
