//! Cross-entity reference declarations.
//!
//! A chained entity holds its parent as a local row id in a *source* field
//! until the parent has a remote identity, at which point the remote id is
//! written to the *destination* field. Both fields declare which entity type
//! they point at; the declaration only forms a usable pair when the two
//! targets agree.

use serde::{Deserialize, Serialize};

/// A field together with the entity type it points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    /// Field name on the declaring entity.
    pub field: String,
    /// Target entity type name.
    pub target: String,
}

impl FieldRef {
    /// Creates a field reference.
    pub fn new(field: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            target: target.into(),
        }
    }
}

/// A declared source/destination pairing, valid or not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceDecl {
    /// Field holding the parent's local row id.
    pub source: FieldRef,
    /// Field that should hold the parent's remote id.
    pub destination: FieldRef,
}

impl ReferenceDecl {
    /// Creates a declaration.
    pub fn new(source: FieldRef, destination: FieldRef) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Returns true if source and destination agree on the target type.
    pub fn is_valid(&self) -> bool {
        self.source.target == self.destination.target
    }

    /// Returns the resolved pair, or `None` when the targets disagree.
    pub fn pair(&self) -> Option<ReferencePair> {
        self.is_valid().then(|| ReferencePair {
            source_field: self.source.field.clone(),
            destination_field: self.destination.field.clone(),
            target: self.source.target.clone(),
        })
    }
}

/// A usable reference: rewrite `source_field` into `destination_field` by
/// looking up `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferencePair {
    /// Field holding the parent's local row id.
    pub source_field: String,
    /// Field that receives the parent's remote id.
    pub destination_field: String,
    /// Parent entity type name.
    pub target: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_targets_form_a_pair() {
        let decl = ReferenceDecl::new(
            FieldRef::new("parentAccountLocalId", "Account"),
            FieldRef::new("AccountId", "Account"),
        );
        let pair = decl.pair().unwrap();
        assert_eq!(pair.source_field, "parentAccountLocalId");
        assert_eq!(pair.destination_field, "AccountId");
        assert_eq!(pair.target, "Account");
    }

    #[test]
    fn mismatched_targets_are_ignored() {
        let decl = ReferenceDecl::new(
            FieldRef::new("parentLocalId", "Account"),
            FieldRef::new("OpportunityId", "Opportunity"),
        );
        assert!(!decl.is_valid());
        assert!(decl.pair().is_none());
    }
}
