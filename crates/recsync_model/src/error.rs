//! Error types for descriptor construction.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while building descriptors or registries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A required name was empty.
    #[error("{what} must not be empty")]
    EmptyName {
        /// Which name was empty.
        what: &'static str,
    },

    /// The same field was declared twice.
    #[error("field {field} declared twice on {entity}")]
    DuplicateField {
        /// Entity type name.
        entity: String,
        /// Field name.
        field: String,
    },

    /// A reference points at a destination that is not a declared field.
    #[error("reference destination {field} is not a declared field of {entity}")]
    UnknownField {
        /// Entity type name.
        entity: String,
        /// Field name.
        field: String,
    },

    /// Two descriptors were registered under the same entity name.
    #[error("entity {0} already registered")]
    DuplicateEntity(String),
}
