//! # recsync Model
//!
//! Static entity descriptors for recsync.
//!
//! This crate provides:
//! - `EntityDescriptor` built once per entity type (remote object name,
//!   field lists, index specs, entity predicate, reference declarations)
//! - `ReferencePair` resolution between local parent ids and remote ids
//! - `DescriptorProvider` and the `ModelRegistry` implementation
//!
//! This is a pure model crate with no I/O operations. Descriptors are
//! immutable once built and are shared behind `Arc`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod descriptor;
mod error;
pub mod field;
mod index;
mod reference;
mod registry;

pub use descriptor::{EntityDescriptor, EntityDescriptorBuilder};
pub use error::{ModelError, ModelResult};
pub use field::{FieldAccess, FieldSpec};
pub use index::{IndexKind, IndexSpec};
pub use reference::{FieldRef, ReferenceDecl, ReferencePair};
pub use registry::{DescriptorProvider, ModelRegistry};
