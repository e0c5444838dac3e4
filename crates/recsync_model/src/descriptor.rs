//! Per-entity descriptors.

use crate::error::{ModelError, ModelResult};
use crate::field::{self, FieldAccess, FieldSpec};
use crate::index::IndexSpec;
use crate::reference::{FieldRef, ReferenceDecl, ReferencePair};
use std::collections::HashSet;

/// Everything the sync engine needs to know about one entity type.
///
/// Built once through [`EntityDescriptor::builder`] and never mutated.
///
/// # Example
///
/// ```rust
/// use recsync_model::EntityDescriptor;
///
/// let contact = EntityDescriptor::builder("Contact", "Contact")
///     .field("LastName")
///     .field("AccountId")
///     .local_parent("parentAccountLocalId", "AccountId", "Account")
///     .predicate("AND IsDeleted = false")
///     .build()
///     .unwrap();
///
/// assert_eq!(contact.reference_pairs().len(), 1);
/// assert_eq!(contact.predicate(), Some("IsDeleted = false"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    entity: String,
    object_name: String,
    fields: Vec<FieldSpec>,
    indexes: Vec<IndexSpec>,
    predicate: Option<String>,
    references: Vec<ReferenceDecl>,
}

impl EntityDescriptor {
    /// Starts a builder for `entity`, stored remotely as `object_name`.
    pub fn builder(
        entity: impl Into<String>,
        object_name: impl Into<String>,
    ) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            entity: entity.into(),
            object_name: object_name.into(),
            fields: Vec::new(),
            indexes: Vec::new(),
            predicate: None,
            references: Vec::new(),
        }
    }

    /// Entity type name (used by reference targets and registration).
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Remote object name, also the local table name.
    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    /// Declared fields in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Fields requested on down-sync: `Id`, `LastModifiedDate`, then every
    /// declared field.
    pub fn fields_down(&self) -> Vec<String> {
        let mut out = vec![field::ID.to_string(), field::LAST_MODIFIED_DATE.to_string()];
        for spec in &self.fields {
            if !out.iter().any(|f| f == &spec.name) {
                out.push(spec.name.clone());
            }
        }
        out
    }

    /// Fields sent when a record is created remotely.
    pub fn fields_create(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.access.on_create())
            .map(|f| f.name.clone())
            .collect()
    }

    /// Fields sent when an existing remote record is updated.
    pub fn fields_update(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.access.on_update())
            .map(|f| f.name.clone())
            .collect()
    }

    /// Index specs for the local table.
    ///
    /// Always starts with `Id`, `LastModifiedDate` and `__local__`, followed
    /// by an integer index per reference source field and then the declared
    /// indexes. Duplicated paths are dropped.
    pub fn index_specs(&self) -> Vec<IndexSpec> {
        let mut out = vec![
            IndexSpec::string(field::ID),
            IndexSpec::string(field::LAST_MODIFIED_DATE),
            IndexSpec::string(field::LOCAL),
        ];
        let sources = self
            .references
            .iter()
            .map(|r| IndexSpec::integer(r.source.field.clone()));
        for spec in sources.chain(self.indexes.iter().cloned()) {
            if !out.iter().any(|s| s.path == spec.path) {
                out.push(spec);
            }
        }
        out
    }

    /// Entity-specific query predicate, without a leading `AND`.
    pub fn predicate(&self) -> Option<&str> {
        self.predicate.as_deref()
    }

    /// Every reference declaration, valid or not.
    pub fn reference_decls(&self) -> &[ReferenceDecl] {
        &self.references
    }

    /// Declarations whose source and destination agree on the target.
    pub fn reference_pairs(&self) -> Vec<ReferencePair> {
        self.references.iter().filter_map(ReferenceDecl::pair).collect()
    }

    /// Declarations skipped because their targets disagree.
    pub fn mismatched_references(&self) -> Vec<&ReferenceDecl> {
        self.references.iter().filter(|r| !r.is_valid()).collect()
    }

    /// Returns true if this entity references any other entity.
    pub fn has_references(&self) -> bool {
        !self.references.is_empty()
    }
}

/// Builder for [`EntityDescriptor`].
#[derive(Debug, Clone)]
pub struct EntityDescriptorBuilder {
    entity: String,
    object_name: String,
    fields: Vec<FieldSpec>,
    indexes: Vec<IndexSpec>,
    predicate: Option<String>,
    references: Vec<ReferenceDecl>,
}

impl EntityDescriptorBuilder {
    /// Declares a field synced in both directions.
    pub fn field(self, name: impl Into<String>) -> Self {
        self.field_with(name, FieldAccess::ReadWrite)
    }

    /// Declares a field that is only pulled down.
    pub fn read_only_field(self, name: impl Into<String>) -> Self {
        self.field_with(name, FieldAccess::ReadOnly)
    }

    /// Declares a field sent on create but left out of updates.
    pub fn create_only_field(self, name: impl Into<String>) -> Self {
        self.field_with(name, FieldAccess::CreateOnly)
    }

    /// Declares a field with explicit access.
    pub fn field_with(mut self, name: impl Into<String>, access: FieldAccess) -> Self {
        self.fields.push(FieldSpec::new(name, access));
        self
    }

    /// Adds a local index.
    pub fn index(mut self, spec: IndexSpec) -> Self {
        self.indexes.push(spec);
        self
    }

    /// Sets the entity-specific down-sync predicate.
    ///
    /// A leading `AND` is accepted and stripped; the engine joins the
    /// predicate to the watermark clause itself.
    pub fn predicate(mut self, predicate: impl Into<String>) -> Self {
        let raw = predicate.into();
        let trimmed = raw.trim();
        let stripped = match (trimmed.get(..3), trimmed.get(3..)) {
            (Some(head), Some(rest))
                if head.eq_ignore_ascii_case("and")
                    && rest.chars().next().map_or(true, char::is_whitespace) =>
            {
                rest.trim_start()
            }
            _ => trimmed,
        };
        self.predicate = (!stripped.is_empty()).then(|| stripped.to_string());
        self
    }

    /// Adds a raw reference declaration. Declarations whose targets
    /// disagree are kept but never resolved.
    pub fn reference(mut self, decl: ReferenceDecl) -> Self {
        self.references.push(decl);
        self
    }

    /// Declares that `source` holds a local row id of `target` which must be
    /// rewritten into the remote id field `destination`.
    pub fn local_parent(
        self,
        source: impl Into<String>,
        destination: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        let target = target.into();
        self.reference(ReferenceDecl::new(
            FieldRef::new(source, target.clone()),
            FieldRef::new(destination, target),
        ))
    }

    /// Validates and builds the descriptor.
    pub fn build(self) -> ModelResult<EntityDescriptor> {
        if self.entity.trim().is_empty() {
            return Err(ModelError::EmptyName {
                what: "entity name",
            });
        }
        if self.object_name.trim().is_empty() {
            return Err(ModelError::EmptyName {
                what: "object name",
            });
        }

        let mut seen = HashSet::new();
        for spec in &self.fields {
            if spec.name.trim().is_empty() {
                return Err(ModelError::EmptyName { what: "field name" });
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(ModelError::DuplicateField {
                    entity: self.entity.clone(),
                    field: spec.name.clone(),
                });
            }
        }

        for decl in &self.references {
            if decl.source.field.trim().is_empty() {
                return Err(ModelError::EmptyName {
                    what: "reference source field",
                });
            }
            if !seen.contains(decl.destination.field.as_str()) {
                return Err(ModelError::UnknownField {
                    entity: self.entity.clone(),
                    field: decl.destination.field.clone(),
                });
            }
        }

        Ok(EntityDescriptor {
            entity: self.entity,
            object_name: self.object_name,
            fields: self.fields,
            indexes: self.indexes,
            predicate: self.predicate,
            references: self.references,
        })
    }
}
