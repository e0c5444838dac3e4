//! Local-to-remote reference resolution for chained entities.
//!
//! A chained record points at its parent through a local row id until the
//! parent has been pushed. Before the child is pushed, every such pointer
//! whose parent now carries a real remote id is rewritten into the
//! destination field and the source field is cleared.

use crate::error::SyncResult;
use crate::store::{LocalStore, Predicate, RowId};
use recsync_model::{DescriptorProvider, EntityDescriptor};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Counts from one resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Records written back to the store.
    pub records_updated: usize,
    /// Reference fields rewritten.
    pub fields_resolved: usize,
    /// Reference fields left for a later pass.
    pub fields_deferred: usize,
}

impl ResolveReport {
    /// Returns true if the pass wrote nothing.
    pub fn is_noop(&self) -> bool {
        self.records_updated == 0
    }
}

/// Rewrites local parent pointers into remote ids.
pub struct ChainResolver<S> {
    store: Arc<S>,
    provider: Arc<dyn DescriptorProvider>,
    remote_id_max_len: usize,
}

impl<S: LocalStore> ChainResolver<S> {
    /// Creates a resolver. Remote ids longer than `remote_id_max_len` are
    /// placeholders and block resolution.
    pub fn new(store: Arc<S>, provider: Arc<dyn DescriptorProvider>, remote_id_max_len: usize) -> Self {
        Self {
            store,
            provider,
            remote_id_max_len,
        }
    }

    /// Resolves every valid reference pair of `descriptor` across its table.
    ///
    /// Records whose parent row is missing, has no remote id, or still has a
    /// placeholder id are left untouched. A second run over unchanged data
    /// writes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails to read or write.
    pub fn resolve(&self, descriptor: &EntityDescriptor) -> SyncResult<ResolveReport> {
        let entity = descriptor.entity();
        let table = descriptor.object_name();
        let mut report = ResolveReport::default();

        for decl in descriptor.mismatched_references() {
            warn!(
                entity,
                source = %decl.source.field,
                source_target = %decl.source.target,
                destination = %decl.destination.field,
                destination_target = %decl.destination.target,
                "skipping reference with mismatched targets"
            );
        }

        let pairs = descriptor.reference_pairs();
        if pairs.is_empty() || !self.store.has_table(table) {
            return Ok(report);
        }

        let mut parent_tables: HashMap<&str, Option<String>> = HashMap::new();
        for pair in &pairs {
            parent_tables.entry(pair.target.as_str()).or_insert_with(|| {
                let found = self
                    .provider
                    .descriptor(&pair.target)
                    .map(|d| d.object_name().to_string());
                if found.is_none() {
                    warn!(entity, target = %pair.target, "reference target has no descriptor");
                }
                found
            });
        }

        for mut record in self.store.query(table, &Predicate::All)? {
            let mut changed = false;

            for pair in &pairs {
                let parent_row = match record.get(&pair.source_field) {
                    None | Some(Value::Null) => continue,
                    Some(value) => match value.as_i64() {
                        Some(row) => row,
                        None => {
                            debug!(
                                entity,
                                row = %record.entry_id(),
                                field = %pair.source_field,
                                value = %value,
                                "deferring reference with a non-integer row id"
                            );
                            report.fields_deferred += 1;
                            continue;
                        }
                    },
                };
                let parent = match parent_tables.get(pair.target.as_str()) {
                    Some(Some(parent_table)) => {
                        self.store.lookup_by_row_id(parent_table, RowId(parent_row))?
                    }
                    _ => None,
                };
                let remote_id = parent
                    .as_ref()
                    .and_then(|p| p.remote_id())
                    .filter(|id| !id.is_empty() && id.len() <= self.remote_id_max_len)
                    .map(str::to_string);

                match remote_id {
                    Some(remote_id) => {
                        record.set(pair.destination_field.as_str(), remote_id);
                        record.clear(&pair.source_field);
                        report.fields_resolved += 1;
                        changed = true;
                    }
                    None => {
                        debug!(
                            entity,
                            row = %record.entry_id(),
                            parent_row,
                            target = %pair.target,
                            "deferring unresolved reference"
                        );
                        report.fields_deferred += 1;
                    }
                }
            }

            if changed {
                record.mark_updated();
                self.store.update_record(table, &record, record.entry_id())?;
                report.records_updated += 1;
            }
        }

        debug!(
            entity,
            updated = report.records_updated,
            resolved = report.fields_resolved,
            deferred = report.fields_deferred,
            "reference resolution finished"
        );
        Ok(report)
    }
}
