//! Entity store: governed writes over a graph backend
//!
//! All mutation goes through [`EntityStore`]. A write is serialized per
//! entity id with a keyed mutex, retried a bounded number of times on
//! backend errors, and bounded by the caller's deadline. The write order
//! inside `store_entity` is fixed: conflict detection, internal reference
//! existence, external dependency auto-creation, entity upsert,
//! relationship replace-set.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::canonical::CanonicalRef;
use crate::document::EntityRecord;
use crate::error::{ConflictKind, KgError, Result, StorageFailure};
use crate::registry::SchemaSnapshot;
use crate::schema::{DeletionPolicy, Direction};
use crate::validation::ReferenceLookup;

use super::backend::{Deadline, GraphBackend};
use super::conflict::ConflictDetector;
use super::models::{DryRunResult, EntityFilter, EntityOperation, StoredEntity};

/// Entity type names for auto-created external nodes
pub const EXTERNAL_PACKAGE_TYPE: &str = "external_dependency";
pub const EXTERNAL_VERSION_TYPE: &str = "external_dependency_version";
/// Edge from a package node to each of its version nodes
pub const HAS_VERSION_EDGE: &str = "has_version";

const MAX_ATTEMPTS: usize = 3;
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Governed write/read surface over one graph backend
pub struct EntityStore {
    backend: Arc<dyn GraphBackend>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    op_timeout: Duration,
}

impl EntityStore {
    pub fn new(backend: Arc<dyn GraphBackend>) -> Self {
        Self::with_timeout(backend, DEFAULT_OP_TIMEOUT)
    }

    pub fn with_timeout(backend: Arc<dyn GraphBackend>, op_timeout: Duration) -> Self {
        EntityStore {
            backend,
            locks: Mutex::new(HashMap::new()),
            op_timeout,
        }
    }

    pub fn backend(&self) -> &dyn GraphBackend {
        self.backend.as_ref()
    }

    /// Deadline used when the caller does not bring one
    pub fn default_deadline(&self) -> Deadline {
        Deadline::after(self.op_timeout)
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        // Entries nobody else holds are stale; sweeping here keeps the
        // table proportional to the number of in-flight writes
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(
            locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    #[cfg(test)]
    fn lock_table_len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Retry backend failures up to the attempt budget; timeouts and
    /// conflicts propagate immediately
    fn with_retries<T>(
        &self,
        deadline: Deadline,
        what: &str,
        mut op: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(KgError::StorageOperation {
                    failure: StorageFailure::Backend,
                    context,
                }) => {
                    if attempt >= MAX_ATTEMPTS || deadline.expired() {
                        return Err(KgError::StorageOperation {
                            failure: StorageFailure::RetryExhausted,
                            context,
                        });
                    }
                    warn!(attempt, what, "backend error, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Store one entity with full governance. Returns what happened to the
    /// entity node plus the ids of any auto-created external nodes.
    pub fn store_entity(
        &self,
        record: &EntityRecord,
        snapshot: &SchemaSnapshot,
        source: Option<&str>,
        deadline: Deadline,
    ) -> Result<(EntityOperation, Vec<String>)> {
        self.store_entity_in_batch(record, snapshot, source, &BTreeSet::new(), deadline)
    }

    /// Variant for multi-entity documents: ids in `batch` count as present
    /// even when their records have not committed yet.
    pub fn store_entity_in_batch(
        &self,
        record: &EntityRecord,
        snapshot: &SchemaSnapshot,
        source: Option<&str>,
        batch: &BTreeSet<String>,
        deadline: Deadline,
    ) -> Result<(EntityOperation, Vec<String>)> {
        let schema = snapshot
            .schema(&record.entity_type)
            .ok_or_else(|| KgError::UnknownEntityType(record.entity_type.clone()))?;

        // Resolve references up front so a bad one aborts before any write
        let mut resolved: Vec<(String, Vec<String>)> = Vec::new();
        let mut externals: BTreeSet<CanonicalRef> = BTreeSet::new();
        let mut internals: BTreeSet<String> = BTreeSet::new();
        for (rel_name, raw_refs) in &record.relationships {
            if schema.relationship(rel_name).is_none() {
                return Err(KgError::SchemaLoad(format!(
                    "'{}' has no relationship '{rel_name}'",
                    record.entity_type
                )));
            }
            let mut targets = Vec::new();
            for raw in raw_refs {
                let canonical = CanonicalRef::canonicalize(raw)?;
                if canonical.is_external() {
                    externals.insert(canonical.clone());
                } else {
                    internals.insert(canonical.entity_id());
                }
                targets.push(canonical.entity_id());
            }
            resolved.push((rel_name.clone(), targets));
        }

        let entity_id = record.entity_id();
        let lock = self.lock_for(&entity_id);
        let _guard = lock.lock();

        self.with_retries(deadline, "store_entity", || {
            ConflictDetector::check(self.backend.as_ref(), record, deadline)?;

            // Internal targets must exist before any edge to them is
            // written; external ones are auto-created below
            for target in &internals {
                if *target == entity_id || batch.contains(target) {
                    continue;
                }
                if !self.backend.entity_exists(target, deadline)? {
                    return Err(KgError::DanglingReference {
                        entity_id: entity_id.clone(),
                        target_id: target.clone(),
                    });
                }
            }

            let mut auto_created = Vec::new();
            for canonical in &externals {
                auto_created.extend(self.ensure_external_dependency(canonical, deadline)?);
            }

            let mut entity = StoredEntity::new(entity_id.clone(), record.entity_type.clone());
            entity.metadata = record.metadata.clone();
            entity.namespace = Some(record.namespace.clone());
            entity.source_name = source.map(str::to_string);
            let operation = self.backend.upsert_entity(&entity, deadline)?;

            for (rel_name, targets) in &resolved {
                let delta =
                    self.backend
                        .replace_edges(&entity_id, rel_name, targets, deadline)?;
                if !delta.is_noop() {
                    debug!(
                        entity = %entity_id,
                        relationship = %rel_name,
                        added = delta.added.len(),
                        removed = delta.removed.len(),
                        "relationship set replaced"
                    );
                }
            }

            info!(entity = %entity_id, ?operation, "entity stored");
            Ok((operation, auto_created))
        })
    }

    /// Make sure the package and version nodes for one external reference
    /// exist; returns the ids of nodes created by this call. Existing nodes
    /// are never modified, external versions are immutable.
    pub fn ensure_external_dependency(
        &self,
        canonical: &CanonicalRef,
        deadline: Deadline,
    ) -> Result<Vec<String>> {
        let CanonicalRef::External {
            ecosystem,
            package,
            version,
        } = canonical
        else {
            return Ok(Vec::new());
        };
        let Some(package_id) = canonical.package_id() else {
            return Ok(Vec::new());
        };
        let version_id = canonical.entity_id();

        let lock = self.lock_for(&package_id);
        let _guard = lock.lock();

        let mut created = Vec::new();
        if !self.backend.entity_exists(&package_id, deadline)? {
            let mut node = StoredEntity::new(package_id.clone(), EXTERNAL_PACKAGE_TYPE);
            node.metadata.insert("ecosystem".to_string(), json!(ecosystem));
            node.metadata.insert("package".to_string(), json!(package));
            self.backend.upsert_entity(&node, deadline)?;
            created.push(package_id.clone());
        }
        if !self.backend.entity_exists(&version_id, deadline)? {
            let mut node = StoredEntity::new(version_id.clone(), EXTERNAL_VERSION_TYPE);
            node.metadata.insert("ecosystem".to_string(), json!(ecosystem));
            node.metadata.insert("package".to_string(), json!(package));
            node.metadata.insert("version".to_string(), json!(version));
            self.backend.upsert_entity(&node, deadline)?;
            created.push(version_id.clone());
        }
        self.backend
            .add_edge(&package_id, HAS_VERSION_EDGE, &version_id, deadline)?;

        if !created.is_empty() {
            info!(package = %package_id, version = %version_id, "external dependency auto-created");
        }
        Ok(created)
    }

    /// Number of distinct entities holding at least one inbound edge,
    /// `has_version` bookkeeping excluded
    pub fn reference_count(&self, id: &str, deadline: Deadline) -> Result<usize> {
        let referencers: BTreeSet<String> = self
            .backend
            .inbound_edges(id, None, deadline)?
            .into_iter()
            .filter(|e| e.name != HAS_VERSION_EDGE)
            .map(|e| e.from)
            .collect();
        Ok(referencers.len())
    }

    /// Delete a reference-counted entity. Blocked while live inbound
    /// references exist; never available for never-delete types.
    pub fn delete_entity(
        &self,
        id: &str,
        snapshot: &SchemaSnapshot,
        deadline: Deadline,
    ) -> Result<bool> {
        let lock = self.lock_for(id);
        let _guard = lock.lock();

        let Some(entity) = self.backend.get_entity(id, deadline)? else {
            return Ok(false);
        };
        let schema = snapshot
            .schema(&entity.entity_type)
            .ok_or_else(|| KgError::UnknownEntityType(entity.entity_type.clone()))?;
        if schema.deletion_policy == DeletionPolicy::NeverDelete {
            return Err(KgError::DeletionNotAllowed {
                entity_id: id.to_string(),
                reason: format!(
                    "'{}' entities are never deleted, only unlinked",
                    entity.entity_type
                ),
            });
        }

        let referenced_by: BTreeSet<String> = self
            .backend
            .inbound_edges(id, None, deadline)?
            .into_iter()
            .filter(|e| e.name != HAS_VERSION_EDGE)
            .map(|e| e.from)
            .collect();
        if !referenced_by.is_empty() {
            return Err(KgError::Conflict {
                kind: ConflictKind::ReferencedEntity,
                detail: format!(
                    "'{id}' is referenced by {} entit{}",
                    referenced_by.len(),
                    if referenced_by.len() == 1 { "y" } else { "ies" }
                ),
                parties: referenced_by.into_iter().collect(),
            });
        }

        self.with_retries(deadline, "delete_entity", || {
            // Outbound edges go first; removing them releases this
            // entity's claims on external versions
            for edge in self.backend.outbound_edges(id, None, deadline)? {
                self.backend
                    .remove_edge(&edge.from, &edge.name, &edge.to, deadline)?;
            }
            let deleted = self.backend.delete_entity(id, deadline)?;
            info!(entity = %id, "entity deleted");
            Ok(deleted)
        })
    }

    /// Drop one reference edge without touching the target node. This is
    /// the only way external nodes lose references.
    pub fn unlink_reference(
        &self,
        from: &str,
        relationship: &str,
        target: &str,
        deadline: Deadline,
    ) -> Result<bool> {
        self.backend.remove_edge(from, relationship, target, deadline)
    }

    /// Ids of entities related to `id`, honoring the relationship
    /// direction
    pub fn find_entities_with_relationship(
        &self,
        id: &str,
        relationship: Option<&str>,
        direction: Direction,
        deadline: Deadline,
    ) -> Result<Vec<String>> {
        let mut ids = BTreeSet::new();
        if matches!(direction, Direction::Outbound | Direction::Bidirectional) {
            for edge in self.backend.outbound_edges(id, relationship, deadline)? {
                ids.insert(edge.to);
            }
        }
        if matches!(direction, Direction::Inbound | Direction::Bidirectional) {
            for edge in self.backend.inbound_edges(id, relationship, deadline)? {
                ids.insert(edge.from);
            }
        }
        Ok(ids.into_iter().collect())
    }

    pub fn get_entity(&self, id: &str, deadline: Deadline) -> Result<Option<StoredEntity>> {
        self.backend.get_entity(id, deadline)
    }

    pub fn list_entities(
        &self,
        filter: &EntityFilter,
        limit: usize,
        offset: usize,
        deadline: Deadline,
    ) -> Result<Vec<StoredEntity>> {
        self.backend.list_entities(filter, limit, offset, deadline)
    }

    /// Resolve what an apply would do without committing anything
    pub fn dry_run_apply(
        &self,
        records: &[EntityRecord],
        deadline: Deadline,
    ) -> Result<DryRunResult> {
        let mut result = DryRunResult::default();
        let mut auto: BTreeSet<String> = BTreeSet::new();

        for record in records {
            let id = record.entity_id();
            if self.backend.entity_exists(&id, deadline)? {
                result.would_update.push(id);
            } else {
                result.would_create.push(id);
            }

            for raw_refs in record.relationships.values() {
                for raw in raw_refs {
                    let canonical = CanonicalRef::canonicalize(raw)?;
                    if !canonical.is_external() {
                        continue;
                    }
                    if let Some(package_id) = canonical.package_id() {
                        if !self.backend.entity_exists(&package_id, deadline)? {
                            auto.insert(package_id);
                        }
                    }
                    let version_id = canonical.entity_id();
                    if !self.backend.entity_exists(&version_id, deadline)? {
                        auto.insert(version_id);
                    }
                }
            }
        }

        result.would_auto_create = auto.into_iter().collect();
        Ok(result)
    }
}

impl ReferenceLookup for EntityStore {
    fn entity_exists(&self, entity_id: &str) -> Result<bool> {
        self.backend.entity_exists(entity_id, self.default_deadline())
    }
}
