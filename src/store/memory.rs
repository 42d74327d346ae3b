//! In-memory graph backend
//!
//! Reference implementation of [`GraphBackend`] used by tests and local
//! mode. A single `RwLock` over two maps is plenty here; atomicity per
//! operation falls out of holding the write guard.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{KgError, Result};

use super::backend::{Deadline, GraphBackend};
use super::models::{Edge, EdgeDelta, EntityFilter, EntityOperation, StoredEntity};

#[derive(Default)]
struct Inner {
    entities: BTreeMap<String, StoredEntity>,
    edges: BTreeSet<Edge>,
}

/// Process-local graph store
#[derive(Default)]
pub struct InMemoryBackend {
    inner: RwLock<Inner>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_deadline(deadline: Deadline, operation: &str) -> Result<()> {
        if deadline.expired() {
            Err(KgError::timeout(operation))
        } else {
            Ok(())
        }
    }
}

impl GraphBackend for InMemoryBackend {
    fn upsert_entity(
        &self,
        entity: &StoredEntity,
        deadline: Deadline,
    ) -> Result<EntityOperation> {
        Self::check_deadline(deadline, "upsert_entity")?;
        let mut inner = self.inner.write();
        match inner.entities.get_mut(&entity.id) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = entity.clone();
                existing.created_at = created_at;
                existing.updated_at = Utc::now();
                Ok(EntityOperation::Updated)
            }
            None => {
                inner.entities.insert(entity.id.clone(), entity.clone());
                Ok(EntityOperation::Created)
            }
        }
    }

    fn get_entity(&self, id: &str, deadline: Deadline) -> Result<Option<StoredEntity>> {
        Self::check_deadline(deadline, "get_entity")?;
        Ok(self.inner.read().entities.get(id).cloned())
    }

    fn delete_entity(&self, id: &str, deadline: Deadline) -> Result<bool> {
        Self::check_deadline(deadline, "delete_entity")?;
        Ok(self.inner.write().entities.remove(id).is_some())
    }

    fn list_entities(
        &self,
        filter: &EntityFilter,
        limit: usize,
        offset: usize,
        deadline: Deadline,
    ) -> Result<Vec<StoredEntity>> {
        Self::check_deadline(deadline, "list_entities")?;
        let inner = self.inner.read();
        Ok(inner
            .entities
            .values()
            .filter(|e| {
                filter
                    .entity_type
                    .as_ref()
                    .map_or(true, |t| e.entity_type == *t)
                    && filter.namespace.as_ref().map_or(true, |n| {
                        e.namespace.as_deref() == Some(n.as_str())
                    })
            })
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn add_edge(&self, from: &str, name: &str, to: &str, deadline: Deadline) -> Result<bool> {
        Self::check_deadline(deadline, "add_edge")?;
        Ok(self.inner.write().edges.insert(Edge {
            from: from.to_string(),
            name: name.to_string(),
            to: to.to_string(),
        }))
    }

    fn remove_edge(
        &self,
        from: &str,
        name: &str,
        to: &str,
        deadline: Deadline,
    ) -> Result<bool> {
        Self::check_deadline(deadline, "remove_edge")?;
        Ok(self.inner.write().edges.remove(&Edge {
            from: from.to_string(),
            name: name.to_string(),
            to: to.to_string(),
        }))
    }

    fn replace_edges(
        &self,
        from: &str,
        name: &str,
        targets: &[String],
        deadline: Deadline,
    ) -> Result<EdgeDelta> {
        Self::check_deadline(deadline, "replace_edges")?;
        let mut inner = self.inner.write();

        let current: BTreeSet<String> = inner
            .edges
            .iter()
            .filter(|e| e.from == from && e.name == name)
            .map(|e| e.to.clone())
            .collect();
        let wanted: BTreeSet<String> = targets.iter().cloned().collect();

        let mut delta = EdgeDelta::default();
        for to in current.difference(&wanted) {
            inner.edges.remove(&Edge {
                from: from.to_string(),
                name: name.to_string(),
                to: to.clone(),
            });
            delta.removed.push(to.clone());
        }
        for to in wanted.difference(&current) {
            inner.edges.insert(Edge {
                from: from.to_string(),
                name: name.to_string(),
                to: to.clone(),
            });
            delta.added.push(to.clone());
        }
        Ok(delta)
    }

    fn outbound_edges(
        &self,
        id: &str,
        name: Option<&str>,
        deadline: Deadline,
    ) -> Result<Vec<Edge>> {
        Self::check_deadline(deadline, "outbound_edges")?;
        Ok(self
            .inner
            .read()
            .edges
            .iter()
            .filter(|e| e.from == id && name.map_or(true, |n| e.name == n))
            .cloned()
            .collect())
    }

    fn inbound_edges(
        &self,
        id: &str,
        name: Option<&str>,
        deadline: Deadline,
    ) -> Result<Vec<Edge>> {
        Self::check_deadline(deadline, "inbound_edges")?;
        Ok(self
            .inner
            .read()
            .edges
            .iter()
            .filter(|e| e.to == id && name.map_or(true, |n| e.name == n))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    #[test]
    fn test_upsert_preserves_created_at() {
        let backend = InMemoryBackend::new();
        let entity = StoredEntity::new("platform/billing", "service");
        assert_eq!(
            backend.upsert_entity(&entity, deadline()).unwrap(),
            EntityOperation::Created
        );
        let first = backend
            .get_entity("platform/billing", deadline())
            .unwrap()
            .unwrap();

        let mut changed = entity.clone();
        changed
            .metadata
            .insert("tier".to_string(), serde_json::json!("gold"));
        assert_eq!(
            backend.upsert_entity(&changed, deadline()).unwrap(),
            EntityOperation::Updated
        );
        let second = backend
            .get_entity("platform/billing", deadline())
            .unwrap()
            .unwrap();
        assert_eq!(second.created_at, first.created_at);
        assert!(second.metadata.contains_key("tier"));
    }

    #[test]
    fn test_replace_edges_computes_delta() {
        let backend = InMemoryBackend::new();
        backend
            .add_edge("a", "depends_on", "b", deadline())
            .unwrap();
        backend
            .add_edge("a", "depends_on", "c", deadline())
            .unwrap();

        let delta = backend
            .replace_edges(
                "a",
                "depends_on",
                &["b".to_string(), "d".to_string()],
                deadline(),
            )
            .unwrap();
        assert_eq!(delta.added, vec!["d".to_string()]);
        assert_eq!(delta.removed, vec!["c".to_string()]);

        // Replaying the same set is a no-op
        let delta = backend
            .replace_edges(
                "a",
                "depends_on",
                &["b".to_string(), "d".to_string()],
                deadline(),
            )
            .unwrap();
        assert!(delta.is_noop());
    }

    #[test]
    fn test_inbound_and_outbound_views() {
        let backend = InMemoryBackend::new();
        backend
            .add_edge("a", "depends_on", "lib", deadline())
            .unwrap();
        backend
            .add_edge("b", "depends_on", "lib", deadline())
            .unwrap();
        backend.add_edge("a", "owns", "lib", deadline()).unwrap();

        assert_eq!(
            backend
                .inbound_edges("lib", Some("depends_on"), deadline())
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            backend.inbound_edges("lib", None, deadline()).unwrap().len(),
            3
        );
        assert_eq!(
            backend.outbound_edges("a", None, deadline()).unwrap().len(),
            2
        );
    }

    #[test]
    fn test_expired_deadline_is_a_timeout() {
        let backend = InMemoryBackend::new();
        let expired = Deadline::after(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        let err = backend
            .get_entity("platform/billing", expired)
            .unwrap_err();
        assert!(matches!(
            err,
            KgError::StorageOperation {
                failure: crate::error::StorageFailure::Timeout,
                ..
            }
        ));
    }

    #[test]
    fn test_list_entities_filters_and_pages() {
        let backend = InMemoryBackend::new();
        for i in 0..5 {
            let mut e = StoredEntity::new(format!("platform/svc-{i}"), "service");
            e.namespace = Some("platform".to_string());
            backend.upsert_entity(&e, deadline()).unwrap();
        }
        let mut other = StoredEntity::new("ops/tool", "service");
        other.namespace = Some("ops".to_string());
        backend.upsert_entity(&other, deadline()).unwrap();

        let filter = EntityFilter {
            entity_type: Some("service".to_string()),
            namespace: Some("platform".to_string()),
        };
        let page = backend.list_entities(&filter, 2, 2, deadline()).unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|e| e.namespace.as_deref() == Some("platform")));
    }
}
