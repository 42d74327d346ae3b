//! Write-time conflict detection
//!
//! Two rules run before any entity write: the namespace ownership rule (all
//! owner emails in a namespace share one email domain) and the entity
//! ownership rule (first claim wins; an update needs at least one owner in
//! common with the stored set). Both raise [`KgError::Conflict`] with the
//! conflicting parties listed so the caller can act on them.

use std::collections::BTreeSet;

use crate::document::EntityRecord;
use crate::error::{ConflictKind, KgError, Result};

use super::backend::{Deadline, GraphBackend};
use super::models::EntityFilter;

/// Stateless rule set; holds nothing, reads through the backend
pub struct ConflictDetector;

impl ConflictDetector {
    /// Run every rule for one incoming record
    pub fn check(
        backend: &dyn GraphBackend,
        record: &EntityRecord,
        deadline: Deadline,
    ) -> Result<()> {
        Self::check_namespace_domain(backend, record, deadline)?;
        Self::check_entity_ownership(backend, record, deadline)?;
        Ok(())
    }

    fn submitted_owners(record: &EntityRecord) -> Vec<String> {
        record
            .metadata
            .get("owners")
            .and_then(serde_json::Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn domain(email: &str) -> Option<&str> {
        email.rsplit_once('@').map(|(_, domain)| domain)
    }

    /// A namespace's recorded domain is the single domain its existing
    /// owners use. A namespace with no entities, no owners, or already
    /// mixed domains records nothing.
    fn check_namespace_domain(
        backend: &dyn GraphBackend,
        record: &EntityRecord,
        deadline: Deadline,
    ) -> Result<()> {
        let submitted = Self::submitted_owners(record);
        if submitted.is_empty() {
            return Ok(());
        }

        let filter = EntityFilter {
            entity_type: None,
            namespace: Some(record.namespace.clone()),
        };
        let existing = backend.list_entities(&filter, usize::MAX, 0, deadline)?;

        let recorded: BTreeSet<String> = existing
            .iter()
            .filter(|e| e.id != record.entity_id())
            .flat_map(|e| e.owners())
            .filter_map(|o| Self::domain(&o).map(str::to_string))
            .collect();
        if recorded.len() != 1 {
            return Ok(());
        }
        let Some(recorded_domain) = recorded.iter().next().map(String::as_str) else {
            return Ok(());
        };

        let offending: Vec<String> = submitted
            .iter()
            .filter(|o| Self::domain(o).is_some_and(|d| d != recorded_domain))
            .cloned()
            .collect();
        if offending.is_empty() {
            Ok(())
        } else {
            Err(KgError::Conflict {
                kind: ConflictKind::NamespaceOwnership,
                detail: format!(
                    "namespace '{}' is owned by the '{recorded_domain}' domain",
                    record.namespace
                ),
                parties: offending,
            })
        }
    }

    /// First claim wins; later writes must share at least one owner with
    /// the stored set. The submitted set replaces the stored one on
    /// success.
    fn check_entity_ownership(
        backend: &dyn GraphBackend,
        record: &EntityRecord,
        deadline: Deadline,
    ) -> Result<()> {
        let Some(existing) = backend.get_entity(&record.entity_id(), deadline)? else {
            return Ok(());
        };
        let current: BTreeSet<String> = existing.owners().into_iter().collect();
        if current.is_empty() {
            return Ok(());
        }

        let submitted: BTreeSet<String> = Self::submitted_owners(record).into_iter().collect();
        if submitted.is_empty() || submitted.is_disjoint(&current) {
            Err(KgError::Conflict {
                kind: ConflictKind::EntityOwnership,
                detail: format!(
                    "entity '{}' is already claimed by a different owner set",
                    record.entity_id()
                ),
                parties: current.into_iter().collect(),
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryBackend;
    use crate::store::models::StoredEntity;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn record(namespace: &str, name: &str, owners: &[&str]) -> EntityRecord {
        let mut metadata = BTreeMap::new();
        metadata.insert("owners".to_string(), json!(owners));
        EntityRecord {
            entity_type: "service".to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            metadata,
            relationships: BTreeMap::new(),
        }
    }

    fn seed(backend: &InMemoryBackend, id: &str, namespace: &str, owners: &[&str]) {
        let mut entity = StoredEntity::new(id, "service");
        entity.namespace = Some(namespace.to_string());
        entity.metadata.insert("owners".to_string(), json!(owners));
        backend.upsert_entity(&entity, deadline()).unwrap();
    }

    #[test]
    fn test_fresh_namespace_has_no_domain_conflict() {
        let backend = InMemoryBackend::new();
        let r = record("platform", "billing", &["ops@example.com"]);
        assert!(ConflictDetector::check(&backend, &r, deadline()).is_ok());
    }

    #[test]
    fn test_namespace_domain_mismatch_rejected() {
        let backend = InMemoryBackend::new();
        seed(&backend, "platform/auth", "platform", &["ops@example.com"]);

        let r = record("platform", "billing", &["eve@rival.com"]);
        let err = ConflictDetector::check(&backend, &r, deadline()).unwrap_err();
        match err {
            KgError::Conflict { kind, parties, .. } => {
                assert_eq!(kind, ConflictKind::NamespaceOwnership);
                assert_eq!(parties, vec!["eve@rival.com".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_same_domain_passes() {
        let backend = InMemoryBackend::new();
        seed(&backend, "platform/auth", "platform", &["ops@example.com"]);
        let r = record("platform", "billing", &["dev@example.com"]);
        assert!(ConflictDetector::check(&backend, &r, deadline()).is_ok());
    }

    #[test]
    fn test_disjoint_owner_set_rejected() {
        let backend = InMemoryBackend::new();
        seed(
            &backend,
            "platform/billing",
            "platform",
            &["a@example.com", "b@example.com"],
        );

        let r = record("platform", "billing", &["c@example.com"]);
        let err = ConflictDetector::check(&backend, &r, deadline()).unwrap_err();
        match err {
            KgError::Conflict { kind, parties, .. } => {
                assert_eq!(kind, ConflictKind::EntityOwnership);
                assert_eq!(parties.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_overlapping_owner_set_allows_update() {
        let backend = InMemoryBackend::new();
        seed(
            &backend,
            "platform/billing",
            "platform",
            &["a@example.com", "b@example.com"],
        );
        let r = record("platform", "billing", &["b@example.com", "c@example.com"]);
        assert!(ConflictDetector::check(&backend, &r, deadline()).is_ok());
    }

    #[test]
    fn test_reapply_same_entity_never_self_conflicts() {
        let backend = InMemoryBackend::new();
        seed(&backend, "platform/billing", "platform", &["ops@example.com"]);
        let r = record("platform", "billing", &["ops@example.com"]);
        assert!(ConflictDetector::check(&backend, &r, deadline()).is_ok());
    }
}
