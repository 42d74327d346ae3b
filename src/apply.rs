//! Validate/apply boundaries
//!
//! [`validate`](crate::validation::validate) never mutates; [`apply`] is
//! the only path that writes. Both take raw document text so callers stay
//! decoupled from the pipeline internals.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::document::EntityRecord;
use crate::error::{KgError, Result};
use crate::registry::SchemaRegistry;
use crate::store::{
    ApplyReport, Deadline, DryRunResult, EntityFilter, EntityOperation, EntityStore,
    StoredEntity,
};
use crate::validation::{self, ValidationResult};

/// Knobs for one apply call
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub dry_run: bool,
    pub deadline: Deadline,
    /// Provenance recorded on every written entity, usually the file name
    pub source: Option<String>,
}

/// What an apply call did
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Document was valid and every entity was committed
    Applied(ApplyReport),
    /// Document was valid; this is what a commit would have done
    DryRun(DryRunResult),
    /// Document failed validation, nothing was written
    Rejected(ValidationResult),
}

/// Validate a document and, if valid, write every entity it declares.
/// Validation runs with the store attached, so reference existence is
/// checked against live data.
pub fn apply(
    content: &str,
    registry: &SchemaRegistry,
    store: &EntityStore,
    options: &ApplyOptions,
) -> Result<ApplyOutcome> {
    let snapshot = registry.snapshot();

    let result = validation::validate(content, &snapshot, Some(store));
    if !result.is_valid() {
        info!(errors = result.errors().count(), "document rejected");
        return Ok(ApplyOutcome::Rejected(result));
    }
    let records = result.graph.clone().ok_or_else(|| {
        KgError::SchemaLoad("valid document produced no entity records".to_string())
    })?;

    if options.dry_run {
        let dry = store.dry_run_apply(&records, options.deadline)?;
        return Ok(ApplyOutcome::DryRun(dry));
    }

    // Entities in this document satisfy each other's references even
    // before their own records commit
    let batch: BTreeSet<String> = records.iter().map(EntityRecord::entity_id).collect();

    let mut report = ApplyReport::default();
    for record in &records {
        let (operation, auto_created) = store.store_entity_in_batch(
            record,
            &snapshot,
            options.source.as_deref(),
            &batch,
            options.deadline,
        )?;
        match operation {
            EntityOperation::Created => report.created.push(record.entity_id()),
            EntityOperation::Updated => report.updated.push(record.entity_id()),
        }
        report.auto_created.extend(auto_created);
    }
    report.auto_created.sort();
    report.auto_created.dedup();

    info!(
        created = report.created.len(),
        updated = report.updated.len(),
        auto_created = report.auto_created.len(),
        "document applied"
    );
    Ok(ApplyOutcome::Applied(report))
}

/// Query-only view of a store, for layers that must not write
pub struct ReadOnlyStore {
    store: Arc<EntityStore>,
}

impl ReadOnlyStore {
    pub fn new(store: Arc<EntityStore>) -> Self {
        ReadOnlyStore { store }
    }

    pub fn get_entity(&self, id: &str, deadline: Deadline) -> Result<Option<StoredEntity>> {
        self.store.get_entity(id, deadline)
    }

    pub fn list_entities(
        &self,
        filter: &EntityFilter,
        limit: usize,
        offset: usize,
        deadline: Deadline,
    ) -> Result<Vec<StoredEntity>> {
        self.store.list_entities(filter, limit, offset, deadline)
    }

    pub fn find_entities_with_relationship(
        &self,
        id: &str,
        relationship: Option<&str>,
        direction: crate::schema::Direction,
        deadline: Deadline,
    ) -> Result<Vec<String>> {
        self.store
            .find_entities_with_relationship(id, relationship, direction, deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SchemaSnapshot;
    use crate::schema::{
        EntitySchema, FieldDefinition, FieldType, GovernanceTier, RelationshipDefinition,
    };
    use crate::store::{InMemoryBackend, EXTERNAL_VERSION_TYPE};
    use std::time::Duration;

    fn registry() -> SchemaRegistry {
        let mut owners = FieldDefinition::new("owners", FieldType::Array, true);
        owners.items = Some(FieldType::String);
        let service = EntitySchema {
            entity_type: "service".to_string(),
            schema_version: "1.0.0".to_string(),
            description: String::new(),
            extends: Some("base_internal".to_string()),
            required_fields: vec![owners],
            optional_fields: vec![],
            readonly_fields: vec![],
            relationships: vec![RelationshipDefinition::new(
                "depends_on",
                vec![EXTERNAL_VERSION_TYPE.to_string(), "service".to_string()],
            )],
            governance: GovernanceTier::Strict,
            deletion_policy: Default::default(),
            allow_custom_fields: false,
            auto_create: false,
            deprecation: Default::default(),
        };
        let external = EntitySchema {
            entity_type: EXTERNAL_VERSION_TYPE.to_string(),
            schema_version: "1.0.0".to_string(),
            description: String::new(),
            extends: Some("base_external".to_string()),
            required_fields: vec![],
            optional_fields: vec![],
            readonly_fields: vec![],
            relationships: vec![],
            governance: GovernanceTier::Permissive,
            deletion_policy: crate::schema::DeletionPolicy::NeverDelete,
            allow_custom_fields: true,
            auto_create: true,
            deprecation: Default::default(),
        };
        SchemaRegistry::from_snapshot(SchemaSnapshot::from_schemas(vec![service, external]))
    }

    fn options(dry_run: bool) -> ApplyOptions {
        ApplyOptions {
            dry_run,
            deadline: Deadline::after(Duration::from_secs(5)),
            source: Some("test.yaml".to_string()),
        }
    }

    const DOC: &str = r#"
schema_version: "1.0.0"
namespace: platform
entity:
  service:
    - name: billing
      owners: ["ops@example.com"]
      depends_on:
        - external://pypi/requests/2.31.0
"#;

    #[test]
    fn test_apply_commits_valid_document() {
        let registry = registry();
        let store = EntityStore::new(Arc::new(InMemoryBackend::new()));

        let outcome = apply(DOC, &registry, &store, &options(false)).unwrap();
        let ApplyOutcome::Applied(report) = outcome else {
            panic!("expected Applied");
        };
        assert_eq!(report.created, vec!["platform/billing".to_string()]);
        assert_eq!(report.auto_created.len(), 2);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let registry = registry();
        let store = EntityStore::new(Arc::new(InMemoryBackend::new()));

        let outcome = apply(DOC, &registry, &store, &options(true)).unwrap();
        let ApplyOutcome::DryRun(dry) = outcome else {
            panic!("expected DryRun");
        };
        assert_eq!(dry.would_create, vec!["platform/billing".to_string()]);
        assert!(store
            .get_entity(
                "platform/billing",
                Deadline::after(Duration::from_secs(5))
            )
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_invalid_document_is_rejected_without_writes() {
        let registry = registry();
        let store = EntityStore::new(Arc::new(InMemoryBackend::new()));
        let bad = r#"
schema_version: "1.0.0"
namespace: platform
entity:
  service:
    - name: billing
"#;
        let outcome = apply(bad, &registry, &store, &options(false)).unwrap();
        let ApplyOutcome::Rejected(result) = outcome else {
            panic!("expected Rejected");
        };
        assert!(result
            .errors()
            .any(|i| i.code == "missing_required_field"));
        assert!(store
            .get_entity(
                "platform/billing",
                Deadline::after(Duration::from_secs(5))
            )
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_dangling_internal_reference_rejected() {
        let registry = registry();
        let store = EntityStore::new(Arc::new(InMemoryBackend::new()));
        let doc = r#"
schema_version: "1.0.0"
namespace: platform
entity:
  service:
    - name: billing
      owners: ["ops@example.com"]
      depends_on:
        - internal://platform/ghost
"#;
        let outcome = apply(doc, &registry, &store, &options(false)).unwrap();
        let ApplyOutcome::Rejected(result) = outcome else {
            panic!("expected Rejected");
        };
        assert!(result.errors().any(|i| i.code == "reference_not_found"));
    }

    #[test]
    fn test_forward_reference_within_document_applies() {
        let registry = registry();
        let store = EntityStore::new(Arc::new(InMemoryBackend::new()));
        // billing references auth, which is declared later in the same file
        let doc = r#"
schema_version: "1.0.0"
namespace: platform
entity:
  service:
    - name: billing
      owners: ["ops@example.com"]
      depends_on:
        - internal://platform/auth
    - name: auth
      owners: ["ops@example.com"]
"#;
        let outcome = apply(doc, &registry, &store, &options(false)).unwrap();
        let ApplyOutcome::Applied(report) = outcome else {
            panic!("expected Applied");
        };
        assert_eq!(report.created.len(), 2);
    }
}
