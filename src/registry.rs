//! Schema registry: loading, inheritance, snapshots, hot reload
//!
//! Schema definitions live as YAML files in one directory: governance base
//! files (`base_internal.yaml`, `base_external.yaml`) and one file per
//! concrete entity type. Loading resolves the two-level inheritance into
//! immutable [`EntitySchema`] records, checks cross-schema consistency, and
//! publishes the result as a [`SchemaSnapshot`] behind an atomic swap.
//! Reload accepts only additive changes; in-flight readers keep whatever
//! snapshot they already hold.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{KgError, Result};
use crate::evolution::{self, ChangeSet};
use crate::schema::{
    Cardinality, DeletionPolicy, Deprecation, Direction, EntitySchema, FieldDefinition,
    FieldType, GovernanceTier, RelationshipDefinition, ValidationKind,
};

const BASE_FILE_STEMS: &[&str] = &["base_internal", "base_external"];

/// Raw field configuration as written in schema YAML (the field name is the
/// map key, so it is absent here)
#[derive(Debug, Clone, Default, Deserialize)]
struct FieldSource {
    #[serde(rename = "type", default)]
    field_type: FieldType,
    #[serde(default)]
    items: Option<FieldType>,
    #[serde(default)]
    validation: Option<ValidationKind>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    allowed_values: Option<Vec<String>>,
    #[serde(default)]
    min_length: Option<usize>,
    #[serde(default)]
    max_length: Option<usize>,
    #[serde(default)]
    min_items: Option<usize>,
    #[serde(default)]
    max_items: Option<usize>,
    #[serde(default)]
    indexed: bool,
    #[serde(default)]
    description: String,
    #[serde(flatten)]
    deprecation: Deprecation,
}

impl FieldSource {
    fn into_field(self, name: &str, required: bool) -> FieldDefinition {
        FieldDefinition {
            name: name.to_string(),
            field_type: self.field_type,
            required,
            items: self.items,
            validation: self.validation,
            pattern: self.pattern,
            allowed_values: self.allowed_values,
            min_length: self.min_length,
            max_length: self.max_length,
            min_items: self.min_items,
            max_items: self.max_items,
            indexed: self.indexed,
            description: self.description,
            deprecation: self.deprecation,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RelationshipSource {
    #[serde(default)]
    description: String,
    #[serde(default)]
    target_types: Vec<String>,
    #[serde(default)]
    cardinality: Cardinality,
    #[serde(default)]
    direction: Direction,
    #[serde(flatten)]
    deprecation: Deprecation,
}

impl RelationshipSource {
    fn into_relationship(self, name: &str) -> RelationshipDefinition {
        RelationshipDefinition {
            name: name.to_string(),
            description: self.description,
            target_types: self.target_types,
            cardinality: self.cardinality,
            direction: self.direction,
            deprecation: self.deprecation,
        }
    }
}

/// Extra validation constraints keyed by field name, merged into the field
/// definitions after inheritance (concrete wins per key)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleSource {
    #[serde(default)]
    validation: Option<ValidationKind>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    allowed_values: Option<Vec<String>>,
    #[serde(default)]
    min_length: Option<usize>,
    #[serde(default)]
    max_length: Option<usize>,
    #[serde(default)]
    min_items: Option<usize>,
    #[serde(default)]
    max_items: Option<usize>,
}

/// Governance base file (`base_internal.yaml` / `base_external.yaml`)
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct BaseSource {
    #[serde(default)]
    governance: GovernanceTier,
    #[serde(default)]
    deletion_policy: DeletionPolicy,
    #[serde(default)]
    readonly_metadata: BTreeMap<String, FieldSource>,
    #[serde(default)]
    validation_rules: BTreeMap<String, RuleSource>,
    #[serde(default)]
    allow_custom_fields: bool,
}

/// Concrete entity schema file
#[derive(Debug, Clone, Deserialize)]
struct EntitySource {
    entity_type: String,
    schema_version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    extends: Option<String>,
    #[serde(default)]
    required_metadata: BTreeMap<String, FieldSource>,
    #[serde(default)]
    optional_metadata: BTreeMap<String, FieldSource>,
    #[serde(default)]
    readonly_metadata: BTreeMap<String, FieldSource>,
    #[serde(default)]
    relationships: BTreeMap<String, RelationshipSource>,
    #[serde(default)]
    validation_rules: BTreeMap<String, RuleSource>,
    #[serde(default)]
    auto_creation: bool,
    // Base overrides; inherit when absent
    #[serde(default)]
    governance: Option<GovernanceTier>,
    #[serde(default)]
    deletion_policy: Option<DeletionPolicy>,
    #[serde(default)]
    allow_custom_fields: Option<bool>,
    #[serde(flatten)]
    deprecation: Deprecation,
}

/// Schema sources read from disk, before inheritance resolution
#[derive(Debug, Clone, Default)]
pub struct SchemaSources {
    bases: BTreeMap<String, BaseSource>,
    entities: Vec<EntitySource>,
}

impl SchemaSources {
    /// Read every `*.yaml` file in a directory; base files by stem name,
    /// everything else as a concrete entity schema
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| KgError::SchemaLoad(format!("cannot read {}: {e}", dir.display())))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
            })
            .collect();
        paths.sort();

        let mut sources = SchemaSources::default();
        for path in paths {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let text = std::fs::read_to_string(&path)?;
            if BASE_FILE_STEMS.contains(&stem.as_str()) {
                let base: BaseSource = serde_yaml::from_str(&text).map_err(|e| {
                    KgError::SchemaLoad(format!("{}: {e}", path.display()))
                })?;
                sources.bases.insert(stem, base);
            } else {
                let entity: EntitySource = serde_yaml::from_str(&text).map_err(|e| {
                    KgError::SchemaLoad(format!("{}: {e}", path.display()))
                })?;
                debug!(entity_type = %entity.entity_type, file = %path.display(),
                       "loaded schema source");
                sources.entities.push(entity);
            }
        }
        Ok(sources)
    }

    /// Resolve inheritance and produce the final schema map
    pub fn resolve(&self) -> Result<BTreeMap<String, EntitySchema>> {
        let mut schemas = BTreeMap::new();
        for source in &self.entities {
            let schema = self.resolve_entity(source)?;
            if schemas
                .insert(schema.entity_type.clone(), schema)
                .is_some()
            {
                return Err(KgError::SchemaLoad(format!(
                    "entity type '{}' is defined more than once",
                    source.entity_type
                )));
            }
        }
        check_consistency(&schemas)?;
        Ok(schemas)
    }

    fn resolve_entity(&self, source: &EntitySource) -> Result<EntitySchema> {
        semver::Version::parse(&source.schema_version).map_err(|e| {
            KgError::SchemaLoad(format!(
                "'{}' has invalid schema_version '{}': {e}",
                source.entity_type, source.schema_version
            ))
        })?;

        let base = match &source.extends {
            Some(name) => Some(self.bases.get(name).ok_or_else(|| {
                KgError::SchemaLoad(format!(
                    "'{}' extends unknown base '{name}'",
                    source.entity_type
                ))
            })?),
            None => None,
        };

        // Readonly fields: base first, concrete wins per key
        let mut readonly: BTreeMap<String, FieldSource> = base
            .map(|b| b.readonly_metadata.clone())
            .unwrap_or_default();
        for (name, field) in &source.readonly_metadata {
            if let Some(inherited) = readonly.get(name) {
                if inherited.field_type != field.field_type {
                    return Err(KgError::SchemaLoad(format!(
                        "'{}' redeclares inherited field '{name}' with type \
                         {} (base declares {})",
                        source.entity_type,
                        field.field_type.name(),
                        inherited.field_type.name()
                    )));
                }
            }
            readonly.insert(name.clone(), field.clone());
        }

        // Validation rules: base ∪ concrete, concrete wins
        let mut rules: BTreeMap<String, RuleSource> = base
            .map(|b| b.validation_rules.clone())
            .unwrap_or_default();
        for (name, rule) in &source.validation_rules {
            rules.insert(name.clone(), rule.clone());
        }

        let mut required_fields: Vec<FieldDefinition> = source
            .required_metadata
            .iter()
            .map(|(n, f)| f.clone().into_field(n, true))
            .collect();
        let mut optional_fields: Vec<FieldDefinition> = source
            .optional_metadata
            .iter()
            .map(|(n, f)| f.clone().into_field(n, false))
            .collect();
        let mut readonly_fields: Vec<FieldDefinition> = readonly
            .into_iter()
            .map(|(n, f)| f.into_field(&n, false))
            .collect();

        for field in required_fields
            .iter_mut()
            .chain(optional_fields.iter_mut())
            .chain(readonly_fields.iter_mut())
        {
            if let Some(rule) = rules.get(&field.name) {
                apply_rule(field, rule);
            }
        }

        let relationships = source
            .relationships
            .iter()
            .map(|(n, r)| r.clone().into_relationship(n))
            .collect();

        Ok(EntitySchema {
            entity_type: source.entity_type.clone(),
            schema_version: source.schema_version.clone(),
            description: source.description.clone(),
            extends: source.extends.clone(),
            required_fields,
            optional_fields,
            readonly_fields,
            relationships,
            governance: source
                .governance
                .or(base.map(|b| b.governance))
                .unwrap_or_default(),
            deletion_policy: source
                .deletion_policy
                .or(base.map(|b| b.deletion_policy))
                .unwrap_or_default(),
            allow_custom_fields: source
                .allow_custom_fields
                .or(base.map(|b| b.allow_custom_fields))
                .unwrap_or(false),
            auto_create: source.auto_creation,
            deprecation: source.deprecation.clone(),
        })
    }
}

fn apply_rule(field: &mut FieldDefinition, rule: &RuleSource) {
    if rule.validation.is_some() {
        field.validation = rule.validation;
    }
    if rule.pattern.is_some() {
        field.pattern = rule.pattern.clone();
    }
    if rule.allowed_values.is_some() {
        field.allowed_values = rule.allowed_values.clone();
    }
    if rule.min_length.is_some() {
        field.min_length = rule.min_length;
    }
    if rule.max_length.is_some() {
        field.max_length = rule.max_length;
    }
    if rule.min_items.is_some() {
        field.min_items = rule.min_items;
    }
    if rule.max_items.is_some() {
        field.max_items = rule.max_items;
    }
}

/// Cross-schema checks run after resolution: relationship targets must be
/// known entity types, field names unique, field and relationship names
/// disjoint
fn check_consistency(schemas: &BTreeMap<String, EntitySchema>) -> Result<()> {
    for (entity_type, schema) in schemas {
        let mut seen = std::collections::BTreeSet::new();
        for field in schema.all_fields() {
            if !seen.insert(field.name.as_str()) {
                return Err(KgError::SchemaLoad(format!(
                    "'{entity_type}' declares field '{}' more than once",
                    field.name
                )));
            }
        }
        for rel in &schema.relationships {
            if seen.contains(rel.name.as_str()) {
                return Err(KgError::SchemaLoad(format!(
                    "'{entity_type}' uses '{}' as both a field and a \
                     relationship",
                    rel.name
                )));
            }
            for target in &rel.target_types {
                if !schemas.contains_key(target) {
                    return Err(KgError::SchemaLoad(format!(
                        "'{entity_type}.{}' targets unknown entity type \
                         '{target}'",
                        rel.name
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Immutable view of every resolved schema at one point in time
#[derive(Debug, Clone)]
pub struct SchemaSnapshot {
    schemas: BTreeMap<String, EntitySchema>,
    pub revision: u64,
    pub loaded_at: DateTime<Utc>,
}

impl SchemaSnapshot {
    /// Build a snapshot directly from resolved schemas (revision 0)
    pub fn from_schemas(schemas: Vec<EntitySchema>) -> Self {
        SchemaSnapshot {
            schemas: schemas
                .into_iter()
                .map(|s| (s.entity_type.clone(), s))
                .collect(),
            revision: 0,
            loaded_at: Utc::now(),
        }
    }

    pub fn schema(&self, entity_type: &str) -> Option<&EntitySchema> {
        self.schemas.get(entity_type)
    }

    pub fn schemas(&self) -> &BTreeMap<String, EntitySchema> {
        &self.schemas
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// The registry holds the active snapshot and gates reloads
#[derive(Debug)]
pub struct SchemaRegistry {
    active: ArcSwap<SchemaSnapshot>,
}

impl SchemaRegistry {
    /// Load schemas from a directory and start at revision 1
    pub fn load(dir: &Path) -> Result<Self> {
        let schemas = SchemaSources::load_dir(dir)?.resolve()?;
        info!(count = schemas.len(), dir = %dir.display(), "schema registry loaded");
        Ok(SchemaRegistry {
            active: ArcSwap::from_pointee(SchemaSnapshot {
                schemas,
                revision: 1,
                loaded_at: Utc::now(),
            }),
        })
    }

    /// Wrap an existing snapshot (used heavily by tests)
    pub fn from_snapshot(snapshot: SchemaSnapshot) -> Self {
        SchemaRegistry {
            active: ArcSwap::from_pointee(snapshot),
        }
    }

    /// Cheap handle to the current snapshot; stays valid across reloads
    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        self.active.load_full()
    }

    /// Load a candidate snapshot from disk and swap it in if every change
    /// against the active snapshot is additive
    pub fn reload(&self, dir: &Path) -> Result<ChangeSet> {
        let candidate = SchemaSources::load_dir(dir)?.resolve()?;
        let current = self.active.load();

        let changes = evolution::check_additive(&current.schemas, &candidate)?;

        let next = SchemaSnapshot {
            schemas: candidate,
            revision: current.revision + 1,
            loaded_at: Utc::now(),
        };
        info!(
            revision = next.revision,
            changes = changes.changes.len(),
            "schema snapshot swapped"
        );
        self.active.store(Arc::new(next));
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const BASE_INTERNAL: &str = r#"
governance: strict
deletion_policy: reference_counted
allow_custom_fields: false
readonly_metadata:
  created_at:
    type: string
    description: Creation timestamp
  updated_at:
    type: string
validation_rules:
  owners:
    validation: email
    min_items: 1
"#;

    const BASE_EXTERNAL: &str = r#"
governance: permissive
deletion_policy: never_delete
allow_custom_fields: true
readonly_metadata:
  first_seen:
    type: string
"#;

    const SERVICE: &str = r#"
entity_type: service
schema_version: "1.0.0"
description: A deployable service
extends: base_internal
required_metadata:
  owners:
    type: array
    items: string
optional_metadata:
  description:
    type: string
    max_length: 500
relationships:
  depends_on:
    target_types: [external_dependency_version, service]
    cardinality: one_to_many
"#;

    const EXTERNAL_VERSION: &str = r#"
entity_type: external_dependency_version
schema_version: "1.0.0"
extends: base_external
auto_creation: true
optional_metadata:
  ecosystem:
    type: string
"#;

    fn write_schema_dir(dir: &Path) {
        fs::write(dir.join("base_internal.yaml"), BASE_INTERNAL).unwrap();
        fs::write(dir.join("base_external.yaml"), BASE_EXTERNAL).unwrap();
        fs::write(dir.join("service.yaml"), SERVICE).unwrap();
        fs::write(
            dir.join("external_dependency_version.yaml"),
            EXTERNAL_VERSION,
        )
        .unwrap();
    }

    #[test]
    fn test_load_and_merge() {
        let dir = TempDir::new().unwrap();
        write_schema_dir(dir.path());

        let registry = SchemaRegistry::load(dir.path()).unwrap();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.revision, 1);
        assert_eq!(snapshot.len(), 2);

        let service = snapshot.schema("service").unwrap();
        assert_eq!(service.governance, GovernanceTier::Strict);
        assert_eq!(service.deletion_policy, DeletionPolicy::ReferenceCounted);
        // Inherited readonly fields
        assert!(service.field("created_at").is_some());
        assert!(service.field("updated_at").is_some());
        // Base validation rule merged into the concrete field
        let owners = service.field("owners").unwrap();
        assert_eq!(owners.validation, Some(ValidationKind::Email));
        assert_eq!(owners.min_items, Some(1));

        let ext = snapshot.schema("external_dependency_version").unwrap();
        assert_eq!(ext.governance, GovernanceTier::Permissive);
        assert_eq!(ext.deletion_policy, DeletionPolicy::NeverDelete);
        assert!(ext.auto_create);
        assert!(ext.allow_custom_fields);
    }

    #[test]
    fn test_unknown_base_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("service.yaml"),
            "entity_type: service\nschema_version: \"1.0.0\"\nextends: base_cosmic\n",
        )
        .unwrap();
        let err = SchemaRegistry::load(dir.path()).unwrap_err();
        assert!(matches!(err, KgError::SchemaLoad(_)));
    }

    #[test]
    fn test_unknown_relationship_target_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("base_internal.yaml"), BASE_INTERNAL).unwrap();
        fs::write(
            dir.path().join("service.yaml"),
            r#"
entity_type: service
schema_version: "1.0.0"
extends: base_internal
relationships:
  depends_on:
    target_types: [phantom_type]
"#,
        )
        .unwrap();
        let err = SchemaRegistry::load(dir.path()).unwrap_err();
        match err {
            KgError::SchemaLoad(msg) => assert!(msg.contains("phantom_type")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_field_relationship_name_collision_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("base_internal.yaml"), BASE_INTERNAL).unwrap();
        fs::write(
            dir.path().join("service.yaml"),
            r#"
entity_type: service
schema_version: "1.0.0"
extends: base_internal
optional_metadata:
  depends_on:
    type: string
relationships:
  depends_on:
    target_types: [service]
"#,
        )
        .unwrap();
        assert!(SchemaRegistry::load(dir.path()).is_err());
    }

    #[test]
    fn test_inherited_type_conflict_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("base_internal.yaml"), BASE_INTERNAL).unwrap();
        fs::write(
            dir.path().join("service.yaml"),
            r#"
entity_type: service
schema_version: "1.0.0"
extends: base_internal
readonly_metadata:
  created_at:
    type: integer
"#,
        )
        .unwrap();
        let err = SchemaRegistry::load(dir.path()).unwrap_err();
        match err {
            KgError::SchemaLoad(msg) => assert!(msg.contains("created_at")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_additive_reload_swaps_snapshot() {
        let dir = TempDir::new().unwrap();
        write_schema_dir(dir.path());
        let registry = SchemaRegistry::load(dir.path()).unwrap();
        let before = registry.snapshot();

        let service_v2 = r#"
entity_type: service
schema_version: "1.1.0"
description: A deployable service
extends: base_internal
required_metadata:
  owners:
    type: array
    items: string
optional_metadata:
  description:
    type: string
    max_length: 500
  tier:
    type: string
relationships:
  depends_on:
    target_types: [external_dependency_version, service]
    cardinality: one_to_many
"#;
        fs::write(dir.path().join("service.yaml"), service_v2).unwrap();

        let changes = registry.reload(dir.path()).unwrap();
        assert!(changes.is_additive_only());
        let after = registry.snapshot();
        assert_eq!(after.revision, before.revision + 1);
        assert!(after.schema("service").unwrap().field("tier").is_some());
        // Old handle keeps its view
        assert!(before.schema("service").unwrap().field("tier").is_none());
    }

    #[test]
    fn test_forbidden_reload_keeps_active_snapshot() {
        let dir = TempDir::new().unwrap();
        write_schema_dir(dir.path());
        let registry = SchemaRegistry::load(dir.path()).unwrap();

        // Drop the service schema entirely
        fs::remove_file(dir.path().join("service.yaml")).unwrap();

        let err = registry.reload(dir.path()).unwrap_err();
        assert!(matches!(err, KgError::SchemaEvolution { .. }));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.revision, 1);
        assert!(snapshot.schema("service").is_some());
    }
}
