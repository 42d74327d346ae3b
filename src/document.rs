//! Entity document contract
//!
//! A document is one YAML file declaring entities for a single namespace.
//! Top level: `schema_version` (document format version), `namespace`, and
//! `entity` mapping entity-type names to lists of entity definitions. Each
//! definition carries a `name` plus metadata fields and relationship lists,
//! which are split apart here using the active schema snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{KgError, Result};
use crate::registry::SchemaSnapshot;

/// Document format versions this engine accepts
pub const SUPPORTED_DOCUMENT_VERSIONS: &[&str] = &["1.0.0"];

/// Parsed entity document, structure already verified
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub schema_version: String,
    pub namespace: String,
    /// Entity-type name to the list of declared instances
    pub entity: BTreeMap<String, Vec<BTreeMap<String, Value>>>,
}

/// One entity extracted from a document, metadata and relationships split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_type: String,
    pub namespace: String,
    pub name: String,
    pub metadata: BTreeMap<String, Value>,
    /// Relationship name to raw (not yet canonicalized) target references
    pub relationships: BTreeMap<String, Vec<String>>,
}

impl EntityRecord {
    /// Store identity: `<namespace>/<name>`
    pub fn entity_id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl Document {
    /// Build a document from an already-parsed YAML value. Assumes layer 2
    /// structure checks passed; missing pieces still surface as errors.
    pub fn from_yaml_value(value: serde_yaml::Value) -> Result<Self> {
        let doc: Document = serde_yaml::from_value(value)?;
        Ok(doc)
    }

    /// Split every declared entity into typed records using the snapshot's
    /// relationship declarations. Unknown entity types are an error here;
    /// the validation pipeline reports them with context before this runs.
    pub fn extract_entities(&self, snapshot: &SchemaSnapshot) -> Result<Vec<EntityRecord>> {
        let mut records = Vec::new();

        for (entity_type, instances) in &self.entity {
            let schema = snapshot
                .schema(entity_type)
                .ok_or_else(|| KgError::UnknownEntityType(entity_type.clone()))?;

            for instance in instances {
                let name = match instance.get("name").and_then(Value::as_str) {
                    Some(n) => n.to_string(),
                    None => {
                        return Err(KgError::SchemaLoad(format!(
                            "entity of type '{entity_type}' in namespace \
                             '{}' is missing a name",
                            self.namespace
                        )))
                    }
                };

                let mut metadata = BTreeMap::new();
                let mut relationships = BTreeMap::new();
                for (key, value) in instance {
                    if key == "name" {
                        continue;
                    }
                    if schema.is_relationship(key) {
                        relationships.insert(key.clone(), reference_list(value));
                    } else {
                        metadata.insert(key.clone(), value.clone());
                    }
                }

                records.push(EntityRecord {
                    entity_type: entity_type.clone(),
                    namespace: self.namespace.clone(),
                    name,
                    metadata,
                    relationships,
                });
            }
        }

        Ok(records)
    }
}

/// Relationship values may be a single string or a list of strings;
/// non-string items are kept verbatim so validation can report them
fn reference_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        other => vec![other.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SchemaSnapshot;
    use crate::schema::{
        EntitySchema, FieldDefinition, FieldType, GovernanceTier, RelationshipDefinition,
    };

    fn test_snapshot() -> SchemaSnapshot {
        let schema = EntitySchema {
            entity_type: "service".to_string(),
            schema_version: "1.0.0".to_string(),
            description: String::new(),
            extends: Some("base_internal".to_string()),
            required_fields: vec![FieldDefinition::new("owners", FieldType::Array, true)],
            optional_fields: vec![FieldDefinition::new(
                "description",
                FieldType::String,
                false,
            )],
            readonly_fields: vec![],
            relationships: vec![RelationshipDefinition::new(
                "depends_on",
                vec!["external_dependency_version".to_string()],
            )],
            governance: GovernanceTier::Strict,
            deletion_policy: Default::default(),
            allow_custom_fields: false,
            auto_create: false,
            deprecation: Default::default(),
        };
        SchemaSnapshot::from_schemas(vec![schema])
    }

    const DOC: &str = r#"
schema_version: "1.0.0"
namespace: platform
entity:
  service:
    - name: billing
      owners: ["ops@example.com"]
      description: Billing service
      depends_on:
        - external://pypi/requests/2.31.0
"#;

    #[test]
    fn test_extraction_splits_metadata_and_relationships() {
        let value: serde_yaml::Value = serde_yaml::from_str(DOC).unwrap();
        let doc = Document::from_yaml_value(value).unwrap();
        let records = doc.extract_entities(&test_snapshot()).unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.entity_id(), "platform/billing");
        assert!(record.metadata.contains_key("owners"));
        assert!(record.metadata.contains_key("description"));
        assert!(!record.metadata.contains_key("depends_on"));
        assert_eq!(
            record.relationships["depends_on"],
            vec!["external://pypi/requests/2.31.0".to_string()]
        );
    }

    #[test]
    fn test_scalar_relationship_value_becomes_single_item_list() {
        let yaml = r#"
schema_version: "1.0.0"
namespace: platform
entity:
  service:
    - name: billing
      owners: ["ops@example.com"]
      depends_on: external://pypi/requests/2.31.0
"#;
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        let doc = Document::from_yaml_value(value).unwrap();
        let records = doc.extract_entities(&test_snapshot()).unwrap();
        assert_eq!(records[0].relationships["depends_on"].len(), 1);
    }

    #[test]
    fn test_unknown_entity_type_is_an_error() {
        let yaml = r#"
schema_version: "1.0.0"
namespace: platform
entity:
  starship:
    - name: enterprise
"#;
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        let doc = Document::from_yaml_value(value).unwrap();
        let err = doc.extract_entities(&test_snapshot()).unwrap_err();
        assert!(matches!(err, KgError::UnknownEntityType(_)));
    }

    #[test]
    fn test_missing_name_is_an_error() {
        let yaml = r#"
schema_version: "1.0.0"
namespace: platform
entity:
  service:
    - owners: ["ops@example.com"]
"#;
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        let doc = Document::from_yaml_value(value).unwrap();
        assert!(doc.extract_entities(&test_snapshot()).is_err());
    }
}
