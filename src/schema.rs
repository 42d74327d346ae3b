//! Entity schema types and structures
//!
//! Fully resolved, immutable schema definitions for one entity type. These
//! are built by the registry from base + concrete definition sources and are
//! never mutated afterwards; validators are pure functions over these records.

use serde::{Deserialize, Serialize};

/// Scalar or array type of a metadata field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    String,
    Integer,
    Boolean,
    /// Array of the named item type
    Array,
}

impl FieldType {
    /// Human-readable name used in error messages
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
        }
    }
}

/// Format validation applied on top of the field type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    Email,
    Url,
    Pattern,
    Enum,
}

/// Deprecation metadata carried by fields, relationships, and entity types
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deprecation {
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_since: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removal_planned: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_guide: Option<String>,
}

impl Deprecation {
    pub fn is_deprecated(&self) -> bool {
        self.deprecated
    }
}

/// Definition of a single metadata field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Item type for array fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<FieldType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub deprecation: Deprecation,
}

impl FieldDefinition {
    /// Create a minimal field definition (mostly for tests)
    pub fn new(name: impl Into<String>, field_type: FieldType, required: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            required,
            items: None,
            validation: None,
            pattern: None,
            allowed_values: None,
            min_length: None,
            max_length: None,
            min_items: None,
            max_items: None,
            indexed: false,
            description: String::new(),
            deprecation: Deprecation::default(),
        }
    }
}

/// Relationship cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    OneToOne,
    #[default]
    OneToMany,
    ManyToMany,
}

/// Relationship direction relative to the declaring entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    #[default]
    Outbound,
    Bidirectional,
}

/// Definition of an entity relationship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub target_types: Vec<String>,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub direction: Direction,
    #[serde(flatten)]
    pub deprecation: Deprecation,
}

impl RelationshipDefinition {
    pub fn new(name: impl Into<String>, target_types: Vec<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            target_types,
            cardinality: Cardinality::default(),
            direction: Direction::default(),
            deprecation: Deprecation::default(),
        }
    }
}

/// Governance tier inherited from the base schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceTier {
    /// Internal entities: explicit lifecycle, reference-counted deletion
    #[default]
    Strict,
    /// External entities: auto-created, never deleted
    Permissive,
}

/// Deletion policy for an entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeletionPolicy {
    /// Delete allowed only when no live inbound references remain
    #[default]
    ReferenceCounted,
    /// Node is never removed; only edges are unlinked
    NeverDelete,
}

/// Complete, resolved entity schema definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub entity_type: String,
    /// Semver version string of this definition
    pub schema_version: String,
    #[serde(default)]
    pub description: String,
    /// Name of the governance base this schema extends, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    pub required_fields: Vec<FieldDefinition>,
    pub optional_fields: Vec<FieldDefinition>,
    /// System-managed fields; documents may not supply these
    pub readonly_fields: Vec<FieldDefinition>,
    pub relationships: Vec<RelationshipDefinition>,
    #[serde(default)]
    pub governance: GovernanceTier,
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
    /// Whether instances may carry fields not declared in the schema
    #[serde(default)]
    pub allow_custom_fields: bool,
    /// Whether the store may create instances implicitly (external deps)
    #[serde(default)]
    pub auto_create: bool,
    #[serde(flatten)]
    pub deprecation: Deprecation,
}

impl EntitySchema {
    /// All field definitions across required/optional/readonly tiers
    pub fn all_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.required_fields
            .iter()
            .chain(self.optional_fields.iter())
            .chain(self.readonly_fields.iter())
    }

    /// Look up a field definition by name
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.all_fields().find(|f| f.name == name)
    }

    /// Look up a relationship definition by name
    pub fn relationship(&self, name: &str) -> Option<&RelationshipDefinition> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Whether a name is declared as a relationship on this schema
    pub fn is_relationship(&self, name: &str) -> bool {
        self.relationship(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> EntitySchema {
        EntitySchema {
            entity_type: "repository".to_string(),
            schema_version: "1.0.0".to_string(),
            description: String::new(),
            extends: Some("base_internal".to_string()),
            required_fields: vec![FieldDefinition::new("owners", FieldType::Array, true)],
            optional_fields: vec![FieldDefinition::new("description", FieldType::String, false)],
            readonly_fields: vec![FieldDefinition::new("created_at", FieldType::String, false)],
            relationships: vec![RelationshipDefinition::new(
                "depends_on",
                vec!["external_dependency_version".to_string()],
            )],
            governance: GovernanceTier::Strict,
            deletion_policy: DeletionPolicy::ReferenceCounted,
            allow_custom_fields: false,
            auto_create: false,
            deprecation: Deprecation::default(),
        }
    }

    #[test]
    fn test_field_lookup_spans_tiers() {
        let schema = sample_schema();
        assert!(schema.field("owners").is_some());
        assert!(schema.field("description").is_some());
        assert!(schema.field("created_at").is_some());
        assert!(schema.field("nope").is_none());
    }

    #[test]
    fn test_relationship_lookup() {
        let schema = sample_schema();
        assert!(schema.is_relationship("depends_on"));
        assert!(!schema.is_relationship("owners"));
    }

    #[test]
    fn test_serde_round_trip() {
        let schema = sample_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let back: EntitySchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, back);
    }
}
