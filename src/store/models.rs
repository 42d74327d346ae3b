//! Storage-level data records

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An entity as held by the graph backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    /// `namespace/name` for internal entities, the canonical URI for
    /// external ones
    pub id: String,
    pub entity_type: String,
    pub metadata: BTreeMap<String, Value>,
    /// Set on first creation, never changed afterwards
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Namespace the entity was declared in, absent for external nodes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Provenance: file or submission the entity last came from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
}

impl StoredEntity {
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let now = Utc::now();
        StoredEntity {
            id: id.into(),
            entity_type: entity_type.into(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            namespace: None,
            source_name: None,
        }
    }

    /// Owner emails recorded in metadata, empty if none
    pub fn owners(&self) -> Vec<String> {
        self.metadata
            .get("owners")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A directed, named edge between two entities
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub name: String,
    pub to: String,
}

/// Filter for `list_entities`
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub entity_type: Option<String>,
    pub namespace: Option<String>,
}

/// What a write did to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityOperation {
    Created,
    Updated,
}

/// Net effect of a replace-set edge write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl EdgeDelta {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Result of applying a document without committing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DryRunResult {
    pub would_create: Vec<String>,
    pub would_update: Vec<String>,
    /// External package/version nodes that would come into existence
    pub would_auto_create: Vec<String>,
}

/// Summary of a committed apply
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub auto_created: Vec<String>,
}
