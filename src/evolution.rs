//! Additive-only schema evolution gate
//!
//! Compares two resolved schema snapshots and classifies every difference.
//! A reload is accepted only when all changes are additive; any forbidden
//! change rejects the whole snapshot with an exact description of each
//! violation.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

use crate::error::{KgError, Result};
use crate::schema::{EntitySchema, FieldDefinition, RelationshipDefinition};

/// A single classified difference between two snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum SchemaChange {
    // Additive, always accepted
    AddEntityType { entity_type: String },
    AddField { entity_type: String, field: String },
    AddRelationship { entity_type: String, relationship: String },
    AddIndex { entity_type: String, field: String },
    Deprecate { entity_type: String, item: String },
    RequiredToOptional { entity_type: String, field: String },

    // Forbidden, rejects the snapshot
    RemoveEntityType { entity_type: String },
    RemoveField { entity_type: String, field: String },
    RemoveRelationship { entity_type: String, relationship: String },
    ChangeFieldType {
        entity_type: String,
        field: String,
        from: String,
        to: String,
    },
    OptionalToRequired { entity_type: String, field: String },
    AddRequiredField { entity_type: String, field: String },
    RemoveTargetType {
        entity_type: String,
        relationship: String,
        target_type: String,
    },
    ChangeCardinality {
        entity_type: String,
        relationship: String,
    },
}

impl SchemaChange {
    /// Whether this change is additive (accepted by the gate)
    pub fn is_additive(&self) -> bool {
        matches!(
            self,
            SchemaChange::AddEntityType { .. }
                | SchemaChange::AddField { .. }
                | SchemaChange::AddRelationship { .. }
                | SchemaChange::AddIndex { .. }
                | SchemaChange::Deprecate { .. }
                | SchemaChange::RequiredToOptional { .. }
        )
    }

    /// One-line description used in rejection reports
    pub fn describe(&self) -> String {
        match self {
            SchemaChange::AddEntityType { entity_type } => {
                format!("added entity type '{entity_type}'")
            }
            SchemaChange::AddField { entity_type, field } => {
                format!("added field '{entity_type}.{field}'")
            }
            SchemaChange::AddRelationship {
                entity_type,
                relationship,
            } => format!("added relationship '{entity_type}.{relationship}'"),
            SchemaChange::AddIndex { entity_type, field } => {
                format!("added index on '{entity_type}.{field}'")
            }
            SchemaChange::Deprecate { entity_type, item } => {
                format!("deprecated '{entity_type}.{item}'")
            }
            SchemaChange::RequiredToOptional { entity_type, field } => {
                format!("relaxed '{entity_type}.{field}' from required to optional")
            }
            SchemaChange::RemoveEntityType { entity_type } => {
                format!("removed entity type '{entity_type}'")
            }
            SchemaChange::RemoveField { entity_type, field } => {
                format!("removed field '{entity_type}.{field}'")
            }
            SchemaChange::RemoveRelationship {
                entity_type,
                relationship,
            } => format!("removed relationship '{entity_type}.{relationship}'"),
            SchemaChange::ChangeFieldType {
                entity_type,
                field,
                from,
                to,
            } => format!("changed type of '{entity_type}.{field}' from {from} to {to}"),
            SchemaChange::OptionalToRequired { entity_type, field } => {
                format!("made existing field '{entity_type}.{field}' required")
            }
            SchemaChange::AddRequiredField { entity_type, field } => {
                format!(
                    "added required field '{entity_type}.{field}' \
                     (new fields must be optional)"
                )
            }
            SchemaChange::RemoveTargetType {
                entity_type,
                relationship,
                target_type,
            } => format!(
                "removed target type '{target_type}' from \
                 '{entity_type}.{relationship}'"
            ),
            SchemaChange::ChangeCardinality {
                entity_type,
                relationship,
            } => format!("changed cardinality of '{entity_type}.{relationship}'"),
        }
    }
}

/// Full set of classified changes between two snapshots
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changes: Vec<SchemaChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// All forbidden changes in this set
    pub fn violations(&self) -> Vec<&SchemaChange> {
        self.changes.iter().filter(|c| !c.is_additive()).collect()
    }

    pub fn is_additive_only(&self) -> bool {
        self.changes.iter().all(SchemaChange::is_additive)
    }
}

/// Compute the classified difference between two schema sets, keyed by
/// entity type name
pub fn diff(
    old: &BTreeMap<String, EntitySchema>,
    new: &BTreeMap<String, EntitySchema>,
) -> ChangeSet {
    let mut changes = Vec::new();

    for (entity_type, old_schema) in old {
        match new.get(entity_type) {
            Some(new_schema) => diff_entity(entity_type, old_schema, new_schema, &mut changes),
            None => changes.push(SchemaChange::RemoveEntityType {
                entity_type: entity_type.clone(),
            }),
        }
    }
    for entity_type in new.keys() {
        if !old.contains_key(entity_type) {
            changes.push(SchemaChange::AddEntityType {
                entity_type: entity_type.clone(),
            });
        }
    }

    ChangeSet { changes }
}

/// Gate a reload: return the change set if additive-only, otherwise reject
/// with every violation listed
pub fn check_additive(
    old: &BTreeMap<String, EntitySchema>,
    new: &BTreeMap<String, EntitySchema>,
) -> Result<ChangeSet> {
    let set = diff(old, new);
    let violations: Vec<String> = set.violations().iter().map(|c| c.describe()).collect();
    if violations.is_empty() {
        Ok(set)
    } else {
        Err(KgError::SchemaEvolution {
            summary: format!(
                "{} forbidden change(s); snapshot rejected",
                violations.len()
            ),
            violations,
        })
    }
}

fn diff_entity(
    entity_type: &str,
    old: &EntitySchema,
    new: &EntitySchema,
    changes: &mut Vec<SchemaChange>,
) {
    diff_fields(entity_type, old, new, changes);
    diff_relationships(entity_type, old, new, changes);

    if !old.deprecation.deprecated && new.deprecation.deprecated {
        changes.push(SchemaChange::Deprecate {
            entity_type: entity_type.to_string(),
            item: entity_type.to_string(),
        });
    }
}

fn diff_fields(
    entity_type: &str,
    old: &EntitySchema,
    new: &EntitySchema,
    changes: &mut Vec<SchemaChange>,
) {
    let old_fields: BTreeMap<&str, &FieldDefinition> =
        old.all_fields().map(|f| (f.name.as_str(), f)).collect();
    let new_fields: BTreeMap<&str, &FieldDefinition> =
        new.all_fields().map(|f| (f.name.as_str(), f)).collect();

    for (name, old_field) in &old_fields {
        let Some(new_field) = new_fields.get(name) else {
            changes.push(SchemaChange::RemoveField {
                entity_type: entity_type.to_string(),
                field: (*name).to_string(),
            });
            continue;
        };

        if old_field.field_type != new_field.field_type {
            changes.push(SchemaChange::ChangeFieldType {
                entity_type: entity_type.to_string(),
                field: (*name).to_string(),
                from: old_field.field_type.name().to_string(),
                to: new_field.field_type.name().to_string(),
            });
        }
        match (old_field.required, new_field.required) {
            (false, true) => changes.push(SchemaChange::OptionalToRequired {
                entity_type: entity_type.to_string(),
                field: (*name).to_string(),
            }),
            (true, false) => changes.push(SchemaChange::RequiredToOptional {
                entity_type: entity_type.to_string(),
                field: (*name).to_string(),
            }),
            _ => {}
        }
        if !old_field.indexed && new_field.indexed {
            changes.push(SchemaChange::AddIndex {
                entity_type: entity_type.to_string(),
                field: (*name).to_string(),
            });
        }
        if !old_field.deprecation.deprecated && new_field.deprecation.deprecated {
            changes.push(SchemaChange::Deprecate {
                entity_type: entity_type.to_string(),
                item: (*name).to_string(),
            });
        }
    }

    for (name, new_field) in &new_fields {
        if old_fields.contains_key(name) {
            continue;
        }
        if new_field.required {
            changes.push(SchemaChange::AddRequiredField {
                entity_type: entity_type.to_string(),
                field: (*name).to_string(),
            });
        } else {
            changes.push(SchemaChange::AddField {
                entity_type: entity_type.to_string(),
                field: (*name).to_string(),
            });
        }
    }
}

fn diff_relationships(
    entity_type: &str,
    old: &EntitySchema,
    new: &EntitySchema,
    changes: &mut Vec<SchemaChange>,
) {
    let old_rels: BTreeMap<&str, &RelationshipDefinition> = old
        .relationships
        .iter()
        .map(|r| (r.name.as_str(), r))
        .collect();
    let new_rels: BTreeMap<&str, &RelationshipDefinition> = new
        .relationships
        .iter()
        .map(|r| (r.name.as_str(), r))
        .collect();

    for (name, old_rel) in &old_rels {
        let Some(new_rel) = new_rels.get(name) else {
            changes.push(SchemaChange::RemoveRelationship {
                entity_type: entity_type.to_string(),
                relationship: (*name).to_string(),
            });
            continue;
        };

        for target in &old_rel.target_types {
            if !new_rel.target_types.contains(target) {
                changes.push(SchemaChange::RemoveTargetType {
                    entity_type: entity_type.to_string(),
                    relationship: (*name).to_string(),
                    target_type: target.clone(),
                });
            }
        }
        if old_rel.cardinality != new_rel.cardinality {
            changes.push(SchemaChange::ChangeCardinality {
                entity_type: entity_type.to_string(),
                relationship: (*name).to_string(),
            });
        }
        if !old_rel.deprecation.deprecated && new_rel.deprecation.deprecated {
            changes.push(SchemaChange::Deprecate {
                entity_type: entity_type.to_string(),
                item: (*name).to_string(),
            });
        }
    }

    for name in new_rels.keys() {
        if !old_rels.contains_key(name) {
            changes.push(SchemaChange::AddRelationship {
                entity_type: entity_type.to_string(),
                relationship: (*name).to_string(),
            });
        }
    }
}
