//! The six validation layers
//!
//! Each layer is a standalone struct with a `run` function so it can be
//! tested in isolation. Layers 1-2 gate the pipeline; layers 3-6 accumulate
//! every issue they find.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::canonical::CanonicalRef;
use crate::document::{Document, SUPPORTED_DOCUMENT_VERSIONS};
use crate::registry::SchemaSnapshot;
use crate::schema::{
    Cardinality, EntitySchema, FieldDefinition, FieldType, GovernanceTier, ValidationKind,
};

use super::engine::ReferenceLookup;
use super::{Layer, ValidationIssue};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static pattern"));
static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://\S+$").expect("static pattern"));

/// Layer 1: the document must be parseable YAML
pub struct SyntaxLayer;

impl SyntaxLayer {
    pub fn run(content: &str) -> Result<serde_yaml::Value, ValidationIssue> {
        serde_yaml::from_str(content).map_err(|e| {
            let mut issue = ValidationIssue::error(
                Layer::Syntax,
                "invalid_yaml",
                format!("document is not valid YAML: {e}"),
            );
            if let Some(location) = e.location() {
                issue = issue.at(location.line(), location.column());
            }
            issue
        })
    }
}

/// Layer 2: required top-level structure
pub struct StructureLayer;

impl StructureLayer {
    pub fn run(value: &serde_yaml::Value) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        let Some(mapping) = value.as_mapping() else {
            issues.push(ValidationIssue::error(
                Layer::Structure,
                "not_a_mapping",
                "document root must be a mapping",
            ));
            return issues;
        };

        match mapping.get("schema_version").and_then(|v| v.as_str()) {
            None => issues.push(
                ValidationIssue::error(
                    Layer::Structure,
                    "missing_field",
                    "top-level field 'schema_version' is required",
                )
                .with_help("add: schema_version: \"1.0.0\""),
            ),
            Some(version) if !SUPPORTED_DOCUMENT_VERSIONS.contains(&version) => issues.push(
                ValidationIssue::error(
                    Layer::Structure,
                    "unsupported_version",
                    format!("document schema_version '{version}' is not supported"),
                )
                .with_help(format!(
                    "supported versions: {}",
                    SUPPORTED_DOCUMENT_VERSIONS.join(", ")
                )),
            ),
            Some(_) => {}
        }

        match mapping.get("namespace").and_then(|v| v.as_str()) {
            None => issues.push(ValidationIssue::error(
                Layer::Structure,
                "missing_field",
                "top-level field 'namespace' is required",
            )),
            Some(namespace) if !crate::canonical::is_valid_namespace(namespace) => issues
                .push(
                    ValidationIssue::error(
                        Layer::Structure,
                        "invalid_namespace",
                        format!("namespace '{namespace}' is not valid"),
                    )
                    .with_help("namespaces are lowercase kebab-case, e.g. 'platform'"),
                ),
            Some(_) => {}
        }

        match mapping.get("entity") {
            None => issues.push(ValidationIssue::error(
                Layer::Structure,
                "missing_field",
                "top-level field 'entity' is required",
            )),
            Some(entity) => {
                let Some(entity_map) = entity.as_mapping() else {
                    issues.push(ValidationIssue::error(
                        Layer::Structure,
                        "not_a_mapping",
                        "'entity' must map entity types to instance lists",
                    ));
                    return issues;
                };
                for (key, instances) in entity_map {
                    let entity_type = key.as_str().unwrap_or("<non-string>");
                    if !instances.is_sequence() {
                        issues.push(
                            ValidationIssue::error(
                                Layer::Structure,
                                "not_a_sequence",
                                format!("'entity.{entity_type}' must be a list"),
                            )
                            .with_context(format!("entity.{entity_type}")),
                        );
                    }
                }
            }
        }

        issues
    }
}

/// Layer 3: declared fields conform to their schema definitions
pub struct FieldFormatLayer;

impl FieldFormatLayer {
    pub fn run(document: &Document, snapshot: &SchemaSnapshot) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        for (entity_type, instances) in &document.entity {
            let Some(schema) = snapshot.schema(entity_type) else {
                issues.push(
                    ValidationIssue::error(
                        Layer::FieldFormat,
                        "unknown_entity_type",
                        format!("unknown entity type '{entity_type}'"),
                    )
                    .with_context(format!("entity.{entity_type}"))
                    .with_help(format!(
                        "known types: {}",
                        snapshot.entity_types().collect::<Vec<_>>().join(", ")
                    )),
                );
                continue;
            };

            for instance in instances {
                let name = instance
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("<unnamed>");
                let path = format!("entity.{entity_type}[{name}]");

                if instance.get("name").and_then(Value::as_str).is_none() {
                    issues.push(
                        ValidationIssue::error(
                            Layer::FieldFormat,
                            "missing_name",
                            "every entity needs a string 'name'",
                        )
                        .with_context(path.clone()),
                    );
                }

                Self::check_instance(schema, instance, &path, &mut issues);
            }
        }

        issues
    }

    fn check_instance(
        schema: &EntitySchema,
        instance: &BTreeMap<String, Value>,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) {
        for field in &schema.required_fields {
            match instance.get(&field.name) {
                None | Some(Value::Null) => issues.push(
                    ValidationIssue::error(
                        Layer::FieldFormat,
                        "missing_required_field",
                        format!("required field '{}' is missing", field.name),
                    )
                    .with_context(format!("{path}.{}", field.name)),
                ),
                Some(Value::Array(items)) if items.is_empty() => issues.push(
                    ValidationIssue::error(
                        Layer::FieldFormat,
                        "empty_required_field",
                        format!("required field '{}' must not be empty", field.name),
                    )
                    .with_context(format!("{path}.{}", field.name)),
                ),
                Some(_) => {}
            }
        }

        for (key, value) in instance {
            if key == "name" || schema.is_relationship(key) {
                continue;
            }
            let Some(field) = schema.field(key) else {
                if !schema.allow_custom_fields {
                    issues.push(
                        ValidationIssue::error(
                            Layer::FieldFormat,
                            "unknown_field",
                            format!("field '{key}' is not declared in the schema"),
                        )
                        .with_context(format!("{path}.{key}")),
                    );
                }
                continue;
            };
            if schema.readonly_fields.iter().any(|f| f.name == *key) {
                issues.push(
                    ValidationIssue::error(
                        Layer::FieldFormat,
                        "readonly_field_supplied",
                        format!("field '{key}' is system-managed and cannot be set"),
                    )
                    .with_context(format!("{path}.{key}")),
                );
                continue;
            }
            Self::check_value(field, value, &format!("{path}.{key}"), issues);
        }
    }

    fn check_value(
        field: &FieldDefinition,
        value: &Value,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let type_ok = match field.field_type {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
        };
        if !type_ok {
            issues.push(
                ValidationIssue::error(
                    Layer::FieldFormat,
                    "type_mismatch",
                    format!(
                        "field '{}' must be of type {}",
                        field.name,
                        field.field_type.name()
                    ),
                )
                .with_context(path.to_string()),
            );
            return;
        }

        match field.field_type {
            FieldType::String => {
                let text = value.as_str().unwrap_or_default();
                Self::check_string(field, text, path, issues);
            }
            FieldType::Array => {
                let items = value.as_array().map(Vec::as_slice).unwrap_or_default();
                if let Some(min) = field.min_items {
                    if items.len() < min {
                        issues.push(
                            ValidationIssue::error(
                                Layer::FieldFormat,
                                "too_few_items",
                                format!("field '{}' needs at least {min} item(s)", field.name),
                            )
                            .with_context(path.to_string()),
                        );
                    }
                }
                if let Some(max) = field.max_items {
                    if items.len() > max {
                        issues.push(
                            ValidationIssue::error(
                                Layer::FieldFormat,
                                "too_many_items",
                                format!("field '{}' allows at most {max} item(s)", field.name),
                            )
                            .with_context(path.to_string()),
                        );
                    }
                }
                for (index, item) in items.iter().enumerate() {
                    let item_path = format!("{path}[{index}]");
                    match field.items.unwrap_or(FieldType::String) {
                        FieldType::String => {
                            if let Some(text) = item.as_str() {
                                Self::check_string(field, text, &item_path, issues);
                            } else {
                                issues.push(
                                    ValidationIssue::error(
                                        Layer::FieldFormat,
                                        "type_mismatch",
                                        format!("items of '{}' must be strings", field.name),
                                    )
                                    .with_context(item_path),
                                );
                            }
                        }
                        FieldType::Integer => {
                            if !(item.is_i64() || item.is_u64()) {
                                issues.push(
                                    ValidationIssue::error(
                                        Layer::FieldFormat,
                                        "type_mismatch",
                                        format!("items of '{}' must be integers", field.name),
                                    )
                                    .with_context(item_path),
                                );
                            }
                        }
                        FieldType::Boolean => {
                            if !item.is_boolean() {
                                issues.push(
                                    ValidationIssue::error(
                                        Layer::FieldFormat,
                                        "type_mismatch",
                                        format!("items of '{}' must be booleans", field.name),
                                    )
                                    .with_context(item_path),
                                );
                            }
                        }
                        FieldType::Array => {}
                    }
                }
            }
            _ => {}
        }
    }

    fn check_string(
        field: &FieldDefinition,
        text: &str,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) {
        if let Some(min) = field.min_length {
            if text.len() < min {
                issues.push(
                    ValidationIssue::error(
                        Layer::FieldFormat,
                        "too_short",
                        format!("value must be at least {min} characters"),
                    )
                    .with_context(path.to_string()),
                );
            }
        }
        if let Some(max) = field.max_length {
            if text.len() > max {
                issues.push(
                    ValidationIssue::error(
                        Layer::FieldFormat,
                        "too_long",
                        format!("value must be at most {max} characters"),
                    )
                    .with_context(path.to_string()),
                );
            }
        }
        match field.validation {
            Some(ValidationKind::Email) => {
                if !EMAIL_RE.is_match(text) {
                    issues.push(
                        ValidationIssue::error(
                            Layer::FieldFormat,
                            "invalid_email",
                            format!("'{text}' is not a valid email address"),
                        )
                        .with_context(path.to_string()),
                    );
                }
            }
            Some(ValidationKind::Url) => {
                if !URL_RE.is_match(text) {
                    issues.push(
                        ValidationIssue::error(
                            Layer::FieldFormat,
                            "invalid_url",
                            format!("'{text}' is not a valid http(s) URL"),
                        )
                        .with_context(path.to_string()),
                    );
                }
            }
            Some(ValidationKind::Pattern) => {
                let Some(pattern) = &field.pattern else {
                    return;
                };
                match Regex::new(pattern) {
                    Ok(re) => {
                        if !re.is_match(text) {
                            issues.push(
                                ValidationIssue::error(
                                    Layer::FieldFormat,
                                    "pattern_mismatch",
                                    format!("'{text}' does not match pattern '{pattern}'"),
                                )
                                .with_context(path.to_string()),
                            );
                        }
                    }
                    Err(e) => issues.push(
                        ValidationIssue::error(
                            Layer::FieldFormat,
                            "invalid_pattern",
                            format!("schema pattern '{pattern}' is invalid: {e}"),
                        )
                        .with_context(path.to_string()),
                    ),
                }
            }
            Some(ValidationKind::Enum) => {
                let allowed = field.allowed_values.as_deref().unwrap_or_default();
                if !allowed.iter().any(|v| v == text) {
                    issues.push(
                        ValidationIssue::error(
                            Layer::FieldFormat,
                            "not_in_enum",
                            format!("'{text}' is not an allowed value"),
                        )
                        .with_context(path.to_string())
                        .with_help(format!("allowed: {}", allowed.join(", "))),
                    );
                }
            }
            None => {}
        }
    }
}

/// Layer 4: cross-field and cross-entity business rules
pub struct BusinessRulesLayer;

impl BusinessRulesLayer {
    pub fn run(document: &Document, snapshot: &SchemaSnapshot) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        Self::check_owner_domains(document, &mut issues);

        for (entity_type, instances) in &document.entity {
            let Some(schema) = snapshot.schema(entity_type) else {
                continue; // reported by layer 3
            };

            let mut seen_names = BTreeSet::new();
            for instance in instances {
                let Some(name) = instance.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let path = format!("entity.{entity_type}[{name}]");

                if !seen_names.insert(name.to_string()) {
                    issues.push(
                        ValidationIssue::error(
                            Layer::BusinessRules,
                            "duplicate_name",
                            format!("entity '{name}' is declared more than once"),
                        )
                        .with_context(path.clone()),
                    );
                }

                Self::check_relationships(schema, snapshot, instance, &path, &mut issues);
            }
        }

        issues
    }

    /// Owners spanning more than one email domain across a namespace
    /// submission is suspicious but legal. Checked document-wide: a
    /// namespace is expected to belong to a single organization.
    fn check_owner_domains(document: &Document, issues: &mut Vec<ValidationIssue>) {
        let domains: BTreeSet<&str> = document
            .entity
            .values()
            .flatten()
            .filter_map(|instance| instance.get("owners").and_then(Value::as_array))
            .flatten()
            .filter_map(Value::as_str)
            .filter_map(|email| email.rsplit_once('@').map(|(_, d)| d))
            .collect();
        if domains.len() > 1 {
            issues.push(
                ValidationIssue::warning(
                    Layer::BusinessRules,
                    "multiple_owner_domains",
                    format!(
                        "owners across this document span {} email domains: {}",
                        domains.len(),
                        domains.into_iter().collect::<Vec<_>>().join(", ")
                    ),
                )
                .with_context(format!("namespace '{}'", document.namespace)),
            );
        }
    }

    fn check_relationships(
        schema: &EntitySchema,
        snapshot: &SchemaSnapshot,
        instance: &BTreeMap<String, Value>,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) {
        for rel in &schema.relationships {
            let Some(value) = instance.get(&rel.name) else {
                continue;
            };
            let refs: Vec<&str> = match value {
                Value::String(s) => vec![s.as_str()],
                Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
                _ => {
                    issues.push(
                        ValidationIssue::error(
                            Layer::BusinessRules,
                            "bad_reference_list",
                            format!(
                                "relationship '{}' must be a reference or list of \
                                 references",
                                rel.name
                            ),
                        )
                        .with_context(format!("{path}.{}", rel.name)),
                    );
                    continue;
                }
            };

            if rel.cardinality == Cardinality::OneToOne && refs.len() > 1 {
                issues.push(
                    ValidationIssue::error(
                        Layer::BusinessRules,
                        "cardinality_exceeded",
                        format!(
                            "relationship '{}' is one_to_one but has {} targets",
                            rel.name,
                            refs.len()
                        ),
                    )
                    .with_context(format!("{path}.{}", rel.name)),
                );
            }

            let allows_external = rel.target_types.iter().any(|t| {
                snapshot
                    .schema(t)
                    .is_some_and(|s| s.governance == GovernanceTier::Permissive)
            });

            for (index, raw) in refs.iter().enumerate() {
                let ref_path = format!("{path}.{}[{index}]", rel.name);
                match CanonicalRef::canonicalize(raw) {
                    Ok(canonical) => {
                        if canonical.is_external() && !allows_external {
                            issues.push(
                                ValidationIssue::error(
                                    Layer::BusinessRules,
                                    "external_ref_not_allowed",
                                    format!(
                                        "relationship '{}' does not accept external \
                                         dependencies",
                                        rel.name
                                    ),
                                )
                                .with_context(ref_path),
                            );
                        }
                    }
                    Err(e) => issues.push(
                        ValidationIssue::error(
                            Layer::BusinessRules,
                            "invalid_reference",
                            e.to_string(),
                        )
                        .with_context(ref_path)
                        .with_help(
                            "use external://<ecosystem>/<package>/<version> or \
                             internal://<namespace>/<entity-name>",
                        ),
                    ),
                }
            }
        }
    }
}

/// Layer 5: internal references must point at entities that exist
pub struct ReferenceExistenceLayer;

impl ReferenceExistenceLayer {
    pub fn run(
        document: &Document,
        snapshot: &SchemaSnapshot,
        lookup: &dyn ReferenceLookup,
    ) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        // Entities declared in this document satisfy their own references
        let local_ids: BTreeSet<String> = document
            .entity
            .values()
            .flatten()
            .filter_map(|i| i.get("name").and_then(Value::as_str))
            .map(|name| format!("{}/{name}", document.namespace))
            .collect();

        for (entity_type, instances) in &document.entity {
            let Some(schema) = snapshot.schema(entity_type) else {
                continue;
            };
            for instance in instances {
                let Some(name) = instance.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let path = format!("entity.{entity_type}[{name}]");

                for rel in &schema.relationships {
                    let Some(value) = instance.get(&rel.name) else {
                        continue;
                    };
                    let refs: Vec<&str> = match value {
                        Value::String(s) => vec![s.as_str()],
                        Value::Array(items) => {
                            items.iter().filter_map(Value::as_str).collect()
                        }
                        _ => continue,
                    };
                    for (index, raw) in refs.iter().enumerate() {
                        // External refs are auto-created at apply time
                        let Ok(canonical @ CanonicalRef::Internal { .. }) =
                            CanonicalRef::canonicalize(raw)
                        else {
                            continue;
                        };
                        let target_id = canonical.entity_id();
                        if local_ids.contains(&target_id) {
                            continue;
                        }
                        match lookup.entity_exists(&target_id) {
                            Ok(true) => {}
                            Ok(false) => issues.push(
                                ValidationIssue::error(
                                    Layer::ReferenceExistence,
                                    "reference_not_found",
                                    format!("referenced entity '{target_id}' does not exist"),
                                )
                                .with_context(format!("{path}.{}[{index}]", rel.name)),
                            ),
                            Err(e) => issues.push(
                                ValidationIssue::error(
                                    Layer::ReferenceExistence,
                                    "reference_check_failed",
                                    format!("could not verify '{target_id}': {e}"),
                                )
                                .with_context(format!("{path}.{}[{index}]", rel.name)),
                            ),
                        }
                    }
                }
            }
        }

        issues
    }
}

/// Layer 6: use of deprecated schema elements, warnings only
pub struct DeprecationLayer;

impl DeprecationLayer {
    pub fn run(document: &Document, snapshot: &SchemaSnapshot) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        for (entity_type, instances) in &document.entity {
            let Some(schema) = snapshot.schema(entity_type) else {
                continue;
            };

            if schema.deprecation.is_deprecated() {
                issues.push(Self::warn(
                    format!("entity type '{entity_type}' is deprecated"),
                    format!("entity.{entity_type}"),
                    &schema.deprecation,
                ));
            }

            for instance in instances {
                let name = instance
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("<unnamed>");
                let path = format!("entity.{entity_type}[{name}]");

                for key in instance.keys() {
                    if let Some(field) = schema.field(key) {
                        if field.deprecation.is_deprecated() {
                            issues.push(Self::warn(
                                format!("field '{key}' is deprecated"),
                                format!("{path}.{key}"),
                                &field.deprecation,
                            ));
                        }
                    }
                    if let Some(rel) = schema.relationship(key) {
                        if rel.deprecation.is_deprecated() {
                            issues.push(Self::warn(
                                format!("relationship '{key}' is deprecated"),
                                format!("{path}.{key}"),
                                &rel.deprecation,
                            ));
                        }
                    }
                }
            }
        }

        issues
    }

    fn warn(
        message: String,
        context: String,
        deprecation: &crate::schema::Deprecation,
    ) -> ValidationIssue {
        let mut issue = ValidationIssue::warning(Layer::Deprecation, "deprecated", message)
            .with_context(context);
        let mut help = Vec::new();
        if let Some(since) = &deprecation.deprecated_since {
            help.push(format!("deprecated since {since}"));
        }
        if let Some(reason) = &deprecation.deprecated_reason {
            help.push(reason.clone());
        }
        if let Some(removal) = &deprecation.removal_planned {
            help.push(format!("removal planned for {removal}"));
        }
        if let Some(guide) = &deprecation.migration_guide {
            help.push(format!("see {guide}"));
        }
        if !help.is_empty() {
            issue = issue.with_help(help.join("; "));
        }
        issue
    }
}
