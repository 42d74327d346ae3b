//! Pipeline orchestration

use tracing::debug;

use crate::document::Document;
use crate::registry::SchemaSnapshot;

use super::layers::{
    BusinessRulesLayer, DeprecationLayer, FieldFormatLayer, ReferenceExistenceLayer,
    StructureLayer, SyntaxLayer,
};
use super::{Layer, ValidationIssue, ValidationResult};

/// Existence check for internal references, implemented by the store
pub trait ReferenceLookup {
    fn entity_exists(&self, entity_id: &str) -> crate::error::Result<bool>;
}

/// Runs the six layers over one document against one schema snapshot
pub struct ValidationEngine<'a> {
    snapshot: &'a SchemaSnapshot,
}

impl<'a> ValidationEngine<'a> {
    pub fn new(snapshot: &'a SchemaSnapshot) -> Self {
        ValidationEngine { snapshot }
    }

    /// Validate raw document text. Pure except for the optional existence
    /// lookup; never mutates anything.
    pub fn validate(
        &self,
        content: &str,
        lookup: Option<&dyn ReferenceLookup>,
    ) -> ValidationResult {
        let mut result = ValidationResult::default();

        let value = match SyntaxLayer::run(content) {
            Ok(value) => value,
            Err(issue) => {
                result.push(issue);
                return result;
            }
        };
        debug!("layer 1 (syntax) passed");

        let structure_issues = StructureLayer::run(&value);
        if !structure_issues.is_empty() {
            result.extend(structure_issues);
            return result;
        }
        debug!("layer 2 (structure) passed");

        let document = match Document::from_yaml_value(value) {
            Ok(document) => document,
            Err(e) => {
                result.push(ValidationIssue::error(
                    Layer::Structure,
                    "malformed_document",
                    format!("document does not match the expected shape: {e}"),
                ));
                return result;
            }
        };

        result.extend(FieldFormatLayer::run(&document, self.snapshot));
        result.extend(BusinessRulesLayer::run(&document, self.snapshot));
        if let Some(lookup) = lookup {
            result.extend(ReferenceExistenceLayer::run(
                &document,
                self.snapshot,
                lookup,
            ));
        } else {
            debug!("layer 5 (reference existence) skipped: no store available");
        }
        result.extend(DeprecationLayer::run(&document, self.snapshot));

        if result.is_valid() {
            match document.extract_entities(self.snapshot) {
                Ok(records) => result.graph = Some(records),
                Err(e) => result.push(ValidationIssue::error(
                    Layer::Structure,
                    "malformed_document",
                    format!("could not build entity records: {e}"),
                )),
            }
        }

        debug!(
            errors = result.errors().count(),
            warnings = result.warnings().count(),
            "validation finished"
        );
        result
    }
}

/// Convenience entry point used by the CLI and the apply path
pub fn validate(
    content: &str,
    snapshot: &SchemaSnapshot,
    lookup: Option<&dyn ReferenceLookup>,
) -> ValidationResult {
    ValidationEngine::new(snapshot).validate(content, lookup)
}
