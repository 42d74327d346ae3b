//! Six-layer document validation pipeline
//!
//! Layers 1 (syntax) and 2 (structure) are fatal: a failure stops the
//! pipeline because later layers have nothing sound to work on. Layers 3-6
//! all run and accumulate, so one submission reports every problem at once.
//! Layer 5 only runs when a store is available; layer 6 produces warnings
//! only.

mod engine;
mod layers;

pub use engine::{validate, ReferenceLookup, ValidationEngine};

use serde::{Deserialize, Serialize};

/// Pipeline layer an issue originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Syntax,
    Structure,
    FieldFormat,
    BusinessRules,
    ReferenceExistence,
    Deprecation,
}

impl Layer {
    pub fn number(&self) -> u8 {
        match self {
            Layer::Syntax => 1,
            Layer::Structure => 2,
            Layer::FieldFormat => 3,
            Layer::BusinessRules => 4,
            Layer::ReferenceExistence => 5,
            Layer::Deprecation => 6,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Layer::Syntax => "syntax",
            Layer::Structure => "structure",
            Layer::FieldFormat => "field format",
            Layer::BusinessRules => "business rules",
            Layer::ReferenceExistence => "reference existence",
            Layer::Deprecation => "deprecation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// A single finding, with enough context to locate and fix it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub layer: Layer,
    pub severity: Severity,
    /// Stable machine-readable code, e.g. `missing_required_field`
    pub code: String,
    pub message: String,
    /// Document path, e.g. `entity.service[billing].owners`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    /// Source position, set by the syntax layer only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl ValidationIssue {
    pub fn error(layer: Layer, code: &str, message: impl Into<String>) -> Self {
        ValidationIssue {
            layer,
            severity: Severity::Error,
            code: code.to_string(),
            message: message.into(),
            context: None,
            help: None,
            line: None,
            column: None,
        }
    }

    pub fn warning(layer: Layer, code: &str, message: impl Into<String>) -> Self {
        ValidationIssue {
            severity: Severity::Warning,
            ..Self::error(layer, code, message)
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(
            f,
            "[layer {} {}] {}: {}",
            self.layer.number(),
            self.layer.name(),
            tag,
            self.message
        )?;
        if let Some(context) = &self.context {
            write!(f, " (at {context})")?;
        }
        if let Some(help) = &self.help {
            write!(f, "\n  help: {help}")?;
        }
        Ok(())
    }
}

/// Outcome of running the pipeline over one document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
    /// Typed entities extracted from the document, present only when the
    /// document is valid; this is what the store consumes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<Vec<crate::document::EntityRecord>>,
}

impl ValidationResult {
    pub fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    pub fn extend(&mut self, issues: Vec<ValidationIssue>) {
        self.issues.extend(issues);
    }

    /// Valid means no errors; warnings do not block
    pub fn is_valid(&self) -> bool {
        self.errors().next().is_none()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }
}
