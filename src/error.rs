//! Error types for the knowledge graph engine

use thiserror::Error;

/// Result type for knowledge graph operations
pub type Result<T> = std::result::Result<T, KgError>;

/// Reason a dependency reference failed to canonicalize
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CanonicalizationError {
    #[error("missing ecosystem in '{0}': bare package names are not allowed")]
    MissingEcosystem(String),

    #[error("invalid version '{version}' in '{reference}': {reason}")]
    InvalidVersion {
        reference: String,
        version: String,
        reason: String,
    },

    #[error("unsupported ecosystem '{ecosystem}' in '{reference}'")]
    UnsupportedEcosystem { reference: String, ecosystem: String },

    #[error("invalid namespace '{namespace}' in '{reference}': must be kebab-case")]
    InvalidNamespace { reference: String, namespace: String },

    #[error("malformed dependency reference '{reference}': {reason}")]
    Malformed { reference: String, reason: String },
}

/// Ownership conflict categories raised by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Owner email domain differs from the namespace's recorded domain
    NamespaceOwnership,
    /// Entity already claimed by a disjoint owner set
    EntityOwnership,
    /// Deletion blocked by live inbound references
    ReferencedEntity,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::NamespaceOwnership => write!(f, "namespace ownership"),
            ConflictKind::EntityOwnership => write!(f, "entity ownership"),
            ConflictKind::ReferencedEntity => write!(f, "referenced entity"),
        }
    }
}

/// What went wrong inside a storage operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFailure {
    /// Backend reported an error
    Backend,
    /// The caller-supplied deadline expired
    Timeout,
    /// Optimistic commit retries exhausted
    RetryExhausted,
}

impl std::fmt::Display for StorageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageFailure::Backend => write!(f, "backend error"),
            StorageFailure::Timeout => write!(f, "deadline exceeded"),
            StorageFailure::RetryExhausted => write!(f, "retries exhausted"),
        }
    }
}

/// Knowledge graph engine errors
#[derive(Error, Debug)]
pub enum KgError {
    #[error("schema load failed: {0}")]
    SchemaLoad(String),

    #[error("schema evolution rejected: {summary}")]
    SchemaEvolution {
        summary: String,
        /// Human-readable description of each forbidden change
        violations: Vec<String>,
    },

    #[error("canonicalization failed: {0}")]
    Canonicalization(#[from] CanonicalizationError),

    #[error("{kind} conflict: {detail}")]
    Conflict {
        kind: ConflictKind,
        detail: String,
        /// Conflicting owners or referencing entity IDs, for remediation
        parties: Vec<String>,
    },

    #[error("entity '{entity_id}' references missing target '{target_id}'")]
    DanglingReference { entity_id: String, target_id: String },

    #[error("unknown entity type '{0}'")]
    UnknownEntityType(String),

    #[error("entity '{entity_id}' cannot be deleted: {reason}")]
    DeletionNotAllowed { entity_id: String, reason: String },

    #[error("storage connection failed: {0}")]
    StorageConnection(String),

    #[error("storage operation failed ({failure}): {context}")]
    StorageOperation {
        failure: StorageFailure,
        context: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("semver error: {0}")]
    Semver(#[from] semver::Error),
}

impl KgError {
    /// Shorthand for a timeout failure in a named operation
    pub fn timeout(operation: &str) -> Self {
        KgError::StorageOperation {
            failure: StorageFailure::Timeout,
            context: operation.to_string(),
        }
    }
}
