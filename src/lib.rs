//! # kgraph
//!
//! Schema-driven validation and storage engine for an organizational
//! knowledge graph. Teams declare entities (services, libraries, teams,
//! repositories) and their dependencies in YAML documents; the engine
//! validates each document through a six-layer pipeline against a hot-
//! reloadable schema registry, canonicalizes every dependency reference,
//! and commits entities and relationships to a graph store with two-tier
//! governance.
//!
//! ## Core pieces
//!
//! - [`registry::SchemaRegistry`] — loads YAML schema definitions with
//!   two-level inheritance and publishes immutable snapshots; reloads are
//!   additive-only.
//! - [`canonical::CanonicalRef`] — typed, normalized `external://` /
//!   `internal://` dependency references.
//! - [`validation`] — the six-layer pipeline (syntax, structure, field
//!   format, business rules, reference existence, deprecation).
//! - [`store::EntityStore`] — governed writes over a [`store::GraphBackend`]:
//!   conflict detection, external dependency auto-creation,
//!   reference-counted deletion, dry runs.
//! - [`apply`] — the validate/apply boundary used by the CLIs.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use kgraph::apply::{apply, ApplyOptions};
//! use kgraph::registry::SchemaRegistry;
//! use kgraph::store::{Deadline, EntityStore, InMemoryBackend};
//!
//! # fn main() -> kgraph::Result<()> {
//! let registry = SchemaRegistry::load("./schemas".as_ref())?;
//! let store = EntityStore::new(Arc::new(InMemoryBackend::new()));
//! let outcome = apply(
//!     &std::fs::read_to_string("platform.yaml")?,
//!     &registry,
//!     &store,
//!     &ApplyOptions {
//!         dry_run: false,
//!         deadline: Deadline::after(Duration::from_secs(30)),
//!         source: Some("platform.yaml".to_string()),
//!     },
//! )?;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

pub mod apply;
pub mod canonical;
pub mod config;
pub mod document;
pub mod error;
pub mod evolution;
pub mod registry;
pub mod schema;
pub mod store;
pub mod validation;

pub use apply::{ApplyOptions, ApplyOutcome, ReadOnlyStore};
pub use canonical::CanonicalRef;
pub use config::KgConfig;
pub use document::{Document, EntityRecord};
pub use error::{KgError, Result};
pub use evolution::{ChangeSet, SchemaChange};
pub use registry::{SchemaRegistry, SchemaSnapshot};
pub use schema::{EntitySchema, FieldDefinition, RelationshipDefinition};
pub use store::{Deadline, EntityStore, GraphBackend, InMemoryBackend};
pub use validation::{ValidationIssue, ValidationResult};
