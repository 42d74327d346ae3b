//! Entity/relationship storage
//!
//! [`GraphBackend`] is the seam to the actual graph store; [`EntityStore`]
//! layers governance on top of it: conflict detection, external dependency
//! auto-creation, reference-counted deletion, per-entity write
//! serialization, bounded retries, and deadlines.

pub mod backend;
pub mod conflict;
pub mod entity_store;
pub mod memory;
pub mod models;

pub use backend::{Deadline, GraphBackend};
pub use conflict::ConflictDetector;
pub use entity_store::{
    EntityStore, EXTERNAL_PACKAGE_TYPE, EXTERNAL_VERSION_TYPE, HAS_VERSION_EDGE,
};
pub use memory::InMemoryBackend;
pub use models::{
    ApplyReport, DryRunResult, Edge, EdgeDelta, EntityFilter, EntityOperation, StoredEntity,
};
