//! Graph backend contract
//!
//! The external graph store is reached only through this trait; the engine
//! ships with the in-memory implementation and treats anything else as an
//! integration concern. Every operation carries a [`Deadline`] and must
//! return a timeout error instead of blocking past it.

use std::time::{Duration, Instant};

use crate::error::Result;

use super::models::{Edge, EdgeDelta, EntityFilter, EntityOperation, StoredEntity};

/// Absolute point in time an operation must finish by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Deadline(instant)
    }

    pub fn after(duration: Duration) -> Self {
        Deadline(Instant::now() + duration)
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }
}

/// Contract every graph store implementation must honor.
///
/// Semantics the engine relies on: `upsert_entity` is atomic per id and
/// preserves `created_at` across updates; `replace_edges` replaces the full
/// outbound edge set of one name in a single step; edge operations are
/// idempotent.
pub trait GraphBackend: Send + Sync {
    fn upsert_entity(
        &self,
        entity: &StoredEntity,
        deadline: Deadline,
    ) -> Result<EntityOperation>;

    fn get_entity(&self, id: &str, deadline: Deadline) -> Result<Option<StoredEntity>>;

    fn entity_exists(&self, id: &str, deadline: Deadline) -> Result<bool> {
        Ok(self.get_entity(id, deadline)?.is_some())
    }

    /// Remove the entity node; returns whether it existed. Does not touch
    /// edges, the store layer handles those first.
    fn delete_entity(&self, id: &str, deadline: Deadline) -> Result<bool>;

    fn list_entities(
        &self,
        filter: &EntityFilter,
        limit: usize,
        offset: usize,
        deadline: Deadline,
    ) -> Result<Vec<StoredEntity>>;

    /// Returns whether the edge was newly added
    fn add_edge(&self, from: &str, name: &str, to: &str, deadline: Deadline) -> Result<bool>;

    /// Returns whether the edge existed
    fn remove_edge(&self, from: &str, name: &str, to: &str, deadline: Deadline)
        -> Result<bool>;

    /// Replace the outbound edge set `(from, name, *)` with `targets`
    fn replace_edges(
        &self,
        from: &str,
        name: &str,
        targets: &[String],
        deadline: Deadline,
    ) -> Result<EdgeDelta>;

    /// Outbound edges of one entity, optionally restricted to one name
    fn outbound_edges(
        &self,
        id: &str,
        name: Option<&str>,
        deadline: Deadline,
    ) -> Result<Vec<Edge>>;

    /// Inbound edges pointing at one entity, optionally restricted to one
    /// name
    fn inbound_edges(
        &self,
        id: &str,
        name: Option<&str>,
        deadline: Deadline,
    ) -> Result<Vec<Edge>>;
}
