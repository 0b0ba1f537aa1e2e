//! The graph store port.

use async_trait::async_trait;

use crate::error::Result;
use crate::schema::{Entity, EntityTier, Signal, TierMetadata};

/// Abstract upsert/query interface to the graph-backed knowledge store.
///
/// The core never issues ad-hoc queries; these four operations are the
/// whole contract. Implementations are assumed to be independently
/// concurrency-safe; the core does not lock around them.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Prior signals for an entity within the given horizon, newest first.
    /// May be empty. Fails with [`crate::Error::StoreUnavailable`] on
    /// infrastructure error.
    async fn get_entity_signals(
        &self,
        entity_id: &str,
        time_horizon_days: i64,
    ) -> Result<Vec<Signal>>;

    /// Insert-or-replace keyed by `signal.id`. Idempotent. Fails with
    /// [`crate::Error::SchemaInvalid`] when required fields are missing or
    /// out of range.
    async fn upsert_signal(&self, signal: &Signal) -> Result<()>;

    /// The current entity population.
    async fn get_all_entities(&self) -> Result<Vec<Entity>>;

    /// Write a tier assignment back to an entity. Idempotent.
    async fn update_entity_tier(
        &self,
        entity_id: &str,
        tier: EntityTier,
        metadata: TierMetadata,
    ) -> Result<()>;
}
