//! HashMap-backed graph store.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::schema::{Entity, EntityTier, Signal, TierMetadata};

use super::store::GraphStore;

/// In-memory [`GraphStore`] used by tests and small deployments.
#[derive(Default)]
pub struct InMemoryGraphStore {
    signals: RwLock<HashMap<String, Signal>>,
    entities: RwLock<HashMap<String, Entity>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entity. Entities are otherwise created by upstream ingest.
    pub async fn insert_entity(&self, entity: Entity) {
        self.entities
            .write()
            .await
            .insert(entity.entity_id.clone(), entity);
    }

    /// Seed a signal directly, bypassing validation. Test setup only.
    pub async fn insert_signal_unchecked(&self, signal: Signal) {
        self.signals.write().await.insert(signal.id.clone(), signal);
    }

    pub async fn signal_count(&self) -> usize {
        self.signals.read().await.len()
    }

    pub async fn get_signal(&self, id: &str) -> Option<Signal> {
        self.signals.read().await.get(id).cloned()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn get_entity_signals(
        &self,
        entity_id: &str,
        time_horizon_days: i64,
    ) -> Result<Vec<Signal>> {
        let cutoff = Utc::now() - Duration::days(time_horizon_days);
        let mut matches: Vec<Signal> = self
            .signals
            .read()
            .await
            .values()
            .filter(|s| s.entity_id == entity_id && s.first_seen >= cutoff)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
        Ok(matches)
    }

    async fn upsert_signal(&self, signal: &Signal) -> Result<()> {
        signal.schema_check()?;
        self.signals
            .write()
            .await
            .insert(signal.id.clone(), signal.clone());
        Ok(())
    }

    async fn get_all_entities(&self) -> Result<Vec<Entity>> {
        let mut entities: Vec<Entity> = self.entities.read().await.values().cloned().collect();
        entities.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(entities)
    }

    async fn update_entity_tier(
        &self,
        entity_id: &str,
        tier: EntityTier,
        metadata: TierMetadata,
    ) -> Result<()> {
        let mut entities = self.entities.write().await;
        if let Some(entity) = entities.get_mut(entity_id) {
            entity.tier = tier;
            entity.tier_metadata = Some(metadata);
        }
        Ok(())
    }
}
