//! Priority scheduling of entities into daily processing tiers.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cascade::CascadeStrategy;
use crate::config::ValidationConfig;
use crate::error::Result;
use crate::graph::GraphStore;
use crate::schema::{Entity, EntityTier, Signal, SignalType, TierMetadata};

/// Window over which assignment metrics are computed.
const ASSIGNMENT_WINDOW_DAYS: i64 = 30;

/// Premium requires both thresholds; active requires only the frequency.
const PREMIUM_MIN_FREQUENCY: f64 = 0.33;
const PREMIUM_MIN_RFP_DENSITY: f64 = 0.3;
const ACTIVE_MIN_FREQUENCY: f64 = 0.07;

/// Which scraping sources an entity's daily run may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceScope {
    All,
    Limited,
    Minimal,
}

/// Resources allotted to one entity's daily processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceProfile {
    pub tier: EntityTier,
    pub workers: usize,
    pub timeout_seconds: u64,
    pub model_strategy: CascadeStrategy,
    pub scraping_sources: SourceScope,
}

impl ResourceProfile {
    /// The tier's profile under the given configuration.
    pub fn for_tier(tier: EntityTier, config: &ValidationConfig) -> Self {
        let (model_strategy, scraping_sources) = match tier {
            EntityTier::Premium => (CascadeStrategy::Cascade, SourceScope::All),
            EntityTier::Active => (CascadeStrategy::Cascade, SourceScope::Limited),
            EntityTier::Dormant => (CascadeStrategy::SmallOnly, SourceScope::Minimal),
        };
        Self {
            tier,
            workers: config.pool_size(tier),
            timeout_seconds: config.tier_timeout_secs(tier),
            model_strategy,
            scraping_sources,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// One entity in the daily plan, with its resources.
#[derive(Debug, Clone)]
pub struct ScheduledEntity {
    pub entity: Entity,
    pub profile: ResourceProfile,
}

/// Classifies entities by recent signal activity and produces the ordered
/// daily processing list: all premium entities, then active, then dormant,
/// each block sorted by entity id. Every entity appears exactly once.
pub struct PriorityScheduler {
    store: Arc<dyn GraphStore>,
    config: Arc<ValidationConfig>,
}

impl PriorityScheduler {
    pub fn new(store: Arc<dyn GraphStore>, config: Arc<ValidationConfig>) -> Self {
        Self { store, config }
    }

    /// Tier assignment rule over one entity's recent signals.
    pub fn assign_tier(signals: &[Signal]) -> (EntityTier, TierMetadata) {
        let total = signals.len();
        let rfp_count = signals
            .iter()
            .filter(|s| s.signal_type == SignalType::RfpDetected)
            .count();

        let signal_frequency = total as f64 / ASSIGNMENT_WINDOW_DAYS as f64;
        let rfp_density = rfp_count as f64 / (total.max(1)) as f64;

        let tier = if signal_frequency > PREMIUM_MIN_FREQUENCY && rfp_density > PREMIUM_MIN_RFP_DENSITY
        {
            EntityTier::Premium
        } else if signal_frequency > ACTIVE_MIN_FREQUENCY {
            EntityTier::Active
        } else {
            EntityTier::Dormant
        };

        let metadata = TierMetadata {
            signal_frequency,
            rfp_density,
            tier_assigned_at: Utc::now(),
        };
        (tier, metadata)
    }

    /// Classify every entity, write tiers back, and return the ordered
    /// daily plan.
    pub async fn build_daily_plan(&self) -> Result<Vec<ScheduledEntity>> {
        let entities = self.store.get_all_entities().await?;
        let mut plan = Vec::with_capacity(entities.len());

        for mut entity in entities {
            let signals = match self
                .store
                .get_entity_signals(&entity.entity_id, ASSIGNMENT_WINDOW_DAYS)
                .await
            {
                Ok(signals) => signals,
                Err(e) => {
                    // Degrade rather than drop: an unreadable history still
                    // gets the entity processed, at the lowest priority.
                    warn!(entity_id = %entity.entity_id, error = %e, "history read failed");
                    Vec::new()
                }
            };

            let (tier, metadata) = Self::assign_tier(&signals);
            if let Err(e) = self
                .store
                .update_entity_tier(&entity.entity_id, tier, metadata.clone())
                .await
            {
                warn!(entity_id = %entity.entity_id, error = %e, "tier write-back failed");
            }

            entity.tier = tier;
            entity.tier_metadata = Some(metadata);
            let profile = ResourceProfile::for_tier(tier, &self.config);
            plan.push(ScheduledEntity { entity, profile });
        }

        plan.sort_by(|a, b| {
            a.entity
                .tier
                .cmp(&b.entity.tier)
                .then_with(|| a.entity.entity_id.cmp(&b.entity.entity_id))
        });

        let premium = plan
            .iter()
            .filter(|s| s.entity.tier == EntityTier::Premium)
            .count();
        let active = plan
            .iter()
            .filter(|s| s.entity.tier == EntityTier::Active)
            .count();
        info!(
            total = plan.len(),
            premium,
            active,
            dormant = plan.len() - premium - active,
            "daily plan built"
        );

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryGraphStore;
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;

    fn signals(total: usize, rfp: usize) -> Vec<Signal> {
        (0..total)
            .map(|i| {
                let kind = if i < rfp {
                    SignalType::RfpDetected
                } else {
                    SignalType::ExecutiveChange
                };
                Signal::new(format!("s{i}"), kind, 0.8, "ent-1")
                    .with_first_seen(Utc::now() - ChronoDuration::days((i % 29) as i64))
            })
            .collect()
    }

    #[test]
    fn frequent_rfp_heavy_entity_is_premium() {
        // 12 signals / 30 days = 0.4; 5 of 12 RFPs = 0.42 density.
        let (tier, metadata) = PriorityScheduler::assign_tier(&signals(12, 5));
        assert_eq!(tier, EntityTier::Premium);
        assert!(metadata.signal_frequency > PREMIUM_MIN_FREQUENCY);
        assert!(metadata.rfp_density > PREMIUM_MIN_RFP_DENSITY);
    }

    #[test]
    fn frequent_but_rfp_light_entity_is_active() {
        // High frequency, 1 of 12 RFPs: misses the density bar.
        let (tier, _) = PriorityScheduler::assign_tier(&signals(12, 1));
        assert_eq!(tier, EntityTier::Active);
    }

    #[test]
    fn occasional_entity_is_active() {
        // 3 signals / 30 days = 0.1.
        let (tier, _) = PriorityScheduler::assign_tier(&signals(3, 0));
        assert_eq!(tier, EntityTier::Active);
    }

    #[test]
    fn quiet_entity_is_dormant() {
        let (tier, metadata) = PriorityScheduler::assign_tier(&signals(1, 0));
        assert_eq!(tier, EntityTier::Dormant);
        // Density guards against division by zero on empty histories.
        let (tier, _) = PriorityScheduler::assign_tier(&[]);
        assert_eq!(tier, EntityTier::Dormant);
        assert!(metadata.rfp_density >= 0.0);
    }

    #[test]
    fn profiles_match_tier_table() {
        let config = ValidationConfig::default();

        let premium = ResourceProfile::for_tier(EntityTier::Premium, &config);
        assert_eq!(premium.workers, 10);
        assert_eq!(premium.timeout_seconds, 300);
        assert_eq!(premium.model_strategy, CascadeStrategy::Cascade);
        assert_eq!(premium.scraping_sources, SourceScope::All);

        let active = ResourceProfile::for_tier(EntityTier::Active, &config);
        assert_eq!(active.workers, 5);
        assert_eq!(active.timeout_seconds, 600);
        assert_eq!(active.model_strategy, CascadeStrategy::Cascade);
        assert_eq!(active.scraping_sources, SourceScope::Limited);

        let dormant = ResourceProfile::for_tier(EntityTier::Dormant, &config);
        assert_eq!(dormant.workers, 2);
        assert_eq!(dormant.timeout_seconds, 900);
        assert_eq!(dormant.model_strategy, CascadeStrategy::SmallOnly);
        assert_eq!(dormant.scraping_sources, SourceScope::Minimal);
    }

    #[tokio::test]
    async fn plan_orders_tiers_then_entity_ids() {
        let store = Arc::new(InMemoryGraphStore::new());
        for id in ["b-active", "a-active", "z-premium", "d-dormant"] {
            store.insert_entity(Entity::new(id, id)).await;
        }

        // Premium history: 12 signals, all RFPs.
        for i in 0..12 {
            store
                .insert_signal_unchecked(
                    Signal::new(format!("p{i}"), SignalType::RfpDetected, 0.8, "z-premium")
                        .with_first_seen(Utc::now() - ChronoDuration::days(i % 20)),
                )
                .await;
        }
        // Active history: 3 signals each.
        for entity in ["a-active", "b-active"] {
            for i in 0..3 {
                store
                    .insert_signal_unchecked(
                        Signal::new(
                            format!("{entity}-{i}"),
                            SignalType::ExecutiveChange,
                            0.8,
                            entity,
                        )
                        .with_first_seen(Utc::now() - ChronoDuration::days(i)),
                    )
                    .await;
            }
        }

        let scheduler =
            PriorityScheduler::new(store.clone(), Arc::new(ValidationConfig::default()));
        let plan = scheduler.build_daily_plan().await.unwrap();

        let ids: Vec<&str> = plan.iter().map(|s| s.entity.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["z-premium", "a-active", "b-active", "d-dormant"]);

        // Tier assignments were written back with their metrics.
        let entities = store.get_all_entities().await.unwrap();
        let premium = entities
            .iter()
            .find(|e| e.entity_id == "z-premium")
            .unwrap();
        assert_eq!(premium.tier, EntityTier::Premium);
        assert!(premium.tier_metadata.is_some());
    }
}
