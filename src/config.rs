//! Pipeline configuration.
//!
//! The surface is a closed enumeration; the config object is read-only
//! after construction and shared across the loop, cascade, scheduler, and
//! orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::llm::{ModelSpec, ModelTier};
use crate::schema::EntityTier;

/// Weights for the pass-3 near-duplicate similarity score. Exposed so the
/// combination can be recalibrated against real data without code changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DedupWeights {
    /// Added when both signals have the same type.
    pub type_match: f64,
    /// Added when first_seen instants are within 24 hours.
    pub temporal_proximity: f64,
    /// Weight on the Jaccard overlap of evidence URLs.
    pub url_overlap: f64,
    /// Weight on the token-set Jaccard of concatenated snippets.
    pub text_overlap: f64,
}

impl Default for DedupWeights {
    fn default() -> Self {
        Self {
            type_match: 0.4,
            temporal_proximity: 0.2,
            url_overlap: 0.2,
            text_overlap: 0.2,
        }
    }
}

impl DedupWeights {
    /// Upper bound of the similarity score.
    pub fn max_score(&self) -> f64 {
        self.type_match + self.temporal_proximity + self.url_overlap + self.text_overlap
    }
}

/// Configuration for the validation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Minimum accepted evidence items per signal.
    pub min_evidence: usize,
    /// Floor on signal confidence.
    pub min_confidence: f64,
    /// Floor on mean evidence credibility.
    pub min_evidence_credibility: f64,
    /// Cap on the magnitude of a pass-2 confidence adjustment.
    pub max_confidence_adjustment: f64,
    /// Adjustment magnitude that triggers the manual-review flag.
    pub confidence_review_threshold: f64,
    /// When false, pass 2 preserves the original confidence untouched.
    pub enable_confidence_validation: bool,
    /// Pass-3 near-duplicate threshold.
    pub dedup_similarity_threshold: f64,
    /// How far back to look for duplicates, in days.
    pub dedup_window_days: i64,
    /// Ordered cascade tiers, cheapest first.
    pub cascade_model_tiers: Vec<ModelTier>,
    /// Blended $/Mtoken rate per tier, used for cascade cost accounting.
    pub cascade_cost_table: HashMap<ModelTier, f64>,
    /// Worker pool size per entity tier.
    pub tier_pool_sizes: HashMap<EntityTier, usize>,
    /// Per-entity timeout per entity tier, in seconds.
    pub tier_timeouts_seconds: HashMap<EntityTier, u64>,
    /// Concurrent cascade calls per entity during pass 2.
    pub fanout_per_entity: usize,
    /// Horizon for pass-1 corroboration lookups, in days.
    pub pass1_enrichment_lookback_days: i64,
    /// Similarity weights for pass-3 dedup.
    pub dedup_weights: DedupWeights,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        let cascade_cost_table = ModelTier::ESCALATION
            .iter()
            .map(|tier| (*tier, ModelSpec::default_for(*tier).blended_cost_per_m()))
            .collect();

        let tier_pool_sizes = HashMap::from([
            (EntityTier::Premium, 10),
            (EntityTier::Active, 5),
            (EntityTier::Dormant, 2),
        ]);

        let tier_timeouts_seconds = HashMap::from([
            (EntityTier::Premium, 300),
            (EntityTier::Active, 600),
            (EntityTier::Dormant, 900),
        ]);

        Self {
            min_evidence: 3,
            min_confidence: 0.7,
            min_evidence_credibility: 0.6,
            max_confidence_adjustment: 0.15,
            confidence_review_threshold: 0.2,
            enable_confidence_validation: true,
            dedup_similarity_threshold: 0.85,
            dedup_window_days: 7,
            cascade_model_tiers: ModelTier::ESCALATION.to_vec(),
            cascade_cost_table,
            tier_pool_sizes,
            tier_timeouts_seconds,
            fanout_per_entity: 5,
            pass1_enrichment_lookback_days: 30,
            dedup_weights: DedupWeights::default(),
        }
    }
}

impl ValidationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_evidence(mut self, min_evidence: usize) -> Self {
        self.min_evidence = min_evidence;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_min_evidence_credibility(mut self, floor: f64) -> Self {
        self.min_evidence_credibility = floor;
        self
    }

    pub fn with_max_confidence_adjustment(mut self, cap: f64) -> Self {
        self.max_confidence_adjustment = cap;
        self
    }

    pub fn with_confidence_validation(mut self, enabled: bool) -> Self {
        self.enable_confidence_validation = enabled;
        self
    }

    pub fn with_dedup_similarity_threshold(mut self, threshold: f64) -> Self {
        self.dedup_similarity_threshold = threshold;
        self
    }

    pub fn with_dedup_window_days(mut self, days: i64) -> Self {
        self.dedup_window_days = days;
        self
    }

    pub fn with_fanout_per_entity(mut self, fanout: usize) -> Self {
        self.fanout_per_entity = fanout;
        self
    }

    pub fn with_dedup_weights(mut self, weights: DedupWeights) -> Self {
        self.dedup_weights = weights;
        self
    }

    /// Cost rate for a tier, $/Mtoken.
    pub fn cost_rate(&self, tier: ModelTier) -> f64 {
        self.cascade_cost_table.get(&tier).copied().unwrap_or(0.0)
    }

    /// Pool size for an entity tier.
    pub fn pool_size(&self, tier: EntityTier) -> usize {
        self.tier_pool_sizes.get(&tier).copied().unwrap_or(1)
    }

    /// Per-entity timeout for an entity tier, seconds.
    pub fn tier_timeout_secs(&self, tier: EntityTier) -> u64 {
        self.tier_timeouts_seconds.get(&tier).copied().unwrap_or(900)
    }

    /// Reject configurations that cannot be run.
    pub fn validate(&self) -> Result<()> {
        if self.cascade_model_tiers.is_empty() {
            return Err(Error::Config("cascade_model_tiers is empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(Error::Config(format!(
                "min_confidence {} out of [0, 1]",
                self.min_confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.min_evidence_credibility) {
            return Err(Error::Config(format!(
                "min_evidence_credibility {} out of [0, 1]",
                self.min_evidence_credibility
            )));
        }
        if self.max_confidence_adjustment <= 0.0 || self.max_confidence_adjustment > 0.5 {
            return Err(Error::Config(format!(
                "max_confidence_adjustment {} out of (0, 0.5]",
                self.max_confidence_adjustment
            )));
        }
        if self.fanout_per_entity == 0 {
            return Err(Error::Config("fanout_per_entity must be > 0".to_string()));
        }
        if self.dedup_similarity_threshold > self.dedup_weights.max_score() {
            return Err(Error::Config(format!(
                "dedup_similarity_threshold {} exceeds maximum reachable score {}",
                self.dedup_similarity_threshold,
                self.dedup_weights.max_score()
            )));
        }
        Ok(())
    }
}
