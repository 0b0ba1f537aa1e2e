//! LM tier, pricing, and usage accounting types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Error;

/// Logical model tier. The cascade escalates in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Fast and cheap; the cascade's default starting point.
    Small = 0,
    /// Balanced capability and cost.
    Medium = 1,
    /// Most capable, highest cost; the escalation ceiling.
    Large = 2,
}

impl ModelTier {
    /// Escalation order, cheapest first.
    pub const ESCALATION: [ModelTier; 3] = [Self::Small, Self::Medium, Self::Large];

    /// The next tier up, if any.
    pub fn next_up(&self) -> Option<ModelTier> {
        match self {
            Self::Small => Some(Self::Medium),
            Self::Medium => Some(Self::Large),
            Self::Large => None,
        }
    }

    pub fn is_top(&self) -> bool {
        matches!(self, Self::Large)
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Medium => write!(f, "medium"),
            Self::Large => write!(f, "large"),
        }
    }
}

impl std::str::FromStr for ModelTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "small" => Ok(Self::Small),
            "medium" => Ok(Self::Medium),
            "large" => Ok(Self::Large),
            other => Err(Error::Config(format!("unknown model tier: {other}"))),
        }
    }
}

/// Concrete model behind a logical tier, with pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub tier: ModelTier,
    /// Provider model identifier (e.g. "claude-3-5-haiku-20241022").
    pub id: String,
    /// Input cost per million tokens (USD).
    pub input_cost_per_m: f64,
    /// Output cost per million tokens (USD).
    pub output_cost_per_m: f64,
    /// Maximum output tokens the model supports.
    pub max_output: u32,
}

impl ModelSpec {
    /// Calculate cost for given token usage.
    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input_cost_per_m;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output_cost_per_m;
        input_cost + output_cost
    }

    /// Blended $/Mtoken rate used for cost-table defaults.
    pub fn blended_cost_per_m(&self) -> f64 {
        (self.input_cost_per_m + self.output_cost_per_m) / 2.0
    }
}

/// Well-known tier defaults.
impl ModelSpec {
    pub fn small_default() -> Self {
        Self {
            tier: ModelTier::Small,
            id: "claude-3-5-haiku-20241022".to_string(),
            input_cost_per_m: 0.8,
            output_cost_per_m: 4.0,
            max_output: 8192,
        }
    }

    pub fn medium_default() -> Self {
        Self {
            tier: ModelTier::Medium,
            id: "claude-3-5-sonnet-20241022".to_string(),
            input_cost_per_m: 3.0,
            output_cost_per_m: 15.0,
            max_output: 8192,
        }
    }

    pub fn large_default() -> Self {
        Self {
            tier: ModelTier::Large,
            id: "claude-3-opus-20240229".to_string(),
            input_cost_per_m: 15.0,
            output_cost_per_m: 75.0,
            max_output: 4096,
        }
    }

    pub fn default_for(tier: ModelTier) -> Self {
        match tier {
            ModelTier::Small => Self::small_default(),
            ModelTier::Medium => Self::medium_default(),
            ModelTier::Large => Self::large_default(),
        }
    }
}

/// Result of a single-shot completion at a tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Completion {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Token and dollar usage for a single tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TierUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub request_count: u64,
}

impl TierUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn merge(&mut self, other: &TierUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost_usd += other.cost_usd;
        self.request_count += other.request_count;
    }
}

/// Accumulated LM usage across a cascade, batch, or daily run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostTracker {
    pub by_tier: HashMap<ModelTier, TierUsage>,
    pub total_cost_usd: f64,
    pub request_count: u64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completion at a tier.
    pub fn record(&mut self, tier: ModelTier, input_tokens: u64, output_tokens: u64, cost: f64) {
        let usage = self.by_tier.entry(tier).or_default();
        usage.input_tokens += input_tokens;
        usage.output_tokens += output_tokens;
        usage.cost_usd += cost;
        usage.request_count += 1;
        self.total_cost_usd += cost;
        self.request_count += 1;
    }

    /// Merge another tracker into this one.
    pub fn merge(&mut self, other: &CostTracker) {
        for (tier, usage) in &other.by_tier {
            self.by_tier.entry(*tier).or_default().merge(usage);
        }
        self.total_cost_usd += other.total_cost_usd;
        self.request_count += other.request_count;
    }

    pub fn total_tokens(&self) -> u64 {
        self.by_tier.values().map(TierUsage::total_tokens).sum()
    }

    /// Requests per tier, for the tier-use histogram in reports.
    pub fn tier_histogram(&self) -> HashMap<ModelTier, u64> {
        self.by_tier
            .iter()
            .map(|(tier, usage)| (*tier, usage.request_count))
            .collect()
    }
}
