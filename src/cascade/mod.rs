//! Cost-optimizing model cascade.
//!
//! Each validation job is tried at the cheapest tier first and escalated
//! only when the result is insufficient. One cascade instance is scoped to
//! a validation batch: its cost tally and adaptive state cover the signals
//! of that batch.

mod decision;
mod prompt;

pub use decision::{parse_decision, AuditDecision};
pub use prompt::{build_audit_prompt, AUDIT_PROMPT_VERSION, MAX_PRIOR_SIGNALS};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ValidationConfig;
use crate::error::{Error, Result};
use crate::llm::{CostTracker, LmClient, ModelTier};
use crate::schema::Signal;

/// Max completion attempts at a single tier before escalating.
const MAX_ATTEMPTS_PER_TIER: u32 = 3;

/// Exponential backoff for rate-limited calls: 1s base, x2, 60s cap.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Consecutive small-tier failures that shift the starting tier.
const SMALL_FAILURE_SHIFT: u32 = 3;

/// Output budget for audit completions.
const AUDIT_MAX_OUTPUT_TOKENS: u32 = 1024;

/// Which tiers a validation job may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStrategy {
    /// Full ladder, cheapest first.
    Cascade,
    /// Small tier only; never escalates.
    SmallOnly,
    /// Medium tier only.
    MediumOnly,
}

impl CascadeStrategy {
    fn ladder(&self, config: &ValidationConfig) -> Vec<ModelTier> {
        match self {
            Self::Cascade => config.cascade_model_tiers.clone(),
            Self::SmallOnly => vec![ModelTier::Small],
            Self::MediumOnly => vec![ModelTier::Medium],
        }
    }
}

/// Decision record produced by a cascade run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeOutcome {
    pub validated: bool,
    /// Raw adjustment from the LM; the audit pass clips it.
    pub adjustment: f64,
    pub rationale: String,
    pub requires_manual_review: bool,
    /// Tier whose decision was accepted.
    pub tier_used: ModelTier,
    /// Tokens consumed across every call made for this job.
    pub tokens_used: u64,
    /// Dollars spent across every call made for this job.
    pub cost_usd: f64,
}

/// Routes one validation job to the cheapest sufficient model.
pub struct ModelCascade {
    client: Arc<dyn LmClient>,
    config: Arc<ValidationConfig>,
    costs: Mutex<CostTracker>,
    consecutive_small_failures: AtomicU32,
    start_at_medium: AtomicBool,
}

impl ModelCascade {
    pub fn new(client: Arc<dyn LmClient>, config: Arc<ValidationConfig>) -> Self {
        Self {
            client,
            config,
            costs: Mutex::new(CostTracker::new()),
            consecutive_small_failures: AtomicU32::new(0),
            start_at_medium: AtomicBool::new(false),
        }
    }

    /// Cumulative usage across every job this cascade has run.
    pub fn costs(&self) -> CostTracker {
        self.costs.lock().expect("cost tracker lock").clone()
    }

    /// Run one validation job: the signal plus prior signals of the same
    /// entity for prompt context.
    ///
    /// Returns [`Error::CascadeExhausted`] when every permitted tier failed
    /// to produce a parseable decision.
    pub async fn run(
        &self,
        signal: &Signal,
        prior_signals: &[Signal],
        strategy: CascadeStrategy,
    ) -> Result<CascadeOutcome> {
        let mut ladder = strategy.ladder(&self.config);
        if strategy == CascadeStrategy::Cascade && self.start_at_medium.load(Ordering::Relaxed) {
            ladder.retain(|tier| *tier >= ModelTier::Medium);
            if ladder.is_empty() {
                ladder.push(ModelTier::Medium);
            }
        }

        let prompt = build_audit_prompt(signal, prior_signals);

        let mut tokens_used = 0u64;
        let mut cost_usd = 0.0f64;
        let mut last_parsed: Option<(AuditDecision, ModelTier)> = None;

        for (position, tier) in ladder.iter().enumerate() {
            let tier = *tier;
            let is_last = position == ladder.len() - 1;

            match self
                .attempt_tier(tier, &prompt, &mut tokens_used, &mut cost_usd)
                .await
            {
                Some(decision) => {
                    if tier == ModelTier::Small {
                        self.consecutive_small_failures.store(0, Ordering::Relaxed);
                    }
                    let sufficient = decision.confidence_adjustment.abs()
                        <= self.config.max_confidence_adjustment
                        && (!decision.requires_manual_review || is_last);

                    if sufficient {
                        return Ok(self.outcome(decision, tier, tokens_used, cost_usd));
                    }

                    debug!(
                        signal_id = %signal.id,
                        tier = %tier,
                        "decision insufficient, escalating"
                    );
                    last_parsed = Some((decision, tier));
                }
                None => {
                    if tier == ModelTier::Small {
                        self.note_small_failure();
                    }
                }
            }
        }

        // No tier was sufficient; accept the last parseable decision if any.
        if let Some((decision, tier)) = last_parsed {
            return Ok(self.outcome(decision, tier, tokens_used, cost_usd));
        }

        Err(Error::CascadeExhausted {
            tiers_tried: ladder.len(),
        })
    }

    /// Try one tier with retry-and-backoff. Returns the parsed decision, or
    /// `None` when the tier is out of attempts or unparseable.
    async fn attempt_tier(
        &self,
        tier: ModelTier,
        prompt: &str,
        tokens_used: &mut u64,
        cost_usd: &mut f64,
    ) -> Option<AuditDecision> {
        let mut backoff = BACKOFF_BASE;

        for attempt in 1..=MAX_ATTEMPTS_PER_TIER {
            match self
                .client
                .complete(tier, prompt, AUDIT_MAX_OUTPUT_TOKENS)
                .await
            {
                Ok(completion) => {
                    let call_cost = completion.total_tokens() as f64 / 1_000_000.0
                        * self.config.cost_rate(tier);
                    *tokens_used += completion.total_tokens();
                    *cost_usd += call_cost;
                    self.costs.lock().expect("cost tracker lock").record(
                        tier,
                        completion.input_tokens,
                        completion.output_tokens,
                        call_cost,
                    );

                    match parse_decision(&completion.text) {
                        Ok(decision) => return Some(decision),
                        Err(e) => {
                            debug!(tier = %tier, error = %e, "unparseable decision, escalating");
                            return None;
                        }
                    }
                }
                Err(e @ (Error::RateLimited { .. } | Error::Model(_))) => {
                    if attempt == MAX_ATTEMPTS_PER_TIER {
                        warn!(tier = %tier, error = %e, "tier out of attempts");
                        return None;
                    }
                    debug!(tier = %tier, attempt, error = %e, "transient failure, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
                Err(e) => {
                    debug!(tier = %tier, error = %e, "non-retryable failure, escalating");
                    return None;
                }
            }
        }

        None
    }

    fn note_small_failure(&self) {
        let failures = self
            .consecutive_small_failures
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        if failures >= SMALL_FAILURE_SHIFT && !self.start_at_medium.swap(true, Ordering::Relaxed) {
            warn!(
                failures,
                "small tier failing consistently; starting subsequent signals at medium"
            );
        }
    }

    fn outcome(
        &self,
        decision: AuditDecision,
        tier: ModelTier,
        tokens_used: u64,
        cost_usd: f64,
    ) -> CascadeOutcome {
        CascadeOutcome {
            validated: decision.validated,
            adjustment: decision.confidence_adjustment,
            rationale: decision.rationale,
            requires_manual_review: decision.requires_manual_review,
            tier_used: tier,
            tokens_used,
            cost_usd,
        }
    }
}
