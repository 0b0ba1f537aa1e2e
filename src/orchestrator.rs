//! Daily orchestration: tier-ordered processing of every entity.
//!
//! Tiers run strictly in order (premium, then active, then dormant);
//! parallelism exists only inside a tier, bounded by the tier's worker
//! pool. A per-entity timeout keeps one slow entity from stalling the run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ValidationConfig;
use crate::error::{Error, Result};
use crate::graph::GraphStore;
use crate::llm::{CostTracker, LmClient, ModelTier};
use crate::ralph::{RalphLoop, RejectReason, ResearchSource, ValidationReport};
use crate::scheduler::{PriorityScheduler, ScheduledEntity};
use crate::schema::{EntityTier, Signal};

/// Pre-flight probe retry delay.
const PREFLIGHT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Per-entity raw-signal feed. The scrapers behind it are out of scope;
/// the orchestrator only needs something callable per entity.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// The day's raw signals for an entity. Empty is valid.
    async fn fetch_signals(&self, entity_id: &str) -> Result<Vec<Signal>>;
}

/// Cooperative cancellation handle, honored between tiers.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to one entity during the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    Started,
    Finished,
    TimedOut,
    Failed,
}

/// Entry in the run's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub at: DateTime<Utc>,
    pub entity_id: String,
    pub tier: EntityTier,
    pub kind: RunEventKind,
}

/// Aggregated outcomes for one tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierReport {
    pub entities_processed: u64,
    pub entities_timed_out: u64,
    pub entities_failed: u64,
    pub signals_validated: u64,
    pub signals_rejected: HashMap<RejectReason, u64>,
    pub manual_review_flags: u64,
    pub costs: CostTracker,
}

impl TierReport {
    fn absorb(&mut self, validation: &ValidationReport) {
        self.entities_processed += 1;
        self.signals_validated += validation.validated_count();
        for (reason, count) in validation.rejection_counts() {
            *self.signals_rejected.entry(reason).or_insert(0) += count;
        }
        self.manual_review_flags += validation.manual_review_count;
        self.costs.merge(&validation.costs);
    }
}

/// Report returned by [`DailyOrchestrator::run_daily`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub aborted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub cancelled: bool,
    pub tiers: HashMap<EntityTier, TierReport>,
    /// Requests per model tier across the whole run.
    pub cascade_tier_histogram: HashMap<ModelTier, u64>,
    /// Tokens per model tier across the whole run.
    pub tokens_by_tier: HashMap<ModelTier, u64>,
    pub total_cost_usd: f64,
    pub unrecoverable_errors: Vec<String>,
    pub events: Vec<RunEvent>,
}

impl DailyReport {
    fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            aborted: false,
            abort_reason: None,
            cancelled: false,
            tiers: HashMap::new(),
            cascade_tier_histogram: HashMap::new(),
            tokens_by_tier: HashMap::new(),
            total_cost_usd: 0.0,
            unrecoverable_errors: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn entities_processed(&self) -> u64 {
        self.tiers.values().map(|t| t.entities_processed).sum()
    }

    pub fn entities_timed_out(&self) -> u64 {
        self.tiers.values().map(|t| t.entities_timed_out).sum()
    }

    pub fn signals_validated(&self) -> u64 {
        self.tiers.values().map(|t| t.signals_validated).sum()
    }
}

enum EntityOutcome {
    Processed(ValidationReport),
    TimedOut,
    Failed(String),
}

/// Runs the whole entity population once a day.
pub struct DailyOrchestrator {
    store: Arc<dyn GraphStore>,
    client: Arc<dyn LmClient>,
    config: Arc<ValidationConfig>,
    ralph: Arc<RalphLoop>,
    scheduler: PriorityScheduler,
    source: Arc<dyn SignalSource>,
    cancel: CancelFlag,
}

impl DailyOrchestrator {
    pub fn new(
        store: Arc<dyn GraphStore>,
        client: Arc<dyn LmClient>,
        config: Arc<ValidationConfig>,
        source: Arc<dyn SignalSource>,
    ) -> Self {
        let ralph = Arc::new(RalphLoop::new(
            store.clone(),
            client.clone(),
            config.clone(),
        ));
        let scheduler = PriorityScheduler::new(store.clone(), config.clone());
        Self {
            store,
            client,
            config,
            ralph,
            scheduler,
            source,
            cancel: CancelFlag::new(),
        }
    }

    /// Wire an optional background research source into the loop.
    pub fn with_research(mut self, research: Arc<dyn ResearchSource>) -> Self {
        self.ralph = Arc::new(
            RalphLoop::new(
                self.store.clone(),
                self.client.clone(),
                self.config.clone(),
            )
            .with_research(research),
        );
        self
    }

    /// Use an externally owned cancellation flag.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle for cancelling the run between tiers.
    pub fn cancel_handle(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Process every entity once, premium tier first, and return the run
    /// report. Pre-flight or plan failures abort before any work starts.
    pub async fn run_daily(&self) -> DailyReport {
        let run_id = Uuid::new_v4();
        let mut report = DailyReport::new(run_id, Utc::now());
        info!(%run_id, "daily run starting");

        if let Err(e) = self.preflight().await {
            warn!(%run_id, error = %e, "pre-flight failed, aborting run");
            report.aborted = true;
            report.abort_reason = Some(e.to_string());
            report.finished_at = Utc::now();
            return report;
        }

        let plan = match self.scheduler.build_daily_plan().await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(%run_id, error = %e, "daily plan failed, aborting run");
                report.aborted = true;
                report.abort_reason = Some(e.to_string());
                report.finished_at = Utc::now();
                return report;
            }
        };

        let events: Arc<Mutex<Vec<RunEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let mut run_costs = CostTracker::new();

        for tier in EntityTier::ORDERED {
            if self.cancel.is_cancelled() {
                info!(%run_id, %tier, "run cancelled before tier");
                report.cancelled = true;
                break;
            }

            let entities: Vec<ScheduledEntity> = plan
                .iter()
                .filter(|s| s.entity.tier == tier)
                .cloned()
                .collect();
            let workers = self.config.pool_size(tier).max(1);

            let outcomes: Vec<(ScheduledEntity, EntityOutcome)> = stream::iter(entities)
                .map(|scheduled| {
                    let events = events.clone();
                    async move {
                        push_event(&events, &scheduled, RunEventKind::Started);
                        let outcome = self.process_entity(&scheduled).await;
                        let kind = match &outcome {
                            EntityOutcome::Processed(_) => RunEventKind::Finished,
                            EntityOutcome::TimedOut => RunEventKind::TimedOut,
                            EntityOutcome::Failed(_) => RunEventKind::Failed,
                        };
                        push_event(&events, &scheduled, kind);
                        (scheduled, outcome)
                    }
                })
                .buffer_unordered(workers)
                .collect()
                .await;

            let mut tier_report = TierReport::default();
            for (scheduled, outcome) in outcomes {
                match outcome {
                    EntityOutcome::Processed(validation) => {
                        run_costs.merge(&validation.costs);
                        tier_report.absorb(&validation);
                    }
                    EntityOutcome::TimedOut => {
                        warn!(entity_id = %scheduled.entity.entity_id, "entity timed out");
                        tier_report.entities_timed_out += 1;
                    }
                    EntityOutcome::Failed(reason) => {
                        tier_report.entities_failed += 1;
                        report.unrecoverable_errors.push(format!(
                            "entity {} failed: {reason}",
                            scheduled.entity.entity_id
                        ));
                    }
                }
            }
            report.tiers.insert(tier, tier_report);
        }

        let buffered = self.ralph.retry_buffer().len();
        if buffered > 0 {
            report
                .unrecoverable_errors
                .push(format!("{buffered} validated signal(s) still awaiting upsert"));
        }
        let dropped = self.ralph.retry_buffer().dropped_count();
        if dropped > 0 {
            report
                .unrecoverable_errors
                .push(format!("{dropped} buffered write(s) evicted and lost"));
        }

        report.cascade_tier_histogram = run_costs.tier_histogram();
        report.tokens_by_tier = run_costs
            .by_tier
            .iter()
            .map(|(tier, usage)| (*tier, usage.total_tokens()))
            .collect();
        report.total_cost_usd = run_costs.total_cost_usd;
        report.events = events.lock().expect("event log lock").clone();
        report.finished_at = Utc::now();

        info!(
            %run_id,
            entities = report.entities_processed(),
            timed_out = report.entities_timed_out(),
            validated = report.signals_validated(),
            cost_usd = report.total_cost_usd,
            cancelled = report.cancelled,
            "daily run finished"
        );

        report
    }

    /// Probe both dependencies with one short retry each.
    async fn preflight(&self) -> Result<()> {
        self.probe("graph_store", || async {
            self.store.get_all_entities().await.map(|_| ())
        })
        .await?;
        self.probe("lm_client", || async {
            self.client
                .complete(ModelTier::Small, "ping", 1)
                .await
                .map(|_| ())
        })
        .await
    }

    async fn probe<F, Fut>(&self, dependency: &str, call: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        match call().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(dependency, error = %e, "pre-flight probe failed, retrying");
            }
        }
        tokio::time::sleep(PREFLIGHT_RETRY_DELAY).await;
        call()
            .await
            .map_err(|e| Error::preflight(dependency, e.to_string()))
    }

    async fn process_entity(&self, scheduled: &ScheduledEntity) -> EntityOutcome {
        let entity_id = &scheduled.entity.entity_id;
        let work = async {
            let raw = self.source.fetch_signals(entity_id).await?;
            self.ralph
                .validate_signals_with(raw, entity_id, scheduled.profile.model_strategy)
                .await
        };

        match tokio::time::timeout(scheduled.profile.timeout(), work).await {
            Ok(Ok(validation)) => EntityOutcome::Processed(validation),
            Ok(Err(e)) => EntityOutcome::Failed(e.to_string()),
            Err(_) => EntityOutcome::TimedOut,
        }
    }
}

fn push_event(events: &Mutex<Vec<RunEvent>>, scheduled: &ScheduledEntity, kind: RunEventKind) {
    events.lock().expect("event log lock").push(RunEvent {
        at: Utc::now(),
        entity_id: scheduled.entity.entity_id.clone(),
        tier: scheduled.entity.tier,
        kind,
    });
}
