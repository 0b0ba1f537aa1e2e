//! The Ralph Loop itself: pass sequencing and persistence.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::cascade::{CascadeStrategy, ModelCascade};
use crate::config::ValidationConfig;
use crate::error::{Error, Result};
use crate::graph::GraphStore;
use crate::llm::LmClient;
use crate::schema::Signal;

use super::audit::run_pass2;
use super::buffer::RetryBuffer;
use super::dedup::run_pass3;
use super::outcome::{RejectReason, ValidationReport};
use super::rules::{run_pass1, ResearchSource};

/// Store write retry: 2s base, x2, 8s cap, 3 attempts total.
const UPSERT_BACKOFF_BASE: Duration = Duration::from_secs(2);
const UPSERT_BACKOFF_CAP: Duration = Duration::from_secs(8);
const MAX_UPSERT_ATTEMPTS: u32 = 3;

/// Three-pass signal validator.
///
/// Owns no global state beyond the read-only configuration and the retry
/// buffer; the store and LM client are injected so tests can substitute
/// in-memory fakes.
pub struct RalphLoop {
    store: Arc<dyn GraphStore>,
    client: Arc<dyn LmClient>,
    config: Arc<ValidationConfig>,
    research: Option<Arc<dyn ResearchSource>>,
    retry_buffer: Arc<RetryBuffer>,
}

impl RalphLoop {
    pub fn new(
        store: Arc<dyn GraphStore>,
        client: Arc<dyn LmClient>,
        config: Arc<ValidationConfig>,
    ) -> Self {
        Self {
            store,
            client,
            config,
            research: None,
            retry_buffer: Arc::new(RetryBuffer::default()),
        }
    }

    /// Wire an optional background research source for pass-1 enrichment.
    pub fn with_research(mut self, research: Arc<dyn ResearchSource>) -> Self {
        self.research = Some(research);
        self
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Signals parked after persistent write failures.
    pub fn retry_buffer(&self) -> &RetryBuffer {
        &self.retry_buffer
    }

    /// Validate a batch with the default full-cascade strategy.
    pub async fn validate_signals(
        &self,
        raw_signals: Vec<Signal>,
        entity_id: &str,
    ) -> Result<ValidationReport> {
        self.validate_signals_with(raw_signals, entity_id, CascadeStrategy::Cascade)
            .await
    }

    /// Validate a batch of raw signals for one entity.
    ///
    /// Every returned survivor is validated, at pass 3, at or above the
    /// confidence floor, carries a confidence-validation record, and has
    /// been upserted successfully. Rejected signals are tallied in the
    /// report; per-signal problems never surface as errors.
    #[instrument(skip(self, raw_signals), fields(batch = raw_signals.len()))]
    pub async fn validate_signals_with(
        &self,
        raw_signals: Vec<Signal>,
        entity_id: &str,
        strategy: CascadeStrategy,
    ) -> Result<ValidationReport> {
        let mut report = ValidationReport::new(entity_id);

        self.drain_retry_buffer(&mut report).await;

        let snapshot = self.fetch_snapshot(entity_id).await;
        let cascade = ModelCascade::new(self.client.clone(), self.config.clone());

        // Pass 1: rules. The enrichment window can be narrower than the
        // snapshot horizon.
        let enrichment_priors = self.within_days(&snapshot, self.config.pass1_enrichment_lookback_days);
        let pass1 = run_pass1(
            raw_signals,
            &enrichment_priors,
            self.research.as_deref(),
            &self.config,
        )
        .await;
        for (signal, reason) in pass1.rejected {
            report.reject(&signal, reason);
        }

        // Pass 2: confidence audit. All of pass 1 completes first.
        let pass2 = run_pass2(pass1.survivors, &snapshot, &cascade, strategy, &self.config).await;
        for (signal, reason) in pass2.rejected {
            report.reject(&signal, reason);
        }

        // Pass 3: confirmation and dedup, in input order.
        let pass3 = run_pass3(pass2.survivors, &snapshot, &self.config);
        for (signal, reason) in pass3.rejected {
            report.reject(&signal, reason);
        }

        // Persist survivors; a failed write never crashes the batch.
        for signal in pass3.survivors {
            match self.persist_with_retry(&signal, &mut report.upsert_retries).await {
                Ok(()) => {
                    if signal
                        .confidence_validation
                        .as_ref()
                        .is_some_and(|v| v.requires_manual_review)
                    {
                        report.manual_review_count += 1;
                    }
                    report.survivors.push(signal);
                }
                Err(Error::SchemaInvalid(reason)) => {
                    error!(signal_id = %signal.id, reason, "refusing schema-invalid write");
                    report.reject(&signal, RejectReason::PersistFailure);
                }
                Err(e) => {
                    warn!(signal_id = %signal.id, error = %e, "parking signal in retry buffer");
                    report.buffered_writes += 1;
                    report.reject(&signal, RejectReason::PersistFailure);
                    self.retry_buffer.push(signal);
                }
            }
        }

        report.costs = cascade.costs();

        info!(
            entity_id,
            validated = report.validated_count(),
            rejected = report.rejected_count(),
            manual_review = report.manual_review_count,
            cost_usd = report.costs.total_cost_usd,
            "validation batch complete"
        );

        Ok(report)
    }

    /// Retry buffered writes from earlier batches before taking new work.
    async fn drain_retry_buffer(&self, report: &mut ValidationReport) {
        for signal in self.retry_buffer.drain() {
            match self.persist_with_retry(&signal, &mut report.upsert_retries).await {
                Ok(()) => report.drained_writes += 1,
                Err(Error::SchemaInvalid(reason)) => {
                    error!(signal_id = %signal.id, reason, "dropping schema-invalid buffered write");
                }
                Err(_) => self.retry_buffer.push(signal),
            }
        }
    }

    /// Store snapshot used by enrichment, prompting, and dedup. A failed
    /// read degrades to an empty snapshot rather than failing signals.
    async fn fetch_snapshot(&self, entity_id: &str) -> Vec<Signal> {
        let horizon = self
            .config
            .pass1_enrichment_lookback_days
            .max(self.config.dedup_window_days);
        match self.store.get_entity_signals(entity_id, horizon).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(entity_id, error = %e, "prior-signal read failed; continuing unenriched");
                Vec::new()
            }
        }
    }

    fn within_days(&self, snapshot: &[Signal], days: i64) -> Vec<Signal> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(days);
        snapshot
            .iter()
            .filter(|s| s.first_seen >= cutoff)
            .cloned()
            .collect()
    }

    async fn persist_with_retry(&self, signal: &Signal, retries: &mut u64) -> Result<()> {
        let mut backoff = UPSERT_BACKOFF_BASE;

        for attempt in 1..=MAX_UPSERT_ATTEMPTS {
            match self.store.upsert_signal(signal).await {
                Ok(()) => return Ok(()),
                Err(e @ Error::StoreUnavailable(_)) if attempt < MAX_UPSERT_ATTEMPTS => {
                    *retries += 1;
                    warn!(
                        signal_id = %signal.id,
                        attempt,
                        error = %e,
                        "store write failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(UPSERT_BACKOFF_CAP);
                }
                Err(e) => return Err(e),
            }
        }

        unreachable!("loop returns on final attempt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryGraphStore;
    use crate::llm::{Completion, ModelTier};
    use crate::schema::{Entity, EntityTier, Evidence, SignalType, TierMetadata};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// LM stub that always answers with the given decision text.
    struct FixedLm(&'static str);

    #[async_trait]
    impl LmClient for FixedLm {
        async fn complete(
            &self,
            _tier: ModelTier,
            _prompt: &str,
            _max_output_tokens: u32,
        ) -> Result<Completion> {
            Ok(Completion {
                text: self.0.to_string(),
                input_tokens: 800,
                output_tokens: 60,
            })
        }
    }

    /// Store wrapper that fails a scripted number of upserts.
    struct FlakyStore {
        inner: InMemoryGraphStore,
        fail_upserts: AtomicU32,
    }

    impl FlakyStore {
        fn new(fail_upserts: u32) -> Self {
            Self {
                inner: InMemoryGraphStore::new(),
                fail_upserts: AtomicU32::new(fail_upserts),
            }
        }
    }

    #[async_trait]
    impl GraphStore for FlakyStore {
        async fn get_entity_signals(
            &self,
            entity_id: &str,
            time_horizon_days: i64,
        ) -> Result<Vec<Signal>> {
            self.inner.get_entity_signals(entity_id, time_horizon_days).await
        }

        async fn upsert_signal(&self, signal: &Signal) -> Result<()> {
            let remaining = self.fail_upserts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_upserts.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::store_unavailable("injected outage"));
            }
            self.inner.upsert_signal(signal).await
        }

        async fn get_all_entities(&self) -> Result<Vec<Entity>> {
            self.inner.get_all_entities().await
        }

        async fn update_entity_tier(
            &self,
            entity_id: &str,
            tier: EntityTier,
            metadata: TierMetadata,
        ) -> Result<()> {
            self.inner.update_entity_tier(entity_id, tier, metadata).await
        }
    }

    const MINUS_TEN: &str = r#"{"validated": true, "confidence_adjustment": -0.10,
        "rationale": "overconfident for a single source", "requires_manual_review": false}"#;
    const NO_CHANGE: &str = r#"{"validated": true, "confidence_adjustment": 0.0,
        "rationale": "evidence supports the claim", "requires_manual_review": false}"#;

    fn ralph(store: Arc<dyn GraphStore>, lm_text: &'static str) -> RalphLoop {
        RalphLoop::new(
            store,
            Arc::new(FixedLm(lm_text)),
            Arc::new(ValidationConfig::default()),
        )
    }

    fn full_evidence(signal: Signal) -> Signal {
        let id = signal.id.clone();
        signal.with_evidence(vec![
            Evidence::new("LinkedIn", 0.85).with_url(format!("https://li.test/{id}")),
            Evidence::new("press", 0.7),
            Evidence::new("news", 0.75),
        ])
    }

    #[tokio::test]
    async fn overconfident_single_source_is_enriched_and_validated() {
        let store = Arc::new(InMemoryGraphStore::new());
        // Two recent prior signals available for corroboration, far enough
        // apart in time and content to not look like duplicates.
        for (id, kind, days) in [
            ("p1", SignalType::ExecutiveChange, 9),
            ("p2", SignalType::PartnershipFormed, 12),
        ] {
            store
                .insert_signal_unchecked(
                    Signal::new(id, kind, 0.8, "ent-1")
                        .with_first_seen(Utc::now() - ChronoDuration::days(days)),
                )
                .await;
        }

        let loop_ = ralph(store.clone(), MINUS_TEN);
        let raw = Signal::new("sig-1", SignalType::RfpDetected, 0.92, "ent-1").with_evidence(
            vec![Evidence::new("LinkedIn", 0.85).with_url("https://li.test/post/1")],
        );

        let report = loop_.validate_signals(vec![raw], "ent-1").await.unwrap();

        assert_eq!(report.validated_count(), 1);
        let survivor = &report.survivors[0];
        assert!(survivor.validated);
        assert_eq!(survivor.validation_pass, 3);
        assert!((survivor.confidence - 0.82).abs() < 1e-9);
        assert!(survivor.evidence.len() >= 3);
        assert!(survivor.confidence_validation.is_some());

        // Stored exactly once, with the validated payload.
        let stored = store.get_signal("sig-1").await.unwrap();
        assert!(stored.validated);
        assert_eq!(store.signal_count().await, 3);
    }

    #[tokio::test]
    async fn below_threshold_signal_is_rejected_in_pass_1() {
        let loop_ = ralph(Arc::new(InMemoryGraphStore::new()), NO_CHANGE);
        let raw = full_evidence(Signal::new("sig-1", SignalType::RfpDetected, 0.50, "ent-1"));

        let report = loop_.validate_signals(vec![raw], "ent-1").await.unwrap();

        assert!(report.survivors.is_empty());
        let counts = report.rejection_counts();
        assert_eq!(counts[&RejectReason::BelowConfidence], 1);
    }

    #[tokio::test]
    async fn redetected_event_is_rejected_as_duplicate() {
        let store = Arc::new(InMemoryGraphStore::new());
        let event_time = Utc::now() - ChronoDuration::days(6);
        store
            .insert_signal_unchecked(
                Signal::new("prior", SignalType::RfpDetected, 0.85, "ent-1")
                    .with_first_seen(event_time)
                    .with_evidence(vec![Evidence::new("LinkedIn", 0.85)
                        .with_url("https://li.test/rfp")
                        .with_text("club issues rfp for analytics")]),
            )
            .await;

        let loop_ = ralph(store.clone(), NO_CHANGE);
        let raw = Signal::new("fresh", SignalType::RfpDetected, 0.9, "ent-1")
            .with_first_seen(event_time + ChronoDuration::hours(3))
            .with_evidence(vec![
                Evidence::new("LinkedIn", 0.85)
                    .with_url("https://li.test/rfp")
                    .with_text("club issues rfp for analytics"),
                Evidence::new("press", 0.7),
                Evidence::new("news", 0.75),
            ]);

        let report = loop_.validate_signals(vec![raw], "ent-1").await.unwrap();

        assert!(report.survivors.is_empty());
        assert_eq!(report.rejection_counts()[&RejectReason::Duplicate], 1);
        assert_eq!(store.signal_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn store_outage_is_retried_until_recovery() {
        let store = Arc::new(FlakyStore::new(2));
        let loop_ = ralph(store.clone(), NO_CHANGE);
        let raw = full_evidence(Signal::new("sig-1", SignalType::RfpDetected, 0.9, "ent-1"));

        let report = loop_.validate_signals(vec![raw], "ent-1").await.unwrap();

        assert_eq!(report.validated_count(), 1);
        assert_eq!(report.upsert_retries, 2);
        assert!(store.inner.get_signal("sig-1").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_outage_parks_signal_in_retry_buffer() {
        let store = Arc::new(FlakyStore::new(u32::MAX));
        let loop_ = ralph(store, NO_CHANGE);
        let raw = full_evidence(Signal::new("sig-1", SignalType::RfpDetected, 0.9, "ent-1"));

        let report = loop_.validate_signals(vec![raw], "ent-1").await.unwrap();

        assert!(report.survivors.is_empty());
        assert_eq!(report.buffered_writes, 1);
        assert_eq!(report.rejection_counts()[&RejectReason::PersistFailure], 1);
        assert_eq!(loop_.retry_buffer().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_buffer_drains_on_a_later_batch() {
        let store = Arc::new(FlakyStore::new(3));
        let loop_ = ralph(store.clone(), NO_CHANGE);
        let raw = full_evidence(Signal::new("sig-1", SignalType::RfpDetected, 0.9, "ent-1"));

        let first = loop_.validate_signals(vec![raw], "ent-1").await.unwrap();
        assert_eq!(first.buffered_writes, 1);

        // The outage has cleared; an empty follow-up batch drains the buffer.
        let second = loop_.validate_signals(Vec::new(), "ent-1").await.unwrap();
        assert_eq!(second.drained_writes, 1);
        assert!(loop_.retry_buffer().is_empty());
        assert!(store.inner.get_signal("sig-1").await.is_some());
    }

    #[tokio::test]
    async fn reprocessing_a_validated_batch_changes_nothing() {
        let store = Arc::new(InMemoryGraphStore::new());
        let loop_ = ralph(store.clone(), NO_CHANGE);
        let raw = Signal::new("sig-1", SignalType::RfpDetected, 0.9, "ent-1").with_evidence(vec![
            Evidence::new("LinkedIn", 0.85)
                .with_url("https://li.test/rfp")
                .with_text("club issues rfp"),
            Evidence::new("press", 0.7).with_text("club issues rfp"),
            Evidence::new("news", 0.75).with_text("club issues rfp"),
        ]);

        let first = loop_.validate_signals(vec![raw.clone()], "ent-1").await.unwrap();
        assert_eq!(first.validated_count(), 1);

        let second = loop_.validate_signals(vec![raw], "ent-1").await.unwrap();
        assert_eq!(second.validated_count(), 0);
        assert_eq!(second.rejection_counts()[&RejectReason::Duplicate], 1);
        assert_eq!(store.signal_count().await, 1);
    }

    #[tokio::test]
    async fn every_input_lands_in_exactly_one_bucket() {
        let store = Arc::new(InMemoryGraphStore::new());
        let loop_ = ralph(store, NO_CHANGE);

        let inputs = vec![
            full_evidence(Signal::new("ok", SignalType::RfpDetected, 0.9, "ent-1")),
            full_evidence(Signal::new("low", SignalType::RfpDetected, 0.3, "ent-1")),
            Signal::new("thin", SignalType::ExecutiveChange, 0.9, "ent-1"),
            Signal::new("", SignalType::RfpDetected, 0.9, "ent-1"),
        ];
        let input_count = inputs.len() as u64;

        let report = loop_.validate_signals(inputs, "ent-1").await.unwrap();

        assert_eq!(
            report.validated_count() + report.rejected_count(),
            input_count
        );
        let counts = report.rejection_counts();
        assert_eq!(counts[&RejectReason::BelowConfidence], 1);
        assert_eq!(counts[&RejectReason::InsufficientEvidence], 1);
        assert_eq!(counts[&RejectReason::MalformedInput], 1);
    }
}
