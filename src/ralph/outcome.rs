//! Per-signal outcomes and the batch validation report.
//!
//! Rejections are data, not errors: every input signal ends up either in
//! the survivor list or in exactly one rejection bucket.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::llm::CostTracker;
use crate::schema::Signal;

/// The specific rule or failure that rejected a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Required fields missing or out of range at pass-1 entry.
    MalformedInput,
    /// Confidence below the floor (pass 1 or the pass-3 re-check).
    BelowConfidence,
    /// Too few evidence items even after enrichment.
    InsufficientEvidence,
    /// Mean evidence credibility below the floor.
    LowCredibility,
    /// Every cascade tier errored or was unparseable.
    CascadeExhausted,
    /// Audited confidence fell below the floor.
    AuditBelowConfidence,
    /// Near-duplicate of a stored signal.
    Duplicate,
    /// Could not be persisted after retries.
    PersistFailure,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MalformedInput => "malformed_input",
            Self::BelowConfidence => "below_confidence",
            Self::InsufficientEvidence => "insufficient_evidence",
            Self::LowCredibility => "low_credibility",
            Self::CascadeExhausted => "cascade_exhausted",
            Self::AuditBelowConfidence => "audit_below_confidence",
            Self::Duplicate => "duplicate",
            Self::PersistFailure => "persist_failure",
        };
        write!(f, "{name}")
    }
}

/// Lifecycle of a signal inside one `validate_signals` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalState {
    Received,
    Passed1,
    Passed2,
    Passed3Validated,
    Persisted,
    RejectedPass1(RejectReason),
    RejectedPass2(RejectReason),
    RejectedPass3Duplicate,
    RejectedPersistFailure,
}

impl SignalState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Persisted
                | Self::RejectedPass1(_)
                | Self::RejectedPass2(_)
                | Self::RejectedPass3Duplicate
                | Self::RejectedPersistFailure
        )
    }
}

/// A rejected signal with its reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedSignal {
    pub signal_id: String,
    pub reason: RejectReason,
}

impl RejectedSignal {
    pub fn new(signal: &Signal, reason: RejectReason) -> Self {
        Self {
            signal_id: signal.id.clone(),
            reason,
        }
    }
}

/// Result of one `validate_signals` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub entity_id: String,
    /// Signals that passed all three passes and were upserted.
    pub survivors: Vec<Signal>,
    /// Every rejected input, exactly one entry each.
    pub rejected: Vec<RejectedSignal>,
    /// Survivors flagged for manual review.
    pub manual_review_count: u64,
    /// Store write retries performed during persistence.
    pub upsert_retries: u64,
    /// Survivor-grade signals parked in the retry buffer after persistent
    /// write failures.
    pub buffered_writes: u64,
    /// Buffered signals from earlier batches drained into the store.
    pub drained_writes: u64,
    /// LM usage across the batch.
    pub costs: CostTracker,
}

impl ValidationReport {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            ..Self::default()
        }
    }

    pub fn reject(&mut self, signal: &Signal, reason: RejectReason) {
        self.rejected.push(RejectedSignal::new(signal, reason));
    }

    /// Rejections tallied per reason.
    pub fn rejection_counts(&self) -> HashMap<RejectReason, u64> {
        let mut counts = HashMap::new();
        for rejected in &self.rejected {
            *counts.entry(rejected.reason).or_insert(0) += 1;
        }
        counts
    }

    pub fn validated_count(&self) -> u64 {
        self.survivors.len() as u64
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.len() as u64
    }
}
