//! Pass 2: LM-assisted confidence audit.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, info};

use crate::cascade::{CascadeStrategy, ModelCascade};
use crate::config::ValidationConfig;
use crate::schema::{ConfidenceValidation, Signal};

use super::outcome::RejectReason;

/// Result of the audit pass.
pub struct Pass2Result {
    pub survivors: Vec<Signal>,
    pub rejected: Vec<(Signal, RejectReason)>,
}

/// Clip a raw adjustment to the configured cap, preserving sign.
pub fn clip_adjustment(raw: f64, cap: f64) -> f64 {
    if raw.abs() <= cap {
        raw
    } else {
        cap.copysign(raw)
    }
}

/// Run pass 2 over the pass-1 survivors.
///
/// Cascade calls are fanned out up to `fanout_per_entity` at a time;
/// results are re-collected into input order before the acceptance
/// decision, so downstream dedup stays deterministic.
pub async fn run_pass2(
    signals: Vec<Signal>,
    prior_signals: &[Signal],
    cascade: &ModelCascade,
    strategy: CascadeStrategy,
    config: &ValidationConfig,
) -> Pass2Result {
    if !config.enable_confidence_validation {
        return skip_audit(signals);
    }

    let mut audited: Vec<_> = stream::iter(signals.into_iter().enumerate())
        .map(|(index, signal)| async move {
            let outcome = cascade.run(&signal, prior_signals, strategy).await;
            (index, signal, outcome)
        })
        .buffer_unordered(config.fanout_per_entity)
        .collect()
        .await;
    audited.sort_by_key(|(index, _, _)| *index);

    let mut result = Pass2Result {
        survivors: Vec::with_capacity(audited.len()),
        rejected: Vec::new(),
    };

    for (_, mut signal, outcome) in audited {
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                info!(signal_id = %signal.id, error = %e, "audit failed, rejecting");
                result
                    .rejected
                    .push((signal, RejectReason::CascadeExhausted));
                continue;
            }
        };

        let original = signal.confidence;
        let clipped = clip_adjustment(outcome.adjustment, config.max_confidence_adjustment);
        if clipped != outcome.adjustment {
            debug!(
                signal_id = %signal.id,
                raw = outcome.adjustment,
                clipped,
                "adjustment clipped to cap"
            );
        }

        let validated_confidence = (original + clipped).clamp(0.0, 1.0);
        let requires_manual_review = outcome.requires_manual_review
            || clipped.abs() >= config.confidence_review_threshold;

        signal.confidence_validation = Some(ConfidenceValidation {
            original_confidence: original,
            validated_confidence,
            adjustment: clipped,
            rationale: outcome.rationale,
            requires_manual_review,
            model_used: outcome.tier_used.to_string(),
            validation_timestamp: Utc::now(),
        });
        signal.confidence = validated_confidence;

        if validated_confidence < config.min_confidence {
            info!(
                signal_id = %signal.id,
                original,
                validated_confidence,
                "signal did not survive the audit"
            );
            result
                .rejected
                .push((signal, RejectReason::AuditBelowConfidence));
            continue;
        }

        signal.validation_pass = 2;
        result.survivors.push(signal);
    }

    result
}

/// Feature flag off: carry the original confidence through untouched.
fn skip_audit(signals: Vec<Signal>) -> Pass2Result {
    let survivors = signals
        .into_iter()
        .map(|mut signal| {
            signal.confidence_validation = Some(ConfidenceValidation {
                original_confidence: signal.confidence,
                validated_confidence: signal.confidence,
                adjustment: 0.0,
                rationale: "confidence validation disabled".to_string(),
                requires_manual_review: false,
                model_used: "skipped".to_string(),
                validation_timestamp: Utc::now(),
            });
            signal.validation_pass = 2;
            signal
        })
        .collect();

    Pass2Result {
        survivors,
        rejected: Vec::new(),
    }
}
