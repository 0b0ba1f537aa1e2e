//! Pass 1: rule-based filtering with evidence enrichment.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::config::ValidationConfig;
use crate::error::Result;
use crate::schema::{Evidence, Signal};

use super::outcome::RejectReason;

/// Credibility assigned to synthesized corroboration evidence.
const CORROBORATION_CREDIBILITY: f64 = 0.75;

/// Prior signals appended as corroboration, at most.
const MAX_CORROBORATION_ITEMS: usize = 2;

/// Optional background research port used to synthesize one
/// `market_context` evidence item during enrichment. Deployments without
/// such a source simply leave it unwired.
#[async_trait]
pub trait ResearchSource: Send + Sync {
    /// A market-context evidence item for the entity, if one can be built.
    async fn market_context(&self, entity_id: &str) -> Result<Option<Evidence>>;
}

/// Result of the rule pass.
pub struct Pass1Result {
    pub survivors: Vec<Signal>,
    pub rejected: Vec<(Signal, RejectReason)>,
}

/// Run pass 1 over the raw signals, in input order.
///
/// `prior_signals` is the batch's store snapshot (empty when the read
/// degraded); it feeds corroboration enrichment.
pub async fn run_pass1(
    signals: Vec<Signal>,
    prior_signals: &[Signal],
    research: Option<&dyn ResearchSource>,
    config: &ValidationConfig,
) -> Pass1Result {
    let mut result = Pass1Result {
        survivors: Vec::with_capacity(signals.len()),
        rejected: Vec::new(),
    };

    for mut signal in signals {
        if signal.id.is_empty()
            || signal.entity_id.is_empty()
            || !(0.0..=1.0).contains(&signal.confidence)
        {
            warn!(signal_id = %signal.id, "malformed raw signal");
            result.rejected.push((signal, RejectReason::MalformedInput));
            continue;
        }

        if signal.confidence < config.min_confidence {
            result
                .rejected
                .push((signal, RejectReason::BelowConfidence));
            continue;
        }

        if signal.evidence.len() < config.min_evidence {
            enrich(&mut signal, prior_signals, research).await;
        }
        if signal.evidence.len() < config.min_evidence {
            result
                .rejected
                .push((signal, RejectReason::InsufficientEvidence));
            continue;
        }

        let mean_credibility = signal.mean_evidence_credibility();
        if mean_credibility < config.min_evidence_credibility {
            result.rejected.push((signal, RejectReason::LowCredibility));
            continue;
        }

        signal.validation_pass = 1;
        info!(
            pass = 1,
            signal_id = %signal.id,
            evidence_count = signal.evidence.len(),
            mean_credibility,
            "signal passed rule filtering"
        );
        result.survivors.push(signal);
    }

    result
}

/// Append synthesized evidence: up to two corroboration items built from
/// related prior signals, plus one market-context item when a research
/// source is wired.
async fn enrich(
    signal: &mut Signal,
    prior_signals: &[Signal],
    research: Option<&dyn ResearchSource>,
) {
    let corroborating: Vec<(String, crate::SignalType)> = related_priors(signal, prior_signals)
        .take(MAX_CORROBORATION_ITEMS)
        .map(|prior| (prior.id.clone(), prior.signal_type))
        .collect();
    for (prior_id, prior_signal_type) in corroborating {
        let snippet = format!(
            "Corroborated by prior signal {} ({}) for the same entity.",
            prior_id, prior_signal_type
        );
        let evidence = Evidence::new("corroboration", CORROBORATION_CREDIBILITY)
            .with_text(snippet)
            .with_type("corroboration");
        let evidence = Evidence {
            metadata: Some(
                [("prior_signal_id".to_string(), json!(prior_id))]
                    .into_iter()
                    .collect(),
            ),
            ..evidence
        };
        signal.evidence.push(evidence);
    }

    if let Some(research) = research {
        match research.market_context(&signal.entity_id).await {
            Ok(Some(evidence)) => signal.evidence.push(evidence),
            Ok(None) => {}
            Err(e) => warn!(
                signal_id = %signal.id,
                error = %e,
                "market-context lookup failed; continuing without it"
            ),
        }
    }
}

/// Prior signals usable as corroboration: same type first, then the rest,
/// skipping the signal itself.
fn related_priors<'a>(
    signal: &'a Signal,
    prior_signals: &'a [Signal],
) -> impl Iterator<Item = &'a Signal> {
    let same_type = prior_signals
        .iter()
        .filter(move |p| p.id != signal.id && p.signal_type == signal.signal_type);
    let different_type = prior_signals
        .iter()
        .filter(move |p| p.id != signal.id && p.signal_type != signal.signal_type);
    same_type.chain(different_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SignalType;
    use pretty_assertions::assert_eq;

    fn evidence(credibility: f64) -> Evidence {
        Evidence::new("LinkedIn", credibility)
    }

    fn prior(id: &str, signal_type: SignalType) -> Signal {
        Signal::new(id, signal_type, 0.8, "ent-1")
    }

    #[tokio::test]
    async fn below_confidence_is_rejected() {
        let signal = Signal::new("sig-1", SignalType::RfpDetected, 0.5, "ent-1")
            .with_evidence(vec![evidence(0.8), evidence(0.8), evidence(0.8)]);

        let result = run_pass1(vec![signal], &[], None, &ValidationConfig::default()).await;
        assert!(result.survivors.is_empty());
        assert_eq!(result.rejected[0].1, RejectReason::BelowConfidence);
    }

    #[tokio::test]
    async fn malformed_input_is_rejected_first() {
        let signal = Signal::new("", SignalType::RfpDetected, 0.9, "ent-1");
        let result = run_pass1(vec![signal], &[], None, &ValidationConfig::default()).await;
        assert_eq!(result.rejected[0].1, RejectReason::MalformedInput);
    }

    #[tokio::test]
    async fn thin_evidence_is_enriched_from_priors() {
        let signal = Signal::new("sig-1", SignalType::RfpDetected, 0.92, "ent-1")
            .with_evidence(vec![evidence(0.85)]);
        let priors = vec![
            prior("p1", SignalType::RfpDetected),
            prior("p2", SignalType::ExecutiveChange),
            prior("p3", SignalType::PartnershipFormed),
        ];

        let result = run_pass1(vec![signal], &priors, None, &ValidationConfig::default()).await;
        assert_eq!(result.survivors.len(), 1);

        let enriched = &result.survivors[0];
        assert_eq!(enriched.validation_pass, 1);
        assert_eq!(enriched.evidence.len(), 3);
        let corroborations: Vec<&Evidence> = enriched
            .evidence
            .iter()
            .filter(|e| e.source == "corroboration")
            .collect();
        assert_eq!(corroborations.len(), 2);
        assert_eq!(corroborations[0].credibility_score, CORROBORATION_CREDIBILITY);
        // Same-type prior is preferred as the first corroboration.
        assert!(corroborations[0]
            .extracted_text
            .as_deref()
            .unwrap()
            .contains("p1"));
    }

    #[tokio::test]
    async fn still_thin_after_enrichment_is_rejected() {
        let signal = Signal::new("sig-1", SignalType::RfpDetected, 0.92, "ent-1")
            .with_evidence(vec![evidence(0.85)]);
        // Only one prior available: 1 + 1 < 3.
        let priors = vec![prior("p1", SignalType::RfpDetected)];

        let result = run_pass1(vec![signal], &priors, None, &ValidationConfig::default()).await;
        assert!(result.survivors.is_empty());
        assert_eq!(result.rejected[0].1, RejectReason::InsufficientEvidence);
    }

    #[tokio::test]
    async fn low_mean_credibility_is_rejected() {
        let signal = Signal::new("sig-1", SignalType::RfpDetected, 0.9, "ent-1")
            .with_evidence(vec![evidence(0.5), evidence(0.5), evidence(0.5)]);

        let result = run_pass1(vec![signal], &[], None, &ValidationConfig::default()).await;
        assert_eq!(result.rejected[0].1, RejectReason::LowCredibility);
    }

    #[tokio::test]
    async fn research_source_contributes_market_context() {
        struct StubResearch;

        #[async_trait]
        impl ResearchSource for StubResearch {
            async fn market_context(&self, _entity_id: &str) -> Result<Option<Evidence>> {
                Ok(Some(
                    Evidence::new("market_context", 0.7).with_text("sector investment is rising"),
                ))
            }
        }

        let signal = Signal::new("sig-1", SignalType::RfpDetected, 0.92, "ent-1")
            .with_evidence(vec![evidence(0.85)]);
        let priors = vec![prior("p1", SignalType::RfpDetected)];

        let result = run_pass1(
            vec![signal],
            &priors,
            Some(&StubResearch),
            &ValidationConfig::default(),
        )
        .await;

        // 1 original + 1 corroboration + 1 market context = 3.
        assert_eq!(result.survivors.len(), 1);
        assert!(result.survivors[0]
            .evidence
            .iter()
            .any(|e| e.source == "market_context"));
    }
}
