//! Pass 3: final confirmation and near-duplicate rejection.

use chrono::{Duration, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::config::{DedupWeights, ValidationConfig};
use crate::schema::Signal;

use super::outcome::RejectReason;

/// Result of the confirmation pass.
pub struct Pass3Result {
    pub survivors: Vec<Signal>,
    pub rejected: Vec<(Signal, RejectReason)>,
}

/// Similarity between a candidate signal and a prior signal, in
/// `[0, weights.max_score()]`.
///
/// Combines type equality, temporal proximity (under 24 hours), Jaccard
/// overlap of evidence URLs, and token-set Jaccard of concatenated
/// snippets.
pub fn similarity(candidate: &Signal, prior: &Signal, weights: &DedupWeights) -> f64 {
    let mut score = 0.0;

    if candidate.signal_type == prior.signal_type {
        score += weights.type_match;
    }

    let delta = (candidate.first_seen - prior.first_seen).num_seconds().abs();
    if delta < 24 * 3600 {
        score += weights.temporal_proximity;
    }

    score += weights.url_overlap * url_jaccard(candidate, prior);
    score += weights.text_overlap * snippet_jaccard(candidate, prior);

    score
}

fn url_jaccard(a: &Signal, b: &Signal) -> f64 {
    let urls_a: HashSet<&str> = a.evidence.iter().filter_map(|e| e.url.as_deref()).collect();
    let urls_b: HashSet<&str> = b.evidence.iter().filter_map(|e| e.url.as_deref()).collect();
    jaccard(&urls_a, &urls_b)
}

fn snippet_jaccard(a: &Signal, b: &Signal) -> f64 {
    let tokens_a = snippet_tokens(a);
    let tokens_b = snippet_tokens(b);
    jaccard(
        &tokens_a.iter().map(String::as_str).collect(),
        &tokens_b.iter().map(String::as_str).collect(),
    )
}

fn snippet_tokens(signal: &Signal) -> HashSet<String> {
    static WORD: OnceLock<Regex> = OnceLock::new();
    let word = WORD.get_or_init(|| Regex::new(r"\w+").expect("word regex"));

    signal
        .evidence
        .iter()
        .filter_map(|e| e.extracted_text.as_deref())
        .flat_map(|text| {
            word.find_iter(text)
                .map(|m| m.as_str().to_lowercase())
                .collect::<Vec<_>>()
        })
        .collect()
}

fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Run pass 3 over the pass-2 survivors, in input order.
///
/// `prior_signals` is the store snapshot taken at batch start; only
/// entries within `dedup_window_days` participate in dedup, so the
/// decision is deterministic for a fixed snapshot.
pub fn run_pass3(
    signals: Vec<Signal>,
    prior_signals: &[Signal],
    config: &ValidationConfig,
) -> Pass3Result {
    let cutoff = Utc::now() - Duration::days(config.dedup_window_days);
    let window: Vec<&Signal> = prior_signals
        .iter()
        .filter(|s| s.first_seen >= cutoff)
        .collect();

    let mut result = Pass3Result {
        survivors: Vec::with_capacity(signals.len()),
        rejected: Vec::new(),
    };

    for mut signal in signals {
        if signal.confidence < config.min_confidence {
            result
                .rejected
                .push((signal, RejectReason::BelowConfidence));
            continue;
        }

        let duplicate_of = window.iter().find_map(|prior| {
            let score = similarity(&signal, prior, &config.dedup_weights);
            if score >= config.dedup_similarity_threshold {
                Some((prior.id.clone(), score))
            } else {
                None
            }
        });

        if let Some((prior_id, score)) = duplicate_of {
            debug!(
                signal_id = %signal.id,
                prior_id = %prior_id,
                score,
                "rejecting near-duplicate"
            );
            result.rejected.push((signal, RejectReason::Duplicate));
            continue;
        }

        signal.validation_pass = 3;
        signal.validated = true;
        result.survivors.push(signal);
    }

    info!(
        pass = 3,
        survived = result.survivors.len(),
        rejected = result.rejected.len(),
        "confirmation pass complete"
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Evidence, SignalType};
    use pretty_assertions::assert_eq;

    fn signal_with_url(id: &str, url: &str, text: &str) -> Signal {
        Signal::new(id, SignalType::RfpDetected, 0.85, "ent-1").with_evidence(vec![Evidence::new(
            "LinkedIn",
            0.85,
        )
        .with_url(url)
        .with_text(text)])
    }

    #[test]
    fn identical_signals_score_full() {
        let a = signal_with_url("a", "https://x.test/rfp", "stadium analytics rfp published");
        let mut b = a.clone();
        b.id = "b".to_string();
        let score = similarity(&a, &b, &DedupWeights::default());
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unrelated_signals_score_low() {
        let a = signal_with_url("a", "https://x.test/rfp", "stadium analytics rfp published");
        let mut b = Signal::new("b", SignalType::ExecutiveChange, 0.8, "ent-1").with_evidence(
            vec![Evidence::new("press", 0.7)
                .with_url("https://y.test/exec")
                .with_text("new director of partnerships appointed")],
        );
        b.first_seen = a.first_seen - Duration::days(3);
        let score = similarity(&a, &b, &DedupWeights::default());
        assert!(score < 0.1);
    }

    #[test]
    fn same_event_redetected_is_rejected_as_duplicate() {
        // A prior signal stored six days ago, same type, overlapping URL and
        // snippet, carrying the same event timestamp.
        let event_time = Utc::now() - Duration::days(6);
        let prior = signal_with_url("prior", "https://x.test/rfp", "club issues rfp for analytics")
            .with_first_seen(event_time);
        let candidate =
            signal_with_url("fresh", "https://x.test/rfp", "club issues rfp for analytics")
                .with_first_seen(event_time + Duration::hours(2));

        let config = ValidationConfig::default();
        let score = similarity(&candidate, &prior, &config.dedup_weights);
        assert!(score >= config.dedup_similarity_threshold);

        let result = run_pass3(vec![candidate], &[prior], &config);
        assert!(result.survivors.is_empty());
        assert_eq!(result.rejected[0].1, RejectReason::Duplicate);
    }

    #[test]
    fn prior_outside_window_does_not_dedup() {
        let event_time = Utc::now() - Duration::days(10);
        let prior = signal_with_url("prior", "https://x.test/rfp", "club issues rfp")
            .with_first_seen(event_time);
        let candidate = signal_with_url("fresh", "https://x.test/rfp", "club issues rfp");

        let config = ValidationConfig::default();
        let result = run_pass3(vec![candidate], &[prior], &config);
        assert_eq!(result.survivors.len(), 1);
        assert!(result.survivors[0].validated);
        assert_eq!(result.survivors[0].validation_pass, 3);
    }

    #[test]
    fn recheck_rejects_below_floor() {
        let mut low = signal_with_url("low", "https://x.test/a", "text");
        low.confidence = 0.5;
        let config = ValidationConfig::default();
        let result = run_pass3(vec![low], &[], &config);
        assert!(result.survivors.is_empty());
        assert_eq!(result.rejected[0].1, RejectReason::BelowConfidence);
    }

    #[test]
    fn survivors_keep_input_order() {
        let config = ValidationConfig::default();
        let a = signal_with_url("a", "https://x.test/1", "one");
        let b = signal_with_url("b", "https://x.test/2", "two");
        let c = signal_with_url("c", "https://x.test/3", "three");

        let result = run_pass3(vec![a, b, c], &[], &config);
        let ids: Vec<&str> = result.survivors.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
