//! The confidence-audit prompt template.
//!
//! This is the single versioned artifact that defines the LM contract for
//! pass 2. Nothing else in the crate constructs audit prompts; changing the
//! contract is an edit here and in [`super::decision`].

use crate::schema::Signal;

/// Bumped whenever the prompt wording or the expected JSON shape changes.
pub const AUDIT_PROMPT_VERSION: &str = "audit-v1";

/// Prior signals included for context, at most.
pub const MAX_PRIOR_SIGNALS: usize = 5;

/// Evidence snippet length included per item.
const SNIPPET_CHARS: usize = 240;

/// Build the pass-2 confidence audit prompt for a signal.
pub fn build_audit_prompt(signal: &Signal, prior_signals: &[Signal]) -> String {
    let mut prompt = String::with_capacity(2048);

    prompt.push_str(
        "You are auditing the confidence score of a detected business signal \
         against the quality of its evidence.\n\n",
    );

    prompt.push_str("## Signal\n");
    prompt.push_str(&format!(
        "- type: {}\n- claimed confidence: {:.2}\n- entity: {}\n- first seen: {}\n\n",
        signal.signal_type,
        signal.confidence,
        signal.entity_id,
        signal.first_seen.to_rfc3339(),
    ));

    prompt.push_str("## Evidence\n");
    for (i, evidence) in signal.evidence.iter().enumerate() {
        prompt.push_str(&format!(
            "{}. source: {} (credibility {:.2})",
            i + 1,
            evidence.source,
            evidence.credibility_score,
        ));
        if let Some(date) = evidence.date {
            prompt.push_str(&format!(", date: {}", date.format("%Y-%m-%d")));
        }
        if let Some(url) = &evidence.url {
            prompt.push_str(&format!(", url: {url}"));
        }
        prompt.push('\n');
        if let Some(text) = &evidence.extracted_text {
            let snippet: String = text.chars().take(SNIPPET_CHARS).collect();
            prompt.push_str(&format!("   snippet: {snippet}\n"));
        }
    }
    prompt.push('\n');

    if !prior_signals.is_empty() {
        prompt.push_str("## Recent signals for the same entity\n");
        for prior in prior_signals.iter().take(MAX_PRIOR_SIGNALS) {
            prompt.push_str(&format!(
                "- {} ({}, confidence {:.2})\n",
                prior.signal_type,
                prior.first_seen.format("%Y-%m-%d"),
                prior.confidence,
            ));
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "Judge whether the claimed confidence is supported by the evidence. \
         Respond with a single JSON object and nothing else:\n\
         {\n\
         \x20 \"validated\": <bool>,\n\
         \x20 \"confidence_adjustment\": <float in [-0.5, 0.5]>,\n\
         \x20 \"rationale\": <string, 1..500 chars>,\n\
         \x20 \"requires_manual_review\": <bool>\n\
         }\n",
    );

    prompt
}
