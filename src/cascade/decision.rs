//! Strict parsing of the LM audit decision.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Maximum rationale length accepted from the LM.
const MAX_RATIONALE_CHARS: usize = 500;

/// Hard bound on the raw adjustment the LM may propose.
const MAX_RAW_ADJUSTMENT: f64 = 0.5;

/// The decision object the LM must return. Exactly these four keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditDecision {
    pub validated: bool,
    pub confidence_adjustment: f64,
    pub rationale: String,
    pub requires_manual_review: bool,
}

/// Parse an LM response into an [`AuditDecision`].
///
/// The response must contain a single JSON object with exactly the four
/// contract keys, floats in range and rationale within length. Any
/// deviation is an [`Error::InvalidResponse`], which the cascade treats as
/// insufficient.
pub fn parse_decision(text: &str) -> Result<AuditDecision> {
    let candidate = extract_json_object(text)
        .ok_or_else(|| Error::invalid_response("no JSON object in response"))?;

    let decision: AuditDecision = serde_json::from_str(candidate)
        .map_err(|e| Error::invalid_response(format!("malformed decision: {e}")))?;

    if !decision.confidence_adjustment.is_finite()
        || decision.confidence_adjustment.abs() > MAX_RAW_ADJUSTMENT
    {
        return Err(Error::invalid_response(format!(
            "confidence_adjustment {} out of [-{MAX_RAW_ADJUSTMENT}, {MAX_RAW_ADJUSTMENT}]",
            decision.confidence_adjustment
        )));
    }
    if decision.rationale.is_empty() || decision.rationale.chars().count() > MAX_RATIONALE_CHARS {
        return Err(Error::invalid_response(format!(
            "rationale length {} out of 1..={MAX_RATIONALE_CHARS}",
            decision.rationale.chars().count()
        )));
    }

    Ok(decision)
}

/// Locate the JSON object in a response, tolerating a fenced code block
/// around it but nothing else.
fn extract_json_object(text: &str) -> Option<&str> {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fence regex")
    });

    if let Some(captures) = fence.captures(text) {
        return captures.get(1).map(|m| m.as_str());
    }

    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const GOOD: &str = r#"{"validated": true, "confidence_adjustment": -0.1,
        "rationale": "single low-diversity source", "requires_manual_review": false}"#;

    #[test]
    fn parses_bare_object() {
        let decision = parse_decision(GOOD).unwrap();
        assert!(decision.validated);
        assert_eq!(decision.confidence_adjustment, -0.1);
        assert!(!decision.requires_manual_review);
    }

    #[test]
    fn parses_fenced_object() {
        let fenced = format!("Here is my decision:\n```json\n{GOOD}\n```\n");
        let decision = parse_decision(&fenced).unwrap();
        assert_eq!(decision.rationale, "single low-diversity source");
    }

    #[test]
    fn rejects_extra_keys() {
        let text = r#"{"validated": true, "confidence_adjustment": 0.0,
            "rationale": "ok", "requires_manual_review": false, "extra": 1}"#;
        assert!(parse_decision(text).is_err());
    }

    #[test]
    fn rejects_missing_keys() {
        let text = r#"{"validated": true, "confidence_adjustment": 0.0}"#;
        assert!(parse_decision(text).is_err());
    }

    #[test]
    fn rejects_out_of_range_adjustment() {
        let text = r#"{"validated": true, "confidence_adjustment": 0.7,
            "rationale": "ok", "requires_manual_review": false}"#;
        assert!(parse_decision(text).is_err());
    }

    #[test]
    fn rejects_empty_rationale() {
        let text = r#"{"validated": true, "confidence_adjustment": 0.1,
            "rationale": "", "requires_manual_review": false}"#;
        assert!(parse_decision(text).is_err());
    }

    #[test]
    fn rejects_prose_without_json() {
        assert!(parse_decision("I think this looks fine.").is_err());
    }
}
