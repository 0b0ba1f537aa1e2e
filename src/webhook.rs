//! Real-time webhook entry into the validation loop.
//!
//! Events are HMAC-SHA256 signed by the sender; the signature is verified
//! before anything else happens. A verified event is converted into a
//! single raw signal and run through the standard three passes.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::ralph::{RalphLoop, RejectReason};
use crate::schema::{Evidence, Signal, SignalType};

type HmacSha256 = Hmac<Sha256>;

/// Fallback credibility per source label, used when the sender does not
/// claim one.
fn seed_credibility(source: &str) -> f64 {
    match source.to_lowercase().as_str() {
        "government" | "official" => 0.9,
        "linkedin" => 0.85,
        "press_release" => 0.8,
        "news" => 0.75,
        "social" => 0.5,
        _ => 0.6,
    }
}

/// Signal block of an inbound event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSignal {
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Evidence item of an inbound event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvidence {
    pub source: String,
    #[serde(default)]
    pub credibility_score: Option<f64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub date: Option<chrono::DateTime<Utc>>,
    #[serde(default)]
    pub extracted_text: Option<String>,
}

/// Canonical inbound event shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub webhook_id: String,
    pub entity_id: String,
    pub entity_name: String,
    pub signal: WebhookSignal,
    pub evidence: Vec<WebhookEvidence>,
}

/// Outcome returned to the sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub signal_id: String,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<RejectReason>,
    pub processing_ms: u64,
}

/// Sign a payload the way senders are expected to: HMAC-SHA256, hex.
pub fn sign_payload(secret: &[u8], body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    mac.finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// Converts verified webhook events into raw signals and runs them
/// through the loop one at a time.
pub struct WebhookHandler {
    ralph: Arc<RalphLoop>,
    secret: Vec<u8>,
}

impl WebhookHandler {
    pub fn new(ralph: Arc<RalphLoop>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            ralph,
            secret: secret.into(),
        }
    }

    /// Verify, convert, and validate one event.
    ///
    /// A bad signature fails with [`Error::SignatureRejected`] before the
    /// body is even parsed.
    pub async fn handle(&self, body: &str, signature_hex: &str) -> Result<WebhookResponse> {
        self.verify_signature(body, signature_hex)?;

        let event: WebhookEvent = serde_json::from_str(body)
            .map_err(|e| Error::schema_invalid(format!("malformed webhook body: {e}")))?;

        if event.evidence.is_empty() {
            return Err(Error::schema_invalid("webhook event has no evidence"));
        }

        let started = Instant::now();
        let signal = to_signal(&event);
        let signal_id = signal.id.clone();

        let report = self
            .ralph
            .validate_signals(vec![signal], &event.entity_id)
            .await?;

        let accepted = report.validated_count() == 1;
        let reject_reason = report.rejected.first().map(|r| r.reason);
        let processing_ms = started.elapsed().as_millis() as u64;

        if accepted {
            info!(webhook_id = %event.webhook_id, signal_id, processing_ms, "webhook signal validated");
        } else {
            warn!(
                webhook_id = %event.webhook_id,
                signal_id,
                ?reject_reason,
                processing_ms,
                "webhook signal rejected"
            );
        }

        Ok(WebhookResponse {
            signal_id,
            accepted,
            reject_reason,
            processing_ms,
        })
    }

    fn verify_signature(&self, body: &str, signature_hex: &str) -> Result<()> {
        let claimed = decode_hex(signature_hex)
            .ok_or_else(|| Error::SignatureRejected("signature is not hex".to_string()))?;

        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(body.as_bytes());
        mac.verify_slice(&claimed)
            .map_err(|_| Error::SignatureRejected("signature mismatch".to_string()))
    }
}

/// Build the raw signal for an event. The id is a digest of the stable
/// event fields, so re-delivery of the same event yields the same id and
/// lands on the same store row.
fn to_signal(event: &WebhookEvent) -> Signal {
    let mut hasher = Sha256::new();
    hasher.update(event.entity_id.as_bytes());
    hasher.update(event.signal.signal_type.to_string().as_bytes());
    for evidence in &event.evidence {
        if let Some(url) = &evidence.url {
            hasher.update(url.as_bytes());
        }
        if let Some(date) = &evidence.date {
            hasher.update(date.to_rfc3339().as_bytes());
        }
    }
    let digest = hasher.finalize();
    let id = format!(
        "wh-{}",
        digest[..8]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>()
    );

    let evidence: Vec<Evidence> = event
        .evidence
        .iter()
        .map(|item| {
            let mut built = Evidence::new(
                &item.source,
                item.credibility_score
                    .unwrap_or_else(|| seed_credibility(&item.source)),
            );
            if let Some(url) = &item.url {
                built = built.with_url(url);
            }
            if let Some(date) = item.date {
                built = built.with_date(date);
            }
            if let Some(text) = &item.extracted_text {
                built = built.with_text(text);
            }
            built
        })
        .collect();

    let first_seen = event
        .evidence
        .iter()
        .filter_map(|e| e.date)
        .min()
        .unwrap_or_else(Utc::now);

    let mut signal = Signal::new(id, event.signal.signal_type, event.signal.confidence, &event.entity_id)
        .with_first_seen(first_seen)
        .with_evidence(evidence);
    signal.metadata = event.signal.metadata.clone();
    signal
}
