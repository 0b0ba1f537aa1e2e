//! Entity, signal, and evidence record definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Processing tier assigned to a monitored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityTier {
    /// Top ~10% by signal frequency; highest resource allocation.
    Premium = 0,
    /// Middle ~30%.
    Active = 1,
    /// Remaining ~60%.
    Dormant = 2,
}

impl EntityTier {
    /// All tiers in daily processing order.
    pub const ORDERED: [EntityTier; 3] = [Self::Premium, Self::Active, Self::Dormant];
}

impl std::fmt::Display for EntityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Premium => write!(f, "premium"),
            Self::Active => write!(f, "active"),
            Self::Dormant => write!(f, "dormant"),
        }
    }
}

impl std::str::FromStr for EntityTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "premium" => Ok(Self::Premium),
            "active" => Ok(Self::Active),
            "dormant" => Ok(Self::Dormant),
            other => Err(Error::Config(format!("unknown entity tier: {other}"))),
        }
    }
}

/// Tier-assignment metrics written back to the entity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierMetadata {
    /// Signals per day over the assignment window.
    pub signal_frequency: f64,
    /// Share of RFP_DETECTED signals among all signals in the window.
    pub rfp_density: f64,
    /// When the tier was assigned.
    pub tier_assigned_at: DateTime<Utc>,
}

/// A monitored organization.
///
/// Entities are created by the upstream ingest path; the core only ever
/// updates the tier field and its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub entity_name: String,
    pub tier: EntityTier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier_metadata: Option<TierMetadata>,
}

impl Entity {
    pub fn new(entity_id: impl Into<String>, entity_name: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_name: entity_name.into(),
            tier: EntityTier::Dormant,
            tier_metadata: None,
        }
    }

    pub fn with_tier(mut self, tier: EntityTier) -> Self {
        self.tier = tier;
        self
    }
}

/// Kind of detected event. Closed enum; wire values are part of the
/// store contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    RfpDetected,
    ExecutiveChange,
    PartnershipFormed,
    TechnologyAdopted,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RfpDetected => write!(f, "RFP_DETECTED"),
            Self::ExecutiveChange => write!(f, "EXECUTIVE_CHANGE"),
            Self::PartnershipFormed => write!(f, "PARTNERSHIP_FORMED"),
            Self::TechnologyAdopted => write!(f, "TECHNOLOGY_ADOPTED"),
        }
    }
}

impl std::str::FromStr for SignalType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RFP_DETECTED" => Ok(Self::RfpDetected),
            "EXECUTIVE_CHANGE" => Ok(Self::ExecutiveChange),
            "PARTNERSHIP_FORMED" => Ok(Self::PartnershipFormed),
            "TECHNOLOGY_ADOPTED" => Ok(Self::TechnologyAdopted),
            other => Err(Error::schema_invalid(format!("unknown signal type: {other}"))),
        }
    }
}

/// A single source supporting a signal.
///
/// `credibility_score` is the claimed credibility from the producing
/// scraper; the core never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub source: String,
    pub credibility_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub evidence_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

impl Evidence {
    pub fn new(source: impl Into<String>, credibility_score: f64) -> Self {
        Self {
            source: source.into(),
            credibility_score,
            url: None,
            date: None,
            extracted_text: None,
            evidence_type: None,
            metadata: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.extracted_text = Some(text.into());
        self
    }

    pub fn with_type(mut self, evidence_type: impl Into<String>) -> Self {
        self.evidence_type = Some(evidence_type.into());
        self
    }
}

/// Audit record attached to a signal by the confidence audit pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceValidation {
    pub original_confidence: f64,
    pub validated_confidence: f64,
    /// The clipped audit adjustment applied to the original confidence.
    pub adjustment: f64,
    pub rationale: String,
    pub requires_manual_review: bool,
    /// Logical tier name of the model that produced the decision, or
    /// "skipped" when the audit was disabled.
    pub model_used: String,
    pub validation_timestamp: DateTime<Utc>,
}

/// A detected event about an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Stable key: the same raw signal reprocessed yields the same id.
    pub id: String,
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub confidence: f64,
    pub first_seen: DateTime<Utc>,
    pub entity_id: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Highest validation pass completed (0 = raw).
    #[serde(default)]
    pub validation_pass: u8,
    #[serde(default)]
    pub validated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_validation: Option<ConfidenceValidation>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

impl Signal {
    pub fn new(
        id: impl Into<String>,
        signal_type: SignalType,
        confidence: f64,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            signal_type,
            confidence,
            first_seen: Utc::now(),
            entity_id: entity_id.into(),
            metadata: HashMap::new(),
            validation_pass: 0,
            validated: false,
            confidence_validation: None,
            evidence: Vec::new(),
        }
    }

    pub fn with_evidence(mut self, evidence: Vec<Evidence>) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn with_first_seen(mut self, first_seen: DateTime<Utc>) -> Self {
        self.first_seen = first_seen;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Mean credibility across attached evidence; 0.0 when empty.
    pub fn mean_evidence_credibility(&self) -> f64 {
        if self.evidence.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.evidence.iter().map(|e| e.credibility_score).sum();
        sum / self.evidence.len() as f64
    }

    /// Validate required fields and ranges before handing the record to a
    /// store. This is the `SchemaInvalid` gate.
    pub fn schema_check(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::schema_invalid("signal id is empty"));
        }
        if self.entity_id.is_empty() {
            return Err(Error::schema_invalid("entity_id is empty"));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::schema_invalid(format!(
                "confidence {} out of [0, 1]",
                self.confidence
            )));
        }
        if self.validation_pass > 3 {
            return Err(Error::schema_invalid(format!(
                "validation_pass {} out of range",
                self.validation_pass
            )));
        }
        for evidence in &self.evidence {
            if evidence.source.is_empty() {
                return Err(Error::schema_invalid("evidence source is empty"));
            }
            if !(0.0..=1.0).contains(&evidence.credibility_score) {
                return Err(Error::schema_invalid(format!(
                    "evidence credibility {} out of [0, 1]",
                    evidence.credibility_score
                )));
            }
        }
        Ok(())
    }
}
