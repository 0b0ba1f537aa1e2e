//! # ralph-core
//!
//! Signal validation for a graph-backed entity intelligence pipeline.
//! Raw signals about monitored organizations arrive from scrapers and
//! webhooks; this crate decides which of them are trustworthy enough to
//! persist.
//!
//! ## Core Components
//!
//! - **RalphLoop**: the three-pass validator (rules, LM confidence audit,
//!   dedup) that writes survivors through the graph store
//! - **ModelCascade**: routes each audit to the cheapest sufficient model
//!   tier, accounting tokens and dollars
//! - **PriorityScheduler** + **DailyOrchestrator**: tier every entity by
//!   recent activity and process the whole population daily, premium
//!   entities first
//!
//! ## Example
//!
//! ```rust,ignore
//! use ralph_core::{
//!     AnthropicLmClient, ClientConfig, InMemoryGraphStore, RalphLoop,
//!     ValidationConfig,
//! };
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryGraphStore::new());
//! let client = Arc::new(AnthropicLmClient::new(ClientConfig::new("api-key")));
//! let ralph = RalphLoop::new(store, client, Arc::new(ValidationConfig::default()));
//!
//! let report = ralph.validate_signals(raw_signals, "entity-17").await?;
//! println!("validated {} signals", report.validated_count());
//! ```

pub mod cascade;
pub mod config;
pub mod error;
pub mod graph;
pub mod llm;
pub mod orchestrator;
pub mod ralph;
pub mod scheduler;
pub mod schema;
pub mod webhook;

// Re-exports for convenience
pub use cascade::{
    build_audit_prompt, parse_decision, AuditDecision, CascadeOutcome, CascadeStrategy,
    ModelCascade, AUDIT_PROMPT_VERSION,
};
pub use config::{DedupWeights, ValidationConfig};
pub use error::{Error, Result};
pub use graph::{GraphStore, InMemoryGraphStore, SqliteGraphStore};
pub use llm::{
    AnthropicLmClient, ClientConfig, Completion, CostTracker, LmClient, ModelSpec, ModelTier,
    TierUsage,
};
pub use orchestrator::{
    CancelFlag, DailyOrchestrator, DailyReport, RunEvent, RunEventKind, SignalSource, TierReport,
};
pub use ralph::{
    clip_adjustment, similarity, RalphLoop, RejectReason, RejectedSignal, ResearchSource,
    RetryBuffer, SignalState, ValidationReport,
};
pub use scheduler::{PriorityScheduler, ResourceProfile, ScheduledEntity, SourceScope};
pub use schema::{
    ConfidenceValidation, Entity, EntityTier, Evidence, Signal, SignalType, TierMetadata,
};
pub use webhook::{
    sign_payload, WebhookEvent, WebhookEvidence, WebhookHandler, WebhookResponse, WebhookSignal,
};
