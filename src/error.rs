//! Error types for ralph-core.

use thiserror::Error;

/// Result type alias using ralph-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during signal validation and orchestration.
///
/// Per-signal problems (threshold failures, duplicates) are never surfaced
/// through this type; they are returned as rejection tallies. Only
/// infrastructure failures propagate.
#[derive(Error, Debug)]
pub enum Error {
    /// The graph store is unreachable or failed at the infrastructure level.
    #[error("graph store unavailable: {0}")]
    StoreUnavailable(String),

    /// A signal failed schema validation at the store boundary.
    #[error("schema invalid: {0}")]
    SchemaInvalid(String),

    /// The LM provider rate-limited the request. Retryable.
    #[error("rate limited by LM provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    /// Transient LM provider failure (5xx, connection reset).
    #[error("LM error: {0}")]
    Model(String),

    /// The LM returned a response that cannot be used. Non-retryable.
    #[error("invalid LM response: {0}")]
    InvalidResponse(String),

    /// Every cascade tier was tried and none produced a sufficient decision.
    #[error("model cascade exhausted after {tiers_tried} tier(s)")]
    CascadeExhausted { tiers_tried: usize },

    /// Timeout during operation.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Webhook signature verification failed.
    #[error("webhook signature rejected: {0}")]
    SignatureRejected(String),

    /// A pre-flight dependency check failed; the daily run was not started.
    #[error("pre-flight check failed for {dependency}: {reason}")]
    PreflightFailed { dependency: String, reason: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a store-unavailable error.
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable(message.into())
    }

    /// Create a schema-invalid error.
    pub fn schema_invalid(message: impl Into<String>) -> Self {
        Self::SchemaInvalid(message.into())
    }

    /// Create a rate-limited error.
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    /// Create a transient model error.
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model(message.into())
    }

    /// Create an invalid-response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a pre-flight failure.
    pub fn preflight(dependency: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PreflightFailed {
            dependency: dependency.into(),
            reason: reason.into(),
        }
    }

    /// Whether a retry at the same tier may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Model(_) | Self::StoreUnavailable(_)
        )
    }
}
