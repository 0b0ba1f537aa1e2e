//! LM client port and provider adapter.
//!
//! The core talks to language models through the [`LmClient`] trait at one
//! of three logical tiers (`small`, `medium`, `large`); the mapping to
//! concrete model identifiers and pricing lives in [`ModelSpec`].

mod client;
mod types;

pub use client::{AnthropicLmClient, ClientConfig, LmClient};
pub use types::{Completion, CostTracker, ModelSpec, ModelTier, TierUsage};
