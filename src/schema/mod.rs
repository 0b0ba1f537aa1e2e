//! Record types shared across the validation pipeline.
//!
//! These types are wire-stable: field names and enum values are part of the
//! graph store contract. Additions are allowed; renames and removals are not.

mod types;

pub use types::{
    ConfidenceValidation, Entity, EntityTier, Evidence, Signal, SignalType, TierMetadata,
};
