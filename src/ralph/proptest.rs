//! Property-based tests for the validation passes.
//!
//! These verify the arithmetic laws the pipeline guarantees:
//!
//! - Adjustment clipping preserves sign and never exceeds the cap
//! - Audited confidence always lands in [0, 1]
//! - Dedup similarity is bounded and symmetric
//! - The retry buffer never exceeds its capacity and accounts for
//!   every eviction
