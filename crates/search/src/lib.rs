//! Typo-tolerant lexical matching over the command registry.
//!
//! Needs no model and no startup work, so it answers while the semantic pipeline is
//! still loading and acts as the safety net when it fails.

mod fallback;
mod fuzzy;

pub use fallback::{FallbackMatcher, FallbackOptions};
pub use fuzzy::normalized_distance;
