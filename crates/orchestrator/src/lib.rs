//! Query orchestration.
//!
//! [`QueryOrchestrator`] owns the two query paths: debounced live search while the user
//! types (published as [`LiveResults`]) and one-shot submission, which tries a lexical
//! fast path first and always degrades to lexical matches or suggestions instead of
//! failing.

mod backend;
mod config;
mod error;
mod live;
mod orchestrator;

pub use backend::QueryBackend;
pub use config::{OrchestratorConfig, DEFAULT_SUGGESTION_IDS};
pub use error::{OrchestratorError, Result};
pub use live::LiveResults;
pub use orchestrator::{QueryOrchestrator, Resolution};
