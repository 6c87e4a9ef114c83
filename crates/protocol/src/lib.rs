//! # Intent Protocol
//!
//! Shared data model for routing free-text utterances to registered commands.
//!
//! ```text
//! Command Registry (static, versioned)   Dynamic Vocabulary (menu items)
//!          │                                       │
//!          └──────────────┬────────────────────────┘
//!                         ▼
//!            WorkerRequest / WorkerEvent  ──>  MatchResult[]
//! ```
//!
//! The registry and the embedding index are regenerated together: entry ids are the only
//! link between a score and an actionable command.

mod command;
mod dynamic;
mod error;
mod messages;

pub use command::{Command, CommandRegistry, CommandTarget, SUGGESTION_SCORE};
pub use dynamic::{is_safe_url, DynamicCommand, DynamicVocabulary, DYNAMIC_ID_PREFIX};
pub use error::{RegistryError, Result};
pub use messages::{
    InitRequest, LearnItem, LoadProgress, QueryFailure, QueryRequest, QueryResults, StatusUpdate,
    WorkerEvent, WorkerRequest, WorkerStatus, NOT_UNDERSTOOD_MESSAGE,
};

use serde::{Deserialize, Serialize};

/// A ranked command reference.
///
/// Lists of matches are always ordered by `score` descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub id: String,
    pub score: f32,
}

impl MatchResult {
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}
