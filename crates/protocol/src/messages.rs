//! Messages exchanged with the inference worker.
//!
//! Everything crossing the worker boundary is an owned, serializable value; failures inside
//! the worker are reported as [`WorkerEvent`]s, never propagated as panics.

use crate::MatchResult;
use serde::{Deserialize, Serialize};

/// Message returned for a query the extractor could not process.
pub const NOT_UNDERSTOOD_MESSAGE: &str =
    "Could not understand that request. Try saying it a different way.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WorkerRequest {
    Init(InitRequest),
    Learn { commands: Vec<LearnItem> },
    Query(QueryRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub embeddings_url: String,
    pub model_url: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnItem {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub id: u64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub is_live: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WorkerEvent {
    Status(StatusUpdate),
    Results(QueryResults),
    Error(QueryFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Loading,
    Downloading,
    Ready,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<LoadProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Milliseconds the boot spent waiting for the session lock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_wait_ms: Option<u64>,
}

impl StatusUpdate {
    #[must_use]
    pub const fn new(status: WorkerStatus) -> Self {
        Self {
            status,
            progress: None,
            message: None,
            lock_wait_ms: None,
        }
    }

    #[must_use]
    pub const fn downloading(progress: LoadProgress) -> Self {
        Self {
            status: WorkerStatus::Downloading,
            progress: Some(progress),
            message: None,
            lock_wait_ms: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: WorkerStatus::Error,
            progress: None,
            message: Some(message.into()),
            lock_wait_ms: None,
        }
    }

    #[must_use]
    pub const fn with_lock_wait_ms(mut self, lock_wait_ms: Option<u64>) -> Self {
        self.lock_wait_ms = lock_wait_ms;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResults {
    pub id: u64,
    pub matches: Vec<MatchResult>,
    pub is_live: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFailure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub message: String,
}

/// Bytes of model weights read so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadProgress {
    pub loaded: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl LoadProgress {
    #[must_use]
    pub const fn new(loaded: u64, total: Option<u64>) -> Self {
        Self { loaded, total }
    }

    /// Whole percent when the total size is known.
    #[must_use]
    pub fn percent(&self) -> Option<u8> {
        let total = self.total.filter(|t| *t > 0)?;
        let pct = (self.loaded.min(total) * 100) / total;
        Some(u8::try_from(pct).unwrap_or(100))
    }

    /// `"42%"` when the size is known, otherwise a running megabyte count.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn label(&self) -> String {
        match self.percent() {
            Some(pct) => format!("{pct}%"),
            None => format!("{:.1}MB", self.loaded as f64 / 1024.0 / 1024.0),
        }
    }
}
