use crate::backend::QueryBackend;
use crate::config::OrchestratorConfig;
use crate::live::{LiveInput, LiveLoop, LiveResults};
use crate::{OrchestratorError, Result};
use intent_pipeline::{PipelineError, PipelineState};
use intent_protocol::{CommandRegistry, MatchResult, NOT_UNDERSTOOD_MESSAGE};
use intent_search::FallbackMatcher;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// How a submitted query was answered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    /// A single lexical hit whose label contains the query; the pipeline was not consulted.
    FastPath { matches: Vec<MatchResult> },
    Semantic { matches: Vec<MatchResult> },
    NoMatch { suggestions: Vec<MatchResult> },
    /// The pipeline cannot answer yet; lexical matches, possibly none.
    WarmingUp {
        state: PipelineState,
        suggestions: Vec<MatchResult>,
    },
    NotUnderstood {
        message: String,
        suggestions: Vec<MatchResult>,
    },
}

impl Resolution {
    #[must_use]
    pub fn matches(&self) -> &[MatchResult] {
        match self {
            Self::FastPath { matches } | Self::Semantic { matches } => matches,
            Self::NoMatch { suggestions }
            | Self::WarmingUp { suggestions, .. }
            | Self::NotUnderstood { suggestions, .. } => suggestions,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::FastPath { .. } => "fast_path",
            Self::Semantic { .. } => "semantic",
            Self::NoMatch { .. } => "no_match",
            Self::WarmingUp { .. } => "warming_up",
            Self::NotUnderstood { .. } => "not_understood",
        }
    }

    /// Whether the matches answer the query rather than stand in for an answer.
    #[must_use]
    pub const fn is_answer(&self) -> bool {
        matches!(self, Self::FastPath { .. } | Self::Semantic { .. })
    }
}

/// Routes user input to the lexical fallback or the semantic pipeline.
///
/// Must be created inside a tokio runtime; the live search loop stops when the
/// orchestrator is dropped.
pub struct QueryOrchestrator {
    backend: Arc<dyn QueryBackend>,
    fallback: Arc<FallbackMatcher>,
    config: OrchestratorConfig,
    generation: Arc<AtomicU64>,
    input_tx: mpsc::UnboundedSender<LiveInput>,
    live_rx: watch::Receiver<LiveResults>,
}

impl QueryOrchestrator {
    pub fn new(
        backend: Arc<dyn QueryBackend>,
        fallback: Arc<FallbackMatcher>,
        config: OrchestratorConfig,
    ) -> Self {
        let generation = Arc::new(AtomicU64::new(0));
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (live_tx, live_rx) = watch::channel(LiveResults::default());
        let live = LiveLoop::new(
            Arc::clone(&backend),
            config.live_debounce,
            Arc::clone(&generation),
            live_tx,
        );
        tokio::spawn(live.run(input_rx));

        Self {
            backend,
            fallback,
            config,
            generation,
            input_tx,
            live_rx,
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        self.fallback.registry()
    }

    pub fn live_results(&self) -> LiveResults {
        self.live_rx.borrow().clone()
    }

    pub fn subscribe_live(&self) -> watch::Receiver<LiveResults> {
        self.live_rx.clone()
    }

    /// Feeds a keystroke into live search. Returns the generation assigned to the input.
    pub fn on_input(&self, text: impl Into<String>, context: Option<String>) -> Result<u64> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.input_tx
            .send(LiveInput {
                generation,
                text: text.into(),
                context,
            })
            .map_err(|_| OrchestratorError::Closed)?;
        Ok(generation)
    }

    /// Resolves an explicitly submitted query. Never fails: pipeline errors degrade to
    /// lexical matches or generic suggestions.
    pub async fn submit(&self, text: &str, context: Option<String>) -> Resolution {
        // Submission supersedes whatever live search was doing.
        if self.on_input("", None).is_err() {
            log::debug!("Live search loop already stopped");
        }

        let text = text.trim();
        if text.is_empty() {
            return self.no_match();
        }

        let lexical = self.fallback.search(text);
        if self.is_fast_path(text, &lexical) {
            log::debug!("Fast path hit for {text:?}: {}", lexical[0].id);
            return Resolution::FastPath { matches: lexical };
        }

        let snapshot = self.backend.snapshot();
        if !snapshot.accepts_queries() {
            log::info!(
                "Pipeline is {}; answering {text:?} lexically",
                snapshot.state.as_str()
            );
            return Resolution::WarmingUp {
                state: snapshot.state,
                suggestions: lexical,
            };
        }

        match self.backend.query(text.to_string(), context, false).await {
            Ok(matches) if matches.is_empty() => self.no_match(),
            Ok(matches) => Resolution::Semantic { matches },
            Err(err @ (PipelineError::Unavailable(_) | PipelineError::Closed)) => {
                let state = self.backend.snapshot().state;
                log::warn!("Pipeline gave up while answering ({err}); state {state:?}");
                Resolution::WarmingUp {
                    state,
                    suggestions: lexical,
                }
            }
            Err(err) => {
                log::warn!("Semantic query failed: {err}");
                let message = match err {
                    PipelineError::Inference(message) => message,
                    _ => NOT_UNDERSTOOD_MESSAGE.to_string(),
                };
                let suggestions = if lexical.is_empty() {
                    self.suggestions()
                } else {
                    lexical
                };
                Resolution::NotUnderstood {
                    message,
                    suggestions,
                }
            }
        }
    }

    fn is_fast_path(&self, text: &str, lexical: &[MatchResult]) -> bool {
        let [only] = lexical else {
            return false;
        };
        let needle = text.to_lowercase();
        self.registry()
            .get(&only.id)
            .is_some_and(|command| command.label.to_lowercase().contains(&needle))
    }

    fn suggestions(&self) -> Vec<MatchResult> {
        self.registry()
            .suggestions(&self.config.suggestion_ids, self.config.suggestion_count)
    }

    fn no_match(&self) -> Resolution {
        Resolution::NoMatch {
            suggestions: self.suggestions(),
        }
    }
}
