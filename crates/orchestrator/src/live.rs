use crate::backend::QueryBackend;
use intent_pipeline::PipelineState;
use intent_protocol::MatchResult;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{self, Instant};

/// Matches for the latest live input, tagged with the input generation that produced them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveResults {
    pub generation: u64,
    pub query: String,
    pub matches: Vec<MatchResult>,
}

#[derive(Debug)]
pub(crate) struct LiveInput {
    pub generation: u64,
    pub text: String,
    pub context: Option<String>,
}

struct LiveOutcome {
    generation: u64,
    query: String,
    matches: Vec<MatchResult>,
}

/// Debounces keystrokes and publishes live matches.
///
/// Only the input pending when the debounce window closes is dispatched. Results are
/// published only if no newer input arrived meanwhile; older ones are dropped on arrival.
pub(crate) struct LiveLoop {
    backend: Arc<dyn QueryBackend>,
    debounce: Duration,
    latest: Arc<AtomicU64>,
    results_tx: watch::Sender<LiveResults>,
    pending: Option<LiveInput>,
    deadline: Option<Instant>,
    in_flight: JoinSet<LiveOutcome>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl LiveLoop {
    pub(crate) fn new(
        backend: Arc<dyn QueryBackend>,
        debounce: Duration,
        latest: Arc<AtomicU64>,
        results_tx: watch::Sender<LiveResults>,
    ) -> Self {
        Self {
            backend,
            debounce,
            latest,
            results_tx,
            pending: None,
            deadline: None,
            in_flight: JoinSet::new(),
        }
    }

    pub(crate) async fn run(mut self, mut input_rx: mpsc::UnboundedReceiver<LiveInput>) {
        loop {
            tokio::select! {
                input = input_rx.recv() => match input {
                    Some(input) => self.accept(input),
                    None => break,
                },
                () = sleep_until_opt(self.deadline), if self.deadline.is_some() => self.dispatch(),
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    match joined {
                        Ok(outcome) => self.publish(outcome),
                        Err(err) => log::warn!("Live query task failed: {err}"),
                    }
                }
            }
        }
        self.in_flight.abort_all();
        log::debug!("Live search loop stopped");
    }

    fn accept(&mut self, input: LiveInput) {
        let ready = self.backend.snapshot().state == PipelineState::Ready;
        if input.text.trim().is_empty() || !ready {
            self.pending = None;
            self.deadline = None;
            self.results_tx.send_replace(LiveResults {
                generation: input.generation,
                query: input.text,
                matches: Vec::new(),
            });
            return;
        }
        self.pending = Some(input);
        self.deadline = Some(Instant::now() + self.debounce);
    }

    fn dispatch(&mut self) {
        self.deadline = None;
        let Some(input) = self.pending.take() else {
            return;
        };
        log::debug!("Dispatching live query #{}", input.generation);
        let backend = Arc::clone(&self.backend);
        self.in_flight.spawn(async move {
            let matches = match backend
                .query(input.text.clone(), input.context, true)
                .await
            {
                Ok(matches) => matches,
                Err(err) => {
                    log::debug!("Live query #{} failed: {err}", input.generation);
                    Vec::new()
                }
            };
            LiveOutcome {
                generation: input.generation,
                query: input.text,
                matches,
            }
        });
    }

    fn publish(&mut self, outcome: LiveOutcome) {
        let latest = self.latest.load(Ordering::SeqCst);
        if outcome.generation != latest {
            log::debug!(
                "Discarding stale live results #{} (latest #{latest})",
                outcome.generation
            );
            return;
        }
        self.results_tx.send_replace(LiveResults {
            generation: outcome.generation,
            query: outcome.query,
            matches: outcome.matches,
        });
    }
}
