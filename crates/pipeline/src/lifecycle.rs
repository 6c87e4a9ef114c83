use crate::assets::AssetLoader;
use crate::config::PipelineConfig;
use crate::worker::{spawn_worker, WorkerHandle};
use crate::{PipelineError, Result};
use intent_protocol::{
    InitRequest, LearnItem, LoadProgress, MatchResult, QueryFailure, QueryRequest, QueryResults,
    StatusUpdate, WorkerEvent, WorkerRequest, WorkerStatus,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Initializing,
    Loading,
    Downloading,
    Ready,
    Error,
}

impl PipelineState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Loading => "loading",
            Self::Downloading => "downloading",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSnapshot {
    pub state: PipelineState,
    /// When the current boot started.
    #[serde(skip)]
    pub boot_time: Option<Instant>,
    /// Percent of model weights read; never decreases within one boot.
    pub loading_progress: u8,
    /// Bytes read when the total size is unknown.
    pub loaded_bytes: u64,
    /// Failed boots since the last success.
    pub attempt: u32,
    pub hibernated: bool,
    pub last_error: Option<String>,
    /// Session lock wait of the latest boot, in milliseconds.
    pub lock_wait_ms_last: u64,
    /// Longest session lock wait seen by this pipeline.
    pub lock_wait_ms_max: u64,
}

impl PipelineSnapshot {
    fn initial() -> Self {
        Self {
            state: PipelineState::Idle,
            boot_time: None,
            loading_progress: 0,
            loaded_bytes: 0,
            attempt: 0,
            hibernated: false,
            last_error: None,
            lock_wait_ms_last: 0,
            lock_wait_ms_max: 0,
        }
    }

    /// Booting for longer than `window` without reaching the download stage.
    #[must_use]
    pub fn is_stuck(&self, now: Instant, window: Duration) -> bool {
        matches!(
            self.state,
            PipelineState::Initializing | PipelineState::Loading
        ) && self
            .boot_time
            .is_some_and(|started| now.saturating_duration_since(started) > window)
    }

    /// Ready now, or hibernated and able to wake on demand.
    #[must_use]
    pub const fn accepts_queries(&self) -> bool {
        matches!(self.state, PipelineState::Ready)
            || (matches!(self.state, PipelineState::Idle) && self.hibernated)
    }

    fn record_lock_wait(&mut self, wait_ms: u64) {
        self.lock_wait_ms_last = wait_ms;
        self.lock_wait_ms_max = self.lock_wait_ms_max.max(wait_ms);
    }

    fn record_progress(&mut self, progress: LoadProgress) {
        self.state = PipelineState::Downloading;
        self.loaded_bytes = self.loaded_bytes.max(progress.loaded);
        if let Some(percent) = progress.percent() {
            self.loading_progress = self.loading_progress.max(percent);
        }
    }
}

type QueryReply = oneshot::Sender<Result<Vec<MatchResult>>>;

enum ManagerCommand {
    Learn(Vec<LearnItem>),
    Query {
        text: String,
        context: Option<String>,
        is_live: bool,
        reply: QueryReply,
    },
    ForceRestart,
    Shutdown,
}

/// Handle to the inference pipeline and its lifecycle manager.
///
/// Clones share one manager task; it shuts down when the last clone is dropped.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    command_tx: mpsc::Sender<ManagerCommand>,
    snapshot_tx: watch::Sender<PipelineSnapshot>,
    stuck_after: Duration,
}

impl Pipeline {
    /// Starts the manager; the first boot happens after `config.boot_delay`.
    pub fn start(config: PipelineConfig, loader: Arc<dyn AssetLoader>) -> Self {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (snapshot_tx, _) = watch::channel(PipelineSnapshot::initial());
        let stuck_after = config.stuck_after;

        let manager = Manager::new(config, loader, snapshot_tx.clone());
        tokio::spawn(manager.run(command_rx));

        Self {
            inner: Arc::new(PipelineInner {
                command_tx,
                snapshot_tx,
                stuck_after,
            }),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> PipelineSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PipelineSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    #[must_use]
    pub fn is_stuck(&self) -> bool {
        self.snapshot()
            .is_stuck(Instant::now(), self.inner.stuck_after)
    }

    /// Adds session-scoped commands; they survive hibernation and reboots.
    pub async fn learn(&self, commands: Vec<LearnItem>) -> Result<()> {
        self.send(ManagerCommand::Learn(commands)).await
    }

    /// Ranks `text` semantically, waking or waiting for the pipeline as needed.
    pub async fn query(
        &self,
        text: impl Into<String>,
        context: Option<String>,
        is_live: bool,
    ) -> Result<Vec<MatchResult>> {
        let (reply, response) = oneshot::channel();
        self.send(ManagerCommand::Query {
            text: text.into(),
            context,
            is_live,
            reply,
        })
        .await?;
        response.await.map_err(|_| PipelineError::Closed)?
    }

    /// Tears down the worker and schedules a fresh boot with a reset retry budget.
    pub async fn force_restart(&self) -> Result<()> {
        self.send(ManagerCommand::ForceRestart).await
    }

    /// Waits until the pipeline reaches `state`.
    pub async fn wait_for_state(&self, state: PipelineState) -> Result<PipelineSnapshot> {
        self.wait_for(|s| s.state == state).await
    }

    /// Waits until the pipeline is ready or has given up.
    pub async fn wait_until_settled(&self) -> Result<PipelineSnapshot> {
        self.wait_for(|s| matches!(s.state, PipelineState::Ready | PipelineState::Error))
            .await
    }

    async fn wait_for(
        &self,
        predicate: impl FnMut(&PipelineSnapshot) -> bool,
    ) -> Result<PipelineSnapshot> {
        let mut rx = self.subscribe();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| PipelineError::Closed)?;
        Ok(snapshot.clone())
    }

    async fn send(&self, command: ManagerCommand) -> Result<()> {
        self.inner
            .command_tx
            .send(command)
            .await
            .map_err(|_| PipelineError::Closed)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            let _ = self.inner.command_tx.try_send(ManagerCommand::Shutdown);
        }
    }
}

struct PendingQuery {
    request: QueryRequest,
    reply: QueryReply,
}

struct Manager {
    config: PipelineConfig,
    loader: Arc<dyn AssetLoader>,
    snapshot_tx: watch::Sender<PipelineSnapshot>,
    snapshot: PipelineSnapshot,
    worker: Option<WorkerHandle>,
    boot_at: Option<Instant>,
    idle_at: Option<Instant>,
    learned: Vec<LearnItem>,
    pending: Vec<PendingQuery>,
    in_flight: HashMap<u64, PendingQuery>,
    next_query_id: u64,
}

async fn next_event(worker: &mut Option<WorkerHandle>) -> Option<WorkerEvent> {
    match worker {
        Some(handle) => handle.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Manager {
    fn new(
        config: PipelineConfig,
        loader: Arc<dyn AssetLoader>,
        snapshot_tx: watch::Sender<PipelineSnapshot>,
    ) -> Self {
        let boot_at = Some(Instant::now() + config.boot_delay);
        Self {
            config,
            loader,
            snapshot_tx,
            snapshot: PipelineSnapshot::initial(),
            worker: None,
            boot_at,
            idle_at: None,
            learned: Vec::new(),
            pending: Vec::new(),
            in_flight: HashMap::new(),
            next_query_id: 1,
        }
    }

    async fn run(mut self, mut command_rx: mpsc::Receiver<ManagerCommand>) {
        loop {
            let boot_at = self.boot_at;
            let idle_at = self.idle_at;

            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(ManagerCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                event = next_event(&mut self.worker) => match event {
                    Some(event) => self.handle_event(event),
                    None => self.handle_failure("inference worker exited".to_string()),
                },
                () = sleep_until_opt(boot_at), if boot_at.is_some() => self.boot(),
                () = sleep_until_opt(idle_at), if idle_at.is_some() => self.hibernate(),
            }
        }

        self.worker = None;
        self.fail_pending(|| PipelineError::Closed);
        log::debug!("Pipeline manager stopped");
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot.clone());
    }

    fn touch(&mut self) {
        if self.snapshot.state == PipelineState::Ready {
            self.idle_at = Some(Instant::now() + self.config.idle_timeout);
        }
    }

    fn boot(&mut self) {
        self.boot_at = None;
        self.idle_at = None;
        self.requeue_in_flight();

        let worker = spawn_worker(
            self.loader.clone(),
            self.config.session_lock.clone(),
            self.config.rank,
        );
        let init = WorkerRequest::Init(InitRequest {
            embeddings_url: self.config.embeddings_location.clone(),
            model_url: self.config.model_location.clone(),
            version: self.config.version.clone(),
        });
        worker.send(init);
        self.worker = Some(worker);

        self.snapshot.state = PipelineState::Initializing;
        self.snapshot.boot_time = Some(Instant::now());
        self.snapshot.loading_progress = 0;
        self.snapshot.loaded_bytes = 0;
        log::info!(
            "Booting inference pipeline (attempt {}/{})",
            self.snapshot.attempt + 1,
            self.config.max_attempts
        );
        self.publish();
    }

    fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Learn(items) => self.learn(items),
            ManagerCommand::Query {
                text,
                context,
                is_live,
                reply,
            } => {
                let id = self.next_query_id;
                self.next_query_id += 1;
                let query = PendingQuery {
                    request: QueryRequest {
                        id,
                        text,
                        context,
                        is_live,
                    },
                    reply,
                };
                self.query(query);
            }
            ManagerCommand::ForceRestart => self.force_restart(),
            ManagerCommand::Shutdown => {}
        }
    }

    fn learn(&mut self, items: Vec<LearnItem>) {
        let mut fresh = Vec::new();
        for item in items {
            if self.learned.iter().any(|known| known.id == item.id) {
                continue;
            }
            self.learned.push(item.clone());
            fresh.push(item);
        }
        self.touch();
        if fresh.is_empty() || self.snapshot.state != PipelineState::Ready {
            return;
        }
        if let Some(worker) = &self.worker {
            worker.send(WorkerRequest::Learn { commands: fresh });
        }
    }

    fn query(&mut self, query: PendingQuery) {
        self.touch();
        match self.snapshot.state {
            PipelineState::Ready => self.dispatch(query),
            PipelineState::Error => {
                let message = self
                    .snapshot
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "boot failed".to_string());
                let _ = query.reply.send(Err(PipelineError::Unavailable(message)));
            }
            PipelineState::Idle => {
                if self.boot_at.is_none() {
                    log::info!("Waking hibernated pipeline for query {}", query.request.id);
                    self.boot_at = Some(Instant::now());
                }
                self.pending.push(query);
            }
            PipelineState::Initializing | PipelineState::Loading | PipelineState::Downloading => {
                self.pending.push(query);
            }
        }
    }

    fn dispatch(&mut self, query: PendingQuery) {
        let Some(worker) = &self.worker else {
            self.pending.push(query);
            return;
        };
        if worker.send(WorkerRequest::Query(query.request.clone())) {
            self.in_flight.insert(query.request.id, query);
        } else {
            let _ = query
                .reply
                .send(Err(PipelineError::Unavailable("worker is gone".to_string())));
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Status(StatusUpdate {
                status,
                progress,
                message,
                lock_wait_ms,
            }) => {
                if let Some(wait_ms) = lock_wait_ms {
                    self.snapshot.record_lock_wait(wait_ms);
                }
                match status {
                    WorkerStatus::Loading => {
                        self.snapshot.state = PipelineState::Loading;
                        self.publish();
                    }
                    WorkerStatus::Downloading => {
                        if let Some(progress) = progress {
                            self.snapshot.record_progress(progress);
                        } else {
                            self.snapshot.state = PipelineState::Downloading;
                        }
                        self.publish();
                    }
                    WorkerStatus::Ready => self.ready(),
                    WorkerStatus::Error => {
                        self.handle_failure(message.unwrap_or_else(|| "unknown error".to_string()));
                    }
                }
            }
            WorkerEvent::Results(QueryResults { id, matches, .. }) => {
                if let Some(query) = self.in_flight.remove(&id) {
                    let _ = query.reply.send(Ok(matches));
                }
            }
            WorkerEvent::Error(QueryFailure { id, message }) => match id {
                Some(id) => {
                    if let Some(query) = self.in_flight.remove(&id) {
                        let _ = query.reply.send(Err(PipelineError::Inference(message)));
                    }
                }
                None => log::warn!("Worker error: {message}"),
            },
        }
    }

    fn ready(&mut self) {
        let elapsed = self
            .snapshot
            .boot_time
            .map(|started| started.elapsed())
            .unwrap_or_default();
        log::info!("Inference pipeline ready in {elapsed:?}");

        self.snapshot.state = PipelineState::Ready;
        self.snapshot.attempt = 0;
        self.snapshot.hibernated = false;
        self.snapshot.last_error = None;
        self.snapshot.loading_progress = 100;
        self.idle_at = Some(Instant::now() + self.config.idle_timeout);

        if !self.learned.is_empty() {
            if let Some(worker) = &self.worker {
                worker.send(WorkerRequest::Learn {
                    commands: self.learned.clone(),
                });
            }
        }
        for query in std::mem::take(&mut self.pending) {
            self.dispatch(query);
        }
        self.publish();
    }

    fn handle_failure(&mut self, message: String) {
        self.worker = None;
        self.idle_at = None;
        self.requeue_in_flight();
        self.snapshot.attempt += 1;
        self.snapshot.last_error = Some(message.clone());

        if self.snapshot.attempt < self.config.max_attempts {
            let delay = self.config.backoff(self.snapshot.attempt);
            log::warn!(
                "Pipeline boot failed ({message}); retry {}/{} in {delay:?}",
                self.snapshot.attempt,
                self.config.max_attempts - 1
            );
            self.snapshot.state = PipelineState::Initializing;
            self.snapshot.boot_time = Some(Instant::now());
            self.boot_at = Some(Instant::now() + delay);
        } else {
            log::error!(
                "Pipeline boot failed after {} attempts: {message}",
                self.snapshot.attempt
            );
            self.snapshot.state = PipelineState::Error;
            self.boot_at = None;
            self.fail_pending(|| PipelineError::Unavailable(message.clone()));
        }
        self.publish();
    }

    fn hibernate(&mut self) {
        log::info!(
            "Hibernating inference pipeline after {:?} idle",
            self.config.idle_timeout
        );
        self.worker = None;
        self.idle_at = None;
        self.boot_at = None;
        self.requeue_in_flight();
        self.snapshot.state = PipelineState::Idle;
        self.snapshot.hibernated = true;
        self.snapshot.boot_time = None;
        self.snapshot.loading_progress = 0;
        self.snapshot.loaded_bytes = 0;
        self.publish();
        if !self.pending.is_empty() {
            self.boot_at = Some(Instant::now());
        }
    }

    fn force_restart(&mut self) {
        log::info!("Forced restart of inference pipeline");
        self.worker = None;
        self.idle_at = None;
        self.requeue_in_flight();
        self.snapshot = PipelineSnapshot {
            lock_wait_ms_last: self.snapshot.lock_wait_ms_last,
            lock_wait_ms_max: self.snapshot.lock_wait_ms_max,
            ..PipelineSnapshot::initial()
        };
        self.boot_at = Some(Instant::now() + self.config.boot_delay);
        self.publish();
    }

    // In-flight queries of a torn-down worker get answered by the next one.
    fn requeue_in_flight(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        let mut orphaned: Vec<PendingQuery> = self.in_flight.drain().map(|(_, q)| q).collect();
        orphaned.append(&mut self.pending);
        orphaned.sort_by_key(|query| query.request.id);
        log::debug!("Requeued {} queries after worker teardown", orphaned.len());
        self.pending = orphaned;
    }

    fn fail_pending(&mut self, error: impl Fn() -> PipelineError) {
        for query in self.pending.drain(..) {
            let _ = query.reply.send(Err(error()));
        }
        for (_, query) in self.in_flight.drain() {
            let _ = query.reply.send(Err(error()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_never_decreases() {
        let mut snapshot = PipelineSnapshot::initial();
        snapshot.record_progress(LoadProgress::new(60, Some(100)));
        snapshot.record_progress(LoadProgress::new(30, Some(100)));
        assert_eq!(snapshot.loading_progress, 60);
        assert_eq!(snapshot.loaded_bytes, 60);
        assert_eq!(snapshot.state, PipelineState::Downloading);

        snapshot.record_progress(LoadProgress::new(500, None));
        assert_eq!(snapshot.loading_progress, 60);
        assert_eq!(snapshot.loaded_bytes, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_only_while_initializing_or_loading() {
        let started = Instant::now();
        let mut snapshot = PipelineSnapshot::initial();
        snapshot.boot_time = Some(started);
        let window = Duration::from_secs(15);

        snapshot.state = PipelineState::Loading;
        assert!(!snapshot.is_stuck(started + Duration::from_secs(10), window));
        assert!(snapshot.is_stuck(started + Duration::from_secs(16), window));

        snapshot.state = PipelineState::Downloading;
        assert!(!snapshot.is_stuck(started + Duration::from_secs(16), window));
        snapshot.state = PipelineState::Ready;
        assert!(!snapshot.is_stuck(started + Duration::from_secs(60), window));
    }

    #[test]
    fn hibernated_idle_accepts_queries() {
        let mut snapshot = PipelineSnapshot::initial();
        assert!(!snapshot.accepts_queries());
        snapshot.hibernated = true;
        assert!(snapshot.accepts_queries());
        snapshot.state = PipelineState::Error;
        assert!(!snapshot.accepts_queries());
    }
}
