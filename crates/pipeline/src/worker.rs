//! The inference worker: an isolated task that owns the model and the index.
//!
//! It talks to its owner only through [`WorkerRequest`]/[`WorkerEvent`] messages, handles
//! requests strictly in arrival order, and turns every failure into an event.

use crate::assets::AssetLoader;
use crate::config::SessionLockConfig;
use crate::session_lock::acquire_session_lock;
use crate::{PipelineError, Result};
use intent_protocol::{
    InitRequest, LearnItem, LoadProgress, QueryFailure, QueryRequest, QueryResults, StatusUpdate,
    WorkerEvent, WorkerRequest, WorkerStatus, NOT_UNDERSTOOD_MESSAGE,
};
use intent_vector_store::{EmbeddingEntry, EmbeddingIndex, FeatureExtractor, RankOptions};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Owner's end of a running worker. Dropping it terminates the worker.
pub struct WorkerHandle {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Queues a request; `false` if the worker is gone.
    pub fn send(&self, request: WorkerRequest) -> bool {
        self.requests.send(request).is_ok()
    }

    /// Next event, or `None` once the worker has exited.
    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn spawn_worker(
    loader: Arc<dyn AssetLoader>,
    session_lock: Option<SessionLockConfig>,
    rank: RankOptions,
) -> WorkerHandle {
    let (request_tx, mut request_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        let mut worker = Worker {
            loader,
            session_lock,
            rank,
            events: event_tx,
            loaded: None,
            lock_wait_ms: None,
        };
        while let Some(request) = request_rx.recv().await {
            match request {
                WorkerRequest::Init(init) => worker.init(init).await,
                WorkerRequest::Learn { commands } => worker.learn(commands).await,
                WorkerRequest::Query(query) => worker.query(query).await,
            }
        }
        log::debug!("Inference worker stopped");
    });

    WorkerHandle {
        requests: request_tx,
        events: event_rx,
        task,
    }
}

struct Loaded {
    index: EmbeddingIndex,
    extractor: Arc<dyn FeatureExtractor>,
    learned: Vec<EmbeddingEntry>,
}

struct Worker {
    loader: Arc<dyn AssetLoader>,
    session_lock: Option<SessionLockConfig>,
    rank: RankOptions,
    events: mpsc::UnboundedSender<WorkerEvent>,
    loaded: Option<Loaded>,
    /// Session lock wait of the latest boot, reported with its outcome.
    lock_wait_ms: Option<u64>,
}

impl Worker {
    fn emit(&self, event: WorkerEvent) {
        let _ = self.events.send(event);
    }

    async fn init(&mut self, init: InitRequest) {
        self.emit(WorkerEvent::Status(StatusUpdate::new(WorkerStatus::Loading)));
        self.lock_wait_ms = None;
        match self.load(&init).await {
            Ok(loaded) => {
                log::info!(
                    "Pipeline ready: {} static entries (assets {})",
                    loaded.index.len(),
                    init.version
                );
                self.loaded = Some(loaded);
                self.emit(WorkerEvent::Status(
                    StatusUpdate::new(WorkerStatus::Ready).with_lock_wait_ms(self.lock_wait_ms),
                ));
            }
            Err(err) => {
                log::warn!("Pipeline boot failed: {err}");
                self.loaded = None;
                self.emit(WorkerEvent::Status(
                    StatusUpdate::error(err.to_string()).with_lock_wait_ms(self.lock_wait_ms),
                ));
            }
        }
    }

    async fn load(&mut self, init: &InitRequest) -> Result<Loaded> {
        let _guard = match &self.session_lock {
            Some(config) => {
                let lock = acquire_session_lock(config).await?;
                self.lock_wait_ms =
                    Some(u64::try_from(lock.waited().as_millis()).unwrap_or(u64::MAX));
                Some(lock)
            }
            None => None,
        };

        let index = self.loader.fetch_index(&init.embeddings_url).await?;

        let events = self.events.clone();
        let progress = move |p: LoadProgress| {
            let _ = events.send(WorkerEvent::Status(StatusUpdate::downloading(p)));
        };
        let extractor = self
            .loader
            .load_extractor(&init.model_url, &progress)
            .await?;

        if let Some(dimension) = index.dimension() {
            if dimension != extractor.dimension() {
                return Err(PipelineError::DimensionMismatch {
                    index: dimension,
                    extractor: extractor.dimension(),
                });
            }
        }

        Ok(Loaded {
            index,
            extractor,
            learned: Vec::new(),
        })
    }

    async fn learn(&mut self, commands: Vec<LearnItem>) {
        let Some(loaded) = self.loaded.as_mut() else {
            log::debug!("Ignoring learn request before boot");
            return;
        };

        let mut known: HashSet<String> = loaded.learned.iter().map(|e| e.id.clone()).collect();
        let fresh: Vec<LearnItem> = commands
            .into_iter()
            .filter(|item| !loaded.index.contains(&item.id) && known.insert(item.id.clone()))
            .collect();
        if fresh.is_empty() {
            return;
        }

        let labels: Vec<&str> = fresh.iter().map(|item| item.label.as_str()).collect();
        match loaded.extractor.embed_batch(labels).await {
            Ok(vectors) => {
                log::debug!("Learned {} dynamic commands", vectors.len());
                loaded.learned.extend(
                    fresh
                        .into_iter()
                        .zip(vectors)
                        .map(|(item, vector)| EmbeddingEntry::single(item.id, vector)),
                );
            }
            Err(err) => log::warn!("Failed to embed dynamic commands: {err}"),
        }
    }

    async fn query(&self, query: QueryRequest) {
        let Some(loaded) = self.loaded.as_ref() else {
            self.emit(WorkerEvent::Error(QueryFailure {
                id: Some(query.id),
                message: "pipeline is not ready".to_string(),
            }));
            return;
        };

        match loaded.extractor.embed(&query.text).await {
            Ok(vector) => {
                let matches = loaded.index.rank_with(
                    &vector,
                    &loaded.learned,
                    query.context.as_deref(),
                    &self.rank,
                );
                self.emit(WorkerEvent::Results(QueryResults {
                    id: query.id,
                    matches,
                    is_live: query.is_live,
                }));
            }
            Err(err) => {
                log::warn!("Inference failed for query {}: {err}", query.id);
                self.emit(WorkerEvent::Error(QueryFailure {
                    id: Some(query.id),
                    message: NOT_UNDERSTOOD_MESSAGE.to_string(),
                }));
            }
        }
    }
}
