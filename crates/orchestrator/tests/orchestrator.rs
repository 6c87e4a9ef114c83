use async_trait::async_trait;
use intent_orchestrator::{LiveResults, OrchestratorConfig, QueryBackend, QueryOrchestrator, Resolution};
use intent_pipeline::{PipelineError, PipelineSnapshot, PipelineState};
use intent_protocol::{CommandRegistry, MatchResult, NOT_UNDERSTOOD_MESSAGE, SUGGESTION_SCORE};
use intent_search::FallbackMatcher;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const REGISTRY: &str = r#"[
    {"id":"core/add-new-post","label":"Create a new post","descriptions":["write a blog post"]},
    {"id":"core/open-media-library","label":"Upload media","descriptions":["add an image"]},
    {"id":"wapuu/tell-joke","label":"Tell a joke","descriptions":["make me laugh"]},
    {"id":"core/open-settings","label":"Open settings","descriptions":["change site options"]}
]"#;

struct FakeBackend {
    snapshot: Mutex<PipelineSnapshot>,
    answers: HashMap<&'static str, (Duration, Vec<MatchResult>)>,
    calls: Mutex<Vec<(String, bool)>>,
}

impl FakeBackend {
    fn new(state: PipelineState) -> Self {
        Self {
            snapshot: Mutex::new(snapshot(state, false)),
            answers: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn answer(mut self, text: &'static str, delay_ms: u64, id: &str, score: f32) -> Self {
        self.answers.insert(
            text,
            (
                Duration::from_millis(delay_ms),
                vec![MatchResult::new(id, score)],
            ),
        );
        self
    }

    fn set_snapshot(&self, snapshot: PipelineSnapshot) {
        *self.snapshot.lock().unwrap() = snapshot;
    }

    fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryBackend for FakeBackend {
    fn snapshot(&self) -> PipelineSnapshot {
        self.snapshot.lock().unwrap().clone()
    }

    async fn query(
        &self,
        text: String,
        _context: Option<String>,
        is_live: bool,
    ) -> intent_pipeline::Result<Vec<MatchResult>> {
        self.calls.lock().unwrap().push((text.clone(), is_live));
        if text == "boom" {
            return Err(PipelineError::Inference(NOT_UNDERSTOOD_MESSAGE.to_string()));
        }
        if text == "give up" {
            self.set_snapshot(snapshot(PipelineState::Error, false));
            return Err(PipelineError::Unavailable("assets unreachable".to_string()));
        }
        match self.answers.get(text.as_str()) {
            Some((delay, matches)) => {
                tokio::time::sleep(*delay).await;
                Ok(matches.clone())
            }
            None => Ok(Vec::new()),
        }
    }
}

fn snapshot(state: PipelineState, hibernated: bool) -> PipelineSnapshot {
    PipelineSnapshot {
        state,
        boot_time: None,
        loading_progress: 0,
        loaded_bytes: 0,
        attempt: 0,
        hibernated,
        last_error: None,
        lock_wait_ms_last: 0,
        lock_wait_ms_max: 0,
    }
}

fn orchestrator(backend: Arc<FakeBackend>) -> QueryOrchestrator {
    let registry = Arc::new(CommandRegistry::from_json_str(REGISTRY).unwrap());
    QueryOrchestrator::new(
        backend,
        Arc::new(FallbackMatcher::new(registry)),
        OrchestratorConfig::default(),
    )
}

fn ids(matches: &[MatchResult]) -> Vec<&str> {
    matches.iter().map(|m| m.id.as_str()).collect()
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn live_search_dispatches_only_the_last_keystroke() {
    let backend = Arc::new(FakeBackend::new(PipelineState::Ready).answer(
        "new",
        20,
        "core/add-new-post",
        0.7,
    ));
    let orchestrator = orchestrator(backend.clone());

    for text in ["n", "ne", "new"] {
        orchestrator.on_input(text, None).unwrap();
        sleep_ms(100).await;
    }
    sleep_ms(300).await;

    assert_eq!(backend.calls(), vec![("new".to_string(), true)]);
    assert_eq!(
        orchestrator.live_results(),
        LiveResults {
            generation: 3,
            query: "new".into(),
            matches: vec![MatchResult::new("core/add-new-post", 0.7)],
        }
    );
}

#[tokio::test(start_paused = true)]
async fn stale_live_results_are_discarded() {
    let backend = Arc::new(
        FakeBackend::new(PipelineState::Ready)
            .answer("slow", 1000, "wapuu/tell-joke", 0.6)
            .answer("fast", 10, "core/open-settings", 0.8),
    );
    let orchestrator = orchestrator(backend.clone());

    orchestrator.on_input("slow", None).unwrap();
    sleep_ms(300).await;
    orchestrator.on_input("fast", None).unwrap();
    sleep_ms(300).await;
    assert_eq!(orchestrator.live_results().query, "fast");

    sleep_ms(1000).await;
    assert_eq!(backend.calls().len(), 2);
    let live = orchestrator.live_results();
    assert_eq!(live.generation, 2);
    assert_eq!(ids(&live.matches), vec!["core/open-settings"]);
}

#[tokio::test(start_paused = true)]
async fn empty_input_clears_without_dispatching() {
    let backend = Arc::new(FakeBackend::new(PipelineState::Ready).answer(
        "new",
        0,
        "core/add-new-post",
        0.7,
    ));
    let orchestrator = orchestrator(backend.clone());

    orchestrator.on_input("new", None).unwrap();
    sleep_ms(300).await;
    assert_eq!(orchestrator.live_results().matches.len(), 1);

    orchestrator.on_input("ne", None).unwrap();
    orchestrator.on_input("", None).unwrap();
    sleep_ms(1).await;
    let live = orchestrator.live_results();
    assert_eq!(live.generation, 3);
    assert!(live.matches.is_empty());

    sleep_ms(500).await;
    assert_eq!(backend.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn live_search_waits_for_ready_pipeline() {
    let backend = Arc::new(FakeBackend::new(PipelineState::Loading).answer(
        "new",
        0,
        "core/add-new-post",
        0.7,
    ));
    let orchestrator = orchestrator(backend.clone());

    orchestrator.on_input("new", None).unwrap();
    sleep_ms(500).await;
    assert!(backend.calls().is_empty());
    assert!(orchestrator.live_results().matches.is_empty());

    backend.set_snapshot(snapshot(PipelineState::Ready, false));
    orchestrator.on_input("new", None).unwrap();
    sleep_ms(500).await;
    assert_eq!(ids(&orchestrator.live_results().matches), vec!["core/add-new-post"]);
}

#[tokio::test(start_paused = true)]
async fn fast_path_skips_the_pipeline() {
    let backend = Arc::new(FakeBackend::new(PipelineState::Ready));
    let orchestrator = orchestrator(backend.clone());

    orchestrator.on_input("upload", None).unwrap();
    let resolution = orchestrator.submit("upload media", None).await;
    match &resolution {
        Resolution::FastPath { matches } => {
            assert_eq!(ids(matches), vec!["core/open-media-library"]);
            assert!((matches[0].score - 1.0).abs() < 1e-6);
        }
        other => panic!("expected fast path, got {other:?}"),
    }
    assert!(resolution.is_answer());

    // The pending live query was superseded by the submission.
    sleep_ms(500).await;
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn submit_uses_pipeline_when_ready() {
    let backend = Arc::new(FakeBackend::new(PipelineState::Ready).answer(
        "write something",
        0,
        "core/add-new-post",
        0.72,
    ));
    let orchestrator = orchestrator(backend.clone());

    let resolution = orchestrator.submit("write something", None).await;
    assert_eq!(
        resolution,
        Resolution::Semantic {
            matches: vec![MatchResult::new("core/add-new-post", 0.72)],
        }
    );
    assert_eq!(backend.calls(), vec![("write something".to_string(), false)]);
}

#[tokio::test]
async fn hibernated_pipeline_still_takes_submissions() {
    let backend = Arc::new(FakeBackend::new(PipelineState::Idle).answer(
        "write something",
        0,
        "core/add-new-post",
        0.72,
    ));
    backend.set_snapshot(snapshot(PipelineState::Idle, true));
    let orchestrator = orchestrator(backend.clone());

    let resolution = orchestrator.submit("write something", None).await;
    assert_eq!(resolution.kind(), "semantic");
}

#[tokio::test]
async fn empty_semantic_result_offers_suggestions() {
    let backend = Arc::new(FakeBackend::new(PipelineState::Ready));
    let orchestrator = orchestrator(backend);

    let resolution = orchestrator.submit("xyzzy plugh", None).await;
    match &resolution {
        Resolution::NoMatch { suggestions } => {
            assert_eq!(
                ids(suggestions),
                vec!["core/add-new-post", "core/open-media-library", "wapuu/tell-joke"]
            );
            assert!(suggestions.iter().all(|s| s.score == SUGGESTION_SCORE));
        }
        other => panic!("expected no match, got {other:?}"),
    }
    assert!(!resolution.is_answer());
}

#[tokio::test]
async fn warming_up_answers_lexically() {
    let backend = Arc::new(FakeBackend::new(PipelineState::Loading));
    let orchestrator = orchestrator(backend.clone());

    let resolution = orchestrator.submit("make me laugh", None).await;
    match resolution {
        Resolution::WarmingUp { state, suggestions } => {
            assert_eq!(state, PipelineState::Loading);
            assert_eq!(ids(&suggestions), vec!["wapuu/tell-joke"]);
        }
        other => panic!("expected warming up, got {other:?}"),
    }

    let resolution = orchestrator.submit("qwxz zzkk", None).await;
    assert_eq!(
        resolution,
        Resolution::WarmingUp {
            state: PipelineState::Loading,
            suggestions: Vec::new(),
        }
    );
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn inference_failure_falls_back_to_suggestions() {
    let backend = Arc::new(FakeBackend::new(PipelineState::Ready));
    let orchestrator = orchestrator(backend);

    match orchestrator.submit("boom", None).await {
        Resolution::NotUnderstood {
            message,
            suggestions,
        } => {
            assert_eq!(message, NOT_UNDERSTOOD_MESSAGE);
            assert_eq!(suggestions.len(), 3);
        }
        other => panic!("expected not understood, got {other:?}"),
    }
}

#[tokio::test]
async fn pipeline_giving_up_mid_query_reports_error_state() {
    let backend = Arc::new(FakeBackend::new(PipelineState::Ready));
    backend.set_snapshot(snapshot(PipelineState::Ready, true));
    let orchestrator = orchestrator(backend.clone());

    match orchestrator.submit("give up", None).await {
        Resolution::WarmingUp { state, .. } => assert_eq!(state, PipelineState::Error),
        other => panic!("expected warming up, got {other:?}"),
    }
    assert_eq!(backend.calls(), vec![("give up".to_string(), false)]);
}

#[tokio::test]
async fn resolution_serializes_with_outcome_tag() {
    let resolution = Resolution::NoMatch {
        suggestions: vec![MatchResult::new("wapuu/tell-joke", 0.1)],
    };
    let json = serde_json::to_value(&resolution).unwrap();
    assert_eq!(json["outcome"], "no_match");
    assert_eq!(json["suggestions"][0]["id"], "wapuu/tell-joke");
}
