use async_trait::async_trait;
use intent_pipeline::{Pipeline, PipelineSnapshot};
use intent_protocol::MatchResult;

/// The semantic side of the orchestrator; implemented by [`Pipeline`].
#[async_trait]
pub trait QueryBackend: Send + Sync + 'static {
    fn snapshot(&self) -> PipelineSnapshot;

    async fn query(
        &self,
        text: String,
        context: Option<String>,
        is_live: bool,
    ) -> intent_pipeline::Result<Vec<MatchResult>>;
}

#[async_trait]
impl QueryBackend for Pipeline {
    fn snapshot(&self) -> PipelineSnapshot {
        Pipeline::snapshot(self)
    }

    async fn query(
        &self,
        text: String,
        context: Option<String>,
        is_live: bool,
    ) -> intent_pipeline::Result<Vec<MatchResult>> {
        Pipeline::query(self, text, context, is_live).await
    }
}
