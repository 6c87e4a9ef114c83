use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Pipeline error: {0}")]
    PipelineError(#[from] intent_pipeline::PipelineError),

    #[error("Live search loop has stopped")]
    Closed,
}
