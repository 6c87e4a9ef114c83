use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] intent_vector_store::VectorStoreError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Remote assets are disabled, refusing to load '{0}'")]
    RemoteAssetsDisabled(String),

    #[error("Session lock error: {0}")]
    Lock(String),

    #[error("Index dimension {index} does not match extractor dimension {extractor}")]
    DimensionMismatch { index: usize, extractor: usize },

    #[error("Pipeline unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Inference(String),

    #[error("Pipeline has shut down")]
    Closed,
}
