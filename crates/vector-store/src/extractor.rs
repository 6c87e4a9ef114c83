use crate::error::{Result, VectorStoreError};
use async_trait::async_trait;

/// Anything that turns text into fixed-size, L2-normalized vectors.
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch(vec![text]).await?;
        embeddings
            .pop()
            .ok_or_else(|| VectorStoreError::EmbeddingError("Empty embedding result".to_string()))
    }
}
