use crate::{PipelineError, Result};
use async_trait::async_trait;
use intent_vector_store::{
    EmbeddingIndex, EmbeddingMode, EmbeddingModel, FeatureExtractor, ModelSpec, ProgressFn,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Source of the static index and the feature extractor used by the worker.
#[async_trait]
pub trait AssetLoader: Send + Sync {
    async fn fetch_index(&self, location: &str) -> Result<EmbeddingIndex>;

    async fn load_extractor(
        &self,
        location: &str,
        progress: &ProgressFn,
    ) -> Result<Arc<dyn FeatureExtractor>>;
}

/// Resolves an asset location to a local path. Network locations are refused so no
/// query text or asset request ever leaves the machine.
pub fn local_path(location: &str) -> Result<PathBuf> {
    let trimmed = location.trim();
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("//") {
        return Err(PipelineError::RemoteAssetsDisabled(trimmed.to_string()));
    }
    Ok(PathBuf::from(
        trimmed.strip_prefix("file://").unwrap_or(trimmed),
    ))
}

/// Loads assets from the local filesystem.
#[derive(Debug, Clone, Copy)]
pub struct LocalAssetLoader {
    mode: EmbeddingMode,
    spec: ModelSpec,
}

impl LocalAssetLoader {
    #[must_use]
    pub fn new(mode: EmbeddingMode) -> Self {
        Self {
            mode,
            spec: ModelSpec::default(),
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(EmbeddingMode::from_env()?))
    }

    #[must_use]
    pub const fn with_spec(mut self, spec: ModelSpec) -> Self {
        self.spec = spec;
        self
    }

    #[must_use]
    pub const fn mode(&self) -> EmbeddingMode {
        self.mode
    }
}

#[async_trait]
impl AssetLoader for LocalAssetLoader {
    async fn fetch_index(&self, location: &str) -> Result<EmbeddingIndex> {
        let path = local_path(location)?;
        Ok(EmbeddingIndex::load(path).await?)
    }

    async fn load_extractor(
        &self,
        location: &str,
        progress: &ProgressFn,
    ) -> Result<Arc<dyn FeatureExtractor>> {
        let dir = local_path(location)?;
        let model = EmbeddingModel::from_mode(self.mode, &dir, self.spec, Some(progress)).await?;
        log::debug!(
            "Feature extractor ready ({}, dim {})",
            self.mode.as_str(),
            model.dimension()
        );
        Ok(Arc::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intent_protocol::LoadProgress;

    #[test]
    fn remote_locations_are_rejected() {
        for location in [
            "https://cdn.example.com/models/",
            "HTTP://example.com/embeddings.json",
            "//cdn.example.com/model",
        ] {
            assert!(matches!(
                local_path(location),
                Err(PipelineError::RemoteAssetsDisabled(_))
            ));
        }
    }

    #[test]
    fn file_urls_become_paths() {
        assert_eq!(
            local_path("file:///opt/models").unwrap(),
            PathBuf::from("/opt/models")
        );
        assert_eq!(
            local_path(" build/embeddings.json ").unwrap(),
            PathBuf::from("build/embeddings.json")
        );
    }

    #[tokio::test]
    async fn stub_mode_needs_no_model_files() {
        let loader = LocalAssetLoader::new(EmbeddingMode::Stub);
        let noop = |_: LoadProgress| {};
        let extractor = loader
            .load_extractor("/nonexistent/model", &noop)
            .await
            .unwrap();
        assert_eq!(extractor.dimension(), 384);
    }

    #[tokio::test]
    async fn missing_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = LocalAssetLoader::new(EmbeddingMode::Stub);
        let location = dir.path().join("missing.json");
        let err = loader
            .fetch_index(location.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::VectorStoreError(_)));
    }
}
