use crate::error::{Result, VectorStoreError};
use crate::extractor::FeatureExtractor;
use crate::matcher::{rank, RankOptions};
use intent_protocol::{CommandRegistry, MatchResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Precomputed vectors for one command, one per label/phrasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawEntry")]
pub struct EmbeddingEntry {
    pub id: String,
    pub embeddings: Vec<Vec<f32>>,
    pub context: Option<String>,
}

impl EmbeddingEntry {
    pub fn single(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            embeddings: vec![vector],
            context: None,
        }
    }
}

// Older asset versions stored a single `embedding`, a flat `embeddings` vector, or
// `descriptionEmbeddings`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntry {
    id: String,
    #[serde(default, alias = "descriptionEmbeddings")]
    embeddings: Option<RawVectors>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    context: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawVectors {
    Many(Vec<Vec<f32>>),
    One(Vec<f32>),
}

impl From<RawEntry> for EmbeddingEntry {
    fn from(raw: RawEntry) -> Self {
        let embeddings = match (raw.embeddings, raw.embedding) {
            (Some(RawVectors::Many(many)), _) => many,
            (Some(RawVectors::One(one)), _) | (None, Some(one)) => vec![one],
            (None, None) => Vec::new(),
        };
        Self {
            id: raw.id,
            embeddings,
            context: raw.context.filter(|c| !c.is_empty()),
        }
    }
}

/// Static embedding index in registry order. Read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingIndex {
    entries: Vec<EmbeddingEntry>,
    dimension: Option<usize>,
}

impl EmbeddingIndex {
    /// Builds an index, checking that every vector shares one dimensionality.
    pub fn new(entries: Vec<EmbeddingEntry>) -> Result<Self> {
        let mut dimension: Option<usize> = None;
        for entry in &entries {
            for vector in &entry.embeddings {
                match dimension {
                    None => dimension = Some(vector.len()),
                    Some(expected) if expected != vector.len() => {
                        return Err(VectorStoreError::InvalidDimension {
                            expected,
                            actual: vector.len(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        if dimension == Some(0) {
            return Err(VectorStoreError::IndexError(
                "embedding vectors must not be empty".to_string(),
            ));
        }
        Ok(Self { entries, dimension })
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let entries: Vec<EmbeddingEntry> = serde_json::from_slice(bytes)?;
        Self::new(entries)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        log::debug!("Loading embedding index from {:?}", path.as_ref());
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let index = Self::from_json_slice(&bytes)?;
        log::info!(
            "Loaded {} embedding entries (dim {:?})",
            index.len(),
            index.dimension
        );
        Ok(index)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_vec(&self.entries)?;
        tokio::fs::write(path.as_ref(), data).await?;
        log::info!("Wrote {} embedding entries to {:?}", self.len(), path.as_ref());
        Ok(())
    }

    /// Embeds `[label, ...descriptions]` for every registry command, in registry order.
    pub async fn build(registry: &CommandRegistry, extractor: &dyn FeatureExtractor) -> Result<Self> {
        let mut entries = Vec::with_capacity(registry.len());
        for command in registry {
            log::debug!("Embedding phrases for '{}'", command.id);
            let phrases: Vec<&str> = command.phrases().collect();
            let embeddings = extractor.embed_batch(phrases).await?;
            entries.push(EmbeddingEntry {
                id: command.id.clone(),
                embeddings,
                context: command.context.clone(),
            });
        }
        Self::new(entries)
    }

    #[must_use]
    pub const fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    #[must_use]
    pub fn entries(&self) -> &[EmbeddingEntry] {
        &self.entries
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ranks this index together with session-learned entries.
    #[must_use]
    pub fn rank_with(
        &self,
        query: &[f32],
        learned: &[EmbeddingEntry],
        context: Option<&str>,
        options: &RankOptions,
    ) -> Vec<MatchResult> {
        rank(query, self.entries.iter().chain(learned), context, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingModel;
    use pretty_assertions::assert_eq;

    #[test]
    fn reads_current_and_legacy_shapes() {
        let raw = r#"[
            {"id":"multi","embeddings":[[1,0],[0,1]],"context":"post"},
            {"id":"flat","embeddings":[0.5,0.5],"context":null},
            {"id":"single","embedding":[0,1]},
            {"id":"described","descriptionEmbeddings":[[1,1]]}
        ]"#;
        let index = EmbeddingIndex::from_json_slice(raw.as_bytes()).unwrap();
        assert_eq!(index.dimension(), Some(2));
        let entries = index.entries();
        assert_eq!(entries[0].embeddings.len(), 2);
        assert_eq!(entries[0].context.as_deref(), Some("post"));
        assert_eq!(entries[1].embeddings, vec![vec![0.5, 0.5]]);
        assert_eq!(entries[1].context, None);
        assert_eq!(entries[2].embeddings, vec![vec![0.0, 1.0]]);
        assert_eq!(entries[3].embeddings, vec![vec![1.0, 1.0]]);
    }

    #[test]
    fn rejects_mixed_dimensions() {
        let raw = r#"[{"id":"a","embeddings":[[1,0]]},{"id":"b","embeddings":[[1,0,0]]}]"#;
        let err = EmbeddingIndex::from_json_slice(raw.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::InvalidDimension {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn rank_with_unions_learned_entries() {
        let index = EmbeddingIndex::new(vec![EmbeddingEntry::single("static", vec![0.0, 1.0])])
            .unwrap();
        let learned = vec![EmbeddingEntry::single("dynamic/tools.php", vec![1.0, 0.0])];
        let results = index.rank_with(&[1.0, 0.0], &learned, None, &RankOptions::default());
        assert_eq!(results, vec![MatchResult::new("dynamic/tools.php", 1.0)]);
    }

    #[tokio::test]
    async fn build_save_and_load_round_trip() {
        let registry = CommandRegistry::from_json_str(
            r#"[
                {"id":"core/add-new-post","label":"Create a new post","descriptions":["write a story","new post"]},
                {"id":"core/edit-title","label":"Change the title","descriptions":["rename"],"context":"post"}
            ]"#,
        )
        .unwrap();
        let model = EmbeddingModel::stub(16);
        let index = EmbeddingIndex::build(&registry, &model).await.unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.entries()[0].embeddings.len(), 3);
        assert_eq!(index.entries()[1].context.as_deref(), Some("post"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.json");
        index.save(&path).await.unwrap();
        let loaded = EmbeddingIndex::load(&path).await.unwrap();
        assert_eq!(loaded, index);
    }
}
