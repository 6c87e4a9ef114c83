//! # Intent Vector Store
//!
//! Sentence embeddings and cosine ranking for command matching.
//!
//! ## Architecture
//!
//! ```text
//! Command registry
//!     │
//!     ├──> EmbeddingModel (ONNX Runtime, CPU)
//!     │      └─> L2-normalized Vector[384]
//!     │
//!     ├──> EmbeddingIndex (embeddings.json)
//!     │      └─> one vector per label/phrasing
//!     │
//!     └──> rank()
//!            └─> best-of-N cosine + context boost, threshold, top-k
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use intent_vector_store::{EmbeddingIndex, EmbeddingModel, FeatureExtractor, RankOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let index = EmbeddingIndex::load("build/embeddings.json").await?;
//!     let model = EmbeddingModel::stub(384);
//!
//!     let query = model.embed("write a blog post").await?;
//!     for hit in index.rank_with(&query, &[], Some("post"), &RankOptions::default()) {
//!         println!("{}: {:.3}", hit.id, hit.score);
//!     }
//!     Ok(())
//! }
//! ```

mod embeddings;
mod error;
mod extractor;
mod index;
mod matcher;

pub use embeddings::{
    read_with_progress, EmbeddingMode, EmbeddingModel, ModelAssets, ModelSpec, ProgressFn,
};
pub use error::{Result, VectorStoreError};
pub use extractor::FeatureExtractor;
pub use index::{EmbeddingEntry, EmbeddingIndex};
pub use matcher::{
    cosine_similarity, rank, RankOptions, CONTEXT_BOOST, DEFAULT_LIMIT, DEFAULT_THRESHOLD,
};
