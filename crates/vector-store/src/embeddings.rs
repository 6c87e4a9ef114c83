use crate::error::{Result, VectorStoreError};
use crate::extractor::FeatureExtractor;
use async_trait::async_trait;
use intent_protocol::LoadProgress;
use ndarray::{Array, Axis, Dimension, Ix2, Ix3};
use once_cell::sync::Lazy;
use ort::execution_providers::CPUExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Input, Session, SessionInputs};
use ort::tensor::TensorElementType;
use ort::value::{DynTensor, Tensor};
use ort::Error as OrtError;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokenizers::{Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tokio::io::AsyncReadExt;
use tokio::task::spawn_blocking;

const READ_CHUNK_BYTES: usize = 1024 * 1024;

const TOKENIZER_FILE: &str = "tokenizer.json";

/// Model files probed in order; the quantized export is preferred.
const MODEL_CANDIDATES: &[&str] = &["onnx/model_quantized.onnx", "onnx/model.onnx", "model.onnx"];

/// Callback receiving byte counts while model weights are read.
pub type ProgressFn = dyn Fn(LoadProgress) + Send + Sync;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EmbeddingMode {
    Onnx,
    Stub,
}

impl EmbeddingMode {
    pub fn from_env() -> Result<Self> {
        env::var("INTENT_EMBEDDING_MODE")
            .map_or(Ok(Self::Onnx), |raw| Self::parse(&raw))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "onnx" => Ok(Self::Onnx),
            "stub" => Ok(Self::Stub),
            other => Err(VectorStoreError::EmbeddingError(format!(
                "Unsupported INTENT_EMBEDDING_MODE '{other}' (expected 'onnx' or 'stub')"
            ))),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Onnx => "onnx",
            Self::Stub => "stub",
        }
    }
}

/// Shape of the sentence-embedding model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelSpec {
    pub dimension: usize,
    pub max_length: usize,
    pub max_batch: usize,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            dimension: 384,
            max_length: 256,
            max_batch: 32,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelAssets {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
}

impl ModelAssets {
    /// Locates the tokenizer and ONNX weights under a model directory.
    pub fn discover(model_dir: &Path) -> Result<Self> {
        let tokenizer_path = model_dir.join(TOKENIZER_FILE);
        if !tokenizer_path.is_file() {
            return Err(VectorStoreError::AssetNotFound(tokenizer_path));
        }
        let model_path = MODEL_CANDIDATES
            .iter()
            .map(|rel| model_dir.join(rel))
            .find(|path| path.is_file())
            .ok_or_else(|| VectorStoreError::AssetNotFound(model_dir.join(MODEL_CANDIDATES[0])))?;
        Ok(Self {
            model_path,
            tokenizer_path,
        })
    }
}

/// Reads a file in fixed-size chunks, reporting cumulative bytes after each chunk.
pub async fn read_with_progress(path: &Path, progress: Option<&ProgressFn>) -> Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    let total = file.metadata().await.ok().map(|m| m.len());
    let mut bytes = Vec::with_capacity(
        total
            .and_then(|t| usize::try_from(t).ok())
            .unwrap_or(READ_CHUNK_BYTES),
    );
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let read = file.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..read]);
        if let Some(report) = progress {
            report(LoadProgress::new(bytes.len() as u64, total));
        }
    }
    Ok(bytes)
}

struct OrtBackend {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    max_length: usize,
    max_batch: usize,
    dimension: usize,
}

#[derive(Clone)]
struct StubBackend {
    dimension: usize,
    #[cfg(test)]
    batch_calls: Arc<AtomicUsize>,
}

impl StubBackend {
    #[cfg(not(test))]
    const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    #[cfg(test)]
    fn new(dimension: usize) -> Self {
        Self {
            dimension,
            batch_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        #[cfg(test)]
        self.batch_calls.fetch_add(1, Ordering::Relaxed);
        texts
            .iter()
            .map(|text| stub_embed(text, self.dimension))
            .collect()
    }
}

// One slot per model directory. Holding only a weak reference lets a hibernated pipeline
// actually release the session; concurrent loaders of the same directory wait on the slot.
type BackendSlot = Arc<tokio::sync::Mutex<Weak<OrtBackend>>>;

static BACKENDS: Lazy<Mutex<HashMap<PathBuf, BackendSlot>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn backend_slot(model_dir: &Path) -> Result<BackendSlot> {
    let mut slots = BACKENDS
        .lock()
        .map_err(|_| VectorStoreError::EmbeddingError("Failed to lock backend cache".into()))?;
    Ok(slots.entry(model_dir.to_path_buf()).or_default().clone())
}

impl OrtBackend {
    fn from_bytes(spec: &ModelSpec, model_bytes: &[u8], tokenizer_path: &Path) -> Result<Self> {
        if !tokenizers::utils::parallelism::is_parallelism_configured() {
            tokenizers::utils::parallelism::set_parallelism(false);
        }

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| VectorStoreError::EmbeddingError(format!("Tokenizer load failed: {e}")))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..PaddingParams::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: spec.max_length,
                ..TruncationParams::default()
            }))
            .map_err(|e| {
                VectorStoreError::EmbeddingError(format!("Tokenizer truncation failed: {e}"))
            })?;

        let (intra_threads, inter_threads) = default_ort_threads();
        let session = Session::builder()
            .map_err(|e| VectorStoreError::EmbeddingError(format!("{e}")))?
            // Interactive use: few threads and no busy-spinning.
            .with_intra_threads(intra_threads)
            .map_err(|e| {
                VectorStoreError::EmbeddingError(format!("Failed to set ORT intra threads: {e}"))
            })?
            .with_inter_threads(inter_threads)
            .map_err(|e| {
                VectorStoreError::EmbeddingError(format!("Failed to set ORT inter threads: {e}"))
            })?
            .with_intra_op_spinning(false)
            .map_err(|e| {
                VectorStoreError::EmbeddingError(format!("Failed to set ORT intra spinning: {e}"))
            })?
            .with_inter_op_spinning(false)
            .map_err(|e| {
                VectorStoreError::EmbeddingError(format!("Failed to set ORT inter spinning: {e}"))
            })?
            .with_execution_providers(vec![CPUExecutionProvider::default().build()])
            .map_err(|e| {
                VectorStoreError::EmbeddingError(format!(
                    "Failed to register CPU execution provider: {e}"
                ))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                VectorStoreError::EmbeddingError(format!("Failed to set optimization level: {e}"))
            })?
            .commit_from_memory(model_bytes)
            .map_err(|e| {
                VectorStoreError::EmbeddingError(format!("Failed to load ONNX model: {e}"))
            })?;

        log::info!(
            "Loaded ONNX model ({} bytes, dim {}, max_length {}, batch {})",
            model_bytes.len(),
            spec.dimension,
            spec.max_length,
            spec.max_batch
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            max_length: spec.max_length,
            max_batch: spec.max_batch,
            dimension: spec.dimension,
        })
    }

    fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.max_batch) {
            let encodings = self
                .tokenizer
                .encode_batch(batch.to_vec(), true)
                .map_err(|e| {
                    VectorStoreError::EmbeddingError(format!("Tokenization failed: {e}"))
                })?;

            if encodings.is_empty() {
                continue;
            }

            let seq_len = encodings[0].len();
            if seq_len > self.max_length {
                return Err(VectorStoreError::EmbeddingError(format!(
                    "Tokenized length {} exceeds max_length {}",
                    seq_len, self.max_length
                )));
            }
            if encodings.iter().any(|e| e.len() != seq_len) {
                return Err(VectorStoreError::EmbeddingError(
                    "Inconsistent sequence lengths after padding".to_string(),
                ));
            }
            let (ids, masks, type_ids, mask_rows) = build_flat_tensors(&encodings, seq_len);

            let ids_array = Array::from_shape_vec((batch.len(), seq_len), ids)
                .map_err(|e| VectorStoreError::EmbeddingError(format!("IDs shape error: {e}")))?;
            let mask_array = Array::from_shape_vec((batch.len(), seq_len), masks)
                .map_err(|e| VectorStoreError::EmbeddingError(format!("Mask shape error: {e}")))?;
            let type_array = Array::from_shape_vec((batch.len(), seq_len), type_ids)
                .map_err(|e| VectorStoreError::EmbeddingError(format!("Types shape error: {e}")))?;
            let ids_shape = ids_array.raw_dim().into_dyn();

            let mut available: HashMap<String, DynTensor> = HashMap::new();
            available.insert(
                "input_ids".to_string(),
                Tensor::from_array(ids_array.into_dyn())
                    .map_err(|e| to_embedding_error(&e))?
                    .upcast(),
            );
            available.insert(
                "attention_mask".to_string(),
                Tensor::from_array(mask_array.into_dyn())
                    .map_err(|e| to_embedding_error(&e))?
                    .upcast(),
            );
            available.insert(
                "token_type_ids".to_string(),
                Tensor::from_array(type_array.into_dyn())
                    .map_err(|e| to_embedding_error(&e))?
                    .upcast(),
            );

            let array = {
                let mut session = self.session.lock().map_err(|_| {
                    VectorStoreError::EmbeddingError("Failed to lock ONNX session".into())
                })?;

                let mut feed: HashMap<String, DynTensor> = HashMap::new();
                for input in &session.inputs {
                    let key = input.name.clone();
                    match available.remove(&key) {
                        Some(value) => {
                            feed.insert(key, value);
                        }
                        None => {
                            let zeros = zero_tensor(&ids_shape, input)?;
                            feed.insert(key, zeros);
                        }
                    }
                }

                let outputs = session.run(SessionInputs::from(feed)).map_err(|e| {
                    VectorStoreError::EmbeddingError(format!("ONNX forward failed: {e}"))
                })?;

                if outputs.len() == 0 {
                    return Err(VectorStoreError::EmbeddingError(
                        "ONNX returned no outputs".to_string(),
                    ));
                }

                outputs[0]
                    .try_extract_array::<f32>()
                    .map_err(|e| {
                        VectorStoreError::EmbeddingError(format!(
                            "Failed to decode ONNX output: {e}"
                        ))
                    })?
                    .to_owned()
            };
            results.extend(embeddings_from_output(array, &mask_rows, self.dimension)?);
        }

        Ok(results)
    }
}

fn default_ort_threads() -> (usize, usize) {
    let cpus = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    let intra_threads = if cpus <= 4 { 1 } else { 2 };
    (intra_threads, 1)
}

const fn ensure_dimension(vec: &[f32], expected: usize) -> Result<()> {
    if vec.len() != expected {
        return Err(VectorStoreError::InvalidDimension {
            expected,
            actual: vec.len(),
        });
    }
    Ok(())
}

/// Accepts either pooled `[batch, dim]` output or token-level `[batch, tokens, dim]`
/// hidden states, which are mean-pooled over the attention mask.
fn embeddings_from_output(
    array: ndarray::ArrayD<f32>,
    mask_rows: &[Vec<i64>],
    expected_dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::new();
    match array.ndim() {
        2 => {
            let embeddings = array
                .into_dimensionality::<Ix2>()
                .map_err(|e| VectorStoreError::EmbeddingError(format!("Bad output shape: {e}")))?;
            out.reserve(embeddings.len_of(Axis(0)));
            for row in embeddings.outer_iter() {
                let mut emb = row.to_vec();
                ensure_dimension(&emb, expected_dimension)?;
                normalize(&mut emb);
                out.push(emb);
            }
        }
        3 => {
            let hidden = array
                .into_dimensionality::<Ix3>()
                .map_err(|e| VectorStoreError::EmbeddingError(format!("Bad output shape: {e}")))?;
            out.reserve(hidden.len_of(Axis(0)));
            for (idx, sample) in hidden.outer_iter().enumerate() {
                let attn = mask_rows
                    .get(idx)
                    .cloned()
                    .unwrap_or_else(|| vec![1; sample.len_of(Axis(0))]);
                let mut emb = mean_pool(sample.view(), &attn);
                ensure_dimension(&emb, expected_dimension)?;
                normalize(&mut emb);
                out.push(emb);
            }
        }
        _ => {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Unexpected ONNX output dims: {:?}",
                array.shape()
            )));
        }
    }
    Ok(out)
}

fn mean_pool(sample: ndarray::ArrayView2<'_, f32>, mask: &[i64]) -> Vec<f32> {
    if sample.is_empty() {
        return vec![];
    }

    let hidden = sample.len_of(Axis(1));
    let mut sum = vec![0.0f32; hidden];
    let mut count = 0.0f32;

    for (token_idx, token) in sample.outer_iter().enumerate() {
        if *mask.get(token_idx).unwrap_or(&0) == 0 {
            continue;
        }
        count += 1.0;
        for (dim, value) in token.iter().enumerate() {
            sum[dim] += value;
        }
    }

    if count == 0.0 {
        return sum;
    }

    for value in &mut sum {
        *value /= count;
    }

    sum
}

fn build_flat_tensors(
    encodings: &[Encoding],
    seq_len: usize,
) -> (Vec<i64>, Vec<i64>, Vec<i64>, Vec<Vec<i64>>) {
    let mut ids = Vec::with_capacity(encodings.len() * seq_len);
    let mut masks = Vec::with_capacity(encodings.len() * seq_len);
    let mut type_ids = Vec::with_capacity(encodings.len() * seq_len);
    let mut mask_rows = Vec::with_capacity(encodings.len());

    for encoding in encodings {
        let encoding_ids = encoding.get_ids();
        let encoding_masks = encoding.get_attention_mask();
        let encoding_types = encoding.get_type_ids();

        for idx in 0..seq_len {
            ids.push(i64::from(*encoding_ids.get(idx).unwrap_or(&0)));
            masks.push(i64::from(*encoding_masks.get(idx).unwrap_or(&0)));
            type_ids.push(i64::from(*encoding_types.get(idx).unwrap_or(&0)));
        }

        mask_rows.push(
            encoding_masks
                .iter()
                .take(seq_len)
                .map(|v| i64::from(*v))
                .collect(),
        );
    }

    (ids, masks, type_ids, mask_rows)
}

fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

/// Deterministic pseudo-embedding: the same text always maps to the same unit vector.
fn stub_embed(text: &str, dimension: usize) -> Vec<f32> {
    let mut state =
        fnv1a_64(text.as_bytes()) ^ (dimension as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut vec = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        let bits = splitmix64(&mut state);
        let high = (bits >> 32) as u32;
        let mantissa = high >> 9;
        let unit = f32::from_bits(0x3f80_0000 | mantissa) - 1.0;
        vec.push(unit.mul_add(2.0, -1.0));
    }
    normalize(&mut vec);
    vec
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn to_embedding_error(error: &OrtError) -> VectorStoreError {
    VectorStoreError::EmbeddingError(format!("{error}"))
}

fn zero_tensor(shape: &ndarray::IxDyn, input: &Input) -> Result<DynTensor> {
    let tensor = match &input.input_type {
        ort::value::ValueType::Tensor { ty, .. } => match ty {
            TensorElementType::Int64 => {
                Tensor::from_array(ndarray::Array::<i64, _>::zeros(shape.clone()))
                    .map_err(|e| to_embedding_error(&e))?
                    .upcast()
            }
            TensorElementType::Float32 => {
                Tensor::from_array(ndarray::Array::<f32, _>::zeros(shape.clone()))
                    .map_err(|e| to_embedding_error(&e))?
                    .upcast()
            }
            other => {
                return Err(VectorStoreError::EmbeddingError(format!(
                    "Cannot synthesize zeros for tensor type {other:?} (input {})",
                    input.name
                )))
            }
        },
        other => {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Unsupported input type for zero init: {other:?}"
            )))
        }
    };
    Ok(tensor)
}

/// Sentence-embedding model: ONNX Runtime on CPU, or a deterministic stub.
#[derive(Clone)]
pub struct EmbeddingModel {
    backend: EmbeddingBackend,
    dimension: usize,
}

#[derive(Clone)]
enum EmbeddingBackend {
    Ort(Arc<OrtBackend>),
    Stub(StubBackend),
}

impl EmbeddingModel {
    #[must_use]
    pub fn stub(dimension: usize) -> Self {
        Self {
            dimension,
            backend: EmbeddingBackend::Stub(StubBackend::new(dimension)),
        }
    }

    /// Loads the model under `model_dir`, sharing one session with any live model loaded
    /// from the same directory.
    pub async fn load(
        model_dir: &Path,
        spec: ModelSpec,
        progress: Option<&ProgressFn>,
    ) -> Result<Self> {
        let slot = backend_slot(model_dir)?;
        let mut cached = slot.lock().await;
        if let Some(backend) = cached.upgrade() {
            log::debug!("Reusing loaded model from {}", model_dir.display());
            return Ok(Self {
                dimension: backend.dimension,
                backend: EmbeddingBackend::Ort(backend),
            });
        }

        let assets = ModelAssets::discover(model_dir)?;
        log::info!("Reading model weights from {}", assets.model_path.display());
        let bytes = read_with_progress(&assets.model_path, progress).await?;
        let tokenizer_path = assets.tokenizer_path.clone();
        let backend = spawn_blocking(move || OrtBackend::from_bytes(&spec, &bytes, &tokenizer_path))
            .await??;
        let backend = Arc::new(backend);
        *cached = Arc::downgrade(&backend);

        Ok(Self {
            dimension: spec.dimension,
            backend: EmbeddingBackend::Ort(backend),
        })
    }

    pub async fn from_mode(
        mode: EmbeddingMode,
        model_dir: &Path,
        spec: ModelSpec,
        progress: Option<&ProgressFn>,
    ) -> Result<Self> {
        match mode {
            EmbeddingMode::Stub => Ok(Self::stub(spec.dimension)),
            EmbeddingMode::Onnx => Self::load(model_dir, spec, progress).await,
        }
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[cfg(test)]
    fn stub_batch_calls(&self) -> Option<usize> {
        match &self.backend {
            EmbeddingBackend::Stub(stub) => Some(stub.batch_calls.load(Ordering::Relaxed)),
            EmbeddingBackend::Ort(_) => None,
        }
    }
}

#[async_trait]
impl FeatureExtractor for EmbeddingModel {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let owned: Vec<String> = texts.into_iter().map(ToString::to_string).collect();
        match &self.backend {
            EmbeddingBackend::Stub(stub) => Ok(stub.embed_batch(&owned)),
            EmbeddingBackend::Ort(backend) => {
                let backend = backend.clone();
                spawn_blocking(move || backend.embed_batch_blocking(&owned)).await?
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::cosine_similarity;
    use std::sync::atomic::AtomicU64;

    #[tokio::test]
    async fn stub_embeddings_are_deterministic_and_normalized() {
        let model = EmbeddingModel::stub(32);
        let a = model.embed("create a new post").await.unwrap();
        let b = model.embed("create a new post").await.unwrap();
        let c = model.embed("upload media").await.unwrap();
        assert_eq!(a.len(), 32);
        assert_eq!(a, b);
        assert_ne!(a, c);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn stub_batch_is_one_call() {
        let model = EmbeddingModel::stub(8);
        let out = model.embed_batch(vec!["a", "b", "c"]).await.unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(model.stub_batch_calls(), Some(1));
        assert!(model.embed_batch(vec![]).await.unwrap().is_empty());
    }

    #[test]
    fn embedding_mode_parsing() {
        assert_eq!(EmbeddingMode::parse("STUB").unwrap(), EmbeddingMode::Stub);
        assert_eq!(EmbeddingMode::parse("onnx").unwrap(), EmbeddingMode::Onnx);
        assert!(EmbeddingMode::parse("gpu").is_err());
        assert_eq!(EmbeddingMode::Stub.as_str(), "stub");
    }

    #[test]
    fn mean_pool_ignores_padding() {
        let sample = ndarray::arr2(&[[1.0f32, 3.0], [3.0, 5.0], [100.0, 100.0]]);
        let pooled = mean_pool(sample.view(), &[1, 1, 0]);
        assert_eq!(pooled, vec![2.0, 4.0]);
    }

    #[test]
    fn pooled_output_is_normalized() {
        let array = ndarray::arr2(&[[3.0f32, 4.0]]).into_dyn();
        let out = embeddings_from_output(array, &[vec![1]], 2).unwrap();
        assert!((out[0][0] - 0.6).abs() < 1e-6);
        assert!((out[0][1] - 0.8).abs() < 1e-6);

        let wrong = ndarray::arr2(&[[3.0f32, 4.0]]).into_dyn();
        assert!(matches!(
            embeddings_from_output(wrong, &[vec![1]], 3),
            Err(VectorStoreError::InvalidDimension { .. })
        ));
    }

    #[test]
    fn discover_prefers_quantized_weights() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ModelAssets::discover(dir.path()),
            Err(VectorStoreError::AssetNotFound(_))
        ));

        std::fs::write(dir.path().join("tokenizer.json"), "{}").unwrap();
        std::fs::write(dir.path().join("model.onnx"), b"x").unwrap();
        let assets = ModelAssets::discover(dir.path()).unwrap();
        assert_eq!(assets.model_path, dir.path().join("model.onnx"));

        std::fs::create_dir_all(dir.path().join("onnx")).unwrap();
        std::fs::write(dir.path().join("onnx/model_quantized.onnx"), b"x").unwrap();
        let assets = ModelAssets::discover(dir.path()).unwrap();
        assert_eq!(
            assets.model_path,
            dir.path().join("onnx/model_quantized.onnx")
        );
    }

    #[tokio::test]
    async fn chunked_read_reports_monotonic_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.bin");
        let payload = vec![7u8; READ_CHUNK_BYTES * 2 + 10];
        std::fs::write(&path, &payload).unwrap();

        let last = Arc::new(AtomicU64::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let (last_c, calls_c) = (last.clone(), calls.clone());
        let report = move |p: LoadProgress| {
            assert!(p.loaded >= last_c.load(Ordering::SeqCst));
            assert_eq!(p.total, Some(payload_len()));
            last_c.store(p.loaded, Ordering::SeqCst);
            calls_c.fetch_add(1, Ordering::SeqCst);
        };
        fn payload_len() -> u64 {
            (READ_CHUNK_BYTES * 2 + 10) as u64
        }

        let bytes = read_with_progress(&path, Some(&report)).await.unwrap();
        assert_eq!(bytes, payload);
        assert_eq!(last.load(Ordering::SeqCst), payload_len());
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn onnx_mode_without_assets_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let err = EmbeddingModel::from_mode(
            EmbeddingMode::Onnx,
            dir.path(),
            ModelSpec::default(),
            None,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, VectorStoreError::AssetNotFound(_)));

        let stub = EmbeddingModel::from_mode(
            EmbeddingMode::Stub,
            dir.path(),
            ModelSpec::default(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(stub.dimension(), 384);
    }
}
