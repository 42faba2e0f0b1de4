//! Embedding backends
//!
//! The model call is an external collaborator. `Embedder` is the seam:
//! fastembed-rs in production (behind the `embeddings` feature), the
//! deterministic `HashingEmbedder` offline and in tests.

use crate::text::tokenize;
use std::fmt;

/// Error type for embedding operations.
#[derive(Debug)]
pub enum EmbeddingError {
    /// The embedding model returned no results
    EmptyResult,
    /// Model loading or inference failed
    ModelError(String),
    /// The embedding service could not be reached
    Unavailable(String),
}

impl fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingError::EmptyResult => write!(f, "embedding returned no results"),
            EmbeddingError::ModelError(msg) => write!(f, "embedding model error: {}", msg),
            EmbeddingError::Unavailable(msg) => write!(f, "embedding service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for EmbeddingError {}

/// Trait for embedding text into vectors.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per text.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or(EmbeddingError::EmptyResult)
    }
}

/// Feature-hashing bag-of-words embedder.
///
/// Each token is hashed (FNV-1a, stable across builds) into one of
/// `dimensions` buckets with a hash-derived sign; the vector is then
/// L2-normalized. No model download, fully deterministic, and good enough
/// to separate unrelated documents.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn fnv1a(token: &str) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        hash
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let hash = Self::fnv1a(&token);
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// L2-normalize a vector in place.
fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(feature = "embeddings")]
mod fastembed_impl {
    use super::{Embedder, EmbeddingError};
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Mutex;

    /// Local ONNX sentence embedder; one inference at a time.
    pub struct FastEmbedEmbedder {
        model: Mutex<TextEmbedding>,
    }

    impl FastEmbedEmbedder {
        pub fn new(model: EmbeddingModel) -> Result<Self, EmbeddingError> {
            let options = InitOptions::new(model).with_show_download_progress(false);
            let model = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::ModelError(e.to_string()))?;
            Ok(Self {
                model: Mutex::new(model),
            })
        }

        /// all-MiniLM-L6-v2 (384 dimensions)
        pub fn default_model() -> Result<Self, EmbeddingError> {
            Self::new(EmbeddingModel::AllMiniLML6V2)
        }
    }

    impl Embedder for FastEmbedEmbedder {
        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let mut model = self
                .model
                .lock()
                .map_err(|_| EmbeddingError::Unavailable("embedder lock poisoned".to_string()))?;
            let vectors = model
                .embed(texts.to_vec(), None)
                .map_err(|e| EmbeddingError::ModelError(e.to_string()))?;
            if vectors.len() != texts.len() {
                return Err(EmbeddingError::EmptyResult);
            }
            Ok(vectors)
        }
    }
}

#[cfg(feature = "embeddings")]
pub use fastembed_impl::FastEmbedEmbedder;
