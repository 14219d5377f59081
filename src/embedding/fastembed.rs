//! Local bi-encoder backed by fastembed.
//!
//! Used by the embedding reranker and the keyword extractor. Models are ONNX
//! exports downloaded into the model cache directory on first load.

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Texts per ONNX forward pass.
const BATCH_SIZE: usize = 64;

/// Resolve a configured model name (the fastembed variant name) to a model.
///
/// Matching is case-insensitive. Returns `None` for unsupported names.
pub fn parse_embedding_model(name: &str) -> Option<EmbeddingModel> {
    let model = match name.to_ascii_lowercase().as_str() {
        "allminilml6v2" | "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
        "allminilml12v2" | "all-minilm-l12-v2" => EmbeddingModel::AllMiniLML12V2,
        "bgesmallenv15" => EmbeddingModel::BGESmallENV15,
        "bgebaseenv15" => EmbeddingModel::BGEBaseENV15,
        "bgelargeenv15" => EmbeddingModel::BGELargeENV15,
        "paraphrasemlminilml12v2" => EmbeddingModel::ParaphraseMLMiniLML12V2,
        "paraphrasemlmpnetbasev2" => EmbeddingModel::ParaphraseMLMpnetBaseV2,
        "nomicembedtextv15" => EmbeddingModel::NomicEmbedTextV15,
        _ => return None,
    };
    Some(model)
}

fn output_dimension(model: &EmbeddingModel) -> usize {
    match model {
        EmbeddingModel::BGEBaseENV15
        | EmbeddingModel::NomicEmbedTextV15
        | EmbeddingModel::ParaphraseMLMpnetBaseV2 => 768,
        EmbeddingModel::BGELargeENV15 => 1024,
        _ => 384,
    }
}

/// fastembed `TextEmbedding` behind an async mutex.
///
/// Clones share the loaded session.
#[derive(Clone)]
pub struct FastEmbedProvider {
    session: Arc<Mutex<TextEmbedding>>,
    name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    /// Load `model` (default `AllMiniLML6V2`), caching files under `cache_dir`.
    ///
    /// Blocking: downloads on first use. The model registry runs this on a
    /// blocking thread.
    ///
    /// # Errors
    /// Returns `EmbeddingError::ConfigError` if the model cannot be loaded
    pub fn new(model: Option<EmbeddingModel>, cache_dir: Option<PathBuf>) -> EmbeddingResult<Self> {
        let model = model.unwrap_or(EmbeddingModel::AllMiniLML6V2);
        let name = format!("{:?}", model);
        let dimension = output_dimension(&model);

        let options = match cache_dir {
            Some(dir) => InitOptions::new(model).with_cache_dir(dir),
            None => InitOptions::new(model),
        };

        tracing::info!("Loading embedding model {}", name);
        let session = TextEmbedding::try_new(options).map_err(|e| {
            EmbeddingError::ConfigError(format!("Failed to load embedding model {}: {}", name, e))
        })?;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            name,
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .pop()
            .ok_or_else(|| EmbeddingError::Other("Model returned no embedding".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(pos) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput(format!(
                "Text at position {} is empty",
                pos
            )));
        }

        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let session = self.session.lock().await;
        let vectors = session
            .embed(owned, Some(BATCH_SIZE))
            .map_err(|e| EmbeddingError::Other(format!("Embedding failed: {}", e)))?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::Other(format!(
                "Model returned {} embeddings for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("name", &self.name)
            .field("dimension", &self.dimension)
            .finish()
    }
}
