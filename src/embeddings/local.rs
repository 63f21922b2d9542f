//! In-process embedding model backed by fastembed.
//!
//! The model is downloaded into `<cache_dir>/models` on first use. Inference
//! is CPU bound and runs on the blocking thread pool.

use async_trait::async_trait;
use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::{EmbeddingError, EmbeddingProvider};

pub struct LocalProvider {
    // fastembed's embed() takes &mut self
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimensions: usize,
}

impl LocalProvider {
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let model_enum = parse_model_name(model_name)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::Init(format!("failed to create models directory: {e}"))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let mut model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::Init(e.to_string()))?;

        let dimensions = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::Init(format!("failed to probe dimensions: {e}")))?
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::Init("model returned no embedding".into()))?;

        log::info!("Loaded local embedding model {model_name} ({dimensions} dimensions)");

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name: model_name.to_string(),
            dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn model(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let model = self.model.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|e| EmbeddingError::InvalidResponse(format!("model lock poisoned: {e}")))?;

            model
                .embed(vec![text], None)
                .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?
                .into_iter()
                .next()
                .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding returned".into()))
        })
        .await
        .map_err(|e| EmbeddingError::InvalidResponse(format!("embedding task failed: {e}")))?
    }
}

fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
    match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        _ => Err(EmbeddingError::Init(format!(
            "unknown local model '{name}', supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, multilingual-e5-small"
        ))),
    }
}
