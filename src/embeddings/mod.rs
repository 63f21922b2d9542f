//! Text embedding providers and the adapter the rest of the crate uses.
//!
//! # Architecture
//!
//! - `EmbeddingProvider`: one text in, one vector out (Gemini, fastembed, ...)
//! - `Embedder`: wraps a provider with retry, dimension checks and
//!   bounded-concurrency batching
//! - `preprocess`: the canonical text of a product and its content hash
//! - `retry`: backoff policy for retryable provider errors

pub mod gemini;
#[cfg(feature = "local-embeddings")]
pub mod local;
mod preprocess;
mod retry;

pub use gemini::GeminiProvider;
#[cfg(feature = "local-embeddings")]
pub use local::LocalProvider;
pub use preprocess::{combine_product_fields, content_hash};
pub use retry::RetryConfig;

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use std::sync::Arc;

/// Default embedding model
pub const DEFAULT_MODEL: &str = "text-embedding-004";

/// Dimensionality of the default model
pub const DEFAULT_DIMENSIONS: usize = 768;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    #[error("invalid provider credentials: {0}")]
    Unauthorized(String),

    #[error("provider quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("provider request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("provider error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("embedding has {got} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("cannot embed empty text")]
    EmptyInput,

    #[error("embedding model initialization failed: {0}")]
    Init(String),
}

impl EmbeddingError {
    /// Transient failures worth another attempt: timeouts, transport errors,
    /// 408 and 5xx responses. Bad credentials and exhausted quota are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::Timeout | EmbeddingError::Network(_) => true,
            EmbeddingError::Server { status, .. } => *status == 408 || *status >= 500,
            _ => false,
        }
    }
}

/// A text-embedding model.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name for logs and health output
    fn name(&self) -> &str;

    /// Model identifier; stored embeddings are tied to it
    fn model(&self) -> &str;

    /// Length of every vector this provider returns
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Shields callers from the provider's request shape, concurrency limits
/// and transient failures.
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    retry: RetryConfig,
    max_concurrency: usize,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, retry: RetryConfig, max_concurrency: usize) -> Self {
        Self {
            provider,
            retry,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Embed a single text.
    ///
    /// Retryable errors are retried per the configured policy. A vector of
    /// the wrong length is rejected rather than stored or scored.
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let vector = retry::with_retry(&self.retry, |_attempt| self.provider.embed(text)).await?;

        let expected = self.dimensions();
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                got: vector.len(),
            });
        }

        Ok(vector)
    }

    /// Embed many texts concurrently, all or nothing.
    ///
    /// Output order matches input order. The first failure fails the batch.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let pending: Vec<_> = texts.iter().map(|text| self.embed_text(text)).collect();
        stream::iter(pending)
            .buffered(self.concurrency_for(texts.len()))
            .try_collect()
            .await
    }

    /// Embed many texts concurrently, one result per input, in input order.
    pub async fn embed_batch_partial(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        if texts.is_empty() {
            return vec![];
        }

        let pending: Vec<_> = texts.iter().map(|text| self.embed_text(text)).collect();
        stream::iter(pending)
            .buffered(self.concurrency_for(texts.len()))
            .collect()
            .await
    }

    fn concurrency_for(&self, count: usize) -> usize {
        count.clamp(1, self.max_concurrency)
    }
}
