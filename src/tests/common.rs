//! Deterministic stand-ins for the embedding provider and the catalog store.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{
    BackendMemory, CatalogError, CatalogFilter, CatalogStore, Interaction, Product, StoredEmbedding,
};
use crate::embeddings::{Embedder, EmbeddingError, EmbeddingProvider, RetryConfig};

/// Hashes lowercase words into buckets: texts sharing words get similar vectors.
pub struct BagOfWordsProvider {
    dimensions: usize,
    /// Texts that fail with a non-retryable error
    failing: HashSet<String>,
    fail_all: bool,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl BagOfWordsProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            failing: HashSet::new(),
            fail_all: false,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.fail_all = true;
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
            vector[bucket as usize % self.dimensions] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for BagOfWordsProvider {
    fn name(&self) -> &str {
        "bag-of-words"
    }

    fn model(&self) -> &str {
        "bag-of-words-v1"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.fail_all {
            return Err(EmbeddingError::Unauthorized("API key not valid".to_string()));
        }
        if self.failing.contains(text) {
            return Err(EmbeddingError::QuotaExceeded(format!("refused '{text}'")));
        }

        Ok(self.vector_for(text))
    }
}

/// Returns fixed vectors per text, fails for anything else.
pub struct FixedVectorProvider {
    table: HashMap<String, Vec<f32>>,
    dimensions: usize,
}

impl FixedVectorProvider {
    pub fn new(dimensions: usize, entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            table: entries
                .iter()
                .map(|(text, vector)| (text.to_string(), vector.clone()))
                .collect(),
            dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FixedVectorProvider {
    fn name(&self) -> &str {
        "fixed"
    }

    fn model(&self) -> &str {
        "fixed-v1"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.table
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::InvalidResponse(format!("no vector for '{text}'")))
    }
}

/// A catalog whose every call fails.
pub struct UnavailableCatalog;

#[async_trait]
impl CatalogStore for UnavailableCatalog {
    async fn list(&self, _filter: &CatalogFilter) -> Result<Vec<Product>, CatalogError> {
        Err(CatalogError::Unavailable("connection refused".to_string()))
    }

    async fn get(&self, _id: u64) -> Result<Option<Product>, CatalogError> {
        Err(CatalogError::Unavailable("connection refused".to_string()))
    }

    async fn upsert(&self, _product: Product) -> Result<Product, CatalogError> {
        Err(CatalogError::Unavailable("connection refused".to_string()))
    }

    async fn set_embedding(&self, _id: u64, _embedding: StoredEmbedding) -> Result<(), CatalogError> {
        Err(CatalogError::Unavailable("connection refused".to_string()))
    }

    async fn append_interaction(&self, _entry: Interaction) -> Result<(), CatalogError> {
        Err(CatalogError::Unavailable("connection refused".to_string()))
    }

    async fn interactions(
        &self,
        _session_id: &str,
        _limit: usize,
    ) -> Result<Vec<Interaction>, CatalogError> {
        Err(CatalogError::Unavailable("connection refused".to_string()))
    }
}

/// Reads from an in-memory catalog but cannot record interactions.
pub struct FailingLogCatalog {
    inner: BackendMemory,
    pub appends: AtomicUsize,
}

impl FailingLogCatalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self {
            inner: BackendMemory::with_products(products),
            appends: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CatalogStore for FailingLogCatalog {
    async fn list(&self, filter: &CatalogFilter) -> Result<Vec<Product>, CatalogError> {
        self.inner.list(filter).await
    }

    async fn get(&self, id: u64) -> Result<Option<Product>, CatalogError> {
        self.inner.get(id).await
    }

    async fn upsert(&self, product: Product) -> Result<Product, CatalogError> {
        self.inner.upsert(product).await
    }

    async fn set_embedding(&self, id: u64, embedding: StoredEmbedding) -> Result<(), CatalogError> {
        self.inner.set_embedding(id, embedding).await
    }

    async fn append_interaction(&self, _entry: Interaction) -> Result<(), CatalogError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        Err(CatalogError::Unavailable("interaction log is read-only".to_string()))
    }

    async fn interactions(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Interaction>, CatalogError> {
        self.inner.interactions(session_id, limit).await
    }
}

/// Embedder without retries or backoff.
pub fn embedder<P: EmbeddingProvider + 'static>(provider: Arc<P>) -> Arc<Embedder> {
    Arc::new(Embedder::new(provider, RetryConfig::no_delay(0), 4))
}

pub fn product(id: u64, name: &str, brand: &str, category: &str, description: &str) -> Product {
    Product {
        id,
        name: name.to_string(),
        brand: brand.to_string(),
        category: category.to_string(),
        description: description.to_string(),
        ..Default::default()
    }
}

pub fn with_vector(mut product: Product, vector: Vec<f32>) -> Product {
    product.embedding = Some(StoredEmbedding {
        vector,
        content_hash: 0,
    });
    product
}

/// Interaction logging is fire-and-forget; poll until `count` entries landed.
pub async fn wait_for_interactions(
    catalog: &dyn CatalogStore,
    session_id: &str,
    count: usize,
) -> Vec<Interaction> {
    for _ in 0..200 {
        let entries = catalog.interactions(session_id, 100).await.unwrap();
        if entries.len() >= count {
            return entries;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} interactions for session {session_id}");
}
