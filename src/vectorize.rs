//! Embedding backfill.
//!
//! Products needing an embedding are processed in fixed-size batches, one
//! batch at a time with a pause in between to stay under provider rate
//! limits. Within a batch every successful embedding is persisted on its
//! own, so one failing product never discards its siblings.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::catalog::{CatalogError, CatalogFilter, CatalogStore, Product, StoredEmbedding};
use crate::config::{FailurePolicy, VectorizeConfig};
use crate::embeddings::{combine_product_fields, content_hash, Embedder, EmbeddingError};

#[derive(Debug, thiserror::Error)]
pub enum VectorizeError {
    #[error("product {0} not found")]
    NotFound(u64),

    #[error("too many ids: {got}, at most {max} per request")]
    TooManyIds { got: usize, max: usize },

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Counters of one backfill run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Products sent to the provider
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Products left alone: already up to date, or requested ids not in the catalog
    pub skipped: usize,
    pub batches: usize,
}

#[derive(Debug, Clone, Default)]
pub struct VectorizeOptions {
    /// Restrict the run to these products; all products when `None`
    pub ids: Option<Vec<u64>>,
    /// Regenerate even up-to-date embeddings
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VectorizeOutcome {
    Vectorized { id: u64, dimensions: usize },
    AlreadyVectorized { id: u64, dimensions: usize },
}

#[derive(Debug, Default)]
struct BatchOutcome {
    succeeded: usize,
    failed: usize,
}

pub struct Vectorizer {
    catalog: Arc<dyn CatalogStore>,
    embedder: Arc<Embedder>,
    config: VectorizeConfig,
}

impl Vectorizer {
    pub fn new(catalog: Arc<dyn CatalogStore>, embedder: Arc<Embedder>, config: VectorizeConfig) -> Self {
        Self {
            catalog,
            embedder,
            config,
        }
    }

    /// Missing, malformed and (with `refresh_stale`) outdated embeddings need work.
    fn needs_embedding(&self, product: &Product) -> bool {
        if !product.has_embedding_of(self.embedder.dimensions()) {
            return true;
        }
        self.config.refresh_stale
            && product
                .embedding
                .as_ref()
                .is_some_and(|e| e.content_hash != content_hash(product))
    }

    /// Backfill embeddings.
    pub async fn run(&self, options: VectorizeOptions) -> Result<BatchReport, VectorizeError> {
        if let Some(ids) = &options.ids {
            if ids.len() > self.config.max_batch_ids {
                return Err(VectorizeError::TooManyIds {
                    got: ids.len(),
                    max: self.config.max_batch_ids,
                });
            }
        }

        let now = Instant::now();
        let products = self
            .catalog
            .list(&CatalogFilter {
                ids: options.ids.clone(),
                ..Default::default()
            })
            .await?;

        let mut report = BatchReport::default();

        if let Some(ids) = &options.ids {
            let missing: Vec<u64> = ids
                .iter()
                .filter(|id| !products.iter().any(|p| p.id == **id))
                .copied()
                .collect();
            if !missing.is_empty() {
                log::warn!("skipping unknown products {missing:?}");
                report.skipped += missing.len();
            }
        }

        let (pending, up_to_date): (Vec<Product>, Vec<Product>) = products
            .into_iter()
            .partition(|p| options.force || self.needs_embedding(p));
        report.skipped += up_to_date.len();
        report.attempted = pending.len();

        if pending.is_empty() {
            log::info!("nothing to vectorize ({} up to date)", report.skipped);
            return Ok(report);
        }

        let batch_count = pending.len().div_ceil(self.config.batch_size);
        log::info!(
            "vectorizing {} products in {batch_count} batches of {}",
            pending.len(),
            self.config.batch_size
        );

        for (idx, batch) in pending.chunks(self.config.batch_size).enumerate() {
            if idx > 0 && !self.config.batch_delay().is_zero() {
                tokio::time::sleep(self.config.batch_delay()).await;
            }

            let outcome = match self.config.failure_policy {
                FailurePolicy::Continue => self.process_batch(batch).await,
                FailurePolicy::AbortBatch => self.process_batch_until_failure(batch).await,
            };

            log::info!(
                "batch {}/{batch_count}: {}/{} succeeded",
                idx + 1,
                outcome.succeeded,
                batch.len()
            );

            report.succeeded += outcome.succeeded;
            report.failed += outcome.failed;
            report.batches += 1;
        }

        log::info!(
            "vectorization finished: {}/{} succeeded, {} failed, {} skipped in {}ms",
            report.succeeded,
            report.attempted,
            report.failed,
            report.skipped,
            now.elapsed().as_millis()
        );

        Ok(report)
    }

    /// Embed a whole batch concurrently, persist each success.
    async fn process_batch(&self, batch: &[Product]) -> BatchOutcome {
        let texts: Vec<String> = batch.iter().map(combine_product_fields).collect();
        let results = self.embedder.embed_batch_partial(&texts).await;

        let mut outcome = BatchOutcome::default();
        for (product, result) in batch.iter().zip(results) {
            let persisted = match result {
                Ok(vector) => self.persist(product, vector).await,
                Err(err) => Err(err.into()),
            };
            match persisted {
                Ok(()) => outcome.succeeded += 1,
                Err(err) => {
                    log::warn!("failed to vectorize product {}: {err}", product.id);
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }

    /// Embed one product at a time; the first failure gives up on the rest of the batch.
    async fn process_batch_until_failure(&self, batch: &[Product]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for (idx, product) in batch.iter().enumerate() {
            if let Err(err) = self.vectorize(product).await {
                let abandoned = batch.len() - idx;
                log::warn!(
                    "failed to vectorize product {}: {err}; abandoning {} remaining in batch",
                    product.id,
                    abandoned - 1
                );
                outcome.failed += abandoned;
                break;
            }
            outcome.succeeded += 1;
        }

        outcome
    }

    /// Embed and store one product, returning the stored dimensionality.
    async fn vectorize(&self, product: &Product) -> Result<usize, VectorizeError> {
        let vector = self
            .embedder
            .embed_text(&combine_product_fields(product))
            .await?;
        let dimensions = vector.len();
        self.persist(product, vector).await?;
        Ok(dimensions)
    }

    async fn persist(&self, product: &Product, vector: Vec<f32>) -> Result<(), VectorizeError> {
        self.catalog
            .set_embedding(
                product.id,
                StoredEmbedding {
                    vector,
                    content_hash: content_hash(product),
                },
            )
            .await?;
        Ok(())
    }

    /// Vectorize a single product, unless it is already up to date and `force` is off.
    pub async fn vectorize_product(&self, id: u64, force: bool) -> Result<VectorizeOutcome, VectorizeError> {
        let product = self
            .catalog
            .get(id)
            .await?
            .ok_or(VectorizeError::NotFound(id))?;

        if !force && !self.needs_embedding(&product) {
            return Ok(VectorizeOutcome::AlreadyVectorized {
                id,
                dimensions: self.embedder.dimensions(),
            });
        }

        let dimensions = self.vectorize(&product).await?;
        log::info!("vectorized product {id}");

        Ok(VectorizeOutcome::Vectorized { id, dimensions })
    }
}
