use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::AppError;
use crate::{
    auth::{Identity, TokenVerifier},
    catalog::{BackendCsv, CatalogFilter, CatalogStore, Interaction},
    config::Config,
    embeddings::Embedder,
    rate_limit::RateLimiter,
    search::{SearchEngine, SearchRequest, SearchResponse},
    vectorize::{BatchReport, VectorizeOptions, VectorizeOutcome, Vectorizer},
};

const DEFAULT_INTERACTIONS_LIMIT: usize = 20;
const MAX_INTERACTIONS_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub provider: String,
    pub model: Option<String>,
    pub dimensions: usize,
    pub products: usize,
    pub embedded: usize,
}

/// Everything a request needs: catalog, search engine, backfill pipeline,
/// rate limiter and token verifier.
pub struct AppContext {
    config: Config,
    catalog: Arc<dyn CatalogStore>,
    embedder: Option<Arc<Embedder>>,
    engine: SearchEngine,
    vectorizer: Option<Vectorizer>,
    limiter: Arc<dyn RateLimiter>,
    verifier: Arc<dyn TokenVerifier>,
}

impl AppContext {
    pub fn new(
        config: Config,
        catalog: Arc<dyn CatalogStore>,
        embedder: Option<Arc<Embedder>>,
        limiter: Arc<dyn RateLimiter>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        let engine = SearchEngine::new(catalog.clone(), embedder.clone(), config.search.clone());
        let vectorizer = embedder
            .clone()
            .map(|e| Vectorizer::new(catalog.clone(), e, config.vectorize.clone()));

        Self {
            config,
            catalog,
            embedder,
            engine,
            vectorizer,
            limiter,
            verifier,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }

    /// Resolve the caller. Fails only for a present but invalid token.
    pub fn identify(&self, authorization: Option<&str>) -> Result<Identity, AppError> {
        match self.verifier.verify(authorization) {
            Ok(identity) => Ok(identity),
            Err(_) if authorization.is_none() => Ok(Identity::Anonymous),
            Err(err) => Err(err.into()),
        }
    }

    /// Resolve the caller and require a token when one is configured.
    pub fn authorize(&self, authorization: Option<&str>) -> Result<Identity, AppError> {
        Ok(self.verifier.verify(authorization)?)
    }

    /// Count a request against `key`.
    pub fn check_rate_limit(&self, key: &str) -> Result<(), AppError> {
        if self.limiter.check(key) {
            Ok(())
        } else {
            log::warn!("rate limit exceeded for {key}");
            Err(AppError::RateLimited)
        }
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, AppError> {
        Ok(self.engine.search(request).await?)
    }

    fn vectorizer(&self) -> Result<&Vectorizer, AppError> {
        self.vectorizer.as_ref().ok_or(AppError::ProviderDisabled)
    }

    pub async fn vectorize_product(&self, id: u64, force: bool) -> Result<VectorizeOutcome, AppError> {
        Ok(self.vectorizer()?.vectorize_product(id, force).await?)
    }

    pub async fn vectorize_batch(&self, options: VectorizeOptions) -> Result<BatchReport, AppError> {
        Ok(self.vectorizer()?.run(options).await?)
    }

    pub async fn interactions(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Interaction>, AppError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(AppError::BadRequest("session_id must not be empty".to_string()));
        }

        let limit = limit
            .unwrap_or(DEFAULT_INTERACTIONS_LIMIT)
            .clamp(1, MAX_INTERACTIONS_LIMIT);
        Ok(self.catalog.interactions(session_id, limit).await?)
    }

    /// Upsert every product of a CSV file into the catalog.
    pub async fn import_products(&self, path: &Path) -> Result<usize, AppError> {
        let products = BackendCsv::read_products(path)?;
        log::info!("importing {} products from {}", products.len(), path.display());
        Ok(self.catalog.upsert_many(products).await?)
    }

    pub async fn health(&self) -> Result<Health, AppError> {
        let products = self.catalog.list(&CatalogFilter::default()).await?;
        let dimensions = self.embedder.as_ref().map_or(0, |e| e.dimensions());

        Ok(Health {
            status: "ok".to_string(),
            provider: self
                .embedder
                .as_ref()
                .map_or("none", |e| e.provider_name())
                .to_string(),
            model: self.embedder.as_ref().map(|e| e.model().to_string()),
            dimensions,
            products: products.len(),
            embedded: products
                .iter()
                .filter(|p| p.has_embedding_of(dimensions))
                .count(),
        })
    }
}
