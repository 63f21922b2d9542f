use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use super::AppContext;
use crate::{
    auth::StaticTokenVerifier,
    catalog::{BackendCsv, CatalogStore},
    config::{Config, EmbeddingConfig, ProviderKind},
    embeddings::{Embedder, EmbeddingProvider, GeminiProvider, RetryConfig},
    rate_limit::FixedWindowLimiter,
};

pub const BASE_PATH_ENV: &str = "CATALOG_SEARCH_BASE";

/// Builds an [`AppContext`] from configuration.
pub struct AppFactory;

impl AppFactory {
    /// Base directory: the explicit argument, else `CATALOG_SEARCH_BASE`, else `.`
    pub fn base_path(explicit: Option<PathBuf>) -> PathBuf {
        explicit
            .or_else(|| std::env::var_os(BASE_PATH_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn create(config: Config) -> Result<AppContext> {
        let embedder = Self::create_embedder(&config)?;

        let (model, dimensions) = embedder
            .as_ref()
            .map_or((String::new(), 0), |e| (e.model().to_string(), e.dimensions()));

        let catalog: Arc<dyn CatalogStore> = Arc::new(
            BackendCsv::load(
                config.resolve(&config.catalog.products_file),
                config.resolve(&config.catalog.embeddings_file),
                config.resolve(&config.catalog.interactions_file),
                &model,
                dimensions,
            )
            .context("failed to load catalog")?,
        );

        let limiter = Arc::new(FixedWindowLimiter::from_config(&config.server.rate_limit));
        let verifier = Arc::new(StaticTokenVerifier::new(config.server.api_token.clone()));

        Ok(AppContext::new(config, catalog, embedder, limiter, verifier))
    }

    /// `None` when no provider is configured or its credentials are missing;
    /// search then runs keyword-only.
    pub fn create_embedder(config: &Config) -> Result<Option<Arc<Embedder>>> {
        let emb = &config.embedding;

        let provider: Arc<dyn EmbeddingProvider> = match emb.provider {
            ProviderKind::None => {
                log::info!("No embedding provider configured, using keyword search only");
                return Ok(None);
            }
            ProviderKind::Gemini => {
                let api_key = match std::env::var(&emb.api_key_env) {
                    Ok(key) if !key.trim().is_empty() => key,
                    _ => {
                        log::warn!(
                            "{} is not set, semantic search disabled",
                            emb.api_key_env
                        );
                        return Ok(None);
                    }
                };
                Arc::new(GeminiProvider::new(
                    &emb.base_url,
                    &emb.model,
                    api_key.trim(),
                    emb.dimensions,
                    emb.request_timeout(),
                )?)
            }
            ProviderKind::Local => Self::create_local_provider(emb, config)?,
        };

        log::info!(
            "Using {} embeddings ({}, {} dimensions)",
            provider.name(),
            provider.model(),
            provider.dimensions()
        );

        let retry = RetryConfig {
            max_retries: emb.max_retries,
            base_delay: emb.retry_base_delay(),
            ..Default::default()
        };

        Ok(Some(Arc::new(Embedder::new(
            provider,
            retry,
            emb.max_concurrency,
        ))))
    }

    #[cfg(feature = "local-embeddings")]
    fn create_local_provider(emb: &EmbeddingConfig, config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
        let provider = crate::embeddings::LocalProvider::new(&emb.model, config.base_path().to_path_buf())?;
        Ok(Arc::new(provider))
    }

    #[cfg(not(feature = "local-embeddings"))]
    fn create_local_provider(_emb: &EmbeddingConfig, _config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
        anyhow::bail!("embedding.provider 'local' requires building with the local-embeddings feature")
    }
}
