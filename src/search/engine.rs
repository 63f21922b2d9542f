use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use super::{
    lexical::match_keyword, merge_results, InteractionLogger, Provenance, SearchHit, SearchMethod,
    SearchQuery, SearchRequest, ValidationError,
};
use crate::catalog::{CatalogError, CatalogFilter, CatalogStore, Product};
use crate::config::{KeywordScope, SearchConfig};
use crate::embeddings::Embedder;
use crate::vector::{filter_similar_results, find_top_k_similar};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("catalog unavailable: {0}")]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub method: SearchMethod,
    pub total: usize,
    pub results: Vec<SearchHit>,
}

/// Outcome of embedding the query text.
enum QueryVector {
    /// No provider configured
    Disabled,
    Ready(Vec<f32>),
    Failed,
}

/// Outcome of scoring the embedded candidates.
enum VectorPass {
    Skipped,
    Scored(Vec<SearchHit>),
    Failed,
}

pub struct SearchEngine {
    catalog: Arc<dyn CatalogStore>,
    embedder: Option<Arc<Embedder>>,
    logger: InteractionLogger,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        embedder: Option<Arc<Embedder>>,
        config: SearchConfig,
    ) -> Self {
        let logger = InteractionLogger::new(catalog.clone(), config.log_interactions);
        Self {
            catalog,
            embedder,
            logger,
            config,
        }
    }

    /// Run one hybrid search.
    ///
    /// Fails only on invalid parameters (before any provider call) or when
    /// the catalog cannot be read. Every provider problem degrades to
    /// keyword matching and is reported through the response method.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        let query = SearchQuery::parse(request, &self.config)?;
        let now = Instant::now();

        let filter = CatalogFilter {
            category: query.category.clone(),
            brand: query.brand.clone(),
            ..CatalogFilter::active()
        };

        let (query_vector, candidates) =
            tokio::join!(self.embed_query(&query.text), self.catalog.list(&filter));
        let candidates = candidates?;

        let dimensions = self.embedder.as_ref().map_or(0, |e| e.dimensions());
        let (embedded, unembedded): (Vec<&Product>, Vec<&Product>) = candidates
            .iter()
            .partition(|p| p.has_embedding_of(dimensions));

        let malformed = unembedded.iter().filter(|p| p.embedding.is_some()).count();
        if dimensions > 0 && malformed > 0 {
            log::warn!("ignoring {malformed} stored embeddings without {dimensions} dimensions");
        }

        let vector_pass = match &query_vector {
            QueryVector::Disabled => VectorPass::Skipped,
            QueryVector::Failed => VectorPass::Failed,
            QueryVector::Ready(vector) => self.score_vectors(vector, &embedded, &query, dimensions),
        };

        let all: Vec<&Product> = candidates.iter().collect();
        let keyword_pool: &[&Product] = match (&vector_pass, self.config.keyword_scope) {
            (VectorPass::Scored(_), KeywordScope::Unembedded) => &unembedded,
            _ => &all,
        };
        let keyword_hits: Vec<SearchHit> = match_keyword(&query.text, keyword_pool)
            .into_iter()
            .map(|product| SearchHit {
                product: product.clone(),
                score: self.config.keyword_score,
                source: Provenance::Keyword,
            })
            .collect();

        let (vector_hits, vector_failed) = match vector_pass {
            VectorPass::Scored(hits) => (hits, false),
            VectorPass::Skipped => (vec![], false),
            VectorPass::Failed => (vec![], true),
        };

        let results = merge_results(vector_hits, keyword_hits, query.limit);
        let method = if vector_failed {
            SearchMethod::KeywordFallback
        } else if results.iter().any(|hit| hit.source == Provenance::Vector) {
            SearchMethod::Hybrid
        } else {
            SearchMethod::Keyword
        };

        log::debug!(
            "search '{}' ({method}) returned {} of {} candidates in {}ms",
            query.text,
            results.len(),
            candidates.len(),
            now.elapsed().as_micros() as f64 / 1000.0
        );

        self.logger.dispatch(
            query.session_id.as_deref(),
            &query.text,
            results.iter().map(|hit| hit.product.id).collect(),
            method,
        );

        Ok(SearchResponse {
            query: query.text,
            method,
            total: results.len(),
            results,
        })
    }

    /// Embed the query, bounded by the configured timeout.
    async fn embed_query(&self, text: &str) -> QueryVector {
        let Some(embedder) = &self.embedder else {
            return QueryVector::Disabled;
        };

        let timeout = self.config.embed_timeout();
        match tokio::time::timeout(timeout, embedder.embed_text(text)).await {
            Ok(Ok(vector)) => QueryVector::Ready(vector),
            Ok(Err(err)) => {
                log::warn!("query embedding failed, falling back to keyword search: {err}");
                QueryVector::Failed
            }
            Err(_) => {
                log::warn!(
                    "query embedding timed out after {}ms, falling back to keyword search",
                    timeout.as_millis()
                );
                QueryVector::Failed
            }
        }
    }

    fn score_vectors(
        &self,
        query_vector: &[f32],
        embedded: &[&Product],
        query: &SearchQuery,
        dimensions: usize,
    ) -> VectorPass {
        let pool: Vec<(&[f32], &Product)> = embedded
            .iter()
            .filter_map(|p| p.vector_of(dimensions).map(|v| (v, *p)))
            .collect();

        // over-fetch, keyword hits are deduplicated against these later
        let scored = match find_top_k_similar(query_vector, &pool, query.limit * 2) {
            Ok(scored) => scored,
            Err(err) => {
                log::warn!("vector scoring failed, falling back to keyword search: {err}");
                return VectorPass::Failed;
            }
        };

        let mut scored: Vec<_> = scored
            .into_iter()
            .filter(|s| s.score >= query.min_similarity)
            .collect();
        if let Some(threshold) = self.config.dedupe_threshold {
            scored = filter_similar_results(scored, threshold);
        }

        VectorPass::Scored(
            scored
                .into_iter()
                .map(|s| SearchHit {
                    product: s.item.clone(),
                    score: s.score.clamp(0.0, 1.0),
                    source: Provenance::Vector,
                })
                .collect(),
        )
    }
}
