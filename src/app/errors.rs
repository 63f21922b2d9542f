use crate::{
    auth::AuthError,
    catalog::CatalogError,
    embeddings::EmbeddingError,
    search::{SearchError, ValidationError},
    vectorize::VectorizeError,
};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(#[from] AuthError),

    #[error("product {0} not found")]
    NotFound(u64),

    #[error("rate limit exceeded, try again later")]
    RateLimited,

    #[error("embedding provider error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("no embedding provider configured")]
    ProviderDisabled,

    #[error("catalog error: {0}")]
    Catalog(CatalogError),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(id) => AppError::NotFound(id),
            err => AppError::Catalog(err),
        }
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Validation(err) => err.into(),
            SearchError::Catalog(err) => err.into(),
        }
    }
}

impl From<VectorizeError> for AppError {
    fn from(err: VectorizeError) -> Self {
        match err {
            VectorizeError::NotFound(id) => AppError::NotFound(id),
            err @ VectorizeError::TooManyIds { .. } => AppError::BadRequest(err.to_string()),
            VectorizeError::Embedding(err) => err.into(),
            VectorizeError::Catalog(err) => err.into(),
        }
    }
}
