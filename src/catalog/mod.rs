//! Product catalog: the external store boundary.
//!
//! The search engine and the vectorization pipeline only ever talk to a
//! [`CatalogStore`]. The crate ships one backend:
//!
//! - [`BackendCsv`]: products in a CSV file, embeddings in a binary
//!   sidecar file, interactions in an append-only JSON-lines log

mod csv_file;
#[cfg(test)]
mod memory;
mod storage;

pub use csv_file::BackendCsv;
#[cfg(test)]
pub use memory::BackendMemory;
pub use storage::{EmbeddingStorage, EmbeddingStorageError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::eid::Eid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    #[default]
    Active,
    Inactive,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for ProductStatus {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "active" => Ok(ProductStatus::Active),
            "inactive" => Ok(ProductStatus::Inactive),
            other => Err(CatalogError::Malformed(format!("unknown status '{other}'"))),
        }
    }
}

/// An embedding as persisted alongside a product.
///
/// `content_hash` identifies the combined text the vector was generated
/// from, so a changed product (or a changed text format) can be detected.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEmbedding {
    pub vector: Vec<f32>,
    pub content_hash: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Product {
    pub id: u64,

    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub brand: String,

    #[serde(default)]
    pub status: ProductStatus,

    #[serde(skip)]
    pub embedding: Option<StoredEmbedding>,
}

impl Product {
    /// The stored vector, if it has exactly `dimensions` components.
    ///
    /// A vector of any other length is treated as absent.
    pub fn vector_of(&self, dimensions: usize) -> Option<&[f32]> {
        self.embedding
            .as_ref()
            .map(|e| e.vector.as_slice())
            .filter(|v| v.len() == dimensions && dimensions > 0)
    }

    pub fn has_embedding_of(&self, dimensions: usize) -> bool {
        self.vector_of(dimensions).is_some()
    }
}

impl PartialEq for Product {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// An append-only record of a search, kept for later personalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: Eid,
    pub session_id: String,
    pub query: String,
    pub product_ids: Vec<u64>,
    pub method: String,
    pub created_at: DateTime<Utc>,
}

/// Hard filters applied when reading products.
#[derive(Debug, Clone, Default)]
pub struct CatalogFilter {
    pub ids: Option<Vec<u64>>,
    pub status: Option<ProductStatus>,
    /// Case-insensitive equality
    pub category: Option<String>,
    /// Case-insensitive equality
    pub brand: Option<String>,
    /// Only products without any stored embedding
    pub missing_embedding: bool,
}

impl CatalogFilter {
    pub fn active() -> Self {
        Self {
            status: Some(ProductStatus::Active),
            ..Default::default()
        }
    }

    pub fn matches(&self, product: &Product) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&product.id) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if product.status != status {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if !product.category.eq_ignore_ascii_case(category) {
                return false;
            }
        }
        if let Some(brand) = &self.brand {
            if !product.brand.eq_ignore_ascii_case(brand) {
                return false;
            }
        }
        if self.missing_embedding && product.embedding.is_some() {
            return false;
        }
        true
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("product {0} not found")]
    NotFound(u64),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    #[error("malformed catalog data: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("embedding storage error: {0}")]
    Storage(#[from] EmbeddingStorageError),
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Products matching every condition of `filter`, in id order.
    async fn list(&self, filter: &CatalogFilter) -> Result<Vec<Product>, CatalogError>;

    async fn get(&self, id: u64) -> Result<Option<Product>, CatalogError>;

    /// Insert or replace a product by id. An incoming product without an
    /// embedding keeps the one already stored.
    async fn upsert(&self, product: Product) -> Result<Product, CatalogError>;

    /// Upsert many products, returns how many were written.
    async fn upsert_many(&self, products: Vec<Product>) -> Result<usize, CatalogError> {
        let count = products.len();
        for product in products {
            self.upsert(product).await?;
        }
        Ok(count)
    }

    /// Replace a product's embedding as a whole.
    async fn set_embedding(&self, id: u64, embedding: StoredEmbedding) -> Result<(), CatalogError>;

    async fn append_interaction(&self, entry: Interaction) -> Result<(), CatalogError>;

    /// Most recent interactions of a session, newest first.
    async fn interactions(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Interaction>, CatalogError>;
}

pub(crate) fn poisoned<T>(_: T) -> CatalogError {
    CatalogError::Unavailable("catalog lock poisoned".to_string())
}
