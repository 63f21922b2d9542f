//! Merging vector and keyword results.
//!
//! Vector hits keep priority and their own scores. Keyword hits are appended
//! only for products not already present, then the list is cut to the limit.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Display;

use crate::catalog::Product;

/// How a result was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Vector,
    Keyword,
}

/// Which path produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMethod {
    /// Vector scoring contributed at least one result
    #[serde(rename = "hybrid")]
    Hybrid,
    /// Only keyword matching contributed, vector scoring ran or was not configured
    #[serde(rename = "keyword")]
    Keyword,
    /// Vector scoring was attempted and failed
    #[serde(rename = "keyword-fallback")]
    KeywordFallback,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Hybrid => "hybrid",
            SearchMethod::Keyword => "keyword",
            SearchMethod::KeywordFallback => "keyword-fallback",
        }
    }
}

impl Display for SearchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub product: Product,
    pub score: f32,
    pub source: Provenance,
}

pub fn merge_results(vector: Vec<SearchHit>, keyword: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    let mut seen: HashSet<u64> = HashSet::with_capacity(vector.len() + keyword.len());
    let mut merged = Vec::with_capacity(limit.min(vector.len() + keyword.len()));

    for hit in vector.into_iter().chain(keyword) {
        if merged.len() >= limit {
            break;
        }
        if seen.insert(hit.product.id) {
            merged.push(hit);
        }
    }

    merged
}
