//! Search request validation and query sanitization.
//!
//! Requests arrive as loosely typed [`SearchRequest`]s and leave as a
//! [`SearchQuery`] the engine can trust. Sanitizing the text:
//! 1. Drop `<script>` blocks and any other HTML tags
//! 2. Drop SQL-like statement fragments and comment/terminator tokens
//! 3. Collapse whitespace runs, trim
//! 4. Truncate to the configured maximum length

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;

static SCRIPT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?(</script\s*>|$)").expect("Failed to compile script regex")
});

static HTML_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)</?[a-zA-Z!][^<>]*>").expect("Failed to compile tag regex"));

static SQL_FRAGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(union\s+(all\s+)?select|select\s+(\*|\w+(\s*,\s*\w+)*)\s+from|insert\s+into|delete\s+from|drop\s+(table|database)|alter\s+table|truncate\s+table|exec(ute)?\s*\(|or\s+1\s*=\s*1)\b|--|/\*|\*/|;",
    )
    .expect("Failed to compile sql regex")
});

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Failed to compile whitespace regex"));

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error("limit must be between 1 and {max}, got {got}")]
    LimitOutOfRange { got: i64, max: usize },

    #[error("min_similarity must be between 0.0 and 1.0, got {0}")]
    MinSimilarityOutOfRange(f32),
}

/// Search parameters as received from a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub min_similarity: Option<f32>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    /// Groups interaction log entries
    #[serde(default)]
    pub session_id: Option<String>,
}

impl SearchRequest {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            ..Default::default()
        }
    }
}

/// Validated, sanitized search parameters with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub limit: usize,
    pub min_similarity: f32,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub session_id: Option<String>,
}

impl SearchQuery {
    pub fn parse(request: &SearchRequest, config: &SearchConfig) -> Result<Self, ValidationError> {
        let text = sanitize(&request.query, config.max_query_length);
        if text.is_empty() {
            return Err(ValidationError::EmptyQuery);
        }

        let limit = match request.limit {
            None => config.default_limit,
            Some(limit) if limit >= 1 && limit as u64 <= config.max_limit as u64 => limit as usize,
            Some(limit) => {
                return Err(ValidationError::LimitOutOfRange {
                    got: limit,
                    max: config.max_limit,
                })
            }
        };

        let min_similarity = match request.min_similarity {
            None => config.default_min_similarity,
            Some(value) if (0.0..=1.0).contains(&value) => value,
            Some(value) => return Err(ValidationError::MinSimilarityOutOfRange(value)),
        };

        Ok(Self {
            text,
            limit,
            min_similarity,
            category: filter_value(request.category.as_deref()),
            brand: filter_value(request.brand.as_deref()),
            session_id: filter_value(request.session_id.as_deref()),
        })
    }
}

fn filter_value(value: Option<&str>) -> Option<String> {
    value
        .map(|v| sanitize(v, 200))
        .filter(|v| !v.is_empty())
}

/// Strip markup and SQL-like tokens, collapse whitespace and bound the length.
pub fn sanitize(raw: &str, max_len: usize) -> String {
    let text = SCRIPT_BLOCK.replace_all(raw, " ");
    let text = HTML_TAG.replace_all(&text, " ");
    let text = SQL_FRAGMENT.replace_all(&text, " ");
    let text = WHITESPACE.replace_all(&text, " ");
    let text = text.trim();

    if text.chars().count() <= max_len {
        return text.to_string();
    }
    text.chars().take(max_len).collect::<String>().trim_end().to_string()
}
