//! Hybrid product search.
//!
//! Per request, stateless across requests:
//! 1. Validate and sanitize the query
//! 2. Embed the query (bounded by a timeout) while reading the candidate pool
//! 3. Score embedded candidates by cosine similarity, drop those below the threshold
//! 4. Keyword-match candidates, or all of them when vector scoring failed
//! 5. Merge with vector priority, truncate, tag the method
//! 6. Log the interaction without waiting for it

mod engine;
mod hybrid;
mod interactions;
mod lexical;
mod query;

pub use engine::{SearchEngine, SearchError, SearchResponse};
pub use hybrid::{merge_results, Provenance, SearchHit, SearchMethod};
pub use interactions::InteractionLogger;
pub use query::{SearchQuery, SearchRequest, ValidationError};
