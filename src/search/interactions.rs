use chrono::Utc;
use std::sync::Arc;

use super::SearchMethod;
use crate::catalog::{CatalogStore, Interaction};
use crate::eid::Eid;

/// Session recorded for searches that did not name one.
pub const ANONYMOUS_SESSION: &str = "anonymous";

/// Best-effort, non-blocking interaction log.
///
/// Every dispatch runs as its own task. Nothing is reported back to the
/// caller; a failed append is logged and dropped.
#[derive(Clone)]
pub struct InteractionLogger {
    catalog: Arc<dyn CatalogStore>,
    enabled: bool,
}

impl InteractionLogger {
    pub fn new(catalog: Arc<dyn CatalogStore>, enabled: bool) -> Self {
        Self { catalog, enabled }
    }

    pub fn dispatch(
        &self,
        session_id: Option<&str>,
        query: &str,
        product_ids: Vec<u64>,
        method: SearchMethod,
    ) {
        if !self.enabled {
            return;
        }

        let entry = Interaction {
            id: Eid::new(),
            session_id: session_id.unwrap_or(ANONYMOUS_SESSION).to_string(),
            query: query.to_string(),
            product_ids,
            method: method.to_string(),
            created_at: Utc::now(),
        };
        let catalog = self.catalog.clone();

        tokio::spawn(async move {
            let id = entry.id.clone();
            if let Err(err) = catalog.append_interaction(entry).await {
                log::warn!("failed to log interaction {id}: {err}");
            }
        });
    }
}
