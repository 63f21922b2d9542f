use async_trait::async_trait;
use std::sync::RwLock;

use super::{
    poisoned, CatalogError, CatalogFilter, CatalogStore, Interaction, Product, StoredEmbedding,
};

/// Catalog held entirely in process memory.
#[derive(Debug, Default)]
pub struct BackendMemory {
    products: RwLock<Vec<Product>>,
    interactions: RwLock<Vec<Interaction>>,
}

impl BackendMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: Vec<Product>) -> Self {
        let mut products = products;
        products.sort_by_key(|p| p.id);
        Self {
            products: RwLock::new(products),
            interactions: RwLock::new(vec![]),
        }
    }

    pub fn len(&self) -> usize {
        self.products.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CatalogStore for BackendMemory {
    async fn list(&self, filter: &CatalogFilter) -> Result<Vec<Product>, CatalogError> {
        let products = self.products.read().map_err(poisoned)?;
        Ok(products
            .iter()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect())
    }

    async fn get(&self, id: u64) -> Result<Option<Product>, CatalogError> {
        let products = self.products.read().map_err(poisoned)?;
        Ok(products.iter().find(|p| p.id == id).cloned())
    }

    async fn upsert(&self, product: Product) -> Result<Product, CatalogError> {
        let mut products = self.products.write().map_err(poisoned)?;
        let mut product = product;

        match products.iter().position(|p| p.id == product.id) {
            Some(idx) => {
                if product.embedding.is_none() {
                    product.embedding = products[idx].embedding.take();
                }
                products[idx] = product.clone();
            }
            None => {
                let idx = products.partition_point(|p| p.id < product.id);
                products.insert(idx, product.clone());
            }
        }

        Ok(product)
    }

    async fn set_embedding(&self, id: u64, embedding: StoredEmbedding) -> Result<(), CatalogError> {
        let mut products = self.products.write().map_err(poisoned)?;
        let product = products
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(CatalogError::NotFound(id))?;
        product.embedding = Some(embedding);
        Ok(())
    }

    async fn append_interaction(&self, entry: Interaction) -> Result<(), CatalogError> {
        self.interactions.write().map_err(poisoned)?.push(entry);
        Ok(())
    }

    async fn interactions(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Interaction>, CatalogError> {
        let interactions = self.interactions.read().map_err(poisoned)?;
        Ok(interactions
            .iter()
            .rev()
            .filter(|i| i.session_id == session_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eid::Eid;

    fn product(id: u64, name: &str) -> Product {
        Product {
            id,
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_embedding_and_order() {
        let store = BackendMemory::with_products(vec![product(3, "c"), product(1, "a")]);
        store
            .set_embedding(
                3,
                StoredEmbedding {
                    vector: vec![1.0, 0.0],
                    content_hash: 42,
                },
            )
            .await
            .unwrap();

        store.upsert(product(3, "c renamed")).await.unwrap();
        store.upsert(product(2, "b")).await.unwrap();

        let all = store.list(&CatalogFilter::default()).await.unwrap();
        let ids: Vec<u64> = all.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let renamed = store.get(3).await.unwrap().unwrap();
        assert_eq!(renamed.name, "c renamed");
        assert_eq!(renamed.embedding.unwrap().content_hash, 42);
    }

    #[tokio::test]
    async fn test_set_embedding_unknown_product() {
        let store = BackendMemory::new();
        let result = store
            .set_embedding(
                9,
                StoredEmbedding {
                    vector: vec![1.0],
                    content_hash: 0,
                },
            )
            .await;
        assert!(matches!(result, Err(CatalogError::NotFound(9))));
    }

    #[tokio::test]
    async fn test_interactions_newest_first_per_session() {
        let store = BackendMemory::new();
        for (session, query) in [("s1", "one"), ("s2", "other"), ("s1", "two"), ("s1", "three")] {
            store
                .append_interaction(Interaction {
                    id: Eid::new(),
                    session_id: session.to_string(),
                    query: query.to_string(),
                    product_ids: vec![],
                    method: "keyword".to_string(),
                    created_at: chrono::Utc::now(),
                })
                .await
                .unwrap();
        }

        let recent = store.interactions("s1", 2).await.unwrap();
        let queries: Vec<&str> = recent.iter().map(|i| i.query.as_str()).collect();
        assert_eq!(queries, vec!["three", "two"]);
    }
}
