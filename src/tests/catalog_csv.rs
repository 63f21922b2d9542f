use chrono::Utc;
use std::path::Path;
use tempfile::TempDir;

use super::common::product;
use crate::{
    app::AppFactory,
    catalog::{
        BackendCsv, CatalogError, CatalogFilter, CatalogStore, Interaction, ProductStatus,
        StoredEmbedding,
    },
    config::{Config, ProviderKind},
    eid::Eid,
    search::{SearchMethod, SearchRequest},
};

fn load(dir: &Path, model: &str, dimensions: usize) -> BackendCsv {
    BackendCsv::load(
        dir.join("products.csv"),
        dir.join("embeddings.bin"),
        dir.join("interactions.jsonl"),
        model,
        dimensions,
    )
    .unwrap()
}

fn interaction(session_id: &str, query: &str) -> Interaction {
    Interaction {
        id: Eid::new(),
        session_id: session_id.to_string(),
        query: query.to_string(),
        product_ids: vec![1],
        method: "keyword".to_string(),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_products_and_embeddings_survive_reload() {
    let dir = TempDir::new().unwrap();
    {
        let catalog = load(dir.path(), "model-a", 3);
        assert!(dir.path().join("products.csv").exists());

        catalog
            .upsert(product(2, "Desk Lamp", "Lumen", "Home", "Warm, white"))
            .await
            .unwrap();
        catalog
            .upsert(product(1, "USB Cable", "Linkit", "Accessories", ""))
            .await
            .unwrap();
        catalog
            .set_embedding(
                2,
                StoredEmbedding {
                    vector: vec![0.1, 0.2, 0.3],
                    content_hash: 77,
                },
            )
            .await
            .unwrap();
    }

    let catalog = load(dir.path(), "model-a", 3);
    let products = catalog.list(&CatalogFilter::default()).await.unwrap();

    assert_eq!(products.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(products[1].description, "Warm, white");
    assert_eq!(products[1].status, ProductStatus::Active);
    assert_eq!(
        products[1].embedding,
        Some(StoredEmbedding {
            vector: vec![0.1, 0.2, 0.3],
            content_hash: 77,
        })
    );
    assert!(products[0].embedding.is_none());
}

#[tokio::test]
async fn test_other_model_discards_embeddings() {
    let dir = TempDir::new().unwrap();
    {
        let catalog = load(dir.path(), "model-a", 3);
        catalog.upsert(product(1, "Desk Lamp", "", "", "")).await.unwrap();
        catalog
            .set_embedding(
                1,
                StoredEmbedding {
                    vector: vec![1.0, 0.0, 0.0],
                    content_hash: 1,
                },
            )
            .await
            .unwrap();
    }

    let other_model = load(dir.path(), "model-b", 3);
    let lamp = other_model.get(1).await.unwrap().unwrap();
    assert_eq!(lamp.name, "Desk Lamp");
    assert!(lamp.embedding.is_none());

    let other_dims = load(dir.path(), "model-a", 4);
    assert!(other_dims.get(1).await.unwrap().unwrap().embedding.is_none());
}

#[tokio::test]
async fn test_upsert_keeps_embedding() {
    let dir = TempDir::new().unwrap();
    let catalog = load(dir.path(), "model-a", 2);
    catalog.upsert(product(1, "Lamp", "", "", "")).await.unwrap();
    catalog
        .set_embedding(
            1,
            StoredEmbedding {
                vector: vec![0.6, 0.8],
                content_hash: 5,
            },
        )
        .await
        .unwrap();

    let count = catalog
        .upsert_many(vec![
            product(1, "Lamp XL", "", "", ""),
            product(3, "Shade", "", "", ""),
        ])
        .await
        .unwrap();
    assert_eq!(count, 2);

    let lamp = catalog.get(1).await.unwrap().unwrap();
    assert_eq!(lamp.name, "Lamp XL");
    assert_eq!(lamp.vector_of(2), Some([0.6, 0.8].as_slice()));

    assert!(matches!(
        catalog
            .set_embedding(
                9,
                StoredEmbedding {
                    vector: vec![0.0, 1.0],
                    content_hash: 0,
                },
            )
            .await,
        Err(CatalogError::NotFound(9))
    ));
}

#[tokio::test]
async fn test_interactions_newest_first() {
    let dir = TempDir::new().unwrap();
    {
        let catalog = load(dir.path(), "", 0);
        assert!(catalog.interactions("s1", 10).await.unwrap().is_empty());

        for query in ["first", "second", "third"] {
            catalog
                .append_interaction(interaction("s1", query))
                .await
                .unwrap();
        }
        catalog
            .append_interaction(interaction("s2", "elsewhere"))
            .await
            .unwrap();
    }

    let catalog = load(dir.path(), "", 0);
    let entries = catalog.interactions("s1", 2).await.unwrap();

    assert_eq!(
        entries.iter().map(|e| e.query.as_str()).collect::<Vec<_>>(),
        vec!["third", "second"]
    );
    assert_eq!(catalog.interactions("s2", 10).await.unwrap().len(), 1);
}

#[test]
fn test_read_products_rejects_unknown_status() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("import.csv");
    std::fs::write(
        &path,
        "id,name,description,category,brand,status\n1,Lamp,,Home,Lumen,discontinued\n",
    )
    .unwrap();

    assert!(matches!(
        BackendCsv::read_products(&path),
        Err(CatalogError::Malformed(_))
    ));
}

#[tokio::test]
async fn test_import_then_search() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::load_with(dir.path()).unwrap();
    config.embedding.provider = ProviderKind::None;

    let app = AppFactory::create(config).unwrap();

    let import = dir.path().join("import.csv");
    std::fs::write(
        &import,
        "id,name,description,category,brand,status\n\
         1,Premium Wireless Headphones,Noise cancelling,Audio,Sonic,active\n\
         2,Studio Headphones,Wired,Audio,Sonic,inactive\n\
         3,USB Cable,,Accessories,Linkit,\n",
    )
    .unwrap();

    assert_eq!(app.import_products(&import).await.unwrap(), 3);

    let response = app
        .search(&SearchRequest::new("headphones"))
        .await
        .unwrap();
    assert_eq!(response.method, SearchMethod::Keyword);
    assert_eq!(
        response
            .results
            .iter()
            .map(|hit| hit.product.id)
            .collect::<Vec<_>>(),
        vec![1]
    );

    let reloaded = BackendCsv::read_products(&dir.path().join("products.csv")).unwrap();
    assert_eq!(reloaded.len(), 3);

    let health = app.health().await.unwrap();
    assert_eq!(health.provider, "none");
    assert_eq!(health.products, 3);
    assert_eq!(health.embedded, 0);
}

#[tokio::test]
async fn test_failed_embedding_write_leaves_catalog_unchanged() {
    let dir = TempDir::new().unwrap();
    let catalog = BackendCsv::load(
        dir.path().join("products.csv"),
        dir.path().join("missing_dir").join("embeddings.bin"),
        dir.path().join("interactions.jsonl"),
        "model-a",
        2,
    )
    .unwrap();
    catalog.upsert(product(1, "Desk Lamp", "", "", "")).await.unwrap();

    let result = catalog
        .set_embedding(
            1,
            StoredEmbedding {
                vector: vec![1.0, 0.0],
                content_hash: 1,
            },
        )
        .await;

    assert!(result.is_err());
    assert!(catalog.get(1).await.unwrap().unwrap().embedding.is_none());
    assert!(catalog
        .list(&CatalogFilter {
            missing_embedding: true,
            ..Default::default()
        })
        .await
        .unwrap()
        .iter()
        .any(|p| p.id == 1));
}
