use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    io::{BufRead, BufReader, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Mutex, RwLock},
    time::Instant,
};

use super::{
    poisoned, storage::model_id_hash, CatalogError, CatalogFilter, CatalogStore, EmbeddingStorage,
    Interaction, Product, ProductStatus, StoredEmbedding,
};

const CSV_HEADERS: [&str; 6] = ["id", "name", "description", "category", "brand", "status"];

#[derive(Debug, Serialize, Deserialize)]
struct ProductRecord {
    id: u64,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    brand: String,
    #[serde(default)]
    status: String,
}

impl TryFrom<ProductRecord> for Product {
    type Error = CatalogError;

    fn try_from(record: ProductRecord) -> Result<Self, Self::Error> {
        Ok(Product {
            id: record.id,
            name: record.name,
            description: record.description,
            category: record.category,
            brand: record.brand,
            status: record.status.parse::<ProductStatus>()?,
            embedding: None,
        })
    }
}

/// Catalog persisted as files in a directory.
///
/// - products: CSV, rewritten atomically on every change
/// - embeddings: binary sidecar, see [`EmbeddingStorage`]
/// - interactions: JSON lines, append only
pub struct BackendCsv {
    products: RwLock<Vec<Product>>,
    products_path: PathBuf,
    embeddings: EmbeddingStorage,
    interactions_path: PathBuf,
    model_id: [u8; 32],
    dimensions: usize,
    /// Serializes file rewrites between concurrent writers
    write_lock: Mutex<()>,
}

impl BackendCsv {
    pub fn load(
        products_path: PathBuf,
        embeddings_path: PathBuf,
        interactions_path: PathBuf,
        model_name: &str,
        dimensions: usize,
    ) -> Result<Self, CatalogError> {
        if let Err(err) = std::fs::metadata(&products_path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("Creating new catalog at {}", products_path.display());
                    let mut csv_wrt = ::csv::Writer::from_path(&products_path)?;
                    csv_wrt.write_record(CSV_HEADERS)?;
                    csv_wrt.flush()?;
                }
                _ => Err(err)?,
            }
        }

        let now = Instant::now();
        let mut products = Self::read_products(&products_path)?;
        products.sort_by_key(|p| p.id);

        log::debug!(
            "took {}ms to read {} products",
            now.elapsed().as_micros() as f64 / 1000.0,
            products.len()
        );

        let model_id = model_id_hash(model_name);
        let embeddings = EmbeddingStorage::new(embeddings_path);

        if dimensions > 0 && embeddings.exists() {
            match embeddings.load(&model_id, dimensions) {
                Ok(mut stored) => {
                    log::info!("Loaded {} embeddings from storage", stored.len());
                    for product in products.iter_mut() {
                        product.embedding = stored.remove(&product.id);
                    }
                }
                Err(err) if err.is_incompatible() => {
                    log::warn!("{err}; stored embeddings will be regenerated");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(BackendCsv {
            products: RwLock::new(products),
            products_path,
            embeddings,
            interactions_path,
            model_id,
            dimensions,
            write_lock: Mutex::new(()),
        })
    }

    /// Read products from a CSV file with an `id,name,description,category,brand,status` header.
    pub fn read_products(path: &Path) -> Result<Vec<Product>, CatalogError> {
        let mut csv_reader = ::csv::Reader::from_path(path)?;

        let mut products = vec![];
        for record in csv_reader.deserialize::<ProductRecord>() {
            products.push(Product::try_from(record?)?);
        }

        Ok(products)
    }

    /// Insert or replace `incoming`, rewrite the files, then publish the new state.
    ///
    /// Memory is only updated once the files are written, so a failed save
    /// leaves the catalog as it was.
    fn merge(&self, incoming: Vec<Product>) -> Result<Vec<Product>, CatalogError> {
        let with_embeddings = incoming.iter().any(|p| p.embedding.is_some());
        let _guard = self.write_lock.lock().map_err(poisoned)?;

        let mut snapshot = self.products.read().map_err(poisoned)?.clone();
        for mut product in incoming {
            match snapshot.binary_search_by_key(&product.id, |p| p.id) {
                Ok(idx) => {
                    if product.embedding.is_none() {
                        product.embedding = snapshot[idx].embedding.take();
                    }
                    snapshot[idx] = product;
                }
                Err(idx) => snapshot.insert(idx, product),
            }
        }

        self.save_products(&snapshot)?;
        if with_embeddings {
            self.save_embeddings(&snapshot)?;
        }

        *self.products.write().map_err(poisoned)? = snapshot.clone();
        Ok(snapshot)
    }

    /// Callers hold `write_lock`.
    fn save_products(&self, products: &[Product]) -> Result<(), CatalogError> {
        let temp_path = self.products_path.with_extension("csv-tmp");
        let mut csv_wrt = ::csv::Writer::from_path(&temp_path)?;
        csv_wrt.write_record(CSV_HEADERS)?;
        for product in products {
            csv_wrt.write_record([
                product.id.to_string().as_str(),
                product.name.as_str(),
                product.description.as_str(),
                product.category.as_str(),
                product.brand.as_str(),
                product.status.as_str(),
            ])?;
        }
        csv_wrt.flush()?;
        std::fs::rename(&temp_path, &self.products_path)?;

        Ok(())
    }

    /// Callers hold `write_lock`.
    fn save_embeddings(&self, products: &[Product]) -> Result<(), CatalogError> {
        if self.dimensions == 0 {
            return Ok(());
        }

        let entries: HashMap<u64, StoredEmbedding> = products
            .iter()
            .filter_map(|p| p.embedding.clone().map(|e| (p.id, e)))
            .collect();
        self.embeddings
            .save(&entries, &self.model_id, self.dimensions)?;

        Ok(())
    }
}

#[async_trait]
impl CatalogStore for BackendCsv {
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
        let id = product.id;
        let snapshot = self.merge(vec![product])?;

        snapshot
            .into_iter()
            .find(|p| p.id == id)
            .ok_or(CatalogError::NotFound(id))
    }

    async fn upsert_many(&self, products: Vec<Product>) -> Result<usize, CatalogError> {
        let count = products.len();
        self.merge(products)?;
        Ok(count)
    }

    async fn set_embedding(&self, id: u64, embedding: StoredEmbedding) -> Result<(), CatalogError> {
        let _guard = self.write_lock.lock().map_err(poisoned)?;

        let mut snapshot = self.products.read().map_err(poisoned)?.clone();
        let product = snapshot
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(CatalogError::NotFound(id))?;
        product.embedding = Some(embedding);

        self.save_embeddings(&snapshot)?;
        *self.products.write().map_err(poisoned)? = snapshot;

        Ok(())
    }

    async fn append_interaction(&self, entry: Interaction) -> Result<(), CatalogError> {
        let line = serde_json::to_string(&entry)?;

        let _guard = self.write_lock.lock().map_err(poisoned)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.interactions_path)?;
        writeln!(file, "{line}")?;

        Ok(())
    }

    async fn interactions(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Interaction>, CatalogError> {
        let file = match std::fs::File::open(&self.interactions_path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };

        let mut matching = vec![];
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Interaction>(&line) {
                Ok(entry) if entry.session_id == session_id => matching.push(entry),
                Ok(_) => {}
                Err(err) => log::warn!("skipping malformed interaction entry: {err}"),
            }
        }

        Ok(matching.into_iter().rev().take(limit).collect())
    }
}
