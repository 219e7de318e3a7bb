//! Persistence contract for the catalog plus in-memory and Postgres backends.

use std::collections::HashMap;

use async_trait::async_trait;
use pricebook_core::{Discount, PriceEntry, PriceEntryKey, Product, Store};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

mod postgres;

pub use postgres::{PgCatalogStore, PoolConfig};

#[derive(Debug, Error)]
pub enum StorageError {
    /// A write would break uniqueness on `entity` for `key` held by another record.
    #[error("{entity} already exists for key {key}")]
    Conflict { entity: &'static str, key: String },
    #[error("stored {entity} record is unreadable: {message}")]
    Corrupt {
        entity: &'static str,
        message: String,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

/// Everything the ingestion pipeline needs from a backing store.
///
/// `save_*` upserts by `id`. Implementations must reject, with
/// [`StorageError::Conflict`], a write that would give two records the same
/// store name, product unique key, or price-entry natural key.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn count_stores(&self) -> Result<u64, StorageError>;
    async fn count_products(&self) -> Result<u64, StorageError>;
    async fn count_price_entries(&self) -> Result<u64, StorageError>;
    async fn count_discounts(&self) -> Result<u64, StorageError>;

    async fn find_store_by_name(&self, name: &str) -> Result<Option<Store>, StorageError>;
    async fn save_store(&self, store: Store) -> Result<Store, StorageError>;

    async fn find_product_by_unique_key(&self, key: &str)
        -> Result<Option<Product>, StorageError>;
    async fn save_product(&self, product: Product) -> Result<Product, StorageError>;

    async fn find_price_entry(
        &self,
        key: &PriceEntryKey,
    ) -> Result<Option<PriceEntry>, StorageError>;
    async fn save_price_entry(&self, entry: PriceEntry) -> Result<PriceEntry, StorageError>;

    async fn save_discount(&self, discount: Discount) -> Result<Discount, StorageError>;
}

#[derive(Debug, Default)]
struct Tables {
    stores: HashMap<Uuid, Store>,
    store_names: HashMap<String, Uuid>,
    products: HashMap<Uuid, Product>,
    product_keys: HashMap<String, Uuid>,
    price_entries: HashMap<Uuid, PriceEntry>,
    price_keys: HashMap<PriceEntryKey, Uuid>,
    discounts: HashMap<Uuid, Discount>,
    discount_order: Vec<Uuid>,
}

/// Process-local store with the same uniqueness rules as the Postgres schema.
#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    tables: Mutex<Tables>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stores(&self) -> Vec<Store> {
        let tables = self.tables.lock().await;
        tables.stores.values().cloned().collect()
    }

    pub async fn products(&self) -> Vec<Product> {
        let tables = self.tables.lock().await;
        tables.products.values().cloned().collect()
    }

    pub async fn price_entries(&self) -> Vec<PriceEntry> {
        let tables = self.tables.lock().await;
        let mut entries = tables.price_entries.values().cloned().collect::<Vec<_>>();
        entries.sort_by_key(|e| e.imported_at);
        entries
    }

    /// Discounts in insertion order.
    pub async fn discounts(&self) -> Vec<Discount> {
        let tables = self.tables.lock().await;
        tables
            .discount_order
            .iter()
            .filter_map(|id| tables.discounts.get(id).cloned())
            .collect()
    }
}

fn count(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn count_stores(&self) -> Result<u64, StorageError> {
        Ok(count(self.tables.lock().await.stores.len()))
    }

    async fn count_products(&self) -> Result<u64, StorageError> {
        Ok(count(self.tables.lock().await.products.len()))
    }

    async fn count_price_entries(&self) -> Result<u64, StorageError> {
        Ok(count(self.tables.lock().await.price_entries.len()))
    }

    async fn count_discounts(&self) -> Result<u64, StorageError> {
        Ok(count(self.tables.lock().await.discounts.len()))
    }

    async fn find_store_by_name(&self, name: &str) -> Result<Option<Store>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .store_names
            .get(name)
            .and_then(|id| tables.stores.get(id))
            .cloned())
    }

    async fn save_store(&self, store: Store) -> Result<Store, StorageError> {
        let mut tables = self.tables.lock().await;
        if let Some(owner) = tables.store_names.get(&store.name) {
            if *owner != store.id {
                return Err(StorageError::Conflict {
                    entity: "store",
                    key: store.name,
                });
            }
        }
        if let Some(previous) = tables.stores.insert(store.id, store.clone()) {
            tables.store_names.remove(&previous.name);
        }
        tables.store_names.insert(store.name.clone(), store.id);
        Ok(store)
    }

    async fn find_product_by_unique_key(
        &self,
        key: &str,
    ) -> Result<Option<Product>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .product_keys
            .get(key)
            .and_then(|id| tables.products.get(id))
            .cloned())
    }

    async fn save_product(&self, product: Product) -> Result<Product, StorageError> {
        let mut tables = self.tables.lock().await;
        if let Some(owner) = tables.product_keys.get(&product.unique_key) {
            if *owner != product.id {
                return Err(StorageError::Conflict {
                    entity: "product",
                    key: product.unique_key,
                });
            }
        }
        if let Some(previous) = tables.products.insert(product.id, product.clone()) {
            tables.product_keys.remove(&previous.unique_key);
        }
        tables
            .product_keys
            .insert(product.unique_key.clone(), product.id);
        Ok(product)
    }

    async fn find_price_entry(
        &self,
        key: &PriceEntryKey,
    ) -> Result<Option<PriceEntry>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .price_keys
            .get(key)
            .and_then(|id| tables.price_entries.get(id))
            .cloned())
    }

    async fn save_price_entry(&self, entry: PriceEntry) -> Result<PriceEntry, StorageError> {
        let mut tables = self.tables.lock().await;
        let key = entry.key();
        if let Some(owner) = tables.price_keys.get(&key) {
            if *owner != entry.id {
                return Err(StorageError::Conflict {
                    entity: "price entry",
                    key: format!(
                        "{}/{}/{}/{}",
                        key.product_id, key.store_id, key.date, key.store_product_sku
                    ),
                });
            }
        }
        if let Some(previous) = tables.price_entries.insert(entry.id, entry.clone()) {
            tables.price_keys.remove(&previous.key());
        }
        tables.price_keys.insert(key, entry.id);
        Ok(entry)
    }

    async fn save_discount(&self, discount: Discount) -> Result<Discount, StorageError> {
        let mut tables = self.tables.lock().await;
        if tables.discounts.insert(discount.id, discount.clone()).is_none() {
            tables.discount_order.push(discount.id);
        }
        Ok(discount)
    }
}
