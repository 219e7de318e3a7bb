//! Postgres-backed [`CatalogStore`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use pricebook_core::{Discount, PriceEntry, PriceEntryKey, Product, Store};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::{CatalogStore, StorageError};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct StoreRow {
    id: Uuid,
    name: String,
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    category: String,
    brand: String,
    package_quantity: f64,
    package_unit: String,
    unique_key: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct PriceEntryRow {
    id: Uuid,
    product_id: Uuid,
    store_id: Uuid,
    store_product_sku: String,
    price: f64,
    currency: String,
    date: NaiveDate,
    imported_at: DateTime<Utc>,
}

impl From<StoreRow> for Store {
    fn from(row: StoreRow) -> Self {
        Store {
            id: row.id,
            name: row.name,
        }
    }
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            name: row.name,
            category: row.category,
            brand: row.brand,
            package_quantity: row.package_quantity,
            package_unit: row.package_unit,
            unique_key: row.unique_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl TryFrom<PriceEntryRow> for PriceEntry {
    type Error = StorageError;

    fn try_from(row: PriceEntryRow) -> Result<Self, Self::Error> {
        let currency = row.currency.parse().map_err(|err| StorageError::Corrupt {
            entity: "price entry",
            message: format!("{err}"),
        })?;
        Ok(PriceEntry {
            id: row.id,
            product_id: row.product_id,
            store_id: row.store_id,
            store_product_sku: row.store_product_sku,
            price: row.price,
            currency,
            date: row.date,
            imported_at: row.imported_at,
        })
    }
}

fn map_write_error(err: sqlx::Error, entity: &'static str, key: impl Into<String>) -> StorageError {
    match err {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => StorageError::Conflict {
            entity,
            key: key.into(),
        },
        other => StorageError::Sqlx(other),
    }
}

fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, config: PoolConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        MIGRATOR.run(&self.pool).await?;
        info!("catalog schema migrations applied");
        Ok(())
    }

    async fn count_table(&self, sql: &str) -> Result<u64, StorageError> {
        let n = sqlx::query_scalar::<_, i64>(sql)
            .fetch_one(&self.pool)
            .await?;
        Ok(to_count(n))
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn count_stores(&self) -> Result<u64, StorageError> {
        self.count_table("SELECT COUNT(*) FROM stores").await
    }

    async fn count_products(&self) -> Result<u64, StorageError> {
        self.count_table("SELECT COUNT(*) FROM products").await
    }

    async fn count_price_entries(&self) -> Result<u64, StorageError> {
        self.count_table("SELECT COUNT(*) FROM price_entries").await
    }

    async fn count_discounts(&self) -> Result<u64, StorageError> {
        self.count_table("SELECT COUNT(*) FROM discounts").await
    }

    async fn find_store_by_name(&self, name: &str) -> Result<Option<Store>, StorageError> {
        let row = sqlx::query_as::<_, StoreRow>("SELECT id, name FROM stores WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Store::from))
    }

    async fn save_store(&self, store: Store) -> Result<Store, StorageError> {
        let row = sqlx::query_as::<_, StoreRow>(
            "INSERT INTO stores (id, name) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name \
             RETURNING id, name",
        )
        .bind(store.id)
        .bind(&store.name)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_write_error(err, "store", store.name.as_str()))?;
        Ok(row.into())
    }

    async fn find_product_by_unique_key(
        &self,
        key: &str,
    ) -> Result<Option<Product>, StorageError> {
        let row = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, category, brand, package_quantity, package_unit, unique_key, \
                    created_at, updated_at \
             FROM products WHERE unique_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Product::from))
    }

    async fn save_product(&self, product: Product) -> Result<Product, StorageError> {
        let row = sqlx::query_as::<_, ProductRow>(
            "INSERT INTO products \
                 (id, name, category, brand, package_quantity, package_unit, unique_key, \
                  created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (id) DO UPDATE SET \
                 name             = EXCLUDED.name, \
                 category         = EXCLUDED.category, \
                 brand            = EXCLUDED.brand, \
                 package_quantity = EXCLUDED.package_quantity, \
                 package_unit     = EXCLUDED.package_unit, \
                 unique_key       = EXCLUDED.unique_key, \
                 updated_at       = EXCLUDED.updated_at \
             RETURNING id, name, category, brand, package_quantity, package_unit, unique_key, \
                       created_at, updated_at",
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(&product.category)
        .bind(&product.brand)
        .bind(product.package_quantity)
        .bind(&product.package_unit)
        .bind(&product.unique_key)
        .bind(product.created_at)
        .bind(product.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_write_error(err, "product", product.unique_key.as_str()))?;
        Ok(row.into())
    }

    async fn find_price_entry(
        &self,
        key: &PriceEntryKey,
    ) -> Result<Option<PriceEntry>, StorageError> {
        let row = sqlx::query_as::<_, PriceEntryRow>(
            "SELECT id, product_id, store_id, store_product_sku, price, currency, date, imported_at \
             FROM price_entries \
             WHERE product_id = $1 AND store_id = $2 AND date = $3 AND store_product_sku = $4",
        )
        .bind(key.product_id)
        .bind(key.store_id)
        .bind(key.date)
        .bind(&key.store_product_sku)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PriceEntry::try_from).transpose()
    }

    async fn save_price_entry(&self, entry: PriceEntry) -> Result<PriceEntry, StorageError> {
        let row = sqlx::query_as::<_, PriceEntryRow>(
            "INSERT INTO price_entries \
                 (id, product_id, store_id, store_product_sku, price, currency, date, imported_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
                 price       = EXCLUDED.price, \
                 currency    = EXCLUDED.currency, \
                 imported_at = EXCLUDED.imported_at \
             RETURNING id, product_id, store_id, store_product_sku, price, currency, date, \
                       imported_at",
        )
        .bind(entry.id)
        .bind(entry.product_id)
        .bind(entry.store_id)
        .bind(&entry.store_product_sku)
        .bind(entry.price)
        .bind(entry.currency.as_str())
        .bind(entry.date)
        .bind(entry.imported_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            map_write_error(
                err,
                "price entry",
                format!("{}@{}", entry.store_product_sku, entry.date),
            )
        })?;
        PriceEntry::try_from(row)
    }

    async fn save_discount(&self, discount: Discount) -> Result<Discount, StorageError> {
        sqlx::query(
            "INSERT INTO discounts \
                 (id, product_id, store_id, store_product_sku, percentage, from_date, to_date, \
                  discount_added_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
                 percentage        = EXCLUDED.percentage, \
                 from_date         = EXCLUDED.from_date, \
                 to_date           = EXCLUDED.to_date, \
                 discount_added_at = EXCLUDED.discount_added_at",
        )
        .bind(discount.id)
        .bind(discount.product_id)
        .bind(discount.store_id)
        .bind(&discount.store_product_sku)
        .bind(discount.percentage)
        .bind(discount.from_date)
        .bind(discount.to_date)
        .bind(discount.discount_added_at)
        .execute(&self.pool)
        .await?;
        Ok(discount)
    }
}
