//! Get-or-insert resolution of stores and products.

use chrono::Utc;
use pricebook_core::{Product, ProductFields, Store};
use pricebook_storage::{CatalogStore, StorageError};
use tracing::{debug, info};

/// Find a store by exact name, creating it when absent. Existing stores are
/// returned untouched.
///
/// If another writer creates the same name between the lookup and the insert,
/// the insert's conflict is absorbed and the winner is returned.
pub async fn resolve_store(
    catalog: &dyn CatalogStore,
    name: &str,
) -> Result<Store, StorageError> {
    if let Some(existing) = catalog.find_store_by_name(name).await? {
        return Ok(existing);
    }

    match catalog.save_store(Store::new(name)).await {
        Ok(created) => {
            info!(store = %created.name, "new store created");
            Ok(created)
        }
        Err(err) if err.is_conflict() => {
            debug!(store = name, "store created concurrently, re-resolving");
            catalog.find_store_by_name(name).await?.ok_or(err)
        }
        Err(err) => Err(err),
    }
}

/// Find a product by its derived key, creating it from `fields` when absent,
/// and bump `updated_at` either way.
///
/// Descriptive fields are only ever taken from the row that first created the
/// product.
pub async fn resolve_product(
    catalog: &dyn CatalogStore,
    unique_key: &str,
    fields: &ProductFields,
) -> Result<Product, StorageError> {
    let mut product = match catalog.find_product_by_unique_key(unique_key).await? {
        Some(existing) => existing,
        None => create_product(catalog, unique_key, fields).await?,
    };

    product.updated_at = Utc::now();
    catalog.save_product(product).await
}

async fn create_product(
    catalog: &dyn CatalogStore,
    unique_key: &str,
    fields: &ProductFields,
) -> Result<Product, StorageError> {
    let candidate = Product::from_fields(fields.clone(), unique_key.to_string(), Utc::now());
    match catalog.save_product(candidate).await {
        Ok(created) => {
            debug!(product = %created.name, key = unique_key, "new product created");
            Ok(created)
        }
        Err(err) if err.is_conflict() => {
            debug!(key = unique_key, "product created concurrently, re-resolving");
            catalog.find_product_by_unique_key(unique_key).await?.ok_or(err)
        }
        Err(err) => Err(err),
    }
}
