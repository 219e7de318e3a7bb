//! Per-row import of price and discount exports.

use chrono::{NaiveDate, Utc};
use pricebook_adapters::{CatalogRow, DiscountRow, PriceRow, RowError};
use pricebook_core::{Discount, PriceEntry, PriceEntryKey, Store};
use pricebook_storage::{CatalogStore, StorageError};
use thiserror::Error;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::resolve::resolve_product;

/// Immutable per-file state handed to every row of that file.
#[derive(Debug, Clone)]
pub struct FileContext {
    pub filename: String,
    pub store: Store,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Imported,
    /// The price observation was already stored.
    AlreadyPresent,
}

#[derive(Debug, Error)]
pub enum RowFailure {
    #[error(transparent)]
    Row(#[from] RowError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Import one row of a `<store>_<yyyy-mm-dd>.csv` export observed on `date`.
///
/// The product is resolved before the existence check, so even a row whose
/// observation is already stored refreshes the product's `updated_at`.
pub async fn import_price_row(
    catalog: &dyn CatalogStore,
    ctx: &FileContext,
    date: NaiveDate,
    row: &CatalogRow,
) -> Result<RowOutcome, RowFailure> {
    let price_row = PriceRow::from_row(row)?;
    let unique_key = price_row.product.fields.unique_key();
    let product = resolve_product(catalog, &unique_key, &price_row.product.fields).await?;

    let key = PriceEntryKey {
        product_id: product.id,
        store_id: ctx.store.id,
        date,
        store_product_sku: price_row.product.store_product_sku.clone(),
    };
    if catalog.find_price_entry(&key).await?.is_some() {
        trace!(
            product = %unique_key,
            store = %ctx.store.name,
            %date,
            "price entry already exists, skipping"
        );
        return Ok(RowOutcome::AlreadyPresent);
    }

    let entry = PriceEntry {
        id: Uuid::new_v4(),
        product_id: key.product_id,
        store_id: key.store_id,
        store_product_sku: key.store_product_sku,
        price: price_row.price()?,
        currency: price_row.currency()?,
        date,
        imported_at: Utc::now(),
    };
    match catalog.save_price_entry(entry).await {
        Ok(_) => Ok(RowOutcome::Imported),
        Err(err) if err.is_conflict() => {
            debug!(product = %unique_key, %date, "price entry stored concurrently");
            Ok(RowOutcome::AlreadyPresent)
        }
        Err(err) => Err(err.into()),
    }
}

/// Import one row of a `<store>_discounts_*.csv` export.
///
/// Every call appends a new discount; identical rows from a re-read file
/// are stored again.
pub async fn import_discount_row(
    catalog: &dyn CatalogStore,
    ctx: &FileContext,
    row: &CatalogRow,
) -> Result<RowOutcome, RowFailure> {
    let discount_row = DiscountRow::from_row(row)?;
    let unique_key = discount_row.product.fields.unique_key();
    let product = resolve_product(catalog, &unique_key, &discount_row.product.fields).await?;

    let discount = Discount {
        id: Uuid::new_v4(),
        product_id: product.id,
        store_id: ctx.store.id,
        store_product_sku: discount_row.product.store_product_sku.clone(),
        percentage: discount_row.percentage()?,
        from_date: discount_row.from_date()?,
        to_date: discount_row.to_date()?,
        discount_added_at: Utc::now(),
    };
    catalog.save_discount(discount).await?;
    Ok(RowOutcome::Imported)
}
