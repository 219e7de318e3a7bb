//! Core catalog model and product identity derivation for pricebook.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("unknown currency token: {0:?}")]
    UnknownCurrency(String),
}

/// Currencies a retailer export may quote prices in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "EUR")]
    Eur,
    #[serde(rename = "RON")]
    Ron,
}

impl Currency {
    pub fn as_str(self) -> &'static str {
        match self {
            Currency::Eur => "EUR",
            Currency::Ron => "RON",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact, case-sensitive match: `"eur"` and `" EUR"` are rejected.
impl FromStr for Currency {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EUR" => Ok(Currency::Eur),
            "RON" => Ok(Currency::Ron),
            other => Err(CoreError::UnknownCurrency(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub id: Uuid,
    pub name: String,
}

impl Store {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// Descriptive product fields as read from a catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductFields {
    pub name: String,
    pub category: String,
    pub brand: String,
    pub package_quantity: f64,
    pub package_unit: String,
}

impl ProductFields {
    pub fn unique_key(&self) -> String {
        derive_unique_key(
            &self.name,
            &self.brand,
            self.package_quantity,
            &self.package_unit,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub brand: String,
    pub package_quantity: f64,
    pub package_unit: String,
    pub unique_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn from_fields(fields: ProductFields, unique_key: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: fields.name,
            category: fields.category,
            brand: fields.brand,
            package_quantity: fields.package_quantity,
            package_unit: fields.package_unit,
            unique_key,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Natural key of a price observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceEntryKey {
    pub product_id: Uuid,
    pub store_id: Uuid,
    pub date: NaiveDate,
    pub store_product_sku: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub id: Uuid,
    pub product_id: Uuid,
    pub store_id: Uuid,
    pub store_product_sku: String,
    pub price: f64,
    pub currency: Currency,
    pub date: NaiveDate,
    pub imported_at: DateTime<Utc>,
}

impl PriceEntry {
    pub fn key(&self) -> PriceEntryKey {
        PriceEntryKey {
            product_id: self.product_id,
            store_id: self.store_id,
            date: self.date,
            store_product_sku: self.store_product_sku.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub id: Uuid,
    pub product_id: Uuid,
    pub store_id: Uuid,
    pub store_product_sku: String,
    /// Expected in 0..=100 but taken as-is from the export.
    pub percentage: i32,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub discount_added_at: DateTime<Utc>,
}

/// Stable product identity key built from name, brand and package size.
///
/// Fields are joined with `_`, lower-cased, whitespace runs become a single
/// `_`, and anything outside `[a-z0-9_.-]` is dropped.
pub fn derive_unique_key(
    name: &str,
    brand: &str,
    package_quantity: f64,
    package_unit: &str,
) -> String {
    let joined = format!(
        "{name}_{brand}_{}_{package_unit}",
        format_quantity(package_quantity)
    )
    .to_lowercase();

    let mut key = String::with_capacity(joined.len());
    let mut in_whitespace = false;
    for c in joined.chars() {
        if matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0B' | '\x0C') {
            if !in_whitespace {
                key.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-') {
            key.push(c);
        }
    }
    key
}

/// Render a quantity the way keys already in existing stores were rendered.
///
/// Magnitudes in `[1e-3, 1e7)` print as plain decimals with at least one
/// fractional digit (`1.0`, `0.25`). Anything else prints as a mantissa with
/// at least one fractional digit and an `E` exponent (`1.0E7`, `5.0E-4`).
/// Digits are the shortest that round-trip.
fn format_quantity(quantity: f64) -> String {
    if quantity.is_nan() {
        return "NaN".to_string();
    }
    if quantity.is_infinite() {
        return if quantity > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if quantity == 0.0 {
        return if quantity.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    let magnitude = quantity.abs();
    if (1e-3..1e7).contains(&magnitude) {
        return with_fraction(quantity.to_string());
    }

    let scientific = format!("{quantity:e}");
    match scientific.split_once('e') {
        Some((mantissa, exponent)) => format!("{}E{exponent}", with_fraction(mantissa.to_string())),
        None => scientific,
    }
}

fn with_fraction(mut digits: String) -> String {
    if !digits.contains('.') {
        digits.push_str(".0");
    }
    digits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_case_and_whitespace_insensitive() {
        let a = derive_unique_key("Lapte  Zuzu", "Zuzu", 1.0, "l");
        let b = derive_unique_key("lapte zuzu", "ZUZU", 1.0, "L");
        let c = derive_unique_key("LAPTE\tZuzu", "zuzu", 1.0, "l");
        assert_eq!(a, "lapte_zuzu_zuzu_1.0_l");
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn key_strips_characters_outside_allowed_set() {
        let key = derive_unique_key("Iaurt grecesc 10%", "Olympus!", 0.4, "kg");
        assert_eq!(key, "iaurt_grecesc_10_olympus_0.4_kg");

        let key = derive_unique_key("Pâine albă", "Vel Pitar", 500.0, "g");
        assert_eq!(key, "pine_alb_vel_pitar_500.0_g");
    }

    #[test]
    fn key_renders_fractional_quantities_shortest() {
        assert_eq!(derive_unique_key("x", "y", 1.25, "kg"), "x_y_1.25_kg");
        assert_eq!(derive_unique_key("x", "y", 6.0, "buc"), "x_y_6.0_buc");
    }

    #[test]
    fn key_switches_to_exponent_form_outside_plain_range() {
        assert_eq!(derive_unique_key("x", "y", 1e7, "g"), "x_y_1.0e7_g");
        assert_eq!(derive_unique_key("x", "y", 9_999_999.0, "g"), "x_y_9999999.0_g");
        assert_eq!(derive_unique_key("x", "y", 1.25e8, "g"), "x_y_1.25e8_g");
        assert_eq!(derive_unique_key("x", "y", 0.001, "kg"), "x_y_0.001_kg");
        assert_eq!(derive_unique_key("x", "y", 0.0005, "kg"), "x_y_5.0e-4_kg");
    }

    #[test]
    fn quantity_rendering_keeps_exponent_marker_uppercase() {
        assert_eq!(format_quantity(1e7), "1.0E7");
        assert_eq!(format_quantity(0.0005), "5.0E-4");
        assert_eq!(format_quantity(1234567.5), "1234567.5");
        assert_eq!(format_quantity(0.0), "0.0");
    }

    #[test]
    fn product_fields_key_matches_free_function() {
        let fields = ProductFields {
            name: "Ouă mărimea M".into(),
            category: "ouă".into(),
            brand: "Ferma Veche".into(),
            package_quantity: 10.0,
            package_unit: "buc".into(),
        };
        assert_eq!(
            fields.unique_key(),
            derive_unique_key("Ouă mărimea M", "Ferma Veche", 10.0, "buc")
        );
    }

    #[test]
    fn currency_parses_exact_tokens_only() {
        assert_eq!("EUR".parse::<Currency>(), Ok(Currency::Eur));
        assert_eq!("RON".parse::<Currency>(), Ok(Currency::Ron));
        assert_eq!(
            "ron".parse::<Currency>(),
            Err(CoreError::UnknownCurrency("ron".into()))
        );
        assert!("USD".parse::<Currency>().is_err());
    }

    #[test]
    fn currency_serializes_as_code() {
        let json = serde_json::to_string(&Currency::Ron).expect("serialize");
        assert_eq!(json, "\"RON\"");
    }
}
