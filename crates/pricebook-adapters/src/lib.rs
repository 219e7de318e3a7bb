//! Retailer export adapters: filename classification and CSV row decoding.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter, Trim};
use pricebook_core::{CoreError, Currency, ProductFields};
use regex::Regex;
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
const DISCOUNT_TOKEN: &str = "_discounts_";

static PRICE_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9]+)_([0-9]{4}-[0-9]{2}-[0-9]{2})\.csv$").expect("valid regex")
});

/// What a source file is, judged from its base name alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    Price { store_name: String, date: NaiveDate },
    Discount { store_name: String },
    Unrecognized { reason: String },
}

impl FileKind {
    pub fn store_name(&self) -> Option<&str> {
        match self {
            FileKind::Price { store_name, .. } | FileKind::Discount { store_name } => {
                Some(store_name)
            }
            FileKind::Unrecognized { .. } => None,
        }
    }
}

/// Classify a base name (no directory part).
///
/// `<store>_discounts_<anything>` wins over the price pattern, so
/// `lidl_discounts_2025-05-01.csv` is a discount file. A price-shaped name
/// whose date is not a real calendar day is unrecognized.
pub fn classify_filename(base_name: &str) -> FileKind {
    if let Some(idx) = base_name.find(DISCOUNT_TOKEN) {
        return FileKind::Discount {
            store_name: base_name[..idx].to_string(),
        };
    }

    let Some(caps) = PRICE_FILE_RE.captures(base_name) else {
        return FileKind::Unrecognized {
            reason: "name matches neither <store>_<yyyy-mm-dd>.csv nor <store>_discounts_*"
                .to_string(),
        };
    };

    match NaiveDate::parse_from_str(&caps[2], DATE_FORMAT) {
        Ok(date) => FileKind::Price {
            store_name: caps[1].to_string(),
            date,
        },
        Err(err) => FileKind::Unrecognized {
            reason: format!("cannot extract date from price file name: {err}"),
        },
    }
}

#[derive(Debug, Error)]
pub enum RowError {
    #[error("missing column {0:?}")]
    MissingColumn(&'static str),
    #[error("column {column}: {value:?} is not a number")]
    InvalidNumber { column: &'static str, value: String },
    #[error("column {column}: {value} is not positive")]
    NonPositive { column: &'static str, value: f64 },
    #[error("column {column}: {value:?} is not a yyyy-mm-dd date")]
    InvalidDate { column: &'static str, value: String },
    #[error(transparent)]
    InvalidCurrency(#[from] CoreError),
}

/// Header-driven reader over one comma-separated export, fields trimmed.
///
/// Yields `Err` only for failures that make the rest of the file unreadable
/// (I/O, broken encoding); field-level problems surface later as [`RowError`].
pub struct CatalogReader<R: Read> {
    columns: Arc<HashMap<String, usize>>,
    records: StringRecordsIntoIter<R>,
}

impl CatalogReader<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("reading header of {}", path.display()))
    }
}

impl<R: Read> CatalogReader<R> {
    pub fn from_reader(reader: R) -> Result<Self, csv::Error> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(b',')
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader);
        let columns = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.to_string(), idx))
            .collect::<HashMap<_, _>>();
        Ok(Self {
            columns: Arc::new(columns),
            records: reader.into_records(),
        })
    }
}

impl<R: Read> Iterator for CatalogReader<R> {
    type Item = Result<CatalogRow, csv::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(record.map(|record| CatalogRow {
            columns: Arc::clone(&self.columns),
            record,
        }))
    }
}

/// One data row plus the header index it was read under.
#[derive(Debug, Clone)]
pub struct CatalogRow {
    columns: Arc<HashMap<String, usize>>,
    record: StringRecord,
}

impl CatalogRow {
    pub fn line(&self) -> Option<u64> {
        self.record.position().map(|p| p.line())
    }

    pub fn get(&self, column: &'static str) -> Result<&str, RowError> {
        self.columns
            .get(column)
            .and_then(|idx| self.record.get(*idx))
            .ok_or(RowError::MissingColumn(column))
    }
}

impl fmt::Display for CatalogRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.record.iter().collect::<Vec<_>>();
        write!(f, "[{}]", fields.join(", "))
    }
}

/// Columns shared by price and discount exports.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductColumns {
    /// Retailer-local identifier from the `product_id` column.
    pub store_product_sku: String,
    pub fields: ProductFields,
}

impl ProductColumns {
    pub fn from_row(row: &CatalogRow) -> Result<Self, RowError> {
        Ok(Self {
            store_product_sku: row.get("product_id")?.to_string(),
            fields: ProductFields {
                name: row.get("product_name")?.to_string(),
                category: row.get("product_category")?.to_string(),
                brand: row.get("brand")?.to_string(),
                package_quantity: parse_positive(row.get("package_quantity")?, "package_quantity")?,
                package_unit: row.get("package_unit")?.to_string(),
            },
        })
    }
}

/// A row of `<store>_<yyyy-mm-dd>.csv`.
///
/// Every expected column must be present when the row is decoded. The
/// `price` and `currency` values stay raw until [`PriceRow::price`] /
/// [`PriceRow::currency`] are called, so a row whose observation already
/// exists is never rejected for a malformed value in them.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRow {
    pub product: ProductColumns,
    raw_price: String,
    raw_currency: String,
}

impl PriceRow {
    pub fn from_row(row: &CatalogRow) -> Result<Self, RowError> {
        Ok(Self {
            product: ProductColumns::from_row(row)?,
            raw_price: row.get("price")?.to_string(),
            raw_currency: row.get("currency")?.to_string(),
        })
    }

    pub fn price(&self) -> Result<f64, RowError> {
        parse_positive(&self.raw_price, "price")
    }

    pub fn currency(&self) -> Result<Currency, RowError> {
        Ok(self.raw_currency.parse()?)
    }
}

/// A row of `<store>_discounts_*.csv`.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscountRow {
    pub product: ProductColumns,
    raw_percentage: String,
    raw_from_date: String,
    raw_to_date: String,
}

impl DiscountRow {
    pub fn from_row(row: &CatalogRow) -> Result<Self, RowError> {
        Ok(Self {
            product: ProductColumns::from_row(row)?,
            raw_percentage: row.get("percentage_of_discount")?.to_string(),
            raw_from_date: row.get("from_date")?.to_string(),
            raw_to_date: row.get("to_date")?.to_string(),
        })
    }

    pub fn percentage(&self) -> Result<i32, RowError> {
        self.raw_percentage
            .parse()
            .map_err(|_| RowError::InvalidNumber {
                column: "percentage_of_discount",
                value: self.raw_percentage.clone(),
            })
    }

    pub fn from_date(&self) -> Result<NaiveDate, RowError> {
        parse_date(&self.raw_from_date, "from_date")
    }

    pub fn to_date(&self) -> Result<NaiveDate, RowError> {
        parse_date(&self.raw_to_date, "to_date")
    }
}

fn parse_positive(value: &str, column: &'static str) -> Result<f64, RowError> {
    let parsed: f64 = value.parse().map_err(|_| RowError::InvalidNumber {
        column,
        value: value.to_string(),
    })?;
    if !parsed.is_finite() || parsed <= 0.0 {
        return Err(RowError::NonPositive {
            column,
            value: parsed,
        });
    }
    Ok(parsed)
}

fn parse_date(value: &str, column: &'static str) -> Result<NaiveDate, RowError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| RowError::InvalidDate {
        column,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PRICE_HEADER: &str =
        "product_id,product_name,product_category,brand,package_quantity,package_unit,price,currency";
    const DISCOUNT_HEADER: &str = "product_id,product_name,product_category,brand,package_quantity,package_unit,percentage_of_discount,from_date,to_date";

    fn rows(text: &str) -> Vec<CatalogRow> {
        CatalogReader::from_reader(text.as_bytes())
            .expect("header")
            .collect::<Result<Vec<_>, _>>()
            .expect("rows")
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn discount_file_names_yield_store_prefix() {
        assert_eq!(
            classify_filename("lidl_discounts_2025-05-01.csv"),
            FileKind::Discount {
                store_name: "lidl".into()
            }
        );
        assert_eq!(
            classify_filename("profi_discounts_week19.csv"),
            FileKind::Discount {
                store_name: "profi".into()
            }
        );
    }

    #[test]
    fn price_file_names_yield_store_and_date() {
        assert_eq!(
            classify_filename("lidl_2025-05-01.csv"),
            FileKind::Price {
                store_name: "lidl".into(),
                date: ymd(2025, 5, 1),
            }
        );
        assert_eq!(
            classify_filename("Kaufland2_2025-05-08.csv").store_name(),
            Some("Kaufland2")
        );
    }

    #[test]
    fn other_names_are_unrecognized() {
        for name in [
            "readme.txt",
            "notes.csv",
            "lidl_2025-05-01.txt",
            "mega-image_2025-05-01.csv",
            "lidl_2025-5-1.csv",
        ] {
            assert!(
                matches!(classify_filename(name), FileKind::Unrecognized { .. }),
                "{name} should be unrecognized"
            );
        }
    }

    #[test]
    fn impossible_dates_degrade_to_unrecognized() {
        let kind = classify_filename("lidl_2025-13-45.csv");
        let FileKind::Unrecognized { reason } = &kind else {
            panic!("expected unrecognized, got {kind:?}");
        };
        assert!(reason.contains("date"));
    }

    #[test]
    fn price_row_without_currency_column_is_rejected_on_decode() {
        let text = "product_id,product_name,product_category,brand,package_quantity,package_unit,price\nP001,lapte,lactate,Zuzu,1,l,9.90\n";
        let err = PriceRow::from_row(&rows(text)[0]).unwrap_err();
        assert!(matches!(err, RowError::MissingColumn("currency")));
    }

    #[test]
    fn short_price_row_is_rejected_on_decode() {
        let text = format!("{PRICE_HEADER}\nP001,lapte,lactate,Zuzu,1,l\n");
        let err = PriceRow::from_row(&rows(&text)[0]).unwrap_err();
        assert!(matches!(err, RowError::MissingColumn("price")));
    }

    #[test]
    fn price_rows_are_trimmed_and_parsed_lazily() {
        let text = format!(
            "{PRICE_HEADER}\nP001 , lapte zuzu , lactate , Zuzu , 1 , l , 9.90 , RON\nP002,iaurt,lactate,Danone,0.4,kg,abc,USD\n"
        );
        let rows = rows(&text);
        assert_eq!(rows.len(), 2);

        let first = PriceRow::from_row(&rows[0]).expect("first row");
        assert_eq!(first.product.store_product_sku, "P001");
        assert_eq!(first.product.fields.name, "lapte zuzu");
        assert_eq!(first.product.fields.package_quantity, 1.0);
        assert_eq!(first.price().unwrap(), 9.90);
        assert_eq!(first.currency().unwrap(), Currency::Ron);

        let second = PriceRow::from_row(&rows[1]).expect("columns present");
        assert!(matches!(
            second.price(),
            Err(RowError::InvalidNumber { column: "price", .. })
        ));
        assert!(matches!(
            second.currency(),
            Err(RowError::InvalidCurrency(_))
        ));
    }

    #[test]
    fn non_positive_price_is_rejected() {
        let text = format!("{PRICE_HEADER}\nP001,x,y,z,1,l,-2.5,EUR\nP002,x,y,z,1,l,0,EUR\n");
        for row in rows(&text) {
            let price_row = PriceRow::from_row(&row).unwrap();
            assert!(matches!(
                price_row.price(),
                Err(RowError::NonPositive { .. })
            ));
        }
    }

    #[test]
    fn bad_quantity_fails_row_extraction() {
        let text = format!("{PRICE_HEADER}\nP001,x,y,z,one,l,2.5,EUR\n");
        let row = &rows(&text)[0];
        assert!(matches!(
            PriceRow::from_row(row),
            Err(RowError::InvalidNumber {
                column: "package_quantity",
                ..
            })
        ));
    }

    #[test]
    fn short_rows_report_missing_column() {
        let text = format!("{PRICE_HEADER}\nP001,x,y,z,1,l\n");
        let row = &rows(&text)[0];
        assert!(matches!(
            PriceRow::from_row(row),
            Err(RowError::MissingColumn("price"))
        ));
        assert_eq!(row.line(), Some(2));
    }

    #[test]
    fn discount_rows_parse_percentage_and_dates() {
        let text = format!(
            "{DISCOUNT_HEADER}\nP001,lapte zuzu,lactate,Zuzu,1,l,15,2025-05-01,2025-05-07\nP002,x,y,z,1,l,ten,2025-05-01,2025-02-30\n"
        );
        let rows = rows(&text);

        let ok = DiscountRow::from_row(&rows[0]).unwrap();
        assert_eq!(ok.percentage().unwrap(), 15);
        assert_eq!(ok.from_date().unwrap(), ymd(2025, 5, 1));
        assert_eq!(ok.to_date().unwrap(), ymd(2025, 5, 7));

        let bad = DiscountRow::from_row(&rows[1]).unwrap();
        assert!(bad.percentage().is_err());
        assert!(matches!(
            bad.to_date(),
            Err(RowError::InvalidDate { column: "to_date", .. })
        ));
    }

    #[test]
    fn row_display_lists_fields() {
        let text = format!("{PRICE_HEADER}\nP001,x,y,z,1,l,abc,EUR\n");
        let row = &rows(&text)[0];
        assert_eq!(row.to_string(), "[P001, x, y, z, 1, l, abc, EUR]");
    }

    #[test]
    fn open_reads_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("lidl_2025-05-01.csv");
        let mut file = File::create(&path).expect("create");
        writeln!(file, "{PRICE_HEADER}").unwrap();
        writeln!(file, "P001,x,y,z,1,l,2.5,EUR").unwrap();
        drop(file);

        let rows = CatalogReader::open(&path)
            .expect("open")
            .collect::<Result<Vec<_>, _>>()
            .expect("rows");
        assert_eq!(rows.len(), 1);

        assert!(CatalogReader::open(dir.path().join("missing.csv")).is_err());
    }
}
