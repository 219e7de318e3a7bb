//! Whole-run orchestration: gate check, file enumeration, per-file import.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use pricebook_adapters::{classify_filename, CatalogReader, CatalogRow, FileKind};
use pricebook_storage::CatalogStore;
use tokio::fs;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::import::{import_discount_row, import_price_row, FileContext, RowFailure, RowOutcome};
use crate::resolve::resolve_store;
use crate::{FileOutcome, FileReport, GateOutcome, IngestReport};

#[derive(Debug, Clone, Copy)]
enum RowKind {
    Price(NaiveDate),
    Discount,
}

pub struct Ingestor {
    catalog: Arc<dyn CatalogStore>,
    source_dir: PathBuf,
}

impl Ingestor {
    pub fn new(catalog: Arc<dyn CatalogStore>, source_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            source_dir: source_dir.into(),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// The catalog counts as populated once it holds at least one store and
    /// one product.
    pub async fn check_gate(&self) -> Result<GateOutcome> {
        let stores = self
            .catalog
            .count_stores()
            .await
            .context("counting stores")?;
        let products = self
            .catalog
            .count_products()
            .await
            .context("counting products")?;
        Ok(if stores > 0 && products > 0 {
            GateOutcome::Populated { stores, products }
        } else {
            GateOutcome::Empty { stores, products }
        })
    }

    /// Run one ingestion pass over the source directory.
    ///
    /// Only a failing gate check is returned as an error. Unreadable source
    /// directories, files and rows are logged and recorded in the report.
    pub async fn run_once(&self) -> Result<IngestReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest_run", %run_id);
        self.run_with_id(run_id).instrument(span).await
    }

    async fn run_with_id(&self, run_id: Uuid) -> Result<IngestReport> {
        let started_at = Utc::now();
        let mut report = IngestReport {
            run_id,
            started_at,
            finished_at: started_at,
            source_dir: self.source_dir.display().to_string(),
            gate: GateOutcome::Empty {
                stores: 0,
                products: 0,
            },
            source_error: None,
            files: Vec::new(),
        };

        info!("checking if data initialization is necessary");
        report.gate = self.check_gate().await?;
        if report.gate.is_populated() {
            info!(gate = ?report.gate, "catalog already populated, skipping CSV ingestion");
            report.finished_at = Utc::now();
            return Ok(report);
        }

        info!(source_dir = %self.source_dir.display(), "ingesting CSV exports");
        match list_source_files(&self.source_dir).await {
            Ok(paths) => {
                for path in paths {
                    let file_report = self.ingest_file(&path).await;
                    report.files.push(file_report);
                }
            }
            Err(err) => {
                error!(
                    source_dir = %self.source_dir.display(),
                    error = %format!("{err:#}"),
                    "error listing CSV exports"
                );
                report.source_error = Some(format!("{err:#}"));
            }
        }

        report.finished_at = Utc::now();
        info!(
            files = report.files.len(),
            rows_imported = report.rows_imported(),
            rows_failed = report.rows_failed(),
            "data initialization finished"
        );
        Ok(report)
    }

    /// Classify and import one export, ignoring the gate.
    pub async fn ingest_file(&self, path: &Path) -> FileReport {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let span = info_span!("ingest_file", file = %filename);

        async {
            info!("processing file");
            let (store_name, kind) = match classify_filename(&filename) {
                FileKind::Price { store_name, date } => (store_name, RowKind::Price(date)),
                FileKind::Discount { store_name } => (store_name, RowKind::Discount),
                FileKind::Unrecognized { reason } => {
                    warn!(%reason, "unknown file name format, skipping");
                    return FileReport::new(filename, FileOutcome::SkippedUnknown { reason });
                }
            };
            self.process_file(path, filename, &store_name, kind).await
        }
        .instrument(span)
        .await
    }

    async fn process_file(
        &self,
        path: &Path,
        filename: String,
        store_name: &str,
        kind: RowKind,
    ) -> FileReport {
        let store = match resolve_store(self.catalog.as_ref(), store_name).await {
            Ok(store) => store,
            Err(err) => {
                error!(store = store_name, error = %err, "cannot resolve store for file");
                return FileReport::new(
                    filename,
                    FileOutcome::SkippedFileError {
                        message: format!("resolving store {store_name}: {err}"),
                    },
                );
            }
        };
        let ctx = FileContext { filename, store };
        let mut report = FileReport::new(ctx.filename.clone(), FileOutcome::Done);

        let reader = match CatalogReader::open(path) {
            Ok(reader) => reader,
            Err(err) => {
                error!(error = %format!("{err:#}"), "error opening CSV export");
                report.outcome = FileOutcome::SkippedFileError {
                    message: format!("{err:#}"),
                };
                return report;
            }
        };

        for record in reader {
            let row = match record {
                Ok(row) => row,
                Err(err) => {
                    error!(
                        error = %err,
                        rows_read = report.rows_seen,
                        "error reading CSV export, abandoning file"
                    );
                    report.outcome = FileOutcome::SkippedFileError {
                        message: err.to_string(),
                    };
                    break;
                }
            };
            report.rows_seen += 1;

            match self.import_row(&ctx, kind, &row).await {
                Ok(RowOutcome::Imported) => report.rows_imported += 1,
                Ok(RowOutcome::AlreadyPresent) => report.rows_already_present += 1,
                Err(err) => {
                    error!(
                        line = ?row.line(),
                        error = %err,
                        row = %row,
                        "error processing a row"
                    );
                    report.rows_failed += 1;
                }
            }
        }

        info!(
            rows = report.rows_seen,
            imported = report.rows_imported,
            already_present = report.rows_already_present,
            failed = report.rows_failed,
            "file processed"
        );
        report
    }

    async fn import_row(
        &self,
        ctx: &FileContext,
        kind: RowKind,
        row: &CatalogRow,
    ) -> Result<RowOutcome, RowFailure> {
        match kind {
            RowKind::Price(date) => import_price_row(self.catalog.as_ref(), ctx, date, row).await,
            RowKind::Discount => import_discount_row(self.catalog.as_ref(), ctx, row).await,
        }
    }
}

/// Regular `*.csv` files directly under `dir`, ordered by name.
pub async fn list_source_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("reading {}", dir.display()))?;
    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("reading {}", dir.display()))?
    {
        let is_file = entry.file_type().await.map(|ft| ft.is_file()).unwrap_or(false);
        let path = entry.path();
        if is_file && path.extension().is_some_and(|ext| ext == "csv") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricebook_storage::InMemoryCatalogStore;

    #[tokio::test]
    async fn gate_requires_both_counts() {
        let catalog = Arc::new(InMemoryCatalogStore::new());
        let ingestor = Ingestor::new(catalog.clone(), "unused");
        assert!(!ingestor.check_gate().await.unwrap().is_populated());

        resolve_store(catalog.as_ref(), "lidl").await.unwrap();
        let gate = ingestor.check_gate().await.unwrap();
        assert_eq!(
            gate,
            GateOutcome::Empty {
                stores: 1,
                products: 0
            }
        );
    }

    #[tokio::test]
    async fn listing_keeps_only_csv_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b_2025-05-01.csv", "a_discounts_x.csv", "readme.txt", "notes.CSV"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.csv")).unwrap();

        let names = list_source_files(dir.path())
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a_discounts_x.csv", "b_2025-05-01.csv"]);
    }

    #[tokio::test]
    async fn missing_source_dir_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalogStore::new());
        let ingestor = Ingestor::new(catalog, dir.path().join("absent"));

        let report = ingestor.run_once().await.unwrap();
        assert!(report.source_error.is_some());
        assert!(report.files.is_empty());
    }
}
