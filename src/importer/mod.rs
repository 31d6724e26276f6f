//! Per-file import engine shared by every table importer.
//!
//! A [`TableImporter`] knows one source file: its canonical columns and how to
//! write one row. [`import_file`] does everything else: it reads and decodes
//! the file, synchronizes the header, runs every row inside a single
//! transaction, and folds the outcomes into a [`FileReport`].

pub mod catalog;
pub mod relation;

use std::{
    fmt,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use log::{debug, error, info, warn};
use rusqlite::Connection;
use serde::Serialize;

use crate::{
    error::{FileError, RowError},
    headers::{ColumnSpec, HeaderMapping},
    io_utils::{self, CsvRow},
    resolver::ImportSession,
    schema::TableDef,
};

/// Processing order used when the folder carries no `import_order.txt`:
/// independent catalogs, then the relation table, then traceability.
pub const DEFAULT_ORDER: &[&str] = &[
    "CODIGO_SAG.csv",
    "Cuartel.csv",
    "Embalaje.csv",
    "Etiqueta.csv",
    "Logo.csv",
    "PLU.csv",
    "PRODUCTOR.csv",
    "Variedad.csv",
    "VARIEDAD_PLU.csv",
    "CODIGOS_TRAZABILIDAD.csv",
];

static IMPORTERS: &[&dyn TableImporter] = &[
    &catalog::CODIGO_SAG,
    &catalog::CUARTEL,
    &catalog::EMBALAJE,
    &catalog::ETIQUETA,
    &catalog::LOGO,
    &catalog::PLU,
    &catalog::PRODUCTOR,
    &catalog::VARIEDAD,
    &catalog::PROCEDENCIA_PROD,
    &relation::VARIEDAD_PLU,
    &relation::TRAZABILIDAD,
];

/// Look up the importer for a source file name, ignoring case.
pub fn importer_for(file_name: &str) -> Option<&'static dyn TableImporter> {
    IMPORTERS
        .iter()
        .copied()
        .find(|importer| importer.file_name().eq_ignore_ascii_case(file_name))
}

/// What happened to one CSV row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Inserted,
    /// Matched an existing row by natural key; attributes were refreshed or
    /// the declared id was remapped.
    Merged,
    Unchanged,
    /// The composite key is already stored.
    Duplicate,
    Rejected(RowError),
}

pub trait TableImporter: Sync {
    fn file_name(&self) -> &'static str;

    fn table(&self) -> &'static TableDef;

    fn columns(&self) -> Vec<ColumnSpec>;

    /// Write one row. Row-level problems come back as
    /// [`RowOutcome::Rejected`]; an `Err` aborts the whole file.
    fn import_row(
        &self,
        conn: &Connection,
        session: &mut ImportSession,
        mapping: &HeaderMapping,
        row: &CsvRow,
    ) -> rusqlite::Result<RowOutcome>;
}

/// How far a file got.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "kebab-case")]
pub enum FileStatus {
    #[default]
    Imported,
    /// Listed in the processing order but absent from the folder.
    Missing,
    /// Present in the processing order but no importer handles it.
    Unhandled,
    /// The file's transaction was rolled back.
    Aborted(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileReport {
    pub file: String,
    pub table: Option<&'static str>,
    #[serde(flatten)]
    pub status: FileStatus,
    pub inserted: usize,
    pub merged: usize,
    pub skipped: usize,
    pub errors: Vec<RowError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unmapped_headers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_rows_report: Option<PathBuf>,
}

impl FileReport {
    fn new(file: impl Into<String>, table: Option<&'static str>) -> Self {
        Self {
            file: file.into(),
            table,
            ..Self::default()
        }
    }

    pub fn missing(file: &str) -> Self {
        let mut report = Self::new(file, importer_for(file).map(|i| i.table().name));
        report.status = FileStatus::Missing;
        report
    }

    pub fn unhandled(file: &str) -> Self {
        let mut report = Self::new(file, None);
        report.status = FileStatus::Unhandled;
        report
    }

    fn aborted(file: String, table: &'static str, err: &FileError) -> Self {
        let mut report = Self::new(file, Some(table));
        report.status = FileStatus::Aborted(err.to_string());
        report
    }

    /// True when the file's transaction never committed.
    pub fn is_failed(&self) -> bool {
        matches!(self.status, FileStatus::Aborted(_))
    }

    fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Inserted => self.inserted += 1,
            RowOutcome::Merged => self.merged += 1,
            RowOutcome::Unchanged | RowOutcome::Duplicate => self.skipped += 1,
            RowOutcome::Rejected(err) => {
                self.skipped += 1;
                self.errors.push(err);
            }
        }
    }
}

impl fmt::Display for FileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            FileStatus::Missing => {
                return write!(f, "- {}: not found in folder", self.file);
            }
            FileStatus::Unhandled => {
                let err = FileError::Unhandled(self.file.clone());
                return write!(f, "- {}: {err}", self.file);
            }
            FileStatus::Aborted(reason) => {
                return write!(f, "- {}: FAILED, rolled back: {reason}", self.file);
            }
            FileStatus::Imported => {}
        }
        write!(
            f,
            "- {}: inserted={}, merged={}, skipped={}",
            self.file, self.inserted, self.merged, self.skipped
        )?;
        if !self.errors.is_empty() {
            write!(f, ", errors={}", self.errors.len())?;
        }
        for err in &self.errors {
            write!(f, "\n    * {err}")?;
        }
        Ok(())
    }
}

/// Import one file inside its own transaction.
///
/// Never fails: a file-level error rolls the file back, restores the session
/// remaps registered while processing it, and is reported as a failed
/// [`FileReport`].
pub fn import_file(
    conn: &mut Connection,
    session: &mut ImportSession,
    importer: &dyn TableImporter,
    path: &Path,
    reports_dir: Option<&Path>,
) -> FileReport {
    let display_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| importer.file_name().to_string());
    let checkpoint = session.clone();
    match run_file(conn, session, importer, path, reports_dir) {
        Ok(report) => {
            info!(
                "{}: inserted={}, merged={}, skipped={}, errors={}",
                report.file,
                report.inserted,
                report.merged,
                report.skipped,
                report.errors.len()
            );
            report
        }
        Err(err) => {
            *session = checkpoint;
            error!("{display_name}: import aborted and rolled back: {err}");
            FileReport::aborted(display_name, importer.table().name, &err)
        }
    }
}

fn run_file(
    conn: &mut Connection,
    session: &mut ImportSession,
    importer: &dyn TableImporter,
    path: &Path,
    reports_dir: Option<&Path>,
) -> Result<FileReport, FileError> {
    let source = io_utils::read_csv_file(path)?;
    let mapping = HeaderMapping::synchronize(&source.header, &importer.columns());
    let mut report = FileReport::new(source.file_name(), Some(importer.table().name));

    debug!(
        "{}: header mapping {}",
        report.file,
        mapping
            .token_map()
            .iter()
            .map(|(token, column)| format!("{token:?} -> {column}"))
            .join(", ")
    );
    if !mapping.unmapped().is_empty() {
        warn!(
            "{}: ignoring unmapped header column(s): {}",
            report.file,
            mapping.unmapped().iter().join(", ")
        );
        report.unmapped_headers = mapping.unmapped().to_vec();
    }
    if !mapping.missing().is_empty() {
        debug!(
            "{}: no header for column(s): {}",
            report.file,
            mapping.missing().iter().join(", ")
        );
    }

    let mut rejected: Vec<&CsvRow> = Vec::new();
    let tx = conn.transaction()?;
    for row in &source.rows {
        let outcome = importer.import_row(&tx, session, &mapping, row)?;
        if let RowOutcome::Rejected(err) = &outcome {
            warn!("{}: {err}", report.file);
            rejected.push(row);
        }
        report.record(outcome);
    }
    tx.commit()?;

    if let Some(dir) = reports_dir
        && !rejected.is_empty()
    {
        match io_utils::write_failed_rows(dir, &source, &rejected) {
            Ok(out) => {
                info!("{}: {} rejected row(s) written to {:?}", report.file, rejected.len(), out);
                report.failed_rows_report = Some(out);
            }
            Err(err) => warn!("{}: could not write failed-row report: {err}", report.file),
        }
    }
    Ok(report)
}
