//! Error types for the import and migration pipeline.
//!
//! The taxonomy follows the blast radius of each failure:
//!
//! - [`RowError`] - one CSV row is rejected, the file continues
//! - [`FileError`] - the file's transaction is rolled back, the run continues
//! - [`IntegrityViolation`](crate::orchestrator::IntegrityViolation) - orphans
//!   found after a run; reported, not raised
//! - [`MigrationError`] - schema rewrite failed or was refused
//! - [`ImportError`] - the run itself could not start or finish

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// A rejected CSV row. Never fatal to the file it came from.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RowError {
    #[error("line {line}: required field '{field}' is blank")]
    MissingField { line: usize, field: &'static str },

    #[error("line {line}: invalid value '{value}' for '{field}'")]
    InvalidValue {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("line {line}: no {table} row matches '{token}'")]
    UnresolvedReference {
        line: usize,
        table: &'static str,
        token: String,
    },
}

impl RowError {
    pub fn line(&self) -> usize {
        match self {
            RowError::MissingField { line, .. }
            | RowError::InvalidValue { line, .. }
            | RowError::UnresolvedReference { line, .. } => *line,
        }
    }
}

/// A failure that aborts one file's transaction.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("file {0:?} has no header row")]
    Empty(PathBuf),

    #[error("no importer handles '{0}'")]
    Unhandled(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Schema migration failures.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration SQL failed on table {table}: {source}")]
    Table {
        table: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database file {0:?} does not exist")]
    NotFound(PathBuf),

    #[error("stored schema version {stored} is newer than supported version {current}")]
    Downgrade { stored: i32, current: i32 },

    #[error(
        "migration from version {stored} failed and the fallback policy forbids discarding data: {cause}"
    )]
    FallbackRefused { stored: i32, cause: String },

    #[error("failed to remove database file {path:?}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Run-level failures of the import orchestrator.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("source folder not found: {0:?}")]
    FolderNotFound(PathBuf),

    #[error("an import is already running against {0:?}")]
    AlreadyRunning(PathBuf),

    #[error("failed to list source folder {path:?}: {source}")]
    ListFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to hash source folder {path:?}: {source}")]
    Hash {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}
