//! Import orchestration: one run over a source folder.
//!
//! A run hashes the folder, skips itself when the hash matches the last
//! committed import and the traceability table is populated, then imports
//! every file in order with foreign-key enforcement off. Afterwards it turns
//! enforcement back on, raises sequence counters, and sweeps every imported
//! foreign key for orphans. The folder hash is only committed when the sweep
//! is clean, so a run that left orphans is retried next time. A file that was
//! rolled back does not hold the hash back: its bytes are part of the hash, so
//! fixing it changes the hash and triggers the next run.

use std::{
    collections::{HashMap, HashSet},
    fmt, fs,
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock, PoisonError},
};

use log::{error, info, warn};
use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{
    db::Database,
    error::ImportError,
    importer::{self, DEFAULT_ORDER, FileReport},
    migrate,
    resolver::ImportSession,
    schema::{IMPORT_FOREIGN_KEYS, META_KEY_IMPORT_HASH, TRAZABILIDAD},
};

pub const ORDER_FILE: &str = "import_order.txt";

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Import even when the folder hash matches the last committed run.
    pub force: bool,
    /// Where `FAILED_<file>` reports go; none are written when unset.
    pub reports_dir: Option<PathBuf>,
}

/// Rows of `table` whose `column` points at no row of `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityViolation {
    pub table: &'static str,
    pub column: &'static str,
    pub target: &'static str,
    pub orphans: i64,
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}: {} row(s) reference a missing {} row",
            self.table, self.column, self.orphans, self.target
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub folder: PathBuf,
    pub hash: String,
    /// The run was a no-op because nothing changed since the last import.
    pub skipped: bool,
    pub files: Vec<FileReport>,
    pub violations: Vec<IntegrityViolation>,
    pub hash_committed: bool,
}

impl RunSummary {
    pub fn inserted(&self) -> usize {
        self.files.iter().map(|file| file.inserted).sum()
    }

    pub fn row_errors(&self) -> usize {
        self.files.iter().map(|file| file.errors.len()).sum()
    }

    pub fn failed_files(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|file| file.is_failed())
    }

    pub fn file(&self, name: &str) -> Option<&FileReport> {
        self.files
            .iter()
            .find(|file| file.file.eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.hash.get(..12).unwrap_or(&self.hash);
        if self.skipped {
            return writeln!(
                f,
                "Import from {}: unchanged since last import (hash {short}); nothing to do",
                self.folder.display()
            );
        }
        writeln!(f, "Import from {} (hash {short})", self.folder.display())?;
        for file in &self.files {
            writeln!(f, "{file}")?;
        }
        if self.violations.is_empty() {
            write!(f, "Integrity: ok")?;
        } else {
            write!(f, "Integrity: {} violation(s)", self.violations.len())?;
        }
        if self.hash_committed {
            writeln!(f, "; import hash committed")?;
        } else {
            writeln!(f, "; import hash withheld, next run retries")?;
        }
        for violation in &self.violations {
            writeln!(f, "  ! {violation}")?;
        }
        Ok(())
    }
}

static RUNNING: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();

/// Marks a database as having an import in flight until dropped.
pub(crate) struct RunGuard {
    key: PathBuf,
}

impl RunGuard {
    pub(crate) fn acquire(db_path: &Path) -> Result<Self, ImportError> {
        let key = fs::canonicalize(db_path).unwrap_or_else(|_| db_path.to_path_buf());
        let mut running = RUNNING
            .get_or_init(Default::default)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !running.insert(key.clone()) {
            return Err(ImportError::AlreadyRunning(key));
        }
        Ok(Self { key })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(running) = RUNNING.get() {
            running
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.key);
        }
    }
}

/// SHA-256 over the folder's top-level regular files, sorted by name: each
/// file contributes its name, a NUL byte, and its contents. Lowercase hex.
pub fn folder_hash(folder: &Path) -> Result<String, ImportError> {
    let hash_err = |source| ImportError::Hash {
        path: folder.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(folder).map_err(hash_err)? {
        let entry = entry.map_err(hash_err)?;
        if entry.file_type().map_err(hash_err)?.is_file() {
            files.push((entry.file_name(), entry.path()));
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (name, path) in files {
        hasher.update(name.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(fs::read(&path).map_err(hash_err)?);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// File names to import, in order: `import_order.txt` when present (blank
/// and `#` lines ignored), the default dependency order otherwise.
pub fn processing_order(folder: &Path) -> Vec<String> {
    let order_path = folder.join(ORDER_FILE);
    if !order_path.is_file() {
        return DEFAULT_ORDER.iter().map(|name| name.to_string()).collect();
    }
    match fs::read_to_string(&order_path) {
        Ok(contents) => contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect(),
        Err(err) => {
            warn!("Could not read {order_path:?} ({err}); using the default order");
            DEFAULT_ORDER.iter().map(|name| name.to_string()).collect()
        }
    }
}

/// Count orphans for every imported foreign key.
pub fn integrity_sweep(conn: &Connection) -> rusqlite::Result<Vec<IntegrityViolation>> {
    let mut violations = Vec::new();
    for fk in IMPORT_FOREIGN_KEYS {
        let target_id = fk.target.id_column.unwrap_or("rowid");
        let orphans: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {child} AS c LEFT JOIN {target} AS t ON c.{column} = t.{target_id} \
                 WHERE t.{target_id} IS NULL",
                child = fk.table.name,
                target = fk.target.name,
                column = fk.column,
            ),
            [],
            |row| row.get(0),
        )?;
        if orphans > 0 {
            violations.push(IntegrityViolation {
                table: fk.table.name,
                column: fk.column,
                target: fk.target.name,
                orphans,
            });
        }
    }
    Ok(violations)
}

/// Run one import of `folder` into `db`.
pub fn run_import(
    db: &mut Database,
    folder: &Path,
    options: &ImportOptions,
) -> Result<RunSummary, ImportError> {
    if !folder.is_dir() {
        return Err(ImportError::FolderNotFound(folder.to_path_buf()));
    }
    let _guard = if migrate::is_file_backed(db.path()) {
        Some(RunGuard::acquire(db.path())?)
    } else {
        None
    };

    let hash = folder_hash(folder)?;
    let mut summary = RunSummary {
        folder: folder.to_path_buf(),
        hash: hash.clone(),
        ..RunSummary::default()
    };

    let stored = db.meta_get(META_KEY_IMPORT_HASH)?;
    if !options.force && stored.as_deref() == Some(hash.as_str()) {
        if db.row_count(&TRAZABILIDAD)? > 0 {
            info!("{folder:?} unchanged since last import; skipping");
            summary.skipped = true;
            return Ok(summary);
        }
        warn!("{folder:?} unchanged but traceability table is empty; importing again");
    }

    let reports_dir = options.reports_dir.as_deref().map(|dir| {
        if same_dir(dir, folder) {
            folder.join("reports")
        } else {
            dir.to_path_buf()
        }
    });

    info!("Importing from {folder:?}");
    let on_disk = files_by_upper_name(folder)?;
    let mut session = ImportSession::new();
    db.set_foreign_keys(false)?;
    for name in processing_order(folder) {
        let report = match importer::importer_for(&name) {
            None => {
                warn!("{name}: no importer handles this file; skipped");
                FileReport::unhandled(&name)
            }
            Some(importer) => match on_disk.get(&name.to_uppercase()) {
                None => {
                    warn!("{name}: listed for import but not found in {folder:?}");
                    FileReport::missing(&name)
                }
                Some(path) => importer::import_file(
                    db.conn_mut(),
                    &mut session,
                    importer,
                    path,
                    reports_dir.as_deref(),
                ),
            },
        };
        summary.files.push(report);
    }
    db.set_foreign_keys(true)?;

    if let Err(err) = db.sync_sequences() {
        warn!("Could not raise sequence counters after import: {err}");
    }

    summary.violations = integrity_sweep(db.conn())?;
    for violation in &summary.violations {
        error!("Integrity violation: {violation}");
    }
    let failed = summary.failed_files().count();
    if failed > 0 {
        warn!("{failed} file(s) rolled back; fix them or rerun with --force to retry");
    }
    if summary.violations.is_empty() {
        db.meta_set(META_KEY_IMPORT_HASH, &hash)?;
        summary.hash_committed = true;
        info!(
            "Import committed: {} row(s) inserted, {} row error(s), {} id remap(s)",
            summary.inserted(),
            summary.row_errors(),
            session.remap_count()
        );
    } else {
        warn!(
            "Import hash withheld: {} integrity violation(s)",
            summary.violations.len()
        );
    }
    Ok(summary)
}

fn files_by_upper_name(folder: &Path) -> Result<HashMap<String, PathBuf>, ImportError> {
    let io_err = |source| ImportError::ListFolder {
        path: folder.to_path_buf(),
        source,
    };
    let mut files = HashMap::new();
    for entry in fs::read_dir(folder).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if entry.file_type().map_err(io_err)?.is_file() {
            let name = entry.file_name().to_string_lossy().to_uppercase();
            files.insert(name, entry.path());
        }
    }
    Ok(files)
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
