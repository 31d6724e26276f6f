//! Rename-swap schema migration.
//!
//! Each table is rebuilt under its target definition without losing row
//! identity: a shadow table `<name>_new` is created from the target DDL, the
//! columns both definitions share are copied across with `INSERT OR IGNORE`,
//! the original is dropped, and the shadow is renamed into place. Every table
//! is handled in dependency order inside a single transaction with foreign
//! keys disabled, and the sequence counters are raised to `max(id)` before the
//! transaction commits.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::Local;
use log::{debug, info, warn};
use rusqlite::{Connection, params};

use crate::{
    error::MigrationError,
    schema::{TableDef, TableKind},
};

/// Per-table outcome of a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMigration {
    pub table: &'static str,
    /// The table did not exist before and was created empty.
    pub created: bool,
    pub rows_before: i64,
    pub rows_after: i64,
}

#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    pub backup: Option<PathBuf>,
    pub tables: Vec<TableMigration>,
}

pub struct Migrator<'t> {
    tables: &'t [&'static TableDef],
}

impl<'t> Migrator<'t> {
    pub fn new(tables: &'t [&'static TableDef]) -> Self {
        Self { tables }
    }

    /// Migrate `conn` to the plan's schema and stamp `target_version`.
    ///
    /// `db_path` is only used for the best-effort backup copy; in-memory
    /// databases are not backed up.
    pub fn run(
        &self,
        conn: &mut Connection,
        db_path: &Path,
        backup_dir: Option<&Path>,
        target_version: i32,
    ) -> Result<MigrationReport, MigrationError> {
        let mut report = MigrationReport::default();
        if is_file_backed(db_path) {
            match backup_database(db_path, backup_dir) {
                Ok(path) => {
                    info!("Database backed up to {path:?}");
                    report.backup = Some(path);
                }
                Err(err) => warn!("Could not back up {db_path:?} before migrating: {err}"),
            }
        }

        conn.pragma_update(None, "foreign_keys", false)?;
        let result = self.rewrite(conn, target_version);
        if let Err(err) = conn.pragma_update(None, "foreign_keys", true) {
            warn!("Could not re-enable foreign keys after migration: {err}");
        }

        report.tables = result?;
        Ok(report)
    }

    fn rewrite(
        &self,
        conn: &mut Connection,
        target_version: i32,
    ) -> Result<Vec<TableMigration>, MigrationError> {
        let tx = conn.transaction()?;
        let mut migrated = Vec::with_capacity(self.tables.len());
        for table in self.tables {
            let outcome = swap_table(&tx, table).map_err(|source| MigrationError::Table {
                table: table.name,
                source,
            })?;
            if outcome.rows_after < outcome.rows_before {
                warn!(
                    "{}: {} of {} row(s) did not fit the new definition and were dropped",
                    table.name,
                    outcome.rows_before - outcome.rows_after,
                    outcome.rows_before
                );
            }
            debug!(
                "{}: {} row(s) carried over{}",
                table.name,
                outcome.rows_after,
                if outcome.created { " (new table)" } else { "" }
            );
            migrated.push(outcome);
        }
        sync_sequences(&tx, self.tables)?;
        tx.pragma_update(None, "user_version", target_version)?;
        tx.commit()?;
        Ok(migrated)
    }
}

fn swap_table(conn: &Connection, table: &'static TableDef) -> rusqlite::Result<TableMigration> {
    if !table_exists(conn, table.name)? {
        conn.execute_batch(&table.create_sql())?;
        return Ok(TableMigration {
            table: table.name,
            created: true,
            rows_before: 0,
            rows_after: 0,
        });
    }

    let shadow = table.shadow_name();
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {shadow}"))?;
    conn.execute_batch(&table.create_sql_named(&shadow))?;

    let existing = column_names(conn, table.name)?;
    let shared: Vec<&str> = table
        .columns
        .iter()
        .copied()
        .filter(|column| existing.iter().any(|old| old.eq_ignore_ascii_case(column)))
        .collect();
    if !shared.is_empty() {
        let columns = shared.join(", ");
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {shadow} ({columns}) SELECT {columns} FROM {}",
                table.name
            ),
            [],
        )?;
    }

    let rows_before = count_rows(conn, table.name)?;
    let rows_after = count_rows(conn, &shadow)?;
    conn.execute_batch(&format!("DROP TABLE {}", table.name))?;
    conn.execute_batch(&format!("ALTER TABLE {shadow} RENAME TO {}", table.name))?;
    Ok(TableMigration {
        table: table.name,
        created: false,
        rows_before,
        rows_after,
    })
}

/// Raise each surrogate-keyed table's `sqlite_sequence` counter to its
/// current `max(id)`. A no-op when the database has never used
/// `AUTOINCREMENT`.
pub fn sync_sequences(conn: &Connection, tables: &[&'static TableDef]) -> rusqlite::Result<()> {
    if !table_exists(conn, "sqlite_sequence")? {
        return Ok(());
    }
    for table in tables {
        let Some(id_column) = table.id_column else {
            continue;
        };
        if table.kind == TableKind::Metadata || !table_exists(conn, table.name)? {
            continue;
        }
        let max: Option<i64> = conn.query_row(
            &format!("SELECT MAX({id_column}) FROM {}", table.name),
            [],
            |row| row.get(0),
        )?;
        let Some(max) = max else {
            continue;
        };
        let raised = conn.execute(
            "UPDATE sqlite_sequence SET seq = ?1 WHERE name = ?2 AND seq < ?1",
            params![max, table.name],
        )?;
        if raised == 0 {
            conn.execute(
                "INSERT INTO sqlite_sequence (name, seq) SELECT ?2, ?1 \
                 WHERE NOT EXISTS (SELECT 1 FROM sqlite_sequence WHERE name = ?2)",
                params![max, table.name],
            )?;
        }
    }
    Ok(())
}

/// Copy the database file to `<dir>/<stem>_backup_<timestamp>.db`. The
/// directory defaults to the database's own.
pub fn backup_database(db_path: &Path, backup_dir: Option<&Path>) -> io::Result<PathBuf> {
    let dir = match backup_dir {
        Some(dir) => dir.to_path_buf(),
        None => db_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };
    fs::create_dir_all(&dir)?;
    let stem = db_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "database".to_string());
    let stamp = Local::now().format("%Y%m%d_%H%M%S%3f");
    let target = dir.join(format!("{stem}_backup_{stamp}.db"));
    fs::copy(db_path, &target)?;
    Ok(target)
}

pub(crate) fn is_file_backed(db_path: &Path) -> bool {
    let raw = db_path.as_os_str();
    !raw.is_empty() && raw != ":memory:"
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        params![name],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count > 0)
}

fn column_names(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

fn count_rows(conn: &Connection, table: &str) -> rusqlite::Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })
}
