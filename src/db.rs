//! Opening the tarja database.
//!
//! The stored schema version lives in `PRAGMA user_version`. Opening a
//! database compares it with [`CURRENT_VERSION`]:
//!
//! | stored            | action                                   |
//! |-------------------|------------------------------------------|
//! | 0, no tables      | create the schema                        |
//! | 0 with tables, or older | rename-swap migration              |
//! | equal             | open as is                               |
//! | newer             | refuse with [`MigrationError::Downgrade`] |
//!
//! A failed migration either discards the file and recreates the schema or
//! is reported untouched, depending on the [`FallbackPolicy`].

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{error, info, warn};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::Serialize;

use crate::{
    config::FallbackPolicy,
    error::MigrationError,
    migrate::{self, Migrator},
    schema::{ALL_TABLES, CURRENT_VERSION, METADATA, TableDef},
};

#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub backup_dir: Option<PathBuf>,
    pub fallback: FallbackPolicy,
    /// Refuse to create the database file when it does not exist yet.
    pub require_existing: bool,
}

/// How the schema was brought to the current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum OpenOutcome {
    Created,
    Opened,
    Migrated { from: i32 },
    /// Migration failed; the old file was discarded and the schema created empty.
    Recreated { from: i32 },
}

pub struct Database {
    conn: Connection,
    path: PathBuf,
    outcome: OpenOutcome,
    backup: Option<PathBuf>,
}

impl Database {
    pub fn open(path: &Path, options: &OpenOptions) -> Result<Self, MigrationError> {
        Self::open_with(path, options, ALL_TABLES)
    }

    pub fn open_in_memory() -> Result<Self, MigrationError> {
        Self::open(Path::new(":memory:"), &OpenOptions::default())
    }

    /// Open against an explicit table plan. The plan drives creation and
    /// migration alike; the destructive fallback always recreates the full
    /// schema.
    pub fn open_with(
        path: &Path,
        options: &OpenOptions,
        tables: &[&'static TableDef],
    ) -> Result<Self, MigrationError> {
        let mut conn = connect(path, options.require_existing)?;
        let stored = user_version(&conn)?;
        let has_tables = user_table_count(&conn)? > 0;

        if stored > CURRENT_VERSION {
            return Err(MigrationError::Downgrade {
                stored,
                current: CURRENT_VERSION,
            });
        }
        if stored == CURRENT_VERSION {
            conn.pragma_update(None, "foreign_keys", true)?;
            return Ok(Self::new(conn, path, OpenOutcome::Opened));
        }
        if stored == 0 && !has_tables {
            create_schema(&mut conn, tables)?;
            info!("Created schema version {CURRENT_VERSION} in {path:?}");
            return Ok(Self::new(conn, path, OpenOutcome::Created));
        }

        info!("Migrating {path:?} from schema version {stored} to {CURRENT_VERSION}");
        let migrated =
            Migrator::new(tables).run(&mut conn, path, options.backup_dir.as_deref(), CURRENT_VERSION);
        match migrated {
            Ok(report) => {
                info!(
                    "Migration finished: {} table(s) rewritten",
                    report.tables.len()
                );
                let mut db = Self::new(conn, path, OpenOutcome::Migrated { from: stored });
                db.backup = report.backup;
                Ok(db)
            }
            Err(cause) => match options.fallback {
                FallbackPolicy::Abort => Err(MigrationError::FallbackRefused {
                    stored,
                    cause: cause.to_string(),
                }),
                FallbackPolicy::Recreate => {
                    error!(
                        "Migration of {path:?} from version {stored} failed ({cause}); \
                         DISCARDING ALL DATA and recreating an empty schema"
                    );
                    let conn = recreate(conn, path)?;
                    Ok(Self::new(conn, path, OpenOutcome::Recreated { from: stored }))
                }
            },
        }
    }

    fn new(conn: Connection, path: &Path, outcome: OpenOutcome) -> Self {
        Self {
            conn,
            path: path.to_path_buf(),
            outcome,
            backup: None,
        }
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn outcome(&self) -> OpenOutcome {
        self.outcome
    }

    /// Backup written before a successful migration, if any.
    pub fn backup(&self) -> Option<&Path> {
        self.backup.as_deref()
    }

    pub fn schema_version(&self) -> rusqlite::Result<i32> {
        user_version(&self.conn)
    }

    pub fn meta_get(&self, key: &str) -> rusqlite::Result<Option<String>> {
        self.conn
            .query_row(
                &format!("SELECT meta_value FROM {} WHERE meta_key = ?1", METADATA.name),
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map(Option::flatten)
    }

    pub fn meta_set(&self, key: &str, value: &str) -> rusqlite::Result<()> {
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (meta_key, meta_value) VALUES (?1, ?2)",
                METADATA.name
            ),
            params![key, value],
        )?;
        Ok(())
    }

    pub fn set_foreign_keys(&self, enabled: bool) -> rusqlite::Result<()> {
        self.conn.pragma_update(None, "foreign_keys", enabled)
    }

    pub fn foreign_keys_enabled(&self) -> rusqlite::Result<bool> {
        self.conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get::<_, i64>(0))
            .map(|flag| flag != 0)
    }

    pub fn sync_sequences(&self) -> rusqlite::Result<()> {
        migrate::sync_sequences(&self.conn, ALL_TABLES)
    }

    pub fn row_count(&self, table: &TableDef) -> rusqlite::Result<i64> {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table.name), [], |row| {
                row.get(0)
            })
    }
}

fn connect(path: &Path, require_existing: bool) -> Result<Connection, MigrationError> {
    if !require_existing || !migrate::is_file_backed(path) {
        return Ok(Connection::open(path)?);
    }
    if !path.is_file() {
        return Err(MigrationError::NotFound(path.to_path_buf()));
    }
    let mut flags = OpenFlags::default();
    flags.remove(OpenFlags::SQLITE_OPEN_CREATE);
    Ok(Connection::open_with_flags(path, flags)?)
}

fn user_version(conn: &Connection) -> rusqlite::Result<i32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

fn user_table_count(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )
}

fn create_schema(conn: &mut Connection, tables: &[&'static TableDef]) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    for table in tables {
        tx.execute_batch(&table.create_sql())?;
    }
    tx.pragma_update(None, "user_version", CURRENT_VERSION)?;
    tx.commit()?;
    conn.pragma_update(None, "foreign_keys", true)
}

/// Discard the database and start over with an empty schema. File-backed
/// databases are deleted along with their journal files; in-memory ones have
/// every table dropped.
fn recreate(conn: Connection, path: &Path) -> Result<Connection, MigrationError> {
    let mut conn = if migrate::is_file_backed(path) {
        if let Err((_, err)) = conn.close() {
            warn!("Closing {path:?} before recreation failed: {err}");
        }
        for suffix in ["", "-journal", "-wal", "-shm"] {
            let mut raw = path.as_os_str().to_os_string();
            raw.push(suffix);
            let file = PathBuf::from(raw);
            if file.exists() {
                fs::remove_file(&file).map_err(|source| MigrationError::Remove {
                    path: file.clone(),
                    source,
                })?;
            }
        }
        Connection::open(path)?
    } else {
        drop_all_tables(&conn)?;
        conn.pragma_update(None, "user_version", 0)?;
        conn
    };
    create_schema(&mut conn, ALL_TABLES)?;
    Ok(conn)
}

fn drop_all_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", false)?;
    let names: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        names
    };
    for name in names {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{name}\""))?;
    }
    Ok(())
}
