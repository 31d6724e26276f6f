#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tempfile::{TempDir, tempdir};

/// A small but complete source folder: every catalog, the relation table,
/// and traceability rows that reference catalogs by id, code, and name.
pub const STANDARD_FILES: &[(&str, &str)] = &[
    ("CODIGO_SAG.csv", "Id,codigo_sag,cod_sdp_sag\n1,SAG-100,500\n2,SAG-200,\n"),
    ("Cuartel.csv", "Id,num_cuartel,nom_cuartel\n10,7,El Álamo\n11,8,Norte\n"),
    ("Embalaje.csv", "Id,codigo\n1,CB4\n2,CB5\n"),
    ("Etiqueta.csv", "Id,nombre,nombre_imagen\n1,Atacama,atacama.png\n"),
    ("Logo.csv", "Id,nom_cod,nombre\n1,ATC,logo_atc.png\n"),
    ("PLU.csv", "Id,plu_code,description\n1,4045,Cherry dark\n2,4258,Cherry rainier\n"),
    (
        "PRODUCTOR.csv",
        "Id,cod_productor,nom_productor\n3,P01,Agrícola Sur\n4,P02,\"Los Robles, Ltda.\"\n",
    ),
    ("Variedad.csv", "Id,nom_variedad\n1,Lapins\n2,Santina\n3,Bing\n"),
    ("VARIEDAD_PLU.csv", "variedad,plu\nLapins,4045\n2,4258\n"),
    (
        "CODIGOS_TRAZABILIDAD.csv",
        "Id,productor,codigo_sag,variedad,cuartel\n1,3,SAG-100,Lapins,10\n2,P02,SAG-200,santina,norte\n",
    ),
];

/// Scratch directory holding a database file and a CSV source folder.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory with an empty `csv/` folder.
    pub fn new() -> Self {
        let temp_dir = tempdir().expect("temp dir");
        fs::create_dir(temp_dir.path().join("csv")).expect("create csv folder");
        Self { temp_dir }
    }

    /// Workspace with every file of [`STANDARD_FILES`] written.
    pub fn standard() -> Self {
        let workspace = Self::new();
        for (name, contents) in STANDARD_FILES {
            workspace.write_csv(name, contents);
        }
        workspace
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn folder(&self) -> PathBuf {
        self.temp_dir.path().join("csv")
    }

    pub fn db_path(&self) -> PathBuf {
        self.temp_dir.path().join("tarja.db")
    }

    /// Writes `contents` into the source folder and returns the path.
    pub fn write_csv(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.folder().join(name);
        fs::write(&path, contents).expect("write csv");
        path
    }

    /// Writes `contents` at the workspace root and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, contents).expect("write temp file contents");
        path
    }

    /// Raw connection to the workspace database, for assertions.
    pub fn connect(&self) -> Connection {
        Connection::open(self.db_path()).expect("open database")
    }
}

pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .expect("count rows")
}

pub fn ids(conn: &Connection, table: &str) -> Vec<i64> {
    let mut stmt = conn
        .prepare(&format!("SELECT Id FROM {table} ORDER BY Id"))
        .expect("prepare");
    let ids = stmt
        .query_map([], |row| row.get(0))
        .expect("query")
        .collect::<rusqlite::Result<Vec<i64>>>()
        .expect("collect ids");
    ids
}
