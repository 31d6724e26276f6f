//! Natural-key resolution of CSV tokens to surrogate ids.
//!
//! A token found in a source file may be a surrogate id, a natural code, or a
//! human-entered name with drifting case and accents. [`Resolver::resolve`]
//! tries, in order and stopping at the first hit:
//!
//! 1. the per-run id remap, when the token is numeric and the lookup column is
//!    the table's id column (ids declared by earlier CSV rows that merged into
//!    a different existing row);
//! 2. exact equality against the lookup column;
//! 3. `LOWER()` equality, for non-numeric tokens;
//! 4. equality after [`fold_for_compare`], scanning the whole table, for
//!    non-numeric tokens.
//!
//! The remap lives in an [`ImportSession`] that the orchestrator creates for
//! one run and drops afterwards.

use std::{collections::HashMap, fmt};

use log::debug;
use rusqlite::{Connection, OptionalExtension, params, types::ValueRef};
use serde::Serialize;

use crate::{
    normalize::{fold_for_compare, parse_id},
    schema::{self, TableDef},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchKind {
    Exact,
    CaseInsensitive,
    Normalized,
    Mapped,
    NotFound,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MatchKind::Exact => "exact",
            MatchKind::CaseInsensitive => "case-insensitive",
            MatchKind::Normalized => "normalized",
            MatchKind::Mapped => "mapped",
            MatchKind::NotFound => "not-found",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub id: Option<i64>,
    pub kind: MatchKind,
}

impl Resolution {
    pub const NOT_FOUND: Resolution = Resolution {
        id: None,
        kind: MatchKind::NotFound,
    };

    fn found(id: i64, kind: MatchKind) -> Self {
        Self {
            id: Some(id),
            kind,
        }
    }

    pub fn is_found(&self) -> bool {
        self.id.is_some()
    }
}

/// State scoped to one import run: CSV-declared ids that were merged into a
/// different existing row, per table.
#[derive(Debug, Clone, Default)]
pub struct ImportSession {
    remaps: HashMap<&'static str, HashMap<i64, i64>>,
}

impl ImportSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, table: &'static str, csv_id: i64, db_id: i64) {
        debug!("{table}: CSV id {csv_id} resolves to stored id {db_id}");
        self.remaps.entry(table).or_default().insert(csv_id, db_id);
    }

    pub fn mapped(&self, table: &str, csv_id: i64) -> Option<i64> {
        self.remaps.get(table)?.get(&csv_id).copied()
    }

    pub fn remap_count(&self) -> usize {
        self.remaps.values().map(HashMap::len).sum()
    }
}

/// How a foreign-key column finds its target row: which lookup columns to
/// try, in order, for numeric and for textual tokens.
#[derive(Debug)]
pub struct Reference {
    pub table: &'static TableDef,
    pub by_number: &'static [&'static str],
    pub by_text: &'static [&'static str],
}

pub static PRODUCTOR_REF: Reference = Reference {
    table: &schema::PRODUCTOR,
    by_number: &["Id", "cod_productor"],
    by_text: &["cod_productor", "nom_productor"],
};

pub static CODIGO_SAG_REF: Reference = Reference {
    table: &schema::CODIGO_SAG,
    by_number: &["Id", "codigo_sag"],
    by_text: &["codigo_sag"],
};

pub static VARIEDAD_REF: Reference = Reference {
    table: &schema::VARIEDAD,
    by_number: &["Id"],
    by_text: &["nom_variedad"],
};

pub static CUARTEL_REF: Reference = Reference {
    table: &schema::CUARTEL,
    by_number: &["Id", "num_cuartel", "nom_cuartel"],
    by_text: &["nom_cuartel", "num_cuartel"],
};

pub static PLU_REF: Reference = Reference {
    table: &schema::PLU,
    by_number: &["Id", "plu_code"],
    by_text: &["plu_code"],
};

pub struct Resolver<'c> {
    conn: &'c Connection,
}

impl<'c> Resolver<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn resolve(
        &self,
        session: &ImportSession,
        table: &TableDef,
        lookup_column: &str,
        token: &str,
    ) -> rusqlite::Result<Resolution> {
        let id_column = table.id_column.unwrap_or("rowid");
        let numeric = parse_id(token);

        if let Some(csv_id) = numeric
            && lookup_column.eq_ignore_ascii_case(id_column)
            && let Some(db_id) = session.mapped(table.name, csv_id)
        {
            return Ok(Resolution::found(db_id, MatchKind::Mapped));
        }

        let exact = format!(
            "SELECT {id_column} FROM {} WHERE {lookup_column} = ?1 ORDER BY {id_column} LIMIT 1",
            table.name
        );
        if let Some(id) = self.single_id(&exact, token)? {
            return Ok(Resolution::found(id, MatchKind::Exact));
        }
        if numeric.is_some() {
            return Ok(Resolution::NOT_FOUND);
        }

        let lowered = format!(
            "SELECT {id_column} FROM {} WHERE LOWER({lookup_column}) = LOWER(?1) \
             ORDER BY {id_column} LIMIT 1",
            table.name
        );
        if let Some(id) = self.single_id(&lowered, token)? {
            return Ok(Resolution::found(id, MatchKind::CaseInsensitive));
        }

        let target = fold_for_compare(token);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {id_column}, {lookup_column} FROM {} ORDER BY {id_column}",
            table.name
        ))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let Some(candidate) = value_as_text(row.get_ref(1)?) else {
                continue;
            };
            if fold_for_compare(&candidate) == target {
                let id: i64 = row.get(0)?;
                debug!(
                    "{}.{lookup_column}: '{token}' matched '{candidate}' after normalization",
                    table.name
                );
                return Ok(Resolution::found(id, MatchKind::Normalized));
            }
        }

        Ok(Resolution::NOT_FOUND)
    }

    /// Try each lookup column the reference allows for this token's shape.
    pub fn resolve_reference(
        &self,
        session: &ImportSession,
        reference: &Reference,
        token: &str,
    ) -> rusqlite::Result<Resolution> {
        let columns = if parse_id(token).is_some() {
            reference.by_number
        } else {
            reference.by_text
        };
        for column in columns {
            let resolution = self.resolve(session, reference.table, column, token)?;
            if resolution.is_found() {
                return Ok(resolution);
            }
        }
        Ok(Resolution::NOT_FOUND)
    }

    fn single_id(&self, sql: &str, token: &str) -> rusqlite::Result<Option<i64>> {
        self.conn
            .query_row(sql, params![token], |row| row.get(0))
            .optional()
    }
}

fn value_as_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}
