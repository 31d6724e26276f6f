//! Importers for the catalog tables.
//!
//! Every catalog follows the same merge rules, so one [`CatalogImporter`]
//! value per table describes the file, its natural key, and its attribute
//! columns. A row whose natural key already exists is merged into that row,
//! never duplicated; a CSV-declared id that differs from the stored one is
//! registered in the [`ImportSession`] so later files can still reference it.

use std::iter;

use itertools::Itertools;
use log::debug;
use rusqlite::{Connection, params_from_iter, types::Value};

use super::{RowOutcome, TableImporter};
use crate::{
    error::RowError,
    headers::{ColumnSpec, HeaderMapping},
    io_utils::CsvRow,
    normalize::parse_id,
    resolver::{ImportSession, Resolver},
    schema::{self, COL_ID, TableDef},
};

const ID_COLUMN: ColumnSpec = ColumnSpec::new(COL_ID, &[]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub column: ColumnSpec,
    pub required: bool,
    pub kind: FieldKind,
}

impl Field {
    const fn required(name: &'static str, aliases: &'static [&'static str]) -> Self {
        Self {
            column: ColumnSpec::new(name, aliases),
            required: true,
            kind: FieldKind::Text,
        }
    }

    const fn optional(name: &'static str, aliases: &'static [&'static str]) -> Self {
        Self {
            column: ColumnSpec::new(name, aliases),
            required: false,
            kind: FieldKind::Text,
        }
    }

    const fn integer(self) -> Self {
        Self {
            kind: FieldKind::Integer,
            ..self
        }
    }
}

#[derive(Debug)]
pub struct CatalogImporter {
    pub file_name: &'static str,
    pub table: &'static TableDef,
    /// Column matched against stored rows to detect an existing entry. Must
    /// be one of the required fields.
    pub natural_key: &'static str,
    pub fields: &'static [Field],
}

pub static PRODUCTOR: CatalogImporter = CatalogImporter {
    file_name: "PRODUCTOR.csv",
    table: &schema::PRODUCTOR,
    natural_key: "cod_productor",
    fields: &[
        Field::required("cod_productor", &["codigo", "cod"]),
        Field::required("nom_productor", &["nombre", "productor"]),
    ],
};

pub static CODIGO_SAG: CatalogImporter = CatalogImporter {
    file_name: "CODIGO_SAG.csv",
    table: &schema::CODIGO_SAG,
    natural_key: "codigo_sag",
    fields: &[
        Field::required("codigo_sag", &["codigo", "cod_sag"]),
        Field::optional("cod_sdp_sag", &["cod_sdp", "sdp"]),
    ],
};

pub static VARIEDAD: CatalogImporter = CatalogImporter {
    file_name: "Variedad.csv",
    table: &schema::VARIEDAD,
    natural_key: "nom_variedad",
    fields: &[Field::required("nom_variedad", &["variedad", "nombre"])],
};

pub static CUARTEL: CatalogImporter = CatalogImporter {
    file_name: "Cuartel.csv",
    table: &schema::CUARTEL,
    natural_key: "nom_cuartel",
    fields: &[
        Field::optional("num_cuartel", &["numero", "num"]),
        Field::required("nom_cuartel", &["cuartel", "nombre"]),
    ],
};

pub static EMBALAJE: CatalogImporter = CatalogImporter {
    file_name: "Embalaje.csv",
    table: &schema::EMBALAJE,
    natural_key: "codigo",
    fields: &[Field::required("codigo", &["cod_embalaje", "embalaje"])],
};

pub static ETIQUETA: CatalogImporter = CatalogImporter {
    file_name: "Etiqueta.csv",
    table: &schema::ETIQUETA,
    natural_key: "nombre",
    fields: &[
        Field::required("nombre", &["nom_etiqueta", "etiqueta"]),
        Field::optional("nombre_imagen", &["imagen", "imagen_uri"]),
    ],
};

pub static LOGO: CatalogImporter = CatalogImporter {
    file_name: "Logo.csv",
    table: &schema::LOGO,
    natural_key: "nom_cod",
    fields: &[
        Field::required("nom_cod", &["nom_cod_logo", "nomcod"]),
        Field::optional("nombre", &["imagen_uri", "imagen", "nombre_imagen"]),
    ],
};

pub static PLU: CatalogImporter = CatalogImporter {
    file_name: "PLU.csv",
    table: &schema::PLU,
    natural_key: "plu_code",
    fields: &[
        Field::required("plu_code", &["plu", "codigo"]).integer(),
        Field::optional("description", &["desc", "descripcion"]),
    ],
};

pub static PROCEDENCIA_PROD: CatalogImporter = CatalogImporter {
    file_name: "PROCEDENCIA_PROD.csv",
    table: &schema::PROCEDENCIA_PROD,
    natural_key: "codigo",
    fields: &[
        Field::required("codigo", &["cod_procedencia", "procedencia"]),
        Field::optional("nombre", &["nom_procedencia"]),
    ],
};

impl CatalogImporter {
    /// Overwrite the supplied attributes of an existing row. Returns whether
    /// anything actually changed.
    fn refresh(
        &self,
        conn: &Connection,
        id: i64,
        values: &[(&'static str, Value)],
    ) -> rusqlite::Result<bool> {
        let updates: Vec<&(&'static str, Value)> = values
            .iter()
            .filter(|(column, _)| *column != self.natural_key)
            .collect();
        if updates.is_empty() {
            return Ok(false);
        }
        let assignments = updates
            .iter()
            .enumerate()
            .map(|(idx, (column, _))| format!("{column} = ?{}", idx + 1))
            .join(", ");
        let unchanged = updates
            .iter()
            .enumerate()
            .map(|(idx, (column, _))| format!("{column} IS ?{}", idx + 1))
            .join(" AND ");
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE {COL_ID} = ?{} AND NOT ({unchanged})",
            self.table.name,
            updates.len() + 1
        );
        let params = updates
            .iter()
            .map(|(_, value)| value.clone())
            .chain(iter::once(Value::Integer(id)));
        Ok(conn.execute(&sql, params_from_iter(params))? > 0)
    }

    /// Insert a new row, honouring the CSV id when one was declared.
    fn insert(
        &self,
        conn: &Connection,
        csv_id: Option<i64>,
        values: &[(&'static str, Value)],
    ) -> rusqlite::Result<i64> {
        let mut columns: Vec<&str> = Vec::with_capacity(values.len() + 1);
        let mut params: Vec<Value> = Vec::with_capacity(values.len() + 1);
        if let Some(id) = csv_id {
            columns.push(COL_ID);
            params.push(Value::Integer(id));
        }
        for (column, value) in values {
            columns.push(column);
            params.push(value.clone());
        }
        let verb = if csv_id.is_some() {
            "INSERT OR REPLACE"
        } else {
            "INSERT"
        };
        let sql = format!(
            "{verb} INTO {} ({}) VALUES ({})",
            self.table.name,
            columns.join(", "),
            (1..=params.len()).map(|idx| format!("?{idx}")).join(", ")
        );
        conn.execute(&sql, params_from_iter(params))?;
        Ok(csv_id.unwrap_or_else(|| conn.last_insert_rowid()))
    }
}

impl TableImporter for CatalogImporter {
    fn file_name(&self) -> &'static str {
        self.file_name
    }

    fn table(&self) -> &'static TableDef {
        self.table
    }

    fn columns(&self) -> Vec<ColumnSpec> {
        iter::once(ID_COLUMN)
            .chain(self.fields.iter().map(|field| field.column))
            .collect()
    }

    fn import_row(
        &self,
        conn: &Connection,
        session: &mut ImportSession,
        mapping: &HeaderMapping,
        row: &CsvRow,
    ) -> rusqlite::Result<RowOutcome> {
        let line = row.line;
        // A non-numeric id is treated as absent; the natural key still applies.
        let csv_id = mapping.value(row, COL_ID).and_then(parse_id);

        let mut values: Vec<(&'static str, Value)> = Vec::with_capacity(self.fields.len());
        for field in self.fields {
            let name = field.column.name;
            let Some(raw) = mapping.value(row, name) else {
                if field.required {
                    return Ok(RowOutcome::Rejected(RowError::MissingField { line, field: name }));
                }
                continue;
            };
            let value = match field.kind {
                FieldKind::Text => Value::Text(raw.to_string()),
                FieldKind::Integer => match parse_id(raw) {
                    Some(number) => Value::Integer(number),
                    None => {
                        return Ok(RowOutcome::Rejected(RowError::InvalidValue {
                            line,
                            field: name,
                            value: raw.to_string(),
                        }));
                    }
                },
            };
            values.push((name, value));
        }

        let Some(key) = mapping.value(row, self.natural_key) else {
            return Ok(RowOutcome::Rejected(RowError::MissingField {
                line,
                field: self.natural_key,
            }));
        };

        let existing = Resolver::new(conn).resolve(session, self.table, self.natural_key, key)?;
        match existing.id {
            Some(existing_id) => {
                let remapped = match csv_id {
                    Some(declared) if declared != existing_id => {
                        session.register(self.table.name, declared, existing_id);
                        true
                    }
                    _ => false,
                };
                let refreshed = self.refresh(conn, existing_id, &values)?;
                debug!(
                    "{} line {line}: '{key}' matched id {existing_id} ({}){}",
                    self.file_name,
                    existing.kind,
                    if refreshed { ", attributes refreshed" } else { "" }
                );
                Ok(if remapped || refreshed {
                    RowOutcome::Merged
                } else {
                    RowOutcome::Unchanged
                })
            }
            None => {
                let id = self.insert(conn, csv_id, &values)?;
                if let Some(declared) = csv_id {
                    session.register(self.table.name, declared, id);
                }
                Ok(RowOutcome::Inserted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_utils::tokenize_line;

    fn setup(table: &TableDef) -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(&table.create_sql()).expect("create");
        conn
    }

    fn run_rows(
        importer: &CatalogImporter,
        conn: &Connection,
        session: &mut ImportSession,
        lines: &[&str],
    ) -> Vec<RowOutcome> {
        let header = tokenize_line(lines[0]);
        let mapping = HeaderMapping::synchronize(&header, &importer.columns());
        lines[1..]
            .iter()
            .enumerate()
            .map(|(idx, line)| {
                let row = CsvRow {
                    line: idx + 2,
                    fields: tokenize_line(line),
                };
                importer
                    .import_row(conn, session, &mapping, &row)
                    .expect("row import")
            })
            .collect()
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .expect("count")
    }

    #[test]
    fn natural_key_match_remaps_instead_of_duplicating() {
        let conn = setup(&schema::PRODUCTOR);
        conn.execute(
            "INSERT INTO PRODUCTOR (Id, cod_productor, nom_productor) VALUES (3, 'P01', 'Agrícola Sur')",
            [],
        )
        .expect("seed");
        let mut session = ImportSession::new();
        let outcomes = run_rows(
            &PRODUCTOR,
            &conn,
            &mut session,
            &["Id,cod_productor,nom_productor", "15,P01,Agrícola Sur", "16,P02,Los Robles"],
        );
        assert_eq!(outcomes, vec![RowOutcome::Merged, RowOutcome::Inserted]);
        assert_eq!(count(&conn, "PRODUCTOR"), 2);
        assert_eq!(session.mapped("PRODUCTOR", 15), Some(3));
        assert_eq!(session.mapped("PRODUCTOR", 16), Some(16));
    }

    #[test]
    fn unchanged_rows_are_skipped_and_changed_attributes_merge() {
        let conn = setup(&schema::CODIGO_SAG);
        let mut session = ImportSession::new();
        let header = "Id,codigo_sag,cod_sdp";
        let first = run_rows(&CODIGO_SAG, &conn, &mut session, &[header, "1,SAG-9,100"]);
        assert_eq!(first, vec![RowOutcome::Inserted]);
        let again = run_rows(&CODIGO_SAG, &conn, &mut session, &[header, "1,SAG-9,100"]);
        assert_eq!(again, vec![RowOutcome::Unchanged]);
        let changed = run_rows(&CODIGO_SAG, &conn, &mut session, &[header, "1,SAG-9,200"]);
        assert_eq!(changed, vec![RowOutcome::Merged]);
        let sdp: String = conn
            .query_row("SELECT cod_sdp_sag FROM CODIGO_SAG WHERE Id = 1", [], |row| row.get(0))
            .expect("select");
        assert_eq!(sdp, "200");
    }

    #[test]
    fn blank_required_fields_and_bad_integers_are_rejected() {
        let conn = setup(&schema::PLU);
        let mut session = ImportSession::new();
        let outcomes = run_rows(
            &PLU,
            &conn,
            &mut session,
            &["Id,plu,desc", "1,,vacío", "2,40x1,raro", "3,4045,Lapins"],
        );
        assert_eq!(
            outcomes,
            vec![
                RowOutcome::Rejected(RowError::MissingField {
                    line: 2,
                    field: "plu_code"
                }),
                RowOutcome::Rejected(RowError::InvalidValue {
                    line: 3,
                    field: "plu_code",
                    value: "40x1".into()
                }),
                RowOutcome::Inserted,
            ]
        );
        assert_eq!(count(&conn, "PLU"), 1);
    }

    #[test]
    fn rows_without_an_id_get_an_assigned_one() {
        let conn = setup(&schema::VARIEDAD);
        let mut session = ImportSession::new();
        let outcomes = run_rows(
            &VARIEDAD,
            &conn,
            &mut session,
            &["nom_variedad", "Lapins", "LAPÍNS ", "Santina"],
        );
        assert_eq!(
            outcomes,
            vec![RowOutcome::Inserted, RowOutcome::Unchanged, RowOutcome::Inserted]
        );
        assert_eq!(count(&conn, "Variedad"), 2);
        assert_eq!(session.remap_count(), 0);
    }
}
