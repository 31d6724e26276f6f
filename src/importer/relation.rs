//! Importers for the relation and traceability tables. Every column is a
//! reference resolved through the [`Resolver`]; rows are deduplicated by their
//! composite key before insert.

use log::debug;
use rusqlite::{Connection, OptionalExtension, params};

use super::{RowOutcome, TableImporter};
use crate::{
    error::RowError,
    headers::{ColumnSpec, HeaderMapping},
    io_utils::CsvRow,
    normalize::parse_id,
    resolver::{
        CODIGO_SAG_REF, CUARTEL_REF, ImportSession, PLU_REF, PRODUCTOR_REF, Reference, Resolver,
        VARIEDAD_REF,
    },
    schema::{self, COL_ID, TableDef},
};

/// Resolve the token under `column` through `reference`, or explain why not.
fn resolve_column(
    resolver: &Resolver<'_>,
    session: &ImportSession,
    mapping: &HeaderMapping,
    row: &CsvRow,
    column: &'static str,
    reference: &Reference,
) -> rusqlite::Result<Result<i64, RowError>> {
    let Some(token) = mapping.value(row, column) else {
        return Ok(Err(RowError::MissingField {
            line: row.line,
            field: column,
        }));
    };
    let resolution = resolver.resolve_reference(session, reference, token)?;
    Ok(resolution.id.ok_or_else(|| RowError::UnresolvedReference {
        line: row.line,
        table: reference.table.name,
        token: token.to_string(),
    }))
}

macro_rules! resolve_or_reject {
    ($expr:expr) => {
        match $expr? {
            Ok(id) => id,
            Err(err) => return Ok(RowOutcome::Rejected(err)),
        }
    };
}

#[derive(Debug)]
pub struct VariedadPluImporter;

pub static VARIEDAD_PLU: VariedadPluImporter = VariedadPluImporter;

const VARIEDAD_PLU_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::new("variedad", &["nom_variedad", "variedad_id", "id_variedad"]),
    ColumnSpec::new("plu", &["plu_code", "plu_id", "id_plu"]),
];

impl TableImporter for VariedadPluImporter {
    fn file_name(&self) -> &'static str {
        "VARIEDAD_PLU.csv"
    }

    fn table(&self) -> &'static TableDef {
        &schema::VARIEDAD_PLU
    }

    fn columns(&self) -> Vec<ColumnSpec> {
        VARIEDAD_PLU_COLUMNS.to_vec()
    }

    fn import_row(
        &self,
        conn: &Connection,
        session: &mut ImportSession,
        mapping: &HeaderMapping,
        row: &CsvRow,
    ) -> rusqlite::Result<RowOutcome> {
        let resolver = Resolver::new(conn);
        let variedad_id = resolve_or_reject!(resolve_column(
            &resolver,
            session,
            mapping,
            row,
            "variedad",
            &VARIEDAD_REF
        ));
        let plu_id = resolve_or_reject!(resolve_column(
            &resolver, session, mapping, row, "plu", &PLU_REF
        ));

        let written = conn.execute(
            "INSERT OR IGNORE INTO VARIEDAD_PLU (variedad_id, plu_id) VALUES (?1, ?2)",
            params![variedad_id, plu_id],
        )?;
        if written == 0 {
            debug!(
                "VARIEDAD_PLU line {}: pair ({variedad_id}, {plu_id}) already present",
                row.line
            );
            return Ok(RowOutcome::Duplicate);
        }
        Ok(RowOutcome::Inserted)
    }
}

#[derive(Debug)]
pub struct TrazabilidadImporter;

pub static TRAZABILIDAD: TrazabilidadImporter = TrazabilidadImporter;

const TRAZABILIDAD_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::new(COL_ID, &[]),
    ColumnSpec::new(
        "productor",
        &["productor_id", "cod_productor", "cod_productor_id"],
    ),
    ColumnSpec::new(
        "codigo_sag",
        &["codigo_sag_id", "cod_sag", "cod_sag_id", "codigo", "codigo_id"],
    ),
    ColumnSpec::new("variedad", &["variedad_id", "nom_variedad", "id_variedad"]),
    ColumnSpec::new("cuartel", &["cuartel_id", "nom_cuartel", "num_cuartel"]),
];

impl TableImporter for TrazabilidadImporter {
    fn file_name(&self) -> &'static str {
        "CODIGOS_TRAZABILIDAD.csv"
    }

    fn table(&self) -> &'static TableDef {
        &schema::TRAZABILIDAD
    }

    fn columns(&self) -> Vec<ColumnSpec> {
        TRAZABILIDAD_COLUMNS.to_vec()
    }

    fn import_row(
        &self,
        conn: &Connection,
        session: &mut ImportSession,
        mapping: &HeaderMapping,
        row: &CsvRow,
    ) -> rusqlite::Result<RowOutcome> {
        let resolver = Resolver::new(conn);
        let productor_id = resolve_or_reject!(resolve_column(
            &resolver,
            session,
            mapping,
            row,
            "productor",
            &PRODUCTOR_REF
        ));
        let codigo_sag_id = resolve_or_reject!(resolve_column(
            &resolver,
            session,
            mapping,
            row,
            "codigo_sag",
            &CODIGO_SAG_REF
        ));
        let variedad_id = resolve_or_reject!(resolve_column(
            &resolver,
            session,
            mapping,
            row,
            "variedad",
            &VARIEDAD_REF
        ));
        let cuartel_id = resolve_or_reject!(resolve_column(
            &resolver,
            session,
            mapping,
            row,
            "cuartel",
            &CUARTEL_REF
        ));

        let existing: Option<i64> = conn
            .query_row(
                "SELECT Id FROM CODIGOS_TRAZABILIDAD \
                 WHERE productor_id = ?1 AND codigo_sag_id = ?2 AND variedad_id = ?3 AND cuartel_id = ?4 \
                 ORDER BY Id LIMIT 1",
                params![productor_id, codigo_sag_id, variedad_id, cuartel_id],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            debug!(
                "CODIGOS_TRAZABILIDAD line {}: combination already stored as id {id}",
                row.line
            );
            return Ok(RowOutcome::Duplicate);
        }

        match mapping.value(row, COL_ID).and_then(parse_id) {
            Some(id) => conn.execute(
                "INSERT OR REPLACE INTO CODIGOS_TRAZABILIDAD \
                 (Id, productor_id, codigo_sag_id, variedad_id, cuartel_id) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, productor_id, codigo_sag_id, variedad_id, cuartel_id],
            )?,
            None => conn.execute(
                "INSERT INTO CODIGOS_TRAZABILIDAD \
                 (productor_id, codigo_sag_id, variedad_id, cuartel_id) VALUES (?1, ?2, ?3, ?4)",
                params![productor_id, codigo_sag_id, variedad_id, cuartel_id],
            )?,
        };
        Ok(RowOutcome::Inserted)
    }
}
