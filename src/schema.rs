//! The fixed relational schema of the tarja database.
//!
//! Every table is described by a static [`TableDef`]: its name, surrogate id
//! column, column list, and the column-definition body of its DDL. The body is
//! kept separate from the table name so the migrator can create a shadow copy
//! under a different name with exactly the same target definition.

/// Schema version written to `PRAGMA user_version` by this build.
pub const CURRENT_VERSION: i32 = 13;

pub const COL_ID: &str = "Id";

/// Role of a table in the import and migration paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Catalog,
    Relation,
    Transactional,
    Metadata,
}

#[derive(Debug)]
pub struct TableDef {
    pub name: &'static str,
    pub id_column: Option<&'static str>,
    pub columns: &'static [&'static str],
    /// Column definitions, including the surrounding parentheses.
    pub body: &'static str,
    pub kind: TableKind,
}

impl TableDef {
    pub fn create_sql(&self) -> String {
        self.create_sql_named(self.name)
    }

    pub fn create_sql_named(&self, name: &str) -> String {
        format!("CREATE TABLE {name} {}", self.body)
    }

    pub fn shadow_name(&self) -> String {
        format!("{}_new", self.name)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

// --- catalogs ---

pub static PRODUCTOR: TableDef = TableDef {
    name: "PRODUCTOR",
    id_column: Some(COL_ID),
    columns: &["Id", "cod_productor", "nom_productor"],
    body: "(Id INTEGER PRIMARY KEY, \
           cod_productor TEXT NOT NULL DEFAULT '', \
           nom_productor TEXT NOT NULL DEFAULT '')",
    kind: TableKind::Catalog,
};

pub static CODIGO_SAG: TableDef = TableDef {
    name: "CODIGO_SAG",
    id_column: Some(COL_ID),
    columns: &["Id", "codigo_sag", "cod_sdp_sag"],
    body: "(Id INTEGER PRIMARY KEY, \
           codigo_sag TEXT NOT NULL DEFAULT '', \
           cod_sdp_sag TEXT NOT NULL DEFAULT '')",
    kind: TableKind::Catalog,
};

pub static VARIEDAD: TableDef = TableDef {
    name: "Variedad",
    id_column: Some(COL_ID),
    columns: &["Id", "nom_variedad"],
    body: "(Id INTEGER PRIMARY KEY, nom_variedad TEXT NOT NULL DEFAULT '')",
    kind: TableKind::Catalog,
};

pub static CUARTEL: TableDef = TableDef {
    name: "Cuartel",
    id_column: Some(COL_ID),
    columns: &["Id", "num_cuartel", "nom_cuartel"],
    body: "(Id INTEGER PRIMARY KEY, \
           num_cuartel TEXT NOT NULL DEFAULT '', \
           nom_cuartel TEXT NOT NULL DEFAULT '')",
    kind: TableKind::Catalog,
};

pub static EMBALAJE: TableDef = TableDef {
    name: "Embalaje",
    id_column: Some(COL_ID),
    columns: &["Id", "codigo"],
    body: "(Id INTEGER PRIMARY KEY, codigo TEXT NOT NULL DEFAULT '')",
    kind: TableKind::Catalog,
};

pub static ETIQUETA: TableDef = TableDef {
    name: "Etiqueta",
    id_column: Some(COL_ID),
    columns: &["Id", "nombre", "nombre_imagen"],
    body: "(Id INTEGER PRIMARY KEY, \
           nombre TEXT NOT NULL DEFAULT '', \
           nombre_imagen TEXT NOT NULL DEFAULT '')",
    kind: TableKind::Catalog,
};

pub static LOGO: TableDef = TableDef {
    name: "Logo",
    id_column: Some(COL_ID),
    columns: &["Id", "nom_cod", "nombre"],
    body: "(Id INTEGER PRIMARY KEY, \
           nom_cod TEXT NOT NULL DEFAULT '', \
           nombre TEXT NOT NULL DEFAULT '')",
    kind: TableKind::Catalog,
};

pub static PLU: TableDef = TableDef {
    name: "PLU",
    id_column: Some(COL_ID),
    columns: &["Id", "plu_code", "description"],
    body: "(Id INTEGER PRIMARY KEY, plu_code INTEGER NOT NULL, description TEXT)",
    kind: TableKind::Catalog,
};

pub static PROCEDENCIA_PROD: TableDef = TableDef {
    name: "PROCEDENCIA_PROD",
    id_column: Some(COL_ID),
    columns: &["Id", "codigo", "nombre"],
    body: "(Id INTEGER PRIMARY KEY, \
           codigo TEXT NOT NULL DEFAULT '', \
           nombre TEXT NOT NULL DEFAULT '')",
    kind: TableKind::Catalog,
};

// --- relation and traceability ---

pub static VARIEDAD_PLU: TableDef = TableDef {
    name: "VARIEDAD_PLU",
    id_column: None,
    columns: &["variedad_id", "plu_id"],
    body: "(variedad_id INTEGER NOT NULL REFERENCES Variedad(Id), \
           plu_id INTEGER NOT NULL REFERENCES PLU(Id), \
           PRIMARY KEY (variedad_id, plu_id))",
    kind: TableKind::Relation,
};

pub static TRAZABILIDAD: TableDef = TableDef {
    name: "CODIGOS_TRAZABILIDAD",
    id_column: Some(COL_ID),
    columns: &["Id", "productor_id", "codigo_sag_id", "variedad_id", "cuartel_id"],
    body: "(Id INTEGER PRIMARY KEY, \
           productor_id INTEGER NOT NULL REFERENCES PRODUCTOR(Id), \
           codigo_sag_id INTEGER NOT NULL REFERENCES CODIGO_SAG(Id), \
           variedad_id INTEGER NOT NULL REFERENCES Variedad(Id), \
           cuartel_id INTEGER NOT NULL REFERENCES Cuartel(Id))",
    kind: TableKind::Relation,
};

// --- transactional ---

pub static ENCABEZADO: TableDef = TableDef {
    name: "TARJA_ENCABEZADO",
    id_column: Some("num_tarja"),
    columns: &[
        "num_tarja",
        "num_pallet",
        "fecha_embalaje",
        "Embalaje_id",
        "Etiqueta_id",
        "variedad",
        "Recibidor",
        "Logo_nom_cod",
        "ProcProd",
        "ProcCom",
        "PLU",
        "status",
    ],
    body: "(num_tarja INTEGER PRIMARY KEY, \
           num_pallet INTEGER, \
           fecha_embalaje TEXT NOT NULL DEFAULT '', \
           Embalaje_id INTEGER NOT NULL DEFAULT 0, \
           Etiqueta_id INTEGER NOT NULL DEFAULT 0, \
           variedad TEXT NOT NULL DEFAULT '', \
           Recibidor TEXT, \
           Logo_nom_cod TEXT NOT NULL DEFAULT '', \
           ProcProd INTEGER, \
           ProcCom INTEGER, \
           PLU INTEGER, \
           status TEXT NOT NULL DEFAULT 'pendiente' CHECK (status IN ('pendiente', 'enviado')))",
    kind: TableKind::Transactional,
};

pub static DETALLE: TableDef = TableDef {
    name: "TARJA_DETALLE",
    id_column: Some("id_detalle"),
    columns: &[
        "id_detalle",
        "num_tarja",
        "folio",
        "csg",
        "lote",
        "sdp",
        "linea",
        "categoria",
        "cantidad_cajas",
    ],
    body: "(id_detalle INTEGER PRIMARY KEY, \
           num_tarja INTEGER NOT NULL REFERENCES TARJA_ENCABEZADO(num_tarja) ON DELETE CASCADE, \
           folio INTEGER, \
           csg TEXT, \
           lote TEXT, \
           sdp TEXT, \
           linea TEXT, \
           categoria TEXT, \
           cantidad_cajas INTEGER NOT NULL DEFAULT 0)",
    kind: TableKind::Transactional,
};

// --- metadata ---

pub const META_KEY_IMPORT_HASH: &str = "csv_import_hash";

pub static METADATA: TableDef = TableDef {
    name: "APP_METADATA",
    id_column: None,
    columns: &["meta_key", "meta_value"],
    body: "(meta_key TEXT PRIMARY KEY, meta_value TEXT)",
    kind: TableKind::Metadata,
};

/// Every table, parents before children. Creation, migration, and the
/// destructive fallback all walk this order.
pub static ALL_TABLES: &[&TableDef] = &[
    &PRODUCTOR,
    &CODIGO_SAG,
    &VARIEDAD,
    &CUARTEL,
    &EMBALAJE,
    &ETIQUETA,
    &LOGO,
    &PLU,
    &PROCEDENCIA_PROD,
    &VARIEDAD_PLU,
    &TRAZABILIDAD,
    &ENCABEZADO,
    &DETALLE,
    &METADATA,
];

pub fn table_by_name(name: &str) -> Option<&'static TableDef> {
    ALL_TABLES
        .iter()
        .copied()
        .find(|table| table.name.eq_ignore_ascii_case(name))
}

/// One foreign-key edge checked by the post-import integrity sweep.
#[derive(Debug, Clone, Copy)]
pub struct ForeignKey {
    pub table: &'static TableDef,
    pub column: &'static str,
    pub target: &'static TableDef,
}

pub static IMPORT_FOREIGN_KEYS: &[ForeignKey] = &[
    ForeignKey {
        table: &VARIEDAD_PLU,
        column: "variedad_id",
        target: &VARIEDAD,
    },
    ForeignKey {
        table: &VARIEDAD_PLU,
        column: "plu_id",
        target: &PLU,
    },
    ForeignKey {
        table: &TRAZABILIDAD,
        column: "productor_id",
        target: &PRODUCTOR,
    },
    ForeignKey {
        table: &TRAZABILIDAD,
        column: "codigo_sag_id",
        target: &CODIGO_SAG,
    },
    ForeignKey {
        table: &TRAZABILIDAD,
        column: "variedad_id",
        target: &VARIEDAD,
    },
    ForeignKey {
        table: &TRAZABILIDAD,
        column: "cuartel_id",
        target: &CUARTEL,
    },
];
