mod common;

use std::fs;

use common::{TestWorkspace, count, ids};
use tarja_sync::{
    db::{Database, OpenOptions},
    error::RowError,
    importer::FileStatus,
    orchestrator::{ImportOptions, run_import},
    schema::META_KEY_IMPORT_HASH,
};

fn open(workspace: &TestWorkspace) -> Database {
    Database::open(&workspace.db_path(), &OpenOptions::default()).expect("open database")
}

fn import(workspace: &TestWorkspace) -> tarja_sync::orchestrator::RunSummary {
    let mut db = open(workspace);
    run_import(&mut db, &workspace.folder(), &ImportOptions::default()).expect("import run")
}

#[test]
fn first_import_fills_every_table_and_commits_the_hash() {
    let workspace = TestWorkspace::standard();
    let summary = import(&workspace);

    assert!(!summary.skipped);
    assert!(summary.hash_committed);
    assert!(summary.violations.is_empty());
    assert_eq!(summary.row_errors(), 0);
    assert_eq!(summary.inserted(), 19);
    assert_eq!(summary.files.len(), 10);

    let conn = workspace.connect();
    assert_eq!(ids(&conn, "PRODUCTOR"), vec![3, 4]);
    assert_eq!(ids(&conn, "Cuartel"), vec![10, 11]);
    assert_eq!(count(&conn, "VARIEDAD_PLU"), 2);
    let trazas: Vec<(i64, i64, i64, i64)> = {
        let mut stmt = conn
            .prepare(
                "SELECT productor_id, codigo_sag_id, variedad_id, cuartel_id \
                 FROM CODIGOS_TRAZABILIDAD ORDER BY Id",
            )
            .expect("prepare");
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
            .expect("query")
            .collect::<rusqlite::Result<_>>()
            .expect("rows");
        rows
    };
    assert_eq!(trazas, vec![(3, 1, 1, 10), (4, 2, 2, 11)]);

    let db = open(&workspace);
    assert_eq!(
        db.meta_get(META_KEY_IMPORT_HASH).expect("meta").as_deref(),
        Some(summary.hash.as_str())
    );
    assert!(db.foreign_keys_enabled().expect("pragma"));
}

#[test]
fn unchanged_folder_is_a_no_op() {
    let workspace = TestWorkspace::standard();
    import(&workspace);
    let before = workspace.connect().query_row(
        "SELECT COUNT(*) FROM PRODUCTOR",
        [],
        |r| r.get::<_, i64>(0),
    );

    let second = import(&workspace);
    assert!(second.skipped);
    assert!(second.files.is_empty());
    assert_eq!(second.inserted(), 0);
    assert!(second.to_string().contains("nothing to do"));
    let after = workspace.connect().query_row(
        "SELECT COUNT(*) FROM PRODUCTOR",
        [],
        |r| r.get::<_, i64>(0),
    );
    assert_eq!(before.expect("before"), after.expect("after"));
}

#[test]
fn empty_traceability_table_forces_a_reimport() {
    let workspace = TestWorkspace::standard();
    import(&workspace);
    workspace
        .connect()
        .execute("DELETE FROM CODIGOS_TRAZABILIDAD", [])
        .expect("clear traceability");

    let healed = import(&workspace);
    assert!(!healed.skipped);
    let traza = healed
        .file("CODIGOS_TRAZABILIDAD.csv")
        .expect("traceability report");
    assert_eq!(traza.inserted, 2);
    assert_eq!(healed.file("Variedad.csv").expect("variedad").inserted, 0);
    assert_eq!(count(&workspace.connect(), "CODIGOS_TRAZABILIDAD"), 2);
}

#[test]
fn declared_ids_merge_by_natural_key_and_stay_resolvable() {
    let workspace = TestWorkspace::standard();
    import(&workspace);

    // A later export renumbered P01 as 15 and references it by that id.
    workspace.write_csv(
        "PRODUCTOR.csv",
        "Id,cod_productor,nom_productor\n15,P01,Agrícola Sur\n4,P02,\"Los Robles, Ltda.\"\n",
    );
    workspace.write_csv(
        "CODIGOS_TRAZABILIDAD.csv",
        "Id,productor,codigo_sag,variedad,cuartel\n1,3,SAG-100,Lapins,10\n\
         2,P02,SAG-200,santina,norte\n3,15,SAG-100,Bing,11\n",
    );
    let summary = import(&workspace);

    let productor = summary.file("PRODUCTOR.csv").expect("productor report");
    assert_eq!((productor.inserted, productor.merged, productor.skipped), (0, 1, 1));
    let traza = summary
        .file("CODIGOS_TRAZABILIDAD.csv")
        .expect("traceability report");
    assert_eq!((traza.inserted, traza.skipped), (1, 2));
    assert!(traza.errors.is_empty());

    let conn = workspace.connect();
    assert_eq!(ids(&conn, "PRODUCTOR"), vec![3, 4]);
    let productor_id: i64 = conn
        .query_row(
            "SELECT productor_id FROM CODIGOS_TRAZABILIDAD WHERE Id = 3",
            [],
            |r| r.get(0),
        )
        .expect("new traceability row");
    assert_eq!(productor_id, 3);
    assert!(summary.hash_committed);
}

#[test]
fn names_differing_in_accents_case_or_spacing_resolve_alike() {
    let workspace = TestWorkspace::standard();
    workspace.write_csv(
        "CODIGOS_TRAZABILIDAD.csv",
        "Id,productor,codigo_sag,variedad,cuartel\n\
         1,Agrícola Sur,SAG-100,Lapins,El Álamo\n\
         2,agricola   SUR,sag-100,  LÁPINS ,el alamo\n",
    );
    let summary = import(&workspace);
    let traza = summary
        .file("CODIGOS_TRAZABILIDAD.csv")
        .expect("traceability report");
    // The second row resolves to the same four ids, so it is a duplicate.
    assert_eq!((traza.inserted, traza.skipped), (1, 1));
    assert!(traza.errors.is_empty());
}

#[test]
fn unresolved_references_are_row_errors_not_file_failures() {
    let workspace = TestWorkspace::standard();
    workspace.write_csv(
        "VARIEDAD_PLU.csv",
        "variedad,plu\nLapins,4045\nRegina,4045\nBing,9999\n",
    );
    let reports = workspace.path().join("reports");
    let mut db = open(&workspace);
    let options = ImportOptions {
        force: false,
        reports_dir: Some(reports.clone()),
    };
    let summary = run_import(&mut db, &workspace.folder(), &options).expect("import run");

    let relation = summary.file("VARIEDAD_PLU.csv").expect("relation report");
    assert_eq!(relation.status, FileStatus::Imported);
    assert_eq!(relation.inserted, 1);
    assert_eq!(relation.errors.len(), 2);
    assert!(matches!(
        &relation.errors[0],
        RowError::UnresolvedReference { line: 3, table: "Variedad", token } if token == "Regina"
    ));
    assert!(summary.hash_committed);

    let failed = fs::read_to_string(reports.join("FAILED_VARIEDAD_PLU.csv")).expect("report");
    assert_eq!(failed, "variedad,plu\nRegina,4045\nBing,9999\n");
}

#[test]
fn orphaned_traceability_rows_withhold_the_hash() {
    let workspace = TestWorkspace::standard();
    let first = import(&workspace);
    workspace
        .connect()
        .execute_batch(
            "PRAGMA foreign_keys = OFF;
             INSERT INTO CODIGOS_TRAZABILIDAD (Id, productor_id, codigo_sag_id, variedad_id, cuartel_id) \
             VALUES (99, 777, 1, 1, 10);",
        )
        .expect("inject orphan");

    workspace.write_csv("Embalaje.csv", "Id,codigo\n1,CB4\n2,CB5\n3,CB6\n");
    let second = import(&workspace);

    assert!(!second.violations.is_empty());
    let violation = &second.violations[0];
    assert_eq!(
        (violation.table, violation.column, violation.target, violation.orphans),
        ("CODIGOS_TRAZABILIDAD", "productor_id", "PRODUCTOR", 1)
    );
    assert!(!second.hash_committed);
    assert!(second.to_string().contains("hash withheld"));

    let db = open(&workspace);
    assert_eq!(
        db.meta_get(META_KEY_IMPORT_HASH).expect("meta").as_deref(),
        Some(first.hash.as_str())
    );
}

#[test]
fn embalaje_reimport_merges_by_code() {
    let workspace = TestWorkspace::new();
    workspace.write_csv("Embalaje.csv", "Id,codigo\n1,CB4\n2,CB5\n");

    let first = import(&workspace);
    let embalaje = first.file("Embalaje.csv").expect("embalaje report");
    assert_eq!((embalaje.inserted, embalaje.skipped), (2, 0));
    assert_eq!(
        first.file("PLU.csv").expect("plu report").status,
        FileStatus::Missing
    );
    assert!(first.hash_committed);

    // Traceability is empty, so the unchanged folder is evaluated again.
    let second = import(&workspace);
    let embalaje = second.file("Embalaje.csv").expect("embalaje report");
    assert_eq!((embalaje.inserted, embalaje.merged, embalaje.skipped), (0, 0, 2));

    workspace.write_csv("Embalaje.csv", "Id,codigo\n1,CB4\n20,CB5\n");
    let third = import(&workspace);
    assert_ne!(third.hash, second.hash);
    let embalaje = third.file("Embalaje.csv").expect("embalaje report");
    assert_eq!((embalaje.inserted, embalaje.merged, embalaje.skipped), (0, 1, 1));
    assert_eq!(ids(&workspace.connect(), "Embalaje"), vec![1, 2]);
}

#[test]
fn a_broken_file_rolls_back_alone() {
    let workspace = TestWorkspace::standard();
    workspace.write_csv("PLU.csv", "\n\n");
    let summary = import(&workspace);

    let plu = summary.file("PLU.csv").expect("plu report");
    assert!(plu.is_failed());
    assert_eq!(summary.failed_files().count(), 1);
    assert_eq!(summary.file("Embalaje.csv").expect("embalaje").inserted, 2);
    let relation = summary.file("VARIEDAD_PLU.csv").expect("relation report");
    assert_eq!(relation.errors.len(), 2);
    assert!(summary.hash_committed);
    assert_eq!(count(&workspace.connect(), "PLU"), 0);
}

#[test]
fn a_rolled_back_file_does_not_defeat_the_unchanged_folder_skip() {
    let workspace = TestWorkspace::standard();
    workspace.write_csv("Etiqueta.csv", "\n\n");
    let first = import(&workspace);
    assert!(first.file("Etiqueta.csv").expect("etiqueta").is_failed());
    assert!(first.violations.is_empty());
    assert!(first.hash_committed);

    let second = import(&workspace);
    assert!(second.skipped);
    assert!(second.files.is_empty());

    // Fixing the file changes the folder hash, so it is picked up again.
    workspace.write_csv("Etiqueta.csv", "Id,nombre\n1,Atacama\n");
    let third = import(&workspace);
    assert!(!third.skipped);
    let etiqueta = third.file("Etiqueta.csv").expect("etiqueta");
    assert!(!etiqueta.is_failed());
    assert_eq!(etiqueta.inserted, 1);
    assert_eq!(count(&workspace.connect(), "Etiqueta"), 1);
}

#[test]
fn order_file_selects_and_sequences_files() {
    let workspace = TestWorkspace::new();
    workspace.write_csv(
        "import_order.txt",
        "# procedencias first\nprocedencia_prod.csv\nEmbalaje.csv\nnotas.csv\n",
    );
    workspace.write_csv(
        "PROCEDENCIA_PROD.csv",
        "Id,codigo,nombre\n1,PP1,Valle de Copiapó\n",
    );
    workspace.write_csv("Embalaje.csv", "codigo\nCB4\n");
    workspace.write_csv("Variedad.csv", "nom_variedad\nLapins\n");

    let summary = import(&workspace);
    let names: Vec<&str> = summary.files.iter().map(|f| f.file.as_str()).collect();
    assert_eq!(names, vec!["PROCEDENCIA_PROD.csv", "Embalaje.csv", "notas.csv"]);
    assert_eq!(summary.files[2].status, FileStatus::Unhandled);

    let conn = workspace.connect();
    assert_eq!(count(&conn, "PROCEDENCIA_PROD"), 1);
    assert_eq!(count(&conn, "Embalaje"), 1);
    assert_eq!(count(&conn, "Variedad"), 0);
}

#[test]
fn latin1_exports_are_decoded() {
    let workspace = TestWorkspace::new();
    fs::write(
        workspace.folder().join("Variedad.csv"),
        b"Id,nom_variedad\n1,Lap\xedns\n",
    )
    .expect("write latin-1 csv");
    import(&workspace);
    let name: String = workspace
        .connect()
        .query_row("SELECT nom_variedad FROM Variedad WHERE Id = 1", [], |r| {
            r.get(0)
        })
        .expect("variedad");
    assert_eq!(name, "Lapíns");
}

#[test]
fn collaborator_entry_point_returns_text() {
    let workspace = TestWorkspace::standard();
    let text = tarja_sync::import_folder(&workspace.db_path(), &workspace.folder());
    assert!(text.contains("- Embalaje.csv: inserted=2, merged=0, skipped=0"));
    assert!(text.contains("import hash committed"));

    let missing = tarja_sync::import_folder(&workspace.db_path(), &workspace.path().join("nope"));
    assert!(missing.starts_with("Import failed"));
}
