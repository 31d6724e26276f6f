pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod headers;
pub mod importer;
pub mod io_utils;
pub mod migrate;
pub mod normalize;
pub mod orchestrator;
pub mod resolver;
pub mod schema;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands, DatabaseArgs},
    config::Settings,
    db::{Database, OpenOptions, OpenOutcome},
    orchestrator::ImportOptions,
    schema::CURRENT_VERSION,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("tarja_sync", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let settings = Settings::load_or_default(cli.config.as_deref())?;
    debug!("Settings: {settings:?}");
    match cli.command {
        Commands::Import(args) => handle_import(settings, &args),
        Commands::Migrate(args) => handle_migrate(settings, &args),
        Commands::Verify(args) => handle_verify(settings, &args),
        Commands::Hash(args) => handle_hash(&args),
    }
}

/// Import `folder` into the database at `db_path` with default settings and
/// return the human-readable run summary. Failures are folded into the text.
pub fn import_folder(db_path: &Path, folder: &Path) -> String {
    let summary = Database::open(db_path, &OpenOptions::default())
        .with_context(|| format!("Opening database {db_path:?}"))
        .and_then(|mut db| {
            orchestrator::run_import(&mut db, folder, &ImportOptions::default())
                .with_context(|| format!("Importing {folder:?}"))
        });
    match summary {
        Ok(summary) => summary.to_string(),
        Err(err) => format!("Import failed: {err:#}\n"),
    }
}

fn apply_database_args(settings: &mut Settings, args: &DatabaseArgs) {
    if let Some(db) = &args.db {
        settings.database = Some(db.clone());
    }
    if let Some(dir) = &args.backup_dir {
        settings.backup_dir = Some(dir.clone());
    }
    if let Some(fallback) = args.fallback {
        settings.migration_fallback = fallback;
    }
}

fn open_database(settings: &Settings, require_existing: bool) -> Result<Database> {
    let path = settings.database()?;
    let options = OpenOptions {
        backup_dir: settings.backup_dir.clone(),
        fallback: settings.migration_fallback,
        require_existing,
    };
    let db = Database::open(path, &options).with_context(|| format!("Opening database {path:?}"))?;
    info!("{}", describe_outcome(db.outcome(), db.backup()));
    Ok(db)
}

fn describe_outcome(outcome: OpenOutcome, backup: Option<&Path>) -> String {
    match outcome {
        OpenOutcome::Created => format!("Created schema version {CURRENT_VERSION}"),
        OpenOutcome::Opened => format!("Schema already at version {CURRENT_VERSION}"),
        OpenOutcome::Migrated { from } => match backup {
            Some(path) => format!(
                "Migrated schema from version {from} to {CURRENT_VERSION} (backup at {})",
                path.display()
            ),
            None => format!("Migrated schema from version {from} to {CURRENT_VERSION}"),
        },
        OpenOutcome::Recreated { from } => format!(
            "Migration from version {from} failed; recreated an empty schema version {CURRENT_VERSION}"
        ),
    }
}

fn handle_import(mut settings: Settings, args: &cli::ImportArgs) -> Result<()> {
    apply_database_args(&mut settings, &args.database);
    if let Some(folder) = &args.folder {
        settings.source_folder = Some(folder.clone());
    }
    if let Some(dir) = &args.reports_dir {
        settings.reports_dir = Some(dir.clone());
    }
    settings.force |= args.force;

    let folder = settings.source_folder()?.to_path_buf();
    let mut db = open_database(&settings, false)?;
    let options = ImportOptions {
        force: settings.force,
        reports_dir: settings.reports_dir.clone(),
    };
    let summary = orchestrator::run_import(&mut db, &folder, &options)
        .with_context(|| format!("Importing {folder:?} into {:?}", db.path()))?;
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Serializing run summary")?
        );
    } else {
        print!("{summary}");
    }
    Ok(())
}

fn handle_migrate(mut settings: Settings, args: &cli::MigrateArgs) -> Result<()> {
    apply_database_args(&mut settings, &args.database);
    let db = open_database(&settings, true)?;
    println!("{}", describe_outcome(db.outcome(), db.backup()));
    Ok(())
}

fn handle_verify(mut settings: Settings, args: &cli::VerifyArgs) -> Result<()> {
    apply_database_args(&mut settings, &args.database);
    let db = open_database(&settings, true)?;
    let violations = orchestrator::integrity_sweep(db.conn()).context("Running integrity sweep")?;
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&violations).context("Serializing violations")?
        );
    } else if violations.is_empty() {
        println!("Integrity: ok");
    } else {
        for violation in &violations {
            println!("! {violation}");
        }
    }
    if !violations.is_empty() {
        bail!("{} integrity violation(s) found", violations.len());
    }
    Ok(())
}

fn handle_hash(args: &cli::HashArgs) -> Result<()> {
    let hash = orchestrator::folder_hash(&args.folder)
        .with_context(|| format!("Hashing {:?}", args.folder))?;
    println!("{hash}");
    Ok(())
}
