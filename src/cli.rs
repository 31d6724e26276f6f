use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::FallbackPolicy;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Reconcile spreadsheet CSV exports into the tarja database",
    long_about = None
)]
pub struct Cli {
    /// YAML settings file; command-line flags override its values
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import a folder of catalog CSV files, migrating the database first if needed
    Import(ImportArgs),
    /// Open the database and apply any pending schema migration
    Migrate(MigrateArgs),
    /// Check imported foreign keys for orphaned rows
    Verify(VerifyArgs),
    /// Print the content hash of a source folder
    Hash(HashArgs),
}

#[derive(Debug, Args)]
pub struct DatabaseArgs {
    /// SQLite database file
    #[arg(long = "db")]
    pub db: Option<PathBuf>,
    /// Directory for the pre-migration backup (defaults to the database's directory)
    #[arg(long = "backup-dir")]
    pub backup_dir: Option<PathBuf>,
    /// What to do when a schema migration fails
    #[arg(long, value_enum)]
    pub fallback: Option<FallbackPolicy>,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    #[command(flatten)]
    pub database: DatabaseArgs,
    /// Folder holding the CSV files and an optional import_order.txt
    #[arg(short, long)]
    pub folder: Option<PathBuf>,
    /// Import even if the folder is unchanged since the last committed run
    #[arg(long)]
    pub force: bool,
    /// Write rejected rows to FAILED_<file> reports in this directory
    #[arg(long = "reports-dir")]
    pub reports_dir: Option<PathBuf>,
    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseArgs,
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub database: DatabaseArgs,
    /// Print violations as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct HashArgs {
    /// Source folder to hash
    #[arg(short, long)]
    pub folder: PathBuf,
}
