use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// What the database open path does when a schema migration fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    /// Delete the database file and create an empty schema.
    #[default]
    Recreate,
    /// Leave the file untouched and report the failure.
    Abort,
}

/// Settings read from an optional YAML file. Command-line flags override
/// every field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub database: Option<PathBuf>,
    pub source_folder: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub reports_dir: Option<PathBuf>,
    pub migration_fallback: FallbackPolicy,
    pub force: bool,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            fs::read_to_string(path).with_context(|| format!("Opening config file {path:?}"))?;
        Self::parse(&raw).with_context(|| format!("Parsing config file {path:?}"))
    }

    pub fn parse(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn database(&self) -> Result<&Path> {
        self.database
            .as_deref()
            .ok_or_else(|| anyhow!("no database given; pass --db or set `database` in the config file"))
    }

    pub fn source_folder(&self) -> Result<&Path> {
        self.source_folder.as_deref().ok_or_else(|| {
            anyhow!("no source folder given; pass --folder or set `source_folder` in the config file")
        })
    }
}
