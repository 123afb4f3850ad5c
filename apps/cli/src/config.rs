//! CLI configuration
//!
//! Layered with the `config` crate: serde defaults, then an optional TOML file, then
//! `LUMEN__` environment variables (`LUMEN__LOGGING__LEVEL=debug`,
//! `LUMEN__SCHEMA__DEFINITIONS=core.tgz,extra.json`).

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use lumen_models::traversal::DEFAULT_CONCURRENCY;
use lumen_models::TraversalOptions;
use lumen_references::GlobalIdConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_CONFIG_FILE: &str = "lumen.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub references: ReferencesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            file: FileLoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileLoggingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_prefix")]
    pub prefix: String,
    /// `daily`, `hourly`, `minutely` or `never`.
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: default_log_directory(),
            prefix: default_log_prefix(),
            rotation: default_rotation(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaConfig {
    /// StructureDefinition files, directories or package tarballs loaded on top of the
    /// built-in definitions.
    #[serde(default)]
    pub definitions: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferencesConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Namespace for UUIDv5 global ids; the OID namespace when unset.
    #[serde(default)]
    pub uuid_namespace: Option<Uuid>,
}

impl Default for ReferencesConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            uuid_namespace: None,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_prefix() -> String {
    "lumen".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    /// Load from `path`, else `lumen.toml`, else the user config directory, then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        match path {
            Some(path) => {
                if !path.exists() {
                    bail!("config file {} does not exist", path.display());
                }
                builder = builder.add_source(File::from(path));
            }
            None => {
                if let Some(default_path) = default_config_path() {
                    tracing::debug!(path = %default_path.display(), "Using config file");
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("LUMEN")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("schema.definitions"),
        );

        builder
            .build()
            .context("config build error")?
            .try_deserialize()
            .context("config deserialize error")
    }

    /// Parse a TOML document, without file or environment layers.
    pub fn from_toml(text: &str) -> Result<Self> {
        Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()
            .context("config build error")?
            .try_deserialize()
            .context("config deserialize error")
    }

    pub fn validate(&self) -> Result<()> {
        let level = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&level.as_str()) {
            bail!("logging.level must be one of {valid_levels:?}");
        }
        let rotations = ["daily", "hourly", "minutely", "never"];
        if !rotations.contains(&self.logging.file.rotation.as_str()) {
            bail!("logging.file.rotation must be one of {rotations:?}");
        }
        if self.logging.file.enabled && self.logging.file.prefix.is_empty() {
            bail!("logging.file.prefix must not be empty");
        }
        if self.references.concurrency == 0 {
            bail!("references.concurrency must be > 0");
        }
        if self.references.timeout_secs == 0 {
            bail!("references.timeout_secs must be > 0");
        }
        Ok(())
    }

    pub fn global_id_config(&self) -> GlobalIdConfig {
        match self.references.uuid_namespace {
            Some(namespace) => GlobalIdConfig { namespace },
            None => GlobalIdConfig::default(),
        }
    }

    pub fn traversal_options(&self) -> TraversalOptions {
        TraversalOptions {
            concurrency: self.references.concurrency,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.references.timeout_secs)
    }
}

fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("lumen").join("config.toml"))
        .filter(|path| path.exists())
}
