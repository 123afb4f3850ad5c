use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lumen_models::{registry, SchemaRegistry, Visibility};
use std::io::Read;
use std::path::{Path, PathBuf};

mod commands;
mod config;
mod logging;

use config::AppConfig;

#[derive(Parser)]
#[command(name = "lumen", version, about = "Build, render and rewrite FHIR R4 resources")]
struct Cli {
    /// Config file (defaults to ./lumen.toml, then the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Extra StructureDefinitions: a JSON file, a directory or a package .tgz
    #[arg(long = "definitions", global = true)]
    definitions: Vec<PathBuf>,

    /// Log level override (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a resource and print its JSON form
    Render {
        /// Input file, or `-` for stdin
        file: PathBuf,
        /// Keep internal `_`-prefixed fields
        #[arg(long)]
        internal: bool,
        #[arg(long)]
        compact: bool,
    },
    /// Stamp global ids onto a resource and its references
    Stamp {
        file: PathBuf,
        #[arg(long)]
        compact: bool,
    },
    /// Move a resource from one source assigning authority to another
    ChangeAuthority {
        file: PathBuf,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        compact: bool,
    },
    /// List registered resource types
    Types {
        /// List R4 resource types without a registered schema instead
        #[arg(long)]
        missing: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: failed to load .env file: {e}");
        }
    }

    let cli = Cli::parse();

    let mut config =
        AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.schema.definitions.extend(cli.definitions.iter().cloned());
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let _guard = logging::init_logging(&config.logging).context("Failed to initialize logging")?;

    install_registry(&config.schema.definitions)?;

    let output = match &cli.command {
        Command::Render {
            file,
            internal,
            compact,
        } => {
            let visibility = if *internal {
                Visibility::Internal
            } else {
                Visibility::Public
            };
            commands::render(&read_input(file)?, visibility, *compact)?
        }
        Command::Stamp { file, compact } => {
            commands::stamp(&read_input(file)?, &config, *compact).await?
        }
        Command::ChangeAuthority {
            file,
            from,
            to,
            compact,
        } => commands::change_authority(&read_input(file)?, from, to, &config, *compact).await?,
        Command::Types { missing } => commands::types(*missing).join("\n"),
    };

    println!("{output}");
    Ok(())
}

fn install_registry(definitions: &[PathBuf]) -> Result<()> {
    let mut registry = SchemaRegistry::builtin().context("Failed to load built-in definitions")?;
    for path in definitions {
        let loaded = registry
            .load_definitions(path)
            .with_context(|| format!("Failed to load definitions from {}", path.display()))?;
        tracing::info!(path = %path.display(), loaded, "Loaded definitions");
    }

    let dangling = registry.dangling_types();
    if !dangling.is_empty() {
        tracing::warn!(?dangling, "Field types without a registered schema");
    }

    registry::install(registry).context("Failed to install schema registry")
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
