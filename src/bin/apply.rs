//! Document apply CLI
//!
//! Validates entity documents and commits them to the store (in-memory
//! backend in this build; real backends plug in through the `GraphBackend`
//! trait). Exit codes: 0 applied, 1 rejected by validation, 2 bad input or
//! arguments, 3 storage failure, 4 internal error.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kgraph::apply::{apply, ApplyOptions, ApplyOutcome};
use kgraph::registry::SchemaRegistry;
use kgraph::store::{Deadline, EntityStore, InMemoryBackend};
use kgraph::{KgConfig, KgError};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kgraph-apply")]
#[command(about = "Validate and apply entity documents to the knowledge graph")]
struct Cli {
    /// Documents to apply, in order
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Resolve and report without committing
    #[arg(long)]
    dry_run: bool,

    /// Schema definitions directory (overrides config)
    #[arg(short, long)]
    schemas: Option<PathBuf>,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Emit machine-readable JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(error: &KgError) -> i32 {
    match error {
        KgError::StorageConnection(_) | KgError::StorageOperation { .. } => 3,
        KgError::Io(_) | KgError::Config(_) => 2,
        _ => 4,
    }
}

fn run(cli: &Cli) -> Result<i32, KgError> {
    let config = KgConfig::load_from(cli.config.as_deref())
        .map_err(|e| KgError::Config(e.to_string()))?;
    let schemas_dir = cli
        .schemas
        .clone()
        .unwrap_or_else(|| config.schemas_dir());
    let registry = match SchemaRegistry::load(&schemas_dir) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Error: cannot load schemas from {}: {e}", schemas_dir.display());
            return Ok(2);
        }
    };
    let store = EntityStore::with_timeout(
        Arc::new(InMemoryBackend::new()),
        config.op_timeout(),
    );

    let mut all_applied = true;
    for file in &cli.files {
        let content = match std::fs::read_to_string(file) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("Error: cannot read {}: {e}", file.display());
                return Ok(2);
            }
        };

        let options = ApplyOptions {
            dry_run: cli.dry_run,
            deadline: Deadline::after(config.op_timeout()),
            source: file.file_name().map(|n| n.to_string_lossy().into_owned()),
        };
        let outcome = apply(&content, &registry, &store, &options)?;

        if cli.json {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        match &outcome {
            ApplyOutcome::Applied(report) => {
                if !cli.json {
                    println!(
                        "✅ {} - {} created, {} updated, {} auto-created",
                        file.display(),
                        report.created.len(),
                        report.updated.len(),
                        report.auto_created.len()
                    );
                }
            }
            ApplyOutcome::DryRun(dry) => {
                if !cli.json {
                    println!("🔍 {} (dry run)", file.display());
                    for id in &dry.would_create {
                        println!("  would create {id}");
                    }
                    for id in &dry.would_update {
                        println!("  would update {id}");
                    }
                    for id in &dry.would_auto_create {
                        println!("  would auto-create {id}");
                    }
                }
            }
            ApplyOutcome::Rejected(result) => {
                all_applied = false;
                if !cli.json {
                    println!("❌ {} - rejected", file.display());
                    for issue in &result.issues {
                        println!("  {issue}");
                    }
                }
            }
        }
    }

    Ok(if all_applied { 0 } else { 1 })
}
