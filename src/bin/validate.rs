//! Document validation CLI
//!
//! Validates entity documents against the schema registry without touching
//! any store. Exit codes: 0 valid, 1 invalid, 2 bad input or arguments,
//! 4 internal error.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use kgraph::registry::SchemaRegistry;
use kgraph::validation;
use kgraph::KgConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kgraph-validate")]
#[command(about = "Validate entity documents against the schema registry")]
struct Cli {
    /// Documents to validate
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Schema definitions directory (overrides config)
    #[arg(short, long)]
    schemas: Option<PathBuf>,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Emit machine-readable JSON instead of text
    #[arg(long)]
    json: bool,

    /// Treat warnings as errors
    #[arg(long)]
    strict: bool,
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
            4
        }
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> anyhow::Result<i32> {
    let config =
        KgConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
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
    let snapshot = registry.snapshot();
    let deny_warnings = cli.strict || config.validation.deny_warnings;

    let mut all_valid = true;
    for file in &cli.files {
        let content = match std::fs::read_to_string(file) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("Error: cannot read {}: {e}", file.display());
                return Ok(2);
            }
        };

        let result = validation::validate(&content, &snapshot, None);
        let failed =
            !result.is_valid() || (deny_warnings && result.warnings().next().is_some());
        if failed {
            all_valid = false;
        }

        if cli.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            if result.issues.is_empty() {
                println!("✅ {} - valid", file.display());
            } else {
                let mark = if failed { "❌" } else { "⚠️ " };
                println!("{mark} {}", file.display());
                for issue in &result.issues {
                    println!("  {issue}");
                }
            }
            let errors = result.errors().count();
            let warnings = result.warnings().count();
            if errors + warnings > 0 {
                println!("  {errors} error(s), {warnings} warning(s)");
            }
        }
    }

    Ok(if all_valid { 0 } else { 1 })
}
