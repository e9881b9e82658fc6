use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process;

use rstore_core::normalizer::{module_hash, normalize_module};
use rstore_core::{check_modules, EngineConfig, ModuleDecl, Severity, VerificationResult};

/// rstore - resource store module checker
///
/// Verify acquires declarations and hash module manifests.
#[derive(Parser)]
#[command(name = "rstore", version, about, long_about = None)]
struct Cli {
    /// Engine configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the acquires checker over a module manifest
    Check {
        /// Path to manifest (.json)
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compute the module hash (SHA-256) of every module in a manifest
    Hash {
        /// Path to manifest (.json)
        file: PathBuf,
    },

    /// Show version information
    Version,
}

/// A manifest is either a bare list of modules or `{"modules": [...]}`
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum Manifest {
    List(Vec<ModuleDecl>),
    Wrapped { modules: Vec<ModuleDecl> },
}

impl Manifest {
    fn into_modules(self) -> Vec<ModuleDecl> {
        match self {
            Manifest::List(modules) | Manifest::Wrapped { modules } => modules,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("{} {}", "error:".red().bold(), message);
            2
        }
    };

    process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32, String> {
    match cli.command {
        Commands::Check { file, json } => {
            let config = load_config(cli.config.as_deref())?;
            let modules = load_manifest(&file)?;
            let result = check_modules(&modules, &config);
            if json {
                print_json(&result)?;
            } else {
                print_report(&result, modules.len());
            }
            Ok(if result.is_valid() { 0 } else { 1 })
        }
        Commands::Hash { file } => {
            for module in load_manifest(&file)? {
                let module = normalize_module(module);
                let hash = module_hash(&module).map_err(|e| e.to_string())?;
                println!("{}  {}", hash, module.module_id());
            }
            Ok(0)
        }
        Commands::Version => {
            println!("rstore {} (rstore-core {})", env!("CARGO_PKG_VERSION"), env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}

// ── Loading ───────────────────────────────────────────────

fn load_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    match path {
        Some(path) => {
            let text = read_file(path)?;
            EngineConfig::from_json(&text).map_err(|e| format!("{}: {}", path.display(), e))
        }
        None => Ok(EngineConfig::default()),
    }
}

fn load_manifest(path: &Path) -> Result<Vec<ModuleDecl>, String> {
    let text = read_file(path)?;
    let manifest: Manifest = serde_json::from_str(&text)
        .map_err(|e| format!("{}: invalid manifest: {}", path.display(), e))?;
    let modules = manifest.into_modules();
    tracing::debug!(path = %path.display(), modules = modules.len(), "manifest loaded");
    Ok(modules)
}

fn read_file(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))
}

// ── Output ────────────────────────────────────────────────

fn print_report(result: &VerificationResult, module_count: usize) {
    for diagnostic in &result.diagnostics {
        let label = match diagnostic.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warning => "warning".yellow().bold(),
        };
        let location = diagnostic
            .function
            .as_ref()
            .map(|f| format!(" {}", f))
            .unwrap_or_default();
        eprintln!("{} [{}]{}: {}", label, diagnostic.kind, location, diagnostic.message);
    }

    let errors = result.errors().len();
    let warnings = result.warnings().len();
    if errors == 0 {
        println!(
            "{} {} module(s), {} function(s) valid ({} warning(s))",
            "✓".green().bold(),
            module_count,
            result.verdicts.len(),
            warnings
        );
    } else {
        eprintln!(
            "{} {} error(s), {} warning(s)",
            "✗".red().bold(),
            errors,
            warnings
        );
    }
}

fn print_json(result: &VerificationResult) -> Result<(), String> {
    let functions: Vec<serde_json::Value> = result
        .verdicts
        .values()
        .map(|v| serde_json::to_value(v).map_err(|e| e.to_string()))
        .collect::<Result<_, _>>()?;
    let diagnostics = serde_json::to_value(&result.diagnostics).map_err(|e| e.to_string())?;
    let output = serde_json::json!({
        "valid": result.is_valid(),
        "errors": result.errors().len(),
        "warnings": result.warnings().len(),
        "diagnostics": diagnostics,
        "functions": functions,
    });
    let text = serde_json::to_string_pretty(&output).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(())
}
