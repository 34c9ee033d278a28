//! oxide-cms CLI
//!
//! Command-line tool for checking a module manifest against the
//! configuration and reporting the order modules boot and route in.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use oxide_modules::{AppConfig, DependencyGraph, ModuleManifest, Phase};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Module manifest tooling.
#[derive(Parser)]
#[command(name = "oxide-cms")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (JSON). Defaults apply when absent.
    #[arg(short, long, env = "OXIDE_CONFIG")]
    config: Option<PathBuf>,

    /// Module manifest (JSON).
    #[arg(short, long, default_value = "modules.json")]
    manifest: PathBuf,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate dependencies and report disabled modules.
    Check,

    /// Print the enabled modules in boot order, grouped by phase.
    Order {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

fn load(config: Option<&Path>, manifest: &Path) -> anyhow::Result<DependencyGraph> {
    let config = match config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    let manifest = ModuleManifest::load(manifest)?;
    Ok(DependencyGraph::build(manifest.nodes(&config)))
}

/// Enabled modules per phase, each in boot order.
fn phases(graph: &DependencyGraph) -> Vec<(Phase, Vec<&str>)> {
    [Phase::First, Phase::Normal, Phase::Last]
        .into_iter()
        .map(|phase| {
            let modules = graph
                .boot_order()
                .iter()
                .map(String::as_str)
                .filter(|m| graph.phase(m) == Some(phase))
                .collect();
            (phase, modules)
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let graph = load(cli.config.as_deref(), &cli.manifest)?;

    match cli.command {
        Commands::Check => {
            for diagnostic in graph.diagnostics() {
                warn!("{diagnostic}");
            }
            info!(
                "{} modules, {} enabled, {} disabled ({} passes)",
                graph.len(),
                graph.enabled().count(),
                graph.disabled().count(),
                graph.passes()
            );
            if !graph.diagnostics().is_empty() {
                anyhow::bail!(
                    "{} module(s) disabled by broken dependencies",
                    graph.diagnostics().len()
                );
            }
        }

        Commands::Order { json } => {
            let phases = phases(&graph);
            if json {
                let value: serde_json::Map<String, serde_json::Value> = phases
                    .iter()
                    .map(|(phase, modules)| (phase.to_string(), serde_json::json!(modules)))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                for (phase, modules) in &phases {
                    println!("{phase}:");
                    for (i, module) in modules.iter().enumerate() {
                        println!("  {:>2}. {module}", i + 1);
                    }
                }
            }
        }
    }

    Ok(())
}
