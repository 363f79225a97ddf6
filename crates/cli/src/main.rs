use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::info;

use truder_apply::KubeApplier;
use truder_core::Configuration;
use truder_deploy::Deployer;

#[derive(Parser, Debug)]
#[command(name = "truderctl", version, about = "Dependency-ordered namespace deployer")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Configuration file (YAML)
    #[arg(short = 'f', long = "file", global = true, default_value = "truder.yaml")]
    file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List configured resource paths in deployment order
    Ls,
    /// Deploy everything, or only the given resource paths
    Deploy {
        /// Resource paths ("kind/name"); empty means every resource
        paths: Vec<String>,
        /// Validate through server-side dry-run without persisting
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("TRUDER_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("TRUDER_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid TRUDER_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_configuration(path: &Path) -> Result<Configuration> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading configuration {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing configuration {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let config = load_configuration(&cli.file)?;

    match cli.command {
        Commands::Ls => {
            let paths = config.resource_paths();
            match cli.output {
                Output::Human => {
                    for path in paths {
                        println!("{path}");
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&paths)?),
            }
        }
        Commands::Deploy { paths, dry_run } => {
            let applier = KubeApplier::try_default().await?.dry_run(dry_run);
            let deployer = Deployer::new(config, applier)?;
            info!(
                namespace = %deployer.namespace(),
                targets = paths.len(),
                dry_run,
                "deploy invoked"
            );
            deployer.deploy(&paths).await?;
            match cli.output {
                Output::Human => println!("deployed into namespace {}", deployer.namespace()),
                Output::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "namespace": deployer.namespace(),
                        "dryRun": dry_run,
                    }))?
                ),
            }
        }
    }
    Ok(())
}
