//! Deploy Orchestrator
//!
//! Usage:
//! - Deploy (default): `deploy-orchestrator` or `deploy-orchestrator deploy`
//! - Smoke test only: `deploy-orchestrator validate`
//! - Clear a stuck lock: `deploy-orchestrator unlock --tag 25.0615.1000.00`
//!
//! Configuration comes from environment variables (`APP_NAME`, `DEPLOY_SERVER`,
//! `DEPLOY_TAG`, `ENVIRONMENT`, `*_SECRETS`, ...).

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use deploy_orchestrator::{load_deploy_config, OrchestratorSettings};

#[derive(Parser)]
#[command(name = "deploy-orchestrator")]
#[command(about = "Ship a tagged release to a single remote host")]
#[command(version)]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Discard Keycloak users instead of migrating them
    #[arg(long, global = true)]
    reset_keycloak: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, then deploy the release (default)
    Deploy {
        /// Print the stage report as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Run the smoke test only
    Validate,

    /// Release the deploy lock if it is still held by TAG
    Unlock {
        /// Tag that owns the lock
        #[arg(long, env = "DEPLOY_TAG")]
        tag: String,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = OrchestratorSettings::from_env();
    let mut config = load_deploy_config();
    if cli.reset_keycloak {
        config.reset_keycloak = true;
    }

    match cli.command.unwrap_or(Commands::Deploy { json: false }) {
        Commands::Deploy { json } => {
            let report = deploy_orchestrator::deploy(&config, &settings).await?;
            if json {
                let json = serde_json::to_string_pretty(&report)
                    .context("Failed to serialize deploy report")?;
                println!("{}", json);
            }
        }
        Commands::Validate => {
            let validated = deploy_orchestrator::validate(&config, &settings).await?;
            tracing::info!(
                app = %validated.app_name(),
                tag = %validated.tag(),
                deferred_runtime_checks = validated.runtime_checks_deferred(),
                "Configuration and target host are ready for deploy"
            );
        }
        Commands::Unlock { tag } => {
            let released =
                deploy_orchestrator::unlock(&config.deploy_server, &tag, &settings).await?;
            if !released {
                anyhow::bail!("Deploy lock is not held by {}, nothing released", tag);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
