mod commands;
mod context;
mod utils;

use clap::{Parser, Subcommand};
use colored::Colorize;
use context::Context;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stackflow")]
#[command(about = "Deploy multi-stack container products from a catalog", long_about = None)]
struct Cli {
    /// Target environment (overrides `environment` in the config file)
    #[arg(short, long, global = true, env = "STACKFLOW_ENV")]
    env: Option<String>,

    /// Config file (skips discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a stack manifest and list its variables
    Validate {
        /// Manifest file
        manifest: PathBuf,
    },
    /// Show the steps a manifest would be deployed with
    Plan {
        /// Manifest file
        manifest: PathBuf,
        /// Stack name (defaults to the manifest's `name` or file name)
        #[arg(short, long)]
        stack: Option<String>,
        /// Variable value, repeatable
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = utils::parse_var)]
        vars: Vec<(String, String)>,
    },
    /// Deploy a product from the catalog
    Deploy {
        /// Product group
        group: String,
        /// Catalog version (latest when omitted)
        #[arg(long)]
        version: Option<String>,
        /// Variable value, repeatable
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = utils::parse_var)]
        vars: Vec<(String, String)>,
        /// Keep deploying the remaining stacks after a failure
        #[arg(long)]
        continue_on_error: bool,
    },
    /// Upgrade a running product to the latest catalog version
    Upgrade {
        /// Product group
        group: String,
        /// Variable value, repeatable
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = utils::parse_var)]
        vars: Vec<(String, String)>,
    },
    /// Compare a deployment with the latest catalog version
    #[command(name = "check-upgrade")]
    CheckUpgrade {
        /// Product group
        group: String,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Re-deploy the previous version of a failed deployment
    Rollback {
        /// Product group
        group: String,
    },
    /// Remove a deployed product
    Remove {
        /// Product group
        group: String,
        /// Also remove named volumes
        #[arg(long)]
        purge_volumes: bool,
    },
    /// Show deployments in the environment, or the history of one product
    Status {
        /// Product group
        group: Option<String>,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Show version information
    Version,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Commands that need no configuration
    match &cli.command {
        Commands::Version => {
            println!("stackflow {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Commands::Validate { manifest } => return commands::validate::handle(manifest),
        Commands::Plan {
            manifest,
            stack,
            vars,
        } => return commands::plan::handle(manifest, stack.as_deref(), vars),
        _ => {}
    }

    let ctx = Context::load(cli.config.as_deref(), cli.env)?;

    match cli.command {
        Commands::Deploy {
            group,
            version,
            vars,
            continue_on_error,
        } => {
            commands::deploy::deploy(&ctx, &group, version, vars, continue_on_error).await?;
        }
        Commands::Upgrade { group, vars } => {
            commands::deploy::upgrade(&ctx, &group, vars).await?;
        }
        Commands::Rollback { group } => {
            commands::deploy::rollback(&ctx, &group).await?;
        }
        Commands::Remove {
            group,
            purge_volumes,
        } => {
            commands::deploy::remove(&ctx, &group, purge_volumes).await?;
        }
        Commands::CheckUpgrade { group, json } => {
            commands::status::check_upgrade(&ctx, &group, json).await?;
        }
        Commands::Status { group, json } => {
            commands::status::status(&ctx, group.as_deref(), json).await?;
        }
        Commands::Version | Commands::Validate { .. } | Commands::Plan { .. } => {
            unreachable!("handled before config loading");
        }
    }

    Ok(())
}
