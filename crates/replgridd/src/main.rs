//! replgridd — the replgrid daemon.
//!
//! One binary, two roles:
//! - `orchestrator`: the control surface. Registers workspaces, starts and
//!   stops their cluster resources, captures and restores snapshots, forks.
//! - `runner`: runs inside a workspace container and serves the
//!   interactive session protocol (shell + file sync).
//!
//! # Usage
//!
//! ```text
//! replgridd --config /etc/replgrid.toml orchestrator --listen 0.0.0.0:3002
//! WORKSPACE_ID=abc-def-ghi S3_BUCKET=repl-code replgridd runner
//! ```

mod orchestrator;
mod runner;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use replgrid_core::ReplgridConfig;

#[derive(Parser)]
#[command(name = "replgridd", about = "replgrid daemon")]
struct Cli {
    /// Path to replgrid.toml. Defaults apply when omitted.
    #[arg(long, global = true, env = "REPLGRID_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Storage overrides shared by both roles.
#[derive(clap::Args)]
struct StorageArgs {
    /// Bucket holding workspace files.
    #[arg(long, env = "S3_BUCKET")]
    bucket: Option<String>,

    /// S3-compatible endpoint URL.
    #[arg(long, env = "S3_ENDPOINT")]
    endpoint: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control surface.
    Orchestrator {
        /// Address to listen on.
        #[arg(long)]
        listen: Option<String>,

        /// Data directory for the registry.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        #[command(flatten)]
        storage: StorageArgs,
    },

    /// Serve one workspace from inside its container.
    Runner {
        /// Address to listen on.
        #[arg(long)]
        listen: Option<String>,

        /// Workspace this runner serves.
        #[arg(long, env = "WORKSPACE_ID")]
        workspace_id: Option<String>,

        /// Local working copy of the workspace.
        #[arg(long)]
        root: Option<PathBuf>,

        #[command(flatten)]
        storage: StorageArgs,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = match &cli.config {
        Some(path) => ReplgridConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ReplgridConfig::default(),
    };

    match cli.command {
        Command::Orchestrator {
            listen,
            data_dir,
            storage,
        } => {
            if let Some(listen) = listen {
                config.orchestrator.listen = listen;
            }
            if let Some(dir) = data_dir {
                config.orchestrator.data_dir = dir;
            }
            apply_storage(&mut config, storage);
            orchestrator::run(config).await
        }
        Command::Runner {
            listen,
            workspace_id,
            root,
            storage,
        } => {
            if let Some(listen) = listen {
                config.runner.listen = listen;
            }
            if workspace_id.is_some() {
                config.runner.workspace_id = workspace_id;
            }
            if let Some(root) = root {
                config.runner.workspace_root = root;
            }
            apply_storage(&mut config, storage);
            runner::run(config).await
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,replgridd=debug,replgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn apply_storage(config: &mut ReplgridConfig, args: StorageArgs) {
    if let Some(bucket) = args.bucket {
        config.storage.bucket = bucket;
    }
    if args.endpoint.is_some() {
        config.storage.endpoint = args.endpoint;
    }
}

/// Serve `router` on `listen` until Ctrl-C.
pub(crate) async fn serve(listen: &str, router: axum::Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!(addr = %listen, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to install Ctrl-C handler");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
