//! # Syncdex CLI (`syncdex`)
//!
//! The `syncdex` binary drives the sync engine: connector registration and
//! authorization, one-shot sync passes, and the long-running scheduler.
//!
//! ## Usage
//!
//! ```bash
//! syncdex --config ./syncdex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `syncdex init` | Register configured connectors and restore state |
//! | `syncdex status` | Show every connector's sync state |
//! | `syncdex auth setup <id>` | Start the authorization flow for a connector |
//! | `syncdex auth callback <id> <code>` | Complete authorization with a code |
//! | `syncdex sync` | Run one sync pass over all due connectors |
//! | `syncdex run` | Run the scheduler until interrupted |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use syncdex::config;
use syncdex::embedding;
use syncdex::store;
use syncdex::syncer::Syncer;

/// Syncdex — keep a vector store in sync with external data sources.
#[derive(Parser)]
#[command(
    name = "syncdex",
    about = "Syncdex — a connector-driven sync engine for vector stores",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./syncdex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register configured connectors and restore durable state.
    ///
    /// Idempotent — connectors that already have state are restored, newly
    /// configured ones are created unauthorized.
    Init,

    /// Show the sync state of every registered connector.
    Status,

    /// Connector authorization.
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },

    /// Run one sync pass over all registered connectors.
    ///
    /// Connectors that are unauthorized, already syncing, or not yet stale
    /// are skipped.
    Sync,

    /// Run the scheduler loop until interrupted (Ctrl-C).
    Run,
}

#[derive(Subcommand)]
enum AuthAction {
    /// Start the authorization flow; prints the URL to visit.
    Setup {
        /// Connector id (e.g. `google-drive`).
        connector: String,
    },
    /// Complete authorization with the code from the provider's redirect.
    Callback {
        /// Connector id the code belongs to.
        connector: String,
        /// Authorization code.
        code: String,
    },
}

async fn build_syncer(cfg: &config::Config) -> anyhow::Result<Arc<Syncer>> {
    let store = store::create_store(cfg)?;
    let embedder = embedding::create_embedder(&cfg.embedding)?;
    let syncer = Arc::new(Syncer::new(cfg, store, embedder));
    syncer.init().await?;
    Ok(syncer)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let syncer = build_syncer(&cfg).await?;
            syncer.register_configured().await?;
            let states = syncer.connector_states().await?;
            println!("Initialized {} connector(s).", states.len());
        }
        Commands::Status => {
            let syncer = build_syncer(&cfg).await?;
            let states = syncer.connector_states().await?;
            if states.is_empty() {
                println!("No connectors registered. Run `syncdex init` first.");
                return Ok(());
            }
            for state in states {
                let last_sync = state
                    .last_sync
                    .map(|ts| ts.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:<16} {:<14} auth={:<5} syncing={:<5} docs={:<6} chunks={:<8} last_sync={}",
                    state.connector_id,
                    state.connector_type.as_str(),
                    state.auth_valid,
                    state.syncing,
                    state.num_documents,
                    state.num_chunks,
                    last_sync,
                );
            }
        }
        Commands::Auth { action } => {
            let syncer = build_syncer(&cfg).await?;
            match action {
                AuthAction::Setup { connector } => {
                    let connector = syncer
                        .get_connector(&connector)
                        .ok_or_else(|| anyhow::anyhow!("unknown connector: {}", connector))?;
                    connector.auth_setup().await?;
                }
                AuthAction::Callback { connector, code } => {
                    let connector = syncer
                        .get_connector(&connector)
                        .ok_or_else(|| anyhow::anyhow!("unknown connector: {}", connector))?;
                    connector.auth_callback(&code).await?;
                    println!("Authorization complete.");
                }
            }
        }
        Commands::Sync => {
            let syncer = build_syncer(&cfg).await?;
            let cancel = CancellationToken::new();
            spawn_ctrl_c(cancel.clone());
            syncer.sync_now(&cancel).await?;
            println!("Sync pass complete.");
        }
        Commands::Run => {
            let syncer = build_syncer(&cfg).await?;
            let cancel = CancellationToken::new();
            spawn_ctrl_c(cancel.clone());
            info!(
                "Scheduler running, checking every {:?}",
                cfg.syncer.check_period()
            );
            syncer.run(cancel).await;
        }
    }

    Ok(())
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            cancel.cancel();
        }
    });
}
