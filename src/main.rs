//! # Vault Context CLI (`vault`)
//!
//! ## Usage
//!
//! ```bash
//! vault --config ./config/vault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vault init` | Create the SQLite database and run schema migrations |
//! | `vault index` | Reconcile the vault with the index and wait until done |
//! | `vault status` | Index readiness and counts |
//! | `vault search "<query>"` | Passage search |
//! | `vault ask "<message>"` | Answer a message with vault context |
//! | `vault serve` | Watch the vault and serve the HTTP API |

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vault_context::{commands, config};

/// Vault Context: retrieval-augmented chat over a personal note vault.
#[derive(Parser)]
#[command(name = "vault", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Bring the index in line with the vault.
    ///
    /// Compares every note's content hash with the index, re-indexes what
    /// changed, removes what is gone and waits for all passes to finish.
    Index,

    /// Show index readiness.
    Status,

    /// Search indexed passages.
    Search {
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,

        /// `semantic` (vector only) or `hybrid` (vector plus keyword boosts).
        #[arg(long)]
        mode: Option<String>,
    },

    /// Ask a question answered with vault context.
    Ask {
        message: String,

        /// Continue an existing conversation.
        #[arg(long)]
        session: Option<String>,
    },

    /// Watch the vault, keep the index current and serve the HTTP API.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vault_context=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Index => commands::run_index(&cfg).await?,
        Commands::Status => commands::run_status(&cfg).await?,
        Commands::Search { query, limit, mode } => {
            commands::run_search(&cfg, &query, limit, mode.as_deref()).await?
        }
        Commands::Ask { message, session } => {
            commands::run_ask(&cfg, &message, session).await?
        }
        Commands::Serve => commands::run_serve(&cfg).await?,
    }

    Ok(())
}
