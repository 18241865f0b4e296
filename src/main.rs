//! # Main: CLI Entry Point
//!
//! Routes subcommands to the settlement service and its operator tools.
//! Handles shared concerns: environment loading, structured logging, and the
//! tokio runtime.
//!
//! ## Subcommands
//!
//! - `serve`: HTTP API plus the in-process auto-release loop.
//! - `migrate`: apply the schema migrations and exit.
//! - `sweep`: run one auto-release pass (for external cron) and print the report.
//! - `balance`: print an analyst's derived balance.
//! - `audit`: check the settle-in-order rule over running projects.
//!
//! ## Global Options
//!
//! - `--database-url` / `DATABASE_URL`: PostgreSQL connection.
//! - `--config` / `PRAKTIS_CONFIG`: settlement policy TOML (defaults apply when absent).
//! - `--midtrans-server-key` / `MIDTRANS_SERVER_KEY`: gateway credential.

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(
    name = "praktis-escrow",
    about = "Engagement and escrow settlement engine"
)]
struct Cli {
    /// PostgreSQL connection URL (or set DATABASE_URL env var)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Settlement policy file (TOML). Built-in defaults when unset.
    #[arg(long, env = "PRAKTIS_CONFIG")]
    config: Option<PathBuf>,

    /// Connection pool size
    #[arg(long, default_value_t = 10)]
    max_connections: u32,

    /// Midtrans server key used for charge creation and webhook signatures
    #[arg(long, env = "MIDTRANS_SERVER_KEY", hide_env_values = true)]
    midtrans_server_key: Option<String>,

    /// Use the Midtrans production endpoint instead of the sandbox
    #[arg(long, env = "MIDTRANS_PRODUCTION")]
    midtrans_production: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the settlement API and the auto-release loop
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// HS256 secret shared with the identity service
        #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
        jwt_secret: String,
        /// Bearer secret for the cron trigger. The endpoint is closed when unset.
        #[arg(long, env = "CRON_SECRET", hide_env_values = true)]
        cron_secret: Option<String>,
    },
    /// Apply database migrations
    Migrate,
    /// Run a single auto-release pass and print the report as JSON
    Sweep,
    /// Print an analyst's balance as JSON
    Balance {
        #[arg(long)]
        analyst: Uuid,
    },
    /// Verify that no running project has more than one active milestone
    Audit,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // LOG_FORMAT=json for log shipping, human-readable otherwise
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();
    let database_url = cli.database_url.as_deref().ok_or_else(|| {
        anyhow::anyhow!("DATABASE_URL is required (set via --database-url or env)")
    })?;

    let rt = tokio::runtime::Runtime::new()?;
    match &cli.command {
        Commands::Serve {
            port,
            jwt_secret,
            cron_secret,
        } => rt.block_on(cli::run_serve(
            &cli,
            database_url,
            *port,
            jwt_secret,
            cron_secret.clone(),
        )),
        Commands::Migrate => rt.block_on(cli::run_migrate(&cli, database_url)),
        Commands::Sweep => rt.block_on(cli::run_sweep(&cli, database_url)),
        Commands::Balance { analyst } => rt.block_on(cli::run_balance(&cli, database_url, *analyst)),
        Commands::Audit => rt.block_on(cli::run_audit(&cli, database_url)),
    }
}
