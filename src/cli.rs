//! # CLI Execution Functions
//!
//! Extracted from `main.rs` to keep the entry point slim. Each subcommand
//! connects, builds the engine from the policy file and credentials, and runs
//! one operation.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use praktis_escrow::{
    api, config, db, engine::Engine, gateway::MidtransGateway, messaging::DbMessenger,
    prom_metrics::Metrics, scheduler,
};
use tracing::info;
use uuid::Uuid;

use super::Cli;

async fn connect(cli: &Cli, database_url: &str) -> Result<db::Database> {
    db::Database::connect(database_url, cli.max_connections).await
}

/// Wire the engine. Operator commands that never charge may run without a
/// server key; the gateway then refuses to sign anything.
async fn build_engine(cli: &Cli, database_url: &str) -> Result<Engine> {
    let policy = config::load(cli.config.as_deref())?;
    policy.validate()?;
    let database = connect(cli, database_url).await?;
    let server_key = cli.midtrans_server_key.clone().unwrap_or_default();
    let gateway = MidtransGateway::new(server_key, cli.midtrans_production)?;
    let messenger = DbMessenger::new(database.clone());
    info!(
        commission_bps = policy.commission_bps,
        review_window_days = policy.review_window_days,
        security_hold_days = policy.security_hold_days,
        "settlement policy loaded"
    );
    Ok(Engine::new(
        database,
        Arc::new(gateway),
        Arc::new(messenger),
        policy,
        Arc::new(Metrics::new()),
    ))
}

pub async fn run_serve(
    cli: &Cli,
    database_url: &str,
    port: u16,
    jwt_secret: &str,
    cron_secret: Option<String>,
) -> Result<()> {
    if cli.midtrans_server_key.as_deref().unwrap_or("").is_empty() {
        anyhow::bail!("MIDTRANS_SERVER_KEY is required to serve (set via --midtrans-server-key or env)");
    }
    if jwt_secret.is_empty() {
        anyhow::bail!("JWT_SECRET must not be empty");
    }
    let engine = build_engine(cli, database_url).await?;
    engine.db().migrate().await?;
    let state = api::AppState::new(Arc::new(engine), jwt_secret.to_string(), cron_secret);
    api::run(port, state).await
}

pub async fn run_migrate(cli: &Cli, database_url: &str) -> Result<()> {
    let database = connect(cli, database_url).await?;
    database.migrate().await?;
    info!("migrations applied");
    Ok(())
}

pub async fn run_sweep(cli: &Cli, database_url: &str) -> Result<()> {
    let engine = build_engine(cli, database_url).await?;
    let report = scheduler::run_sweep(&engine, Utc::now()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_clean() {
        anyhow::bail!("{} milestone(s) failed to auto-release", report.failures.len());
    }
    Ok(())
}

pub async fn run_balance(cli: &Cli, database_url: &str, analyst_id: Uuid) -> Result<()> {
    let engine = build_engine(cli, database_url).await?;
    let balance = engine.balance_of(analyst_id, Utc::now()).await?;
    println!("{}", serde_json::to_string_pretty(&balance)?);
    Ok(())
}

pub async fn run_audit(cli: &Cli, database_url: &str) -> Result<()> {
    let engine = build_engine(cli, database_url).await?;
    let findings = engine.audit().await?;
    if findings.is_empty() {
        info!("no sequence violations found");
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&findings)?);
    anyhow::bail!("{} project(s) violate the settle-in-order rule", findings.len())
}
