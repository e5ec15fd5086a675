//! Futures signal copier
//!
//! Executes one trade signal across many exchange accounts: sizes each
//! user's entry, places it, protects it with take-profit and stop-loss
//! orders, and records the trade.

mod api;
mod db;
mod error;
mod models;
mod trading;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::api::{ExchangeGateway, FuturesClient, SimulatedExchange};
use crate::db::{Database, MemoryStore, RecordStore};
use crate::models::{PositionSide, RecordFilter, RecordPatch, SignalPayload, TradeRecord, TradeStatus};
use crate::trading::{BatchOrchestrator, ExecutionMode, ExecutorConfig};

/// Futures signal copier CLI.
#[derive(Parser)]
#[command(name = "futcopier")]
#[command(about = "Copy a futures trade signal across many accounts", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:./futcopier.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a signal payload for every user it lists
    Run {
        /// JSON file with the signal and its users
        #[arg(short, long)]
        signal: PathBuf,

        /// Use the in-memory exchange and record store
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect and maintain trade records
    Records {
        #[command(subcommand)]
        action: RecordsCommand,
    },

    /// Show the effective configuration
    Config,
}

#[derive(Subcommand)]
enum RecordsCommand {
    /// List records, optionally filtered
    List {
        #[arg(short, long)]
        user: Option<String>,

        #[arg(short, long)]
        pair: Option<String>,

        /// LONG or SHORT
        #[arg(long)]
        side: Option<String>,

        /// open or closed
        #[arg(long)]
        status: Option<String>,
    },

    /// Show one record
    Show { id: String },

    /// Change the status of one record
    SetStatus { id: String, status: String },

    /// Delete one record
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ExecutorConfig::from_env()?;

    match cli.command {
        Commands::Run { signal, dry_run } => run(config, &cli.database, signal, dry_run).await?,

        Commands::Records { action } => {
            let db = Database::new(&cli.database).await?;
            records(&db, action).await?;
        }

        Commands::Config => {
            println!("\n=== Executor Configuration ===");
            println!("Base URL:          {}", config.base_url);
            println!("Receive window:    {} ms", config.recv_window_ms);
            println!("Request timeout:   {} s", config.request_timeout_secs);
            println!("Decimal rule:      {:?}", config.decimal_rule);
            println!("Notify URL:        {}", config.notify_url.as_deref().unwrap_or("-"));
            println!("Simulated balance: {}", config.simulated_balance);
            println!("Serialize per leg: {}", config.serialize_per_symbol);
            println!("Database:          {}", cli.database);
        }
    }

    Ok(())
}

async fn run(mut config: ExecutorConfig, database: &str, path: PathBuf, dry_run: bool) -> Result<()> {
    if dry_run {
        config.mode = ExecutionMode::Simulated;
    }

    let body = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let payload = SignalPayload::from_json(&body)?;

    let (gateway, store) = match config.mode {
        ExecutionMode::Live => (
            Arc::new(FuturesClient::new(&config)?) as Arc<dyn ExchangeGateway>,
            Arc::new(Database::new(database).await?) as Arc<dyn RecordStore>,
        ),
        ExecutionMode::Simulated => {
            let exchange = SimulatedExchange::new(config.simulated_balance);
            exchange.set_mark_price(&payload.symbol, payload.reference_price);
            (
                Arc::new(exchange) as Arc<dyn ExchangeGateway>,
                Arc::new(MemoryStore::new()) as Arc<dyn RecordStore>,
            )
        }
    };

    info!(mode = ?config.mode, symbol = %payload.symbol, users = payload.users.len(), "Running signal");

    let orchestrator = BatchOrchestrator::new(&config, gateway, store)?;
    let batch = orchestrator.run_payload(payload).await?;

    println!("\n{}", batch);

    let unprotected = batch.unprotected();
    if !unprotected.is_empty() {
        let users: Vec<_> = unprotected.iter().map(|o| o.user_id.as_str()).collect();
        bail!("open positions without protection for: {}", users.join(", "));
    }

    Ok(())
}

async fn records(db: &Database, action: RecordsCommand) -> Result<()> {
    match action {
        RecordsCommand::List {
            user,
            pair,
            side,
            status,
        } => {
            let position_side = match side {
                Some(s) => Some(
                    PositionSide::from_wire(&s.to_uppercase())
                        .with_context(|| format!("Invalid side {:?} (expected LONG or SHORT)", s))?,
                ),
                None => None,
            };
            let status = status.map(|s| s.parse::<TradeStatus>()).transpose()?;

            let filter = RecordFilter {
                user_id: user,
                pair: pair.map(|p| p.to_uppercase()),
                position_side,
                status,
                ..Default::default()
            };
            let records = db.find_all(&filter).await?;

            if records.is_empty() {
                println!("No trade records.");
                return Ok(());
            }

            println!(
                "\n{:<36} {:<16} {:<12} {:<6} {:>12} {:<7} {}",
                "ID", "USER", "PAIR", "SIDE", "QTY", "STATUS", "CREATED"
            );
            println!("{}", "-".repeat(116));
            for r in records {
                println!(
                    "{:<36} {:<16} {:<12} {:<6} {:>12} {:<7} {}",
                    r.id,
                    truncate(&r.user_id, 16),
                    r.pair,
                    r.position_side,
                    r.quantity,
                    r.status,
                    r.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        RecordsCommand::Show { id } => {
            let record = db.find_by_id(&id).await?;
            print_record(&record);
        }

        RecordsCommand::SetStatus { id, status } => {
            let status: TradeStatus = status.parse()?;
            let record = db
                .update_one(&RecordFilter::by_id(&id), &RecordPatch::status(status))
                .await?;
            print_record(&record);
        }

        RecordsCommand::Delete { id } => {
            let removed = db.remove(&RecordFilter::by_id(&id)).await?;
            if removed == 0 {
                bail!("No record with id {}", id);
            }
            println!("Deleted {}", id);
        }
    }

    Ok(())
}

fn print_record(r: &TradeRecord) {
    println!("\n=== Trade {} ===", r.id);
    println!("User:        {}", r.user_id);
    println!("Order id:    {}", r.trade_id);
    println!("Pair:        {}", r.pair);
    println!("Side:        {} {}", r.side.as_str(), r.position_side);
    println!("Quantity:    {}", r.quantity);
    println!("Ref. price:  {}", r.reference_price);
    println!("Venue:       {}", r.exchange_trade_type);
    println!("Status:      {}", r.status);
    println!("Created:     {}", r.created_at.to_rfc3339());
    println!("Updated:     {}", r.updated_at.to_rfc3339());
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
