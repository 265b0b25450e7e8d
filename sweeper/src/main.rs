//! Pi Network sweeper
//!
//! Claims every unlocked claimable balance of an account and sweeps the
//! spendable native balance to a destination, bidding adaptive fees and
//! flooding accepted transactions.

use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use sweeper::config::{Command, Config};
use sweeper::ledger::{Asset, HorizonClient};
use sweeper::{BotEvent, Engine, OperationKind};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Parse configuration
    let config = Config::parse();
    let engine_config = config.engine_config()?;
    let keypair = config.load_keypair()?;

    info!("Pi Network Sweeper");
    info!("Horizon URL: {}", config.horizon_url);

    let horizon = Arc::new(HorizonClient::new(&config.horizon_url, config.request_timeout())?);
    let engine = Engine::new(engine_config, horizon.clone(), keypair)?;
    info!("Account: {}", engine.public_key());

    if let Some(destination) = &config.destination {
        engine.set_destination(destination)?;
    }
    engine.set_transfer_amount(config.amount);

    // Subscribe before starting so the startup events are seen too
    let mut events = engine.subscribe();

    match config.command.clone().unwrap_or(Command::Run) {
        Command::Balances => {
            let snapshot = engine.account_details(true).await?;
            info!("Sequence: {}", snapshot.state.sequence);
            for balance in &snapshot.state.balances {
                info!("  {:<12} {} ({})", balance.asset.to_string(), balance.amount, balance.asset_type);
            }
            info!("Spendable: {}", engine.available_native_balance().await?);
            return Ok(());
        }
        Command::Claimable => {
            let balances = engine.claimable_balances().await?;
            if balances.is_empty() {
                info!("No claimable balances found");
            }
            let now = Utc::now();
            for balance in &balances {
                let status = match balance.unlock_time.filter(|_| !balance.is_eligible(now)) {
                    Some(unlock) => format!("✗ locked until {}", unlock.to_rfc3339()),
                    None => "✓ unlocked".to_string(),
                };
                info!("  {} {} {} [{}]", balance.id, balance.amount, balance.asset, status);
            }
            return Ok(());
        }
        Command::History { limit } => {
            let transactions = horizon.recent_transactions(engine.public_key(), limit).await?;
            if transactions.is_empty() {
                info!("No transactions found");
            }
            for tx in &transactions {
                info!(
                    "  {} {} ops={} {}",
                    tx.created_at,
                    tx.hash,
                    tx.operation_count,
                    if tx.successful { "✓" } else { "✗" }
                );
                if let Some(e) = &tx.error {
                    warn!("    operations unavailable: {}", e);
                }
                for op in &tx.operations {
                    let asset = match &op.asset {
                        Some(Asset::Native) => engine.config().native_asset_label.clone(),
                        Some(asset) => asset.to_string(),
                        None => "-".to_string(),
                    };
                    info!(
                        "    {} {} {} from {} to {}",
                        op.kind,
                        op.amount.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string()),
                        asset,
                        op.from.as_deref().unwrap_or("-"),
                        op.to.as_deref().unwrap_or("-"),
                    );
                }
            }
            return Ok(());
        }
        Command::Run => engine.start(),
        Command::Claim => engine.start_claiming_only(),
        Command::Transfer => {
            if let Err(e) = engine.start_transfer_only() {
                error!("✗ {}", e);
                return Err(e.into());
            }
        }
    }

    // Print engine events until Ctrl-C
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down...");
                break;
            }
            event = events.recv() => match event {
                Some(BotEvent::Claimed { id, amount, hash }) => {
                    info!("✓ Claimed {} from {} (hash {})", amount, id, hash);
                }
                Some(BotEvent::Transferred { amount, destination, hash }) => {
                    info!("✓ Transferred {} to {} (hash {})", amount, destination, hash);
                }
                Some(BotEvent::Balance(balances)) => {
                    for b in balances {
                        debug!("Balance {}: {}", b.asset, b.balance);
                    }
                }
                // Already written to the log by the bus
                Some(BotEvent::Log(_)) | Some(BotEvent::Error(_)) => {}
                None => {
                    warn!("Event bus closed");
                    break;
                }
            },
        }
    }

    engine.shutdown().await;
    info!(
        "In flight at exit: {} claims, {} transfers",
        engine.in_flight(OperationKind::Claim),
        engine.in_flight(OperationKind::Transfer)
    );

    Ok(())
}
