//! Hyperliquid Trade Replication Engine
//!
//! Mirrors a target wallet's perpetual trades into proportionally
//! sized orders on a follower account, live or simulated.

mod api;
mod bot;
mod config;
mod error;
mod exec;
mod models;
mod trading;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{AccountReader, InfoClient};
use crate::bot::Bot;
use crate::config::Settings;
use crate::models::AccountOwner;

/// Trade replication CLI.
#[derive(Parser)]
#[command(name = "hypercopier")]
#[command(about = "Mirror a Hyperliquid wallet's trades at proportional size", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the replication engine
    Run {
        /// Force simulated trading regardless of SIMULATED_TRADING
        #[arg(long)]
        dry_run: bool,

        /// Override the simulated starting balance
        #[arg(short, long)]
        balance: Option<f64>,
    },

    /// Show target and follower account state
    Status,

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut settings = Settings::from_env()?;

    match cli.command {
        Commands::Run { dry_run, balance } => {
            if dry_run {
                settings.simulated_trading = true;
            }
            if let Some(balance) = balance {
                settings.simulated_balance = Decimal::try_from(balance)?;
            }

            let bot = Bot::new(settings.clone()).await?;

            println!("\n=== Hyperliquid Trade Replication ===");
            println!("Target wallet:  {}", settings.target_wallet);
            println!(
                "Mode:           {}",
                if settings.simulated_trading {
                    "SIMULATED (no real orders)"
                } else {
                    "LIVE TRADING"
                }
            );
            if settings.simulated_trading {
                println!("Paper balance:  ${}", settings.simulated_balance);
            }
            println!("Instruments:    {}", bot.instrument_count());
            if !settings.blocked_assets.is_empty() {
                let mut blocked: Vec<_> = settings.blocked_assets.iter().cloned().collect();
                blocked.sort();
                println!("Blocked:        {}", blocked.join(", "));
            }
            println!("\nPress Ctrl+C to stop.\n");

            if let Err(e) = bot.run().await {
                tracing::error!(error = %e, "engine error");
            }
        }

        Commands::Status => {
            let info = InfoClient::new(
                &settings.api_url,
                &settings.target_wallet,
                settings.wallet_address.clone(),
            )?;

            println!("\n=== Target: {} ===", settings.target_wallet);
            print_account(&info, AccountOwner::Target).await;

            if let Some(address) = &settings.wallet_address {
                println!("\n=== Follower: {} ===", address);
                print_account(&info, AccountOwner::Follower).await;
            } else {
                println!("\nNo follower wallet configured.");
            }
        }

        Commands::Config => {
            println!("\n=== Configuration ===\n");
            println!("API URL:              {}", settings.api_url);
            println!("WebSocket URL:        {}", settings.ws_url);
            println!("Target wallet:        {}", settings.target_wallet);
            println!(
                "Follower wallet:      {}",
                settings.wallet_address.as_deref().unwrap_or("(not set)")
            );
            println!("Simulated trading:    {}", settings.simulated_trading);
            println!("Simulated balance:    ${}", settings.simulated_balance);
            println!("Leverage adjustment:  {}", settings.leverage_factor);
            println!("Copy open positions:  {}", settings.copy_open_positions);
            println!(
                "Max account equity:   {}",
                settings
                    .max_account_equity
                    .map(|c| format!("${}", c))
                    .unwrap_or_else(|| "unlimited".to_string())
            );
            println!("Use limit orders:     {}", settings.use_limit_orders);
            println!("Limit offset:         {}", settings.limit_offset);
            println!("Slippage tolerance:   {}", settings.slippage_tolerance);
            println!("Min order notional:   ${}", settings.min_order_notional);

            let mut blocked: Vec<_> = settings.blocked_assets.iter().cloned().collect();
            blocked.sort();
            println!(
                "Blocked assets:       {}",
                if blocked.is_empty() {
                    "(none)".to_string()
                } else {
                    blocked.join(", ")
                }
            );
        }
    }

    Ok(())
}

async fn print_account(info: &InfoClient, owner: AccountOwner) {
    match info.balance(owner).await {
        Ok(balance) => {
            println!("Equity:        ${:.2}", balance.equity);
            println!("Margin used:   ${:.2}", balance.margin_used);
            println!("Withdrawable:  ${:.2}", balance.withdrawable);
        }
        Err(e) => {
            println!("Balance unavailable: {}", e);
            return;
        }
    }

    match info.positions(owner).await {
        Ok(positions) if positions.is_empty() => println!("No open positions."),
        Ok(positions) => {
            info!(count = positions.len(), owner = owner.label(), "open positions");
            println!("\nOpen positions:");
            for pos in positions {
                let side = if pos.is_long() { "LONG" } else { "SHORT" };
                println!(
                    "  {:<6} {:<5} {} @ {} {}x (P&L: ${:.2})",
                    pos.symbol,
                    side,
                    pos.size.abs(),
                    pos.entry_price,
                    pos.leverage,
                    pos.unrealized_pnl
                );
            }
        }
        Err(e) => println!("Positions unavailable: {}", e),
    }
}
