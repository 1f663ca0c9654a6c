//! Engine assembly and lifecycle.
//!
//! Wires the info client, fill stream, sizing engine, controller, and
//! the chosen execution gateway together, then runs until Ctrl+C.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::api::{AccountReader, InfoClient, WalletStream};
use crate::config::Settings;
use crate::exec::{ExecutionGateway, LiveGateway, PriceCache, SimAccounts, SimGateway};
use crate::models::{AccountOwner, AssetMeta};
use crate::trading::{
    ControlHandle, ControllerConfig, EngineStats, PositionSizer, ReplicationController,
    SizerConfig,
};

const STATUS_INTERVAL: Duration = Duration::from_secs(60);
const COMMAND_QUEUE: usize = 16;

/// A fully wired engine, ready to run.
pub struct Bot {
    settings: Settings,
    meta: Arc<HashMap<String, AssetMeta>>,
    handle: ControlHandle,
    controller: ReplicationController,
    stream: WalletStream,
    gateway: Arc<dyn ExecutionGateway>,
}

impl Bot {
    /// Build the engine. Fails fast when instrument metadata cannot be
    /// loaded or live credentials are missing.
    pub async fn new(settings: Settings) -> Result<Self> {
        let info = Arc::new(
            InfoClient::new(
                &settings.api_url,
                &settings.target_wallet,
                settings.wallet_address.clone(),
            )
            .context("failed to build info client")?,
        );

        // Metadata is required for every sizing decision; refusing to
        // start without it beats trading with wrong constraints.
        let meta = Arc::new(
            info.load_meta()
                .await
                .context("failed to load instrument metadata")?,
        );
        info!(instruments = meta.len(), "instrument metadata loaded");

        let prices = PriceCache::new();
        match info.all_mids().await {
            Ok(mids) => {
                prices.update_all(&mids).await;
                info!(prices = mids.len(), "mark prices seeded");
            }
            Err(e) => warn!(error = %e, "could not seed mark prices"),
        }

        let (gateway, accounts): (Arc<dyn ExecutionGateway>, Arc<dyn AccountReader>) =
            if settings.simulated_trading {
                let sim = Arc::new(SimGateway::new(
                    settings.simulated_balance,
                    prices.clone(),
                ));
                let accounts = Arc::new(SimAccounts::new(Arc::clone(&info), Arc::clone(&sim)));
                (sim, accounts)
            } else {
                let private_key = settings
                    .private_key
                    .as_deref()
                    .context("live trading requires a private key")?;
                let live = Arc::new(
                    LiveGateway::new(
                        &settings.api_url,
                        private_key,
                        Arc::clone(&meta),
                        prices.clone(),
                        settings.slippage_tolerance,
                    )
                    .context("failed to build live gateway")?,
                );
                (live, Arc::clone(&info) as Arc<dyn AccountReader>)
            };

        // The effective copy ratio, logged so a misconfigured wallet
        // pair is obvious before the first trade.
        match (
            accounts.balance(AccountOwner::Target).await,
            accounts.balance(AccountOwner::Follower).await,
        ) {
            (Ok(target), Ok(follower)) if !target.equity.is_zero() => {
                info!(
                    target_equity = %target.equity,
                    follower_equity = %follower.equity,
                    ratio = %(follower.equity / target.equity).round_dp(6),
                    "wallet ratio derived"
                );
            }
            (target, follower) => warn!(
                target_ok = target.is_ok(),
                follower_ok = follower.is_ok(),
                "could not derive wallet ratio at startup"
            ),
        }

        let sizer = Arc::new(PositionSizer::new(SizerConfig {
            leverage_factor: settings.leverage_factor,
            use_limit_orders: settings.use_limit_orders,
            limit_offset: settings.limit_offset,
            min_notional: settings.min_order_notional,
        }));

        let (event_tx, event_rx) = mpsc::channel(settings.event_queue_size);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);

        let controller = ReplicationController::new(
            ControllerConfig {
                copy_open_positions: settings.copy_open_positions,
                blocked_assets: settings.blocked_assets.clone(),
                max_account_equity: settings.max_account_equity,
            },
            accounts,
            Arc::clone(&gateway),
            sizer,
            Arc::clone(&meta),
            prices,
            Arc::new(EngineStats::default()),
            event_rx,
            cmd_rx,
        );

        let stream = WalletStream::new(
            &settings.ws_url,
            &settings.target_wallet,
            Arc::clone(&info),
            event_tx,
        );

        Ok(Self {
            settings,
            meta,
            handle: ControlHandle::new(cmd_tx),
            controller,
            stream,
            gateway,
        })
    }

    /// Control handle for pausing, resuming, and querying the engine.
    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    pub fn mode(&self) -> &'static str {
        self.gateway.mode()
    }

    pub fn instrument_count(&self) -> usize {
        self.meta.len()
    }

    /// Run until Ctrl+C or until the controller stops on its own.
    pub async fn run(self) -> Result<()> {
        info!(
            target = %self.settings.target_wallet,
            mode = self.gateway.mode(),
            "starting replication engine"
        );

        let stream = self.stream;
        let mut ws_task = tokio::spawn(async move { stream.run().await });

        let controller = self.controller;
        let mut ctrl_task = tokio::spawn(controller.run());

        let handle = self.handle;
        let mut status_ticker = interval(STATUS_INTERVAL);
        status_ticker.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    break;
                }
                result = &mut ctrl_task => {
                    if let Err(e) = result {
                        error!(error = %e, "controller task failed");
                    }
                    ws_task.abort();
                    return Ok(());
                }
                result = &mut ws_task => {
                    // The stream task only returns once the controller is
                    // gone; while it is alive, reaching here means the
                    // task panicked.
                    match result {
                        Ok(()) => error!("fill stream stopped unexpectedly"),
                        Err(e) => error!(error = %e, "fill stream task failed"),
                    }
                    break;
                }
                _ = status_ticker.tick() => {
                    if let Some(status) = handle.status().await {
                        print_status_line(&status);
                    }
                }
            }
        }

        // Final status before tearing the tasks down.
        if let Some(status) = handle.status().await {
            print_summary(&status);
        }
        ws_task.abort();
        ctrl_task.abort();
        Ok(())
    }
}

fn print_status_line(status: &crate::trading::EngineStatus) {
    let equity = status
        .follower_equity
        .map(|e| format!("${:.2}", e))
        .unwrap_or_else(|| "n/a".to_string());

    println!(
        "[{}] mode: {} | equity: {} | positions: {} | copied: {} | skipped: {} | failed: {}",
        chrono::Local::now().format("%H:%M:%S"),
        status.mode,
        equity,
        status.follower_positions.len(),
        status.stats.orders_submitted,
        status.stats.below_minimum + status.stats.cycles_skipped,
        status.stats.order_failures,
    );
}

fn print_summary(status: &crate::trading::EngineStatus) {
    println!("\n=== Session Summary ===");
    println!("Mode:              {}", status.mode);
    println!("Events seen:       {}", status.stats.events_seen);
    println!("Orders submitted:  {}", status.stats.orders_submitted);
    println!("Order failures:    {}", status.stats.order_failures);
    println!("Below minimum:     {}", status.stats.below_minimum);
    println!("Cycles skipped:    {}", status.stats.cycles_skipped);
    println!("Blocked dropped:   {}", status.stats.blocked_dropped);
    println!("Duplicates:        {}", status.stats.duplicates_dropped);

    if let Some(ledger) = &status.ledger {
        println!("\n=== Paper Ledger ===");
        println!("Balance:           ${:.2}", ledger.balance);
        println!("Equity:            ${:.2}", ledger.equity);
        println!("Realized P&L:      ${:.2}", ledger.realized_pnl);
        println!("Unrealized P&L:    ${:.2}", ledger.unrealized_pnl);
        println!("Open positions:    {}", ledger.open_positions);
    }

    if !status.follower_positions.is_empty() {
        println!("\n=== Open Positions ===");
        for pos in &status.follower_positions {
            let side = if pos.is_long() { "LONG" } else { "SHORT" };
            println!(
                "  {:<6} {:<5} {} @ {} (${:.2} notional, P&L: ${:.2})",
                pos.symbol,
                side,
                pos.size.abs(),
                pos.entry_price,
                pos.notional(pos.entry_price),
                pos.unrealized_pnl
            );
        }
    }
}
