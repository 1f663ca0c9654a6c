//! Replication controller: consumes stream events and control
//! commands, filters them, and drives sizing and execution.
//!
//! All engine state lives in this task. Events for one instrument are
//! processed strictly in arrival order by a per-instrument lane;
//! different instruments proceed concurrently. Startup reconciliation
//! runs through the same sizing pipeline as live events before the
//! controller starts draining the stream.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::api::AccountReader;
use crate::error::EngineError;
use crate::exec::{ExecutionGateway, LedgerSummary, PriceCache};
use crate::models::{
    AccountBalance, AccountOwner, AssetMeta, PositionSnapshot, StreamEvent, TradeEvent,
};

use super::sizer::{PositionSizer, SizeRequest, SizingOutcome};

const LANE_BUFFER: usize = 64;
const RECONCILE_ATTEMPTS: u32 = 3;
const RECONCILE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Commands accepted while the engine is running. They travel through
/// the same queue discipline as events: a pause is in effect before the
/// next event is dispatched to sizing.
#[derive(Debug)]
pub enum Command {
    Pause,
    Resume,
    SetBlocked(HashSet<String>),
    Status(oneshot::Sender<EngineStatus>),
}

/// Cloneable handle for sending commands to a running controller.
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<Command>,
}

impl ControlHandle {
    pub fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    pub async fn pause(&self) -> bool {
        self.tx.send(Command::Pause).await.is_ok()
    }

    pub async fn resume(&self) -> bool {
        self.tx.send(Command::Resume).await.is_ok()
    }

    pub async fn set_blocked(&self, symbols: HashSet<String>) -> bool {
        self.tx.send(Command::SetBlocked(symbols)).await.is_ok()
    }

    pub async fn status(&self) -> Option<EngineStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::Status(tx)).await.ok()?;
        rx.await.ok()
    }
}

/// Monotonic counters shared between the controller and its lanes.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub events_seen: AtomicU64,
    pub blocked_dropped: AtomicU64,
    pub paused_dropped: AtomicU64,
    pub duplicates_dropped: AtomicU64,
    pub cycles_skipped: AtomicU64,
    pub below_minimum: AtomicU64,
    pub orders_submitted: AtomicU64,
    pub order_failures: AtomicU64,
}

impl EngineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_seen: self.events_seen.load(Ordering::Relaxed),
            blocked_dropped: self.blocked_dropped.load(Ordering::Relaxed),
            paused_dropped: self.paused_dropped.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            below_minimum: self.below_minimum.load(Ordering::Relaxed),
            orders_submitted: self.orders_submitted.load(Ordering::Relaxed),
            order_failures: self.order_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub events_seen: u64,
    pub blocked_dropped: u64,
    pub paused_dropped: u64,
    pub duplicates_dropped: u64,
    pub cycles_skipped: u64,
    pub below_minimum: u64,
    pub orders_submitted: u64,
    pub order_failures: u64,
}

/// Point-in-time view returned by the status command.
#[derive(Debug)]
pub struct EngineStatus {
    pub mode: &'static str,
    pub paused: bool,
    pub target_equity: Option<Decimal>,
    pub follower_equity: Option<Decimal>,
    pub follower_positions: Vec<PositionSnapshot>,
    pub ledger: Option<LedgerSummary>,
    pub stats: StatsSnapshot,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub copy_open_positions: bool,
    /// Uppercased symbols that are never copied.
    pub blocked_assets: HashSet<String>,
    /// Follower equity at which copying pauses itself. None = unlimited.
    pub max_account_equity: Option<Decimal>,
}

/// Mutable engine state. Owned by the controller task. The pause flag
/// is shared with the lanes so a pause also stops events that were
/// already buffered in a lane queue.
#[derive(Debug, Default)]
struct ReplicationState {
    paused: Arc<AtomicBool>,
    /// Uppercased symbols that are never copied.
    blocked: HashSet<String>,
    /// Last-seen target position per symbol, kept for leverage
    /// resolution when fills do not report it.
    target_mirror: HashMap<String, PositionSnapshot>,
    /// Follower position each lane starts from.
    follower_seed: HashMap<String, Decimal>,
}

/// Everything one lane needs to turn an event into orders.
struct LaneContext {
    meta: AssetMeta,
    accounts: Arc<dyn AccountReader>,
    gateway: Arc<dyn ExecutionGateway>,
    sizer: Arc<PositionSizer>,
    prices: PriceCache,
    stats: Arc<EngineStats>,
    /// Shared with the controller; checked again here so events that
    /// were buffered before a pause landed are still dropped.
    paused: Arc<AtomicBool>,
    equity_cap: Option<Decimal>,
}

impl LaneContext {
    /// One full replication cycle: fresh balances, sizing, execution,
    /// follower mirror update. Failures skip the cycle, they never
    /// stop the lane.
    async fn process_cycle(&self, ev: &TradeEvent, follower_pos: &mut Decimal) {
        if self.paused.load(Ordering::SeqCst) {
            debug!(symbol = %ev.symbol, "paused, buffered event discarded");
            self.stats.paused_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let target = match self.accounts.balance(AccountOwner::Target).await {
            Ok(b) => b,
            Err(e) => {
                warn!(symbol = %ev.symbol, error = %e, "target balance unavailable, skipping cycle");
                self.stats.cycles_skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let follower = match self.accounts.balance(AccountOwner::Follower).await {
            Ok(b) => b,
            Err(e) => {
                warn!(symbol = %ev.symbol, error = %e, "follower balance unavailable, skipping cycle");
                self.stats.cycles_skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if let Some(cap) = self.equity_cap {
            if follower.equity >= cap {
                warn!(
                    symbol = %ev.symbol,
                    equity = %follower.equity,
                    cap = %cap,
                    "account equity cap reached, pausing replication"
                );
                self.paused.store(true, Ordering::SeqCst);
                self.stats.paused_dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let mark = if ev.price > Decimal::ZERO {
            self.prices.update(&ev.symbol, ev.price).await;
            ev.price
        } else {
            match self.prices.get(&ev.symbol).await {
                Some(p) => p,
                None => {
                    warn!(symbol = %ev.symbol, "no mark price, skipping cycle");
                    self.stats.cycles_skipped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        };

        let request = SizeRequest {
            event: ev,
            meta: &self.meta,
            target_equity: target.equity,
            follower_equity: follower.equity,
            follower_position: *follower_pos,
            mark_price: mark,
        };

        match self.sizer.size_cycle(&request) {
            Ok(SizingOutcome::NoChange) => {
                debug!(symbol = %ev.symbol, "already in sync");
            }
            Ok(SizingOutcome::BelowMinimum { size, notional }) => {
                info!(
                    symbol = %ev.symbol,
                    size = %size,
                    notional = %notional,
                    "order below minimum, skipped"
                );
                self.stats.below_minimum.fetch_add(1, Ordering::Relaxed);
            }
            Ok(SizingOutcome::Orders(orders)) => {
                for intent in orders {
                    match self.gateway.submit(&intent).await {
                        Ok(result) => {
                            *follower_pos += intent.signed_delta();
                            self.stats.orders_submitted.fetch_add(1, Ordering::Relaxed);
                            info!(
                                symbol = %intent.symbol,
                                direction = ?intent.direction,
                                size = %result.filled_size,
                                price = %result.avg_price,
                                filled = result.filled,
                                "order placed"
                            );
                        }
                        Err(e) => {
                            self.stats.order_failures.fetch_add(1, Ordering::Relaxed);
                            if e.is_retryable() {
                                warn!(
                                    symbol = %intent.symbol,
                                    direction = ?intent.direction,
                                    error = %e,
                                    "order failed on a transient error"
                                );
                            } else {
                                error!(
                                    symbol = %intent.symbol,
                                    direction = ?intent.direction,
                                    error = %e,
                                    "order failed"
                                );
                            }
                            // A failed close must not be followed by the
                            // reopen leg of a direction flip.
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                match e {
                    EngineError::InvalidRatio(_) => {
                        error!(symbol = %ev.symbol, error = %e, "cannot size, skipping cycle")
                    }
                    _ => error!(symbol = %ev.symbol, error = %e, "sizing error"),
                }
                self.stats.cycles_skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Replay filter for at-least-once delivery. Sequence markers are fill
/// timestamps, so two distinct orders can share a marker; the order id
/// disambiguates them.
#[derive(Debug, Default)]
struct ReplayFilter {
    last_seq: u64,
    last_oid: u64,
}

impl ReplayFilter {
    /// Returns true when the event is a duplicate or arrived out of
    /// order. Synthetic events (seq 0) always pass.
    fn is_replay(&mut self, seq: u64, oid: u64) -> bool {
        if seq == 0 {
            return false;
        }
        if seq < self.last_seq {
            return true;
        }
        if seq == self.last_seq && oid == self.last_oid {
            return true;
        }
        self.last_seq = seq;
        self.last_oid = oid;
        false
    }
}

async fn run_lane(
    ctx: LaneContext,
    mut rx: mpsc::Receiver<TradeEvent>,
    mut follower_pos: Decimal,
) {
    let mut filter = ReplayFilter::default();

    while let Some(ev) = rx.recv().await {
        if filter.is_replay(ev.seq, ev.oid) {
            debug!(symbol = %ev.symbol, seq = ev.seq, oid = ev.oid, "replayed event dropped");
            ctx.stats.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        ctx.process_cycle(&ev, &mut follower_pos).await;
    }
}

pub struct ReplicationController {
    config: ControllerConfig,
    accounts: Arc<dyn AccountReader>,
    gateway: Arc<dyn ExecutionGateway>,
    sizer: Arc<PositionSizer>,
    meta: Arc<HashMap<String, AssetMeta>>,
    prices: PriceCache,
    stats: Arc<EngineStats>,
    event_rx: mpsc::Receiver<StreamEvent>,
    cmd_rx: mpsc::Receiver<Command>,

    state: ReplicationState,
    lanes: HashMap<String, mpsc::Sender<TradeEvent>>,
}

impl ReplicationController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ControllerConfig,
        accounts: Arc<dyn AccountReader>,
        gateway: Arc<dyn ExecutionGateway>,
        sizer: Arc<PositionSizer>,
        meta: Arc<HashMap<String, AssetMeta>>,
        prices: PriceCache,
        stats: Arc<EngineStats>,
        event_rx: mpsc::Receiver<StreamEvent>,
        cmd_rx: mpsc::Receiver<Command>,
    ) -> Self {
        let state = ReplicationState {
            blocked: config.blocked_assets.clone(),
            ..ReplicationState::default()
        };
        Self {
            config,
            accounts,
            gateway,
            sizer,
            meta,
            prices,
            stats,
            event_rx,
            cmd_rx,
            state,
            lanes: HashMap::new(),
        }
    }

    /// Reconcile once, then drain commands and events until the stream
    /// side closes. Commands win ties so a pause lands before the next
    /// event is dispatched.
    pub async fn run(mut self) {
        self.reconcile().await;

        info!("controller entering live loop");
        loop {
            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                ev = self.event_rx.recv() => match ev {
                    Some(StreamEvent::Snapshot(positions)) => self.handle_snapshot(positions),
                    Some(StreamEvent::Fill(ev)) => self.handle_fill(ev).await,
                    None => break,
                },
            }
        }

        info!("controller stopped");
    }

    /// Mirror the target's already-open positions through the normal
    /// sizing pipeline before any live event is processed.
    async fn reconcile(&mut self) {
        let target_positions = match self.fetch_with_retry(AccountOwner::Target).await {
            Some(p) => p,
            None => {
                warn!("reconciliation skipped: target positions unreachable");
                return;
            }
        };
        let follower_positions = self
            .fetch_with_retry(AccountOwner::Follower)
            .await
            .unwrap_or_default();

        for pos in &follower_positions {
            self.state.follower_seed.insert(pos.symbol.clone(), pos.size);
        }
        for pos in &target_positions {
            self.state.target_mirror.insert(pos.symbol.clone(), pos.clone());
        }

        if !self.config.copy_open_positions {
            info!(
                positions = target_positions.len(),
                "startup copy disabled, tracking target positions only"
            );
            return;
        }

        info!(positions = target_positions.len(), "reconciling open positions");

        for pos in target_positions {
            if self.is_blocked(&pos.symbol) {
                warn!(symbol = %pos.symbol, "blocked asset, not copied");
                self.stats.blocked_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let meta = match self.meta.get(&pos.symbol) {
                Some(m) => m.clone(),
                None => {
                    warn!(symbol = %pos.symbol, "no metadata for instrument, not copied");
                    continue;
                }
            };

            let price = self
                .prices
                .get(&pos.symbol)
                .await
                .unwrap_or(pos.entry_price);

            let synthetic = TradeEvent {
                symbol: pos.symbol.clone(),
                delta: pos.size,
                start_position: Decimal::ZERO,
                target_position: pos.size,
                price,
                leverage: pos.leverage,
                is_close: false,
                oid: 0,
                seq: 0,
                timestamp: chrono::Utc::now(),
            };

            let ctx = self.lane_context(meta);
            let follower_pos = self
                .state
                .follower_seed
                .entry(pos.symbol.clone())
                .or_insert(Decimal::ZERO);
            ctx.process_cycle(&synthetic, follower_pos).await;
        }

        info!("reconciliation complete");
    }

    async fn fetch_with_retry(&self, owner: AccountOwner) -> Option<Vec<PositionSnapshot>> {
        for attempt in 1..=RECONCILE_ATTEMPTS {
            match self.accounts.positions(owner).await {
                Ok(positions) => return Some(positions),
                Err(e) => {
                    warn!(
                        owner = owner.label(),
                        attempt = attempt,
                        error = %e,
                        "position fetch failed"
                    );
                    if attempt < RECONCILE_ATTEMPTS {
                        tokio::time::sleep(RECONCILE_RETRY_DELAY).await;
                    }
                }
            }
        }
        None
    }

    fn handle_snapshot(&mut self, positions: Vec<PositionSnapshot>) {
        debug!(positions = positions.len(), "target snapshot refreshed");
        self.state.target_mirror.clear();
        for pos in positions {
            self.state.target_mirror.insert(pos.symbol.clone(), pos);
        }
    }

    async fn handle_fill(&mut self, mut ev: TradeEvent) {
        self.stats.events_seen.fetch_add(1, Ordering::Relaxed);

        if self.state.paused.load(Ordering::SeqCst) {
            debug!(symbol = %ev.symbol, "paused, event discarded");
            self.stats.paused_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        // Blocked assets are discarded before any balance read or sizing.
        if self.is_blocked(&ev.symbol) {
            warn!(symbol = %ev.symbol, "blocked asset, event discarded");
            self.stats.blocked_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let meta = match self.meta.get(&ev.symbol) {
            Some(m) => m.clone(),
            None => {
                warn!(symbol = %ev.symbol, "no metadata for instrument, event discarded");
                return;
            }
        };

        // Fills do not carry leverage; fall back to the last snapshot.
        if ev.leverage <= 0.0 {
            ev.leverage = self
                .state
                .target_mirror
                .get(&ev.symbol)
                .map(|p| p.leverage)
                .unwrap_or(1.0);
        }

        if ev.flipped_direction() {
            info!(symbol = %ev.symbol, from = %ev.start_position, to = %ev.target_position, "target flipped direction");
        }

        // Keep the mirror current so later events resolve correctly.
        if let Some(mirror) = self.state.target_mirror.get_mut(&ev.symbol) {
            mirror.size = ev.target_position;
        }

        let lane = self.lane_for(&ev.symbol, meta);
        if lane.send(ev).await.is_err() {
            error!("lane closed unexpectedly");
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Pause => {
                if !self.state.paused.swap(true, Ordering::SeqCst) {
                    info!("replication paused");
                }
            }
            Command::Resume => {
                if self.state.paused.swap(false, Ordering::SeqCst) {
                    info!("replication resumed");
                }
            }
            Command::SetBlocked(symbols) => {
                self.state.blocked =
                    symbols.into_iter().map(|s| s.to_uppercase()).collect();
                info!(blocked = ?self.state.blocked, "blocklist updated");
            }
            Command::Status(reply) => {
                let status = self.gather_status().await;
                let _ = reply.send(status);
            }
        }
    }

    async fn gather_status(&self) -> EngineStatus {
        let target_equity = self
            .accounts
            .balance(AccountOwner::Target)
            .await
            .map(|b: AccountBalance| b.equity)
            .ok();
        let follower_equity = self
            .accounts
            .balance(AccountOwner::Follower)
            .await
            .map(|b| b.equity)
            .ok();
        let follower_positions = self
            .accounts
            .positions(AccountOwner::Follower)
            .await
            .unwrap_or_default();

        EngineStatus {
            mode: self.gateway.mode(),
            paused: self.state.paused.load(Ordering::SeqCst),
            target_equity,
            follower_equity,
            follower_positions,
            ledger: self.gateway.ledger().await,
            stats: self.stats.snapshot(),
        }
    }

    fn is_blocked(&self, symbol: &str) -> bool {
        self.state.blocked.contains(&symbol.to_uppercase())
    }

    fn lane_context(&self, meta: AssetMeta) -> LaneContext {
        LaneContext {
            meta,
            accounts: Arc::clone(&self.accounts),
            gateway: Arc::clone(&self.gateway),
            sizer: Arc::clone(&self.sizer),
            prices: self.prices.clone(),
            stats: Arc::clone(&self.stats),
            paused: Arc::clone(&self.state.paused),
            equity_cap: self.config.max_account_equity,
        }
    }

    fn lane_for(&mut self, symbol: &str, meta: AssetMeta) -> mpsc::Sender<TradeEvent> {
        if let Some(tx) = self.lanes.get(symbol) {
            return tx.clone();
        }

        let (tx, rx) = mpsc::channel(LANE_BUFFER);
        let ctx = self.lane_context(meta);
        let seed = self
            .state
            .follower_seed
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ZERO);

        debug!(symbol = %symbol, seed = %seed, "starting lane");
        tokio::spawn(run_lane(ctx, rx, seed));

        self.lanes.insert(symbol.to_string(), tx.clone());
        tx
    }
}
