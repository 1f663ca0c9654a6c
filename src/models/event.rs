//! Normalized events emitted by the wallet stream subscriber.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::PositionSnapshot;

/// A position change observed on the target wallet, normalized from one
/// or more raw fills sharing the same order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Instrument symbol, e.g. "BTC".
    pub symbol: String,

    /// Signed size change: positive buys, negative sells.
    pub delta: Decimal,

    /// Target's signed position in this instrument before the fill.
    pub start_position: Decimal,

    /// Target's signed position after the fill (`start_position + delta`).
    pub target_position: Decimal,

    /// Average fill price.
    pub price: Decimal,

    /// Leverage on the target's resulting position. Zero when the fill
    /// feed did not report it; resolved from the last position snapshot
    /// before sizing.
    pub leverage: f64,

    /// True when the fill reduced or closed an existing position.
    pub is_close: bool,

    /// Exchange order id the fills belonged to.
    pub oid: u64,

    /// Monotonically non-decreasing marker (fill timestamp in ms) used
    /// to drop duplicates and out-of-order replays after a reconnect.
    /// Zero for synthetic reconciliation events, which bypass dedup.
    pub seq: u64,

    pub timestamp: DateTime<Utc>,
}

impl TradeEvent {
    /// True when the fill flipped the target's position through zero.
    pub fn flipped_direction(&self) -> bool {
        !self.start_position.is_zero()
            && !self.target_position.is_zero()
            && self.start_position.is_sign_positive() != self.target_position.is_sign_positive()
    }
}

/// Messages the subscriber hands to the replication controller.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Full open-position snapshot for the target, sent once per
    /// (re)subscription so the controller can refresh its mirror.
    Snapshot(Vec<PositionSnapshot>),

    /// A live fill on the target wallet.
    Fill(TradeEvent),
}
