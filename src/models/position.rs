//! Account ownership, balances, and open-position snapshots.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which of the two accounts a query or snapshot refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountOwner {
    /// The wallet being mirrored.
    Target,
    /// Our own trading wallet.
    Follower,
}

impl AccountOwner {
    pub fn label(&self) -> &'static str {
        match self {
            AccountOwner::Target => "target",
            AccountOwner::Follower => "follower",
        }
    }
}

/// Equity figures for a single account at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Total account value including unrealized P&L.
    pub equity: Decimal,

    /// Margin currently locked by open positions.
    pub margin_used: Decimal,

    /// Equity available for new positions.
    pub withdrawable: Decimal,
}

/// One open perpetual position as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub owner: AccountOwner,

    /// Instrument symbol, e.g. "BTC".
    pub symbol: String,

    /// Signed size: positive long, negative short.
    pub size: Decimal,

    /// Average entry price.
    pub entry_price: Decimal,

    /// Leverage the position was opened with.
    pub leverage: f64,

    /// Unrealized P&L at snapshot time.
    pub unrealized_pnl: Decimal,
}

impl PositionSnapshot {
    /// True for long positions, false for short. Flat positions are
    /// filtered out before a snapshot is constructed.
    pub fn is_long(&self) -> bool {
        self.size > Decimal::ZERO
    }

    /// Notional value at the given mark price.
    pub fn notional(&self, mark: Decimal) -> Decimal {
        self.size.abs() * mark
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_snapshot_direction() {
        let long = PositionSnapshot {
            owner: AccountOwner::Target,
            symbol: "BTC".to_string(),
            size: dec!(0.5),
            entry_price: dec!(60000),
            leverage: 5.0,
            unrealized_pnl: dec!(0),
        };
        assert!(long.is_long());
        assert_eq!(long.notional(dec!(62000)), dec!(31000));

        let short = PositionSnapshot {
            size: dec!(-0.5),
            ..long
        };
        assert!(!short.is_long());
        assert_eq!(short.notional(dec!(62000)), dec!(31000));
    }
}
