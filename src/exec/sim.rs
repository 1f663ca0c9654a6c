//! Simulated execution against an in-memory ledger.
//!
//! Fills are immediate at the last known mark price. Margin and
//! liquidation are not modeled; the ledger only tracks sizes, entry
//! prices, and P&L so paper runs produce a meaningful account curve.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::info;

use crate::api::{AccountReader, InfoClient};
use crate::error::{EngineError, Result};
use crate::models::{
    AccountBalance, AccountOwner, OrderIntent, OrderKind, OrderResult, PositionSnapshot,
};

use super::{ExecutionGateway, LedgerSummary, PriceCache};

#[derive(Debug, Clone)]
struct SimPosition {
    /// Signed size: positive long, negative short.
    size: Decimal,
    entry_price: Decimal,
    leverage: u32,
}

#[derive(Debug, Default)]
struct SimLedger {
    balance: Decimal,
    realized_pnl: Decimal,
    positions: HashMap<String, SimPosition>,
}

/// Paper-trading gateway. Never returns exchange-side rejections.
pub struct SimGateway {
    ledger: RwLock<SimLedger>,
    prices: PriceCache,
}

impl SimGateway {
    pub fn new(starting_balance: Decimal, prices: PriceCache) -> Self {
        Self {
            ledger: RwLock::new(SimLedger {
                balance: starting_balance,
                realized_pnl: Decimal::ZERO,
                positions: HashMap::new(),
            }),
            prices,
        }
    }

    async fn fill_price(&self, intent: &OrderIntent, ledger: &SimLedger) -> Result<Decimal> {
        if let Some(price) = self.prices.get(&intent.symbol).await {
            return Ok(price);
        }
        if let OrderKind::Limit { price } = intent.kind {
            return Ok(price);
        }
        if let Some(pos) = ledger.positions.get(&intent.symbol) {
            return Ok(pos.entry_price);
        }
        Err(EngineError::Network(format!(
            "no mark price for {}",
            intent.symbol
        )))
    }

    /// Open positions as snapshots, marked to the given prices.
    pub async fn open_positions(&self) -> Vec<PositionSnapshot> {
        let ledger = self.ledger.read().await;
        let mut out = Vec::with_capacity(ledger.positions.len());
        for (symbol, pos) in &ledger.positions {
            let mark = self.prices.get(symbol).await.unwrap_or(pos.entry_price);
            out.push(PositionSnapshot {
                owner: AccountOwner::Follower,
                symbol: symbol.clone(),
                size: pos.size,
                entry_price: pos.entry_price,
                leverage: pos.leverage as f64,
                unrealized_pnl: (mark - pos.entry_price) * pos.size,
            });
        }
        out
    }

    async fn summary(&self) -> LedgerSummary {
        let unrealized: Decimal = {
            let ledger = self.ledger.read().await;
            let mut total = Decimal::ZERO;
            for (symbol, pos) in &ledger.positions {
                let mark = self.prices.get(symbol).await.unwrap_or(pos.entry_price);
                total += (mark - pos.entry_price) * pos.size;
            }
            total
        };

        let ledger = self.ledger.read().await;
        LedgerSummary {
            balance: ledger.balance,
            equity: ledger.balance + unrealized,
            realized_pnl: ledger.realized_pnl,
            unrealized_pnl: unrealized,
            open_positions: ledger.positions.len(),
        }
    }
}

#[async_trait]
impl ExecutionGateway for SimGateway {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderResult> {
        let mut ledger = self.ledger.write().await;
        let price = self.fill_price(intent, &ledger).await?;
        let delta = intent.signed_delta();

        let (old_size, old_entry) = match ledger.positions.get(&intent.symbol) {
            Some(p) => (p.size, p.entry_price),
            None => (Decimal::ZERO, price),
        };
        let new_size = old_size + delta;

        let adding = old_size.is_zero() || old_size.is_sign_positive() == delta.is_sign_positive();
        let mut new_entry = old_entry;

        if adding {
            // Opening or adding: volume-weighted entry.
            let total = old_size.abs() + delta.abs();
            if !total.is_zero() {
                new_entry = (old_entry * old_size.abs() + price * delta.abs()) / total;
            }
        } else {
            // Reducing: realize pnl on the closed portion.
            let closed = delta.abs().min(old_size.abs());
            let direction = if old_size.is_sign_positive() {
                Decimal::ONE
            } else {
                -Decimal::ONE
            };
            let pnl = (price - old_entry) * closed * direction;
            ledger.balance += pnl;
            ledger.realized_pnl += pnl;

            // Crossing through flat reopens the remainder at fill price.
            if new_size.is_sign_positive() != old_size.is_sign_positive() {
                new_entry = price;
            }
        }

        if new_size.is_zero() {
            ledger.positions.remove(&intent.symbol);
        } else {
            ledger.positions.insert(
                intent.symbol.clone(),
                SimPosition {
                    size: new_size,
                    entry_price: new_entry,
                    leverage: intent.leverage,
                },
            );
        }

        info!(
            symbol = %intent.symbol,
            side = ?intent.side,
            size = %intent.size,
            price = %price,
            "simulated fill"
        );

        Ok(OrderResult {
            intent_id: intent.id,
            oid: 0,
            filled_size: intent.size,
            avg_price: price,
            leverage_applied: intent.leverage,
            filled: true,
        })
    }

    fn mode(&self) -> &'static str {
        "simulated"
    }

    async fn ledger(&self) -> Option<LedgerSummary> {
        Some(self.summary().await)
    }
}

/// Account reader for simulated runs: the target is still read from the
/// exchange, the follower comes from the paper ledger.
pub struct SimAccounts {
    info: Arc<InfoClient>,
    sim: Arc<SimGateway>,
}

impl SimAccounts {
    pub fn new(info: Arc<InfoClient>, sim: Arc<SimGateway>) -> Self {
        Self { info, sim }
    }
}

#[async_trait]
impl AccountReader for SimAccounts {
    async fn balance(&self, owner: AccountOwner) -> Result<AccountBalance> {
        match owner {
            AccountOwner::Target => self.info.balance(owner).await,
            AccountOwner::Follower => {
                let summary = self.sim.summary().await;
                Ok(AccountBalance {
                    equity: summary.equity,
                    margin_used: Decimal::ZERO,
                    withdrawable: summary.balance,
                })
            }
        }
    }

    async fn positions(&self, owner: AccountOwner) -> Result<Vec<PositionSnapshot>> {
        match owner {
            AccountOwner::Target => self.info.positions(owner).await,
            AccountOwner::Follower => Ok(self.sim.open_positions().await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderDirection, OrderSide};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn intent(symbol: &str, side: OrderSide, size: Decimal, reduce_only: bool) -> OrderIntent {
        OrderIntent {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            direction: if reduce_only {
                OrderDirection::Close
            } else if side == OrderSide::Buy {
                OrderDirection::OpenLong
            } else {
                OrderDirection::OpenShort
            },
            side,
            size,
            leverage: 5,
            kind: OrderKind::Market,
            reduce_only,
        }
    }

    #[tokio::test]
    async fn test_open_then_close_realizes_pnl() {
        let prices = PriceCache::new();
        prices.update("BTC", dec!(60000)).await;
        let gateway = SimGateway::new(dec!(10000), prices.clone());

        let result = gateway
            .submit(&intent("BTC", OrderSide::Buy, dec!(0.1), false))
            .await
            .unwrap();
        assert!(result.filled);
        assert_eq!(result.avg_price, dec!(60000));

        // Price rises, close the whole position.
        prices.update("BTC", dec!(61000)).await;
        gateway
            .submit(&intent("BTC", OrderSide::Sell, dec!(0.1), true))
            .await
            .unwrap();

        let summary = gateway.ledger().await.unwrap();
        assert_eq!(summary.realized_pnl, dec!(100));
        assert_eq!(summary.balance, dec!(10100));
        assert_eq!(summary.open_positions, 0);
    }

    #[tokio::test]
    async fn test_short_position_pnl() {
        let prices = PriceCache::new();
        prices.update("ETH", dec!(3000)).await;
        let gateway = SimGateway::new(dec!(10000), prices.clone());

        gateway
            .submit(&intent("ETH", OrderSide::Sell, dec!(2), false))
            .await
            .unwrap();

        let positions = gateway.open_positions().await;
        assert_eq!(positions[0].size, dec!(-2));

        // Price drops, short profits.
        prices.update("ETH", dec!(2900)).await;
        gateway
            .submit(&intent("ETH", OrderSide::Buy, dec!(2), true))
            .await
            .unwrap();

        let summary = gateway.ledger().await.unwrap();
        assert_eq!(summary.realized_pnl, dec!(200));
    }

    #[tokio::test]
    async fn test_averaging_in() {
        let prices = PriceCache::new();
        prices.update("BTC", dec!(60000)).await;
        let gateway = SimGateway::new(dec!(10000), prices.clone());

        gateway
            .submit(&intent("BTC", OrderSide::Buy, dec!(0.1), false))
            .await
            .unwrap();

        prices.update("BTC", dec!(62000)).await;
        gateway
            .submit(&intent("BTC", OrderSide::Buy, dec!(0.1), false))
            .await
            .unwrap();

        let positions = gateway.open_positions().await;
        assert_eq!(positions[0].size, dec!(0.2));
        assert_eq!(positions[0].entry_price, dec!(61000));
    }

    #[tokio::test]
    async fn test_unknown_symbol_without_price_fails() {
        let gateway = SimGateway::new(dec!(10000), PriceCache::new());
        let err = gateway
            .submit(&intent("XRP", OrderSide::Buy, dec!(100), false))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Network(_)));
    }
}
