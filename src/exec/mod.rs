//! Order execution: the gateway seam plus its live and simulated
//! implementations.

mod live;
mod signing;
mod sim;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::{OrderIntent, OrderResult};

pub use live::LiveGateway;
pub use sim::{SimAccounts, SimGateway};

/// Summary of the simulated ledger, for status output.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSummary {
    pub balance: Decimal,
    pub equity: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub open_positions: usize,
}

/// Single submission point for orders. Implementations differ only in
/// where fills come from; everything upstream of this trait is
/// identical in live and simulated runs.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderResult>;

    fn mode(&self) -> &'static str;

    /// Ledger view for simulated runs. Live gateways have no ledger;
    /// their account state comes from the exchange.
    async fn ledger(&self) -> Option<LedgerSummary> {
        None
    }
}

/// Latest known mark price per symbol, shared between the controller
/// and the gateways.
#[derive(Debug, Clone, Default)]
pub struct PriceCache {
    prices: Arc<RwLock<HashMap<String, Decimal>>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, symbol: &str, price: Decimal) {
        let mut prices = self.prices.write().await;
        prices.insert(symbol.to_string(), price);
    }

    pub async fn update_all(&self, mids: &HashMap<String, Decimal>) {
        let mut prices = self.prices.write().await;
        for (symbol, price) in mids {
            prices.insert(symbol.clone(), *price);
        }
    }

    pub async fn get(&self, symbol: &str) -> Option<Decimal> {
        let prices = self.prices.read().await;
        prices.get(symbol).copied()
    }
}

/// Round a price to at most five significant figures, the exchange's
/// price precision rule.
pub fn round_sig_figs(price: Decimal, figs: u32) -> Decimal {
    if price.is_zero() {
        return price;
    }

    let abs = price.abs();
    let mut magnitude: i32 = 0;
    let mut probe = abs;
    let ten = Decimal::from(10);

    while probe >= ten {
        probe /= ten;
        magnitude += 1;
    }
    while probe < Decimal::ONE {
        probe *= ten;
        magnitude -= 1;
    }

    let dp = figs as i32 - 1 - magnitude;
    if dp <= 0 {
        let mut scale = Decimal::ONE;
        for _ in 0..-dp {
            scale *= ten;
        }
        ((price / scale).round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
            * scale)
            .normalize()
    } else {
        price
            .round_dp_with_strategy(
                dp as u32,
                rust_decimal::RoundingStrategy::MidpointAwayFromZero,
            )
            .normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_sig_figs() {
        assert_eq!(round_sig_figs(dec!(61234.567), 5), dec!(61235));
        assert_eq!(round_sig_figs(dec!(0.0012345678), 5), dec!(0.0012346));
        assert_eq!(round_sig_figs(dec!(3000), 5), dec!(3000));
        assert_eq!(round_sig_figs(dec!(123456789), 5), dec!(123460000));
        assert_eq!(round_sig_figs(Decimal::ZERO, 5), Decimal::ZERO);
    }

    #[test]
    fn test_price_cache_updates() {
        tokio_test::block_on(async {
            let cache = PriceCache::new();
            assert_eq!(cache.get("BTC").await, None);

            cache.update("BTC", dec!(60000)).await;
            assert_eq!(cache.get("BTC").await, Some(dec!(60000)));

            let mids = HashMap::from([("ETH".to_string(), dec!(3000))]);
            cache.update_all(&mids).await;
            assert_eq!(cache.get("ETH").await, Some(dec!(3000)));
            assert_eq!(cache.get("BTC").await, Some(dec!(60000)));
        });
    }
}
