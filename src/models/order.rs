//! Order intents produced by the sizing engine and results returned by
//! the execution gateway.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn is_buy(&self) -> bool {
        matches!(self, OrderSide::Buy)
    }
}

/// What the order does to the follower's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Open or increase a long position.
    OpenLong,
    /// Open or increase a short position.
    OpenShort,
    /// Shrink an existing position without closing it.
    Reduce,
    /// Flatten an existing position entirely.
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderKind {
    /// Immediate-or-cancel at a slippage-bounded price.
    Market,
    /// Resting order at an explicit price.
    Limit { price: Decimal },
}

/// A fully specified order ready for the execution gateway. Sizes are
/// positive and already quantized to the instrument's precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub id: Uuid,
    pub symbol: String,
    pub direction: OrderDirection,
    pub side: OrderSide,
    pub size: Decimal,
    pub leverage: u32,
    pub kind: OrderKind,
    pub reduce_only: bool,
}

impl OrderIntent {
    /// Signed change this order applies to the follower's position once
    /// filled at full size.
    pub fn signed_delta(&self) -> Decimal {
        match self.side {
            OrderSide::Buy => self.size,
            OrderSide::Sell => -self.size,
        }
    }
}

/// Outcome of a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub intent_id: Uuid,
    /// Exchange order id, zero in simulation.
    pub oid: u64,
    /// Size actually filled (equals requested size for resting orders).
    pub filled_size: Decimal,
    pub avg_price: Decimal,
    /// Leverage in effect for the instrument when the order went out.
    pub leverage_applied: u32,
    /// False when the order is resting on the book rather than filled.
    pub filled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_signed_delta() {
        let mut intent = OrderIntent {
            id: Uuid::new_v4(),
            symbol: "BTC".to_string(),
            direction: OrderDirection::OpenLong,
            side: OrderSide::Buy,
            size: dec!(0.1),
            leverage: 5,
            kind: OrderKind::Market,
            reduce_only: false,
        };
        assert_eq!(intent.signed_delta(), dec!(0.1));

        intent.side = OrderSide::Sell;
        assert_eq!(intent.signed_delta(), dec!(-0.1));
    }

    #[test]
    fn test_intent_round_trips_through_json() {
        let intent = OrderIntent {
            id: Uuid::new_v4(),
            symbol: "ETH".to_string(),
            direction: OrderDirection::Reduce,
            side: OrderSide::Sell,
            size: dec!(2.5),
            leverage: 3,
            kind: OrderKind::Limit { price: dec!(3000) },
            reduce_only: true,
        };

        let json = serde_json::to_string(&intent).unwrap();
        let back: OrderIntent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, intent);
    }
}
