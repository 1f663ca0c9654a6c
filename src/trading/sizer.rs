//! Proportional position sizing.
//!
//! Follower orders are scaled by the equity ratio between the two
//! accounts, measured fresh for every event: the follower's desired
//! position is the target's resulting position times
//! `follower_equity / target_equity`, and the order closes the gap
//! between desired and actual.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::exec::round_sig_figs;
use crate::models::{
    AssetMeta, OrderDirection, OrderIntent, OrderKind, OrderSide, TradeEvent,
};

const PRICE_SIG_FIGS: u32 = 5;

/// Sizing parameters, fixed for the lifetime of the engine.
#[derive(Debug, Clone)]
pub struct SizerConfig {
    /// Multiplier applied to the target's leverage before clamping.
    pub leverage_factor: Decimal,

    /// Emit resting limit orders instead of market orders.
    pub use_limit_orders: bool,

    /// Fractional price offset for limit orders, passive side.
    pub limit_offset: Decimal,

    /// Orders below this notional are skipped.
    pub min_notional: Decimal,
}

/// Everything one sizing decision needs, gathered fresh by the caller.
#[derive(Debug)]
pub struct SizeRequest<'a> {
    pub event: &'a TradeEvent,
    pub meta: &'a AssetMeta,
    pub target_equity: Decimal,
    pub follower_equity: Decimal,
    /// Follower's current signed position in the event's instrument.
    pub follower_position: Decimal,
    pub mark_price: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizingOutcome {
    /// Orders to submit, in order. Two entries when the target flipped
    /// direction: the close must precede the reopen.
    Orders(Vec<OrderIntent>),

    /// The computed order was under the instrument minimum or the
    /// exchange's minimum notional.
    BelowMinimum { size: Decimal, notional: Decimal },

    /// Follower is already at the desired position.
    NoChange,
}

pub struct PositionSizer {
    config: SizerConfig,
}

impl PositionSizer {
    pub fn new(config: SizerConfig) -> Self {
        Self { config }
    }

    /// Compute the orders that bring the follower's position in line
    /// with the target's, scaled by the live equity ratio.
    pub fn size_cycle(&self, req: &SizeRequest) -> Result<SizingOutcome> {
        if req.target_equity <= Decimal::ZERO {
            return Err(EngineError::InvalidRatio(req.target_equity));
        }

        let ratio = req.follower_equity / req.target_equity;
        let leverage = self.leverage_for(req.event.leverage, req.meta);

        let desired_raw = req.event.target_position * ratio;
        let desired = signed_quantize(desired_raw, req.meta);
        let current = req.follower_position;

        // Direction flip: close the old position first, then open the
        // new one. Both legs carry the same leverage.
        if !desired.is_zero()
            && !current.is_zero()
            && desired.is_sign_positive() != current.is_sign_positive()
        {
            let mut orders = vec![self.build_intent(
                req,
                OrderDirection::Close,
                opposite(current),
                current.abs(),
                leverage,
                true,
            )];

            let open_size = desired.abs();
            if self.meets_minimum(open_size, req) {
                let direction = if desired.is_sign_positive() {
                    OrderDirection::OpenLong
                } else {
                    OrderDirection::OpenShort
                };
                let side = if desired.is_sign_positive() {
                    OrderSide::Buy
                } else {
                    OrderSide::Sell
                };
                orders.push(self.build_intent(req, direction, side, open_size, leverage, false));
            }

            return Ok(SizingOutcome::Orders(orders));
        }

        let delta = desired - current;
        let size = req.meta.quantize_size(delta.abs());

        if size.is_zero() {
            return Ok(SizingOutcome::NoChange);
        }
        if !self.meets_minimum(size, req) {
            return Ok(SizingOutcome::BelowMinimum {
                size,
                notional: size * req.mark_price,
            });
        }

        let (direction, side, reduce_only) = if current.is_zero() {
            if delta.is_sign_positive() {
                (OrderDirection::OpenLong, OrderSide::Buy, false)
            } else {
                (OrderDirection::OpenShort, OrderSide::Sell, false)
            }
        } else if desired.is_zero() {
            (OrderDirection::Close, opposite(current), true)
        } else if desired.abs() > current.abs() {
            let side = if delta.is_sign_positive() {
                OrderSide::Buy
            } else {
                OrderSide::Sell
            };
            let direction = if desired.is_sign_positive() {
                OrderDirection::OpenLong
            } else {
                OrderDirection::OpenShort
            };
            (direction, side, false)
        } else {
            (OrderDirection::Reduce, opposite(current), true)
        };

        Ok(SizingOutcome::Orders(vec![self.build_intent(
            req,
            direction,
            side,
            size,
            leverage,
            reduce_only,
        )]))
    }

    /// Scale the target's leverage, round half-up to a whole number,
    /// and clamp into the instrument's valid range.
    pub fn leverage_for(&self, target_leverage: f64, meta: &AssetMeta) -> u32 {
        let target = Decimal::try_from(target_leverage).unwrap_or(Decimal::ONE);
        let scaled = (target * self.config.leverage_factor)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);

        let scaled = scaled.to_u32().unwrap_or(1);
        scaled.clamp(1, meta.max_leverage.max(1))
    }

    fn meets_minimum(&self, size: Decimal, req: &SizeRequest) -> bool {
        size >= req.meta.min_size() && size * req.mark_price >= self.config.min_notional
    }

    fn build_intent(
        &self,
        req: &SizeRequest,
        direction: OrderDirection,
        side: OrderSide,
        size: Decimal,
        leverage: u32,
        reduce_only: bool,
    ) -> OrderIntent {
        let kind = if self.config.use_limit_orders {
            let offset = if side == OrderSide::Buy {
                Decimal::ONE - self.config.limit_offset
            } else {
                Decimal::ONE + self.config.limit_offset
            };
            OrderKind::Limit {
                price: round_sig_figs(req.mark_price * offset, PRICE_SIG_FIGS),
            }
        } else {
            OrderKind::Market
        };

        OrderIntent {
            id: Uuid::new_v4(),
            symbol: req.event.symbol.clone(),
            direction,
            side,
            size: req.meta.quantize_size(size),
            leverage,
            kind,
            reduce_only,
        }
    }
}

fn opposite(position: Decimal) -> OrderSide {
    if position.is_sign_positive() {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    }
}

/// Quantize a signed size, preserving sign.
fn signed_quantize(size: Decimal, meta: &AssetMeta) -> Decimal {
    if size.is_sign_negative() {
        -meta.quantize_size(size.abs())
    } else {
        meta.quantize_size(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn btc() -> AssetMeta {
        AssetMeta {
            symbol: "BTC".to_string(),
            index: 0,
            sz_decimals: 5,
            max_leverage: 50,
        }
    }

    fn event(start: Decimal, end: Decimal, leverage: f64) -> TradeEvent {
        TradeEvent {
            symbol: "BTC".to_string(),
            delta: end - start,
            start_position: start,
            target_position: end,
            price: dec!(60000),
            leverage,
            is_close: end.abs() < start.abs(),
            oid: 1,
            seq: 1,
            timestamp: Utc::now(),
        }
    }

    fn sizer(factor: Decimal) -> PositionSizer {
        PositionSizer::new(SizerConfig {
            leverage_factor: factor,
            use_limit_orders: false,
            limit_offset: dec!(0.001),
            min_notional: dec!(10),
        })
    }

    fn request<'a>(
        ev: &'a TradeEvent,
        meta: &'a AssetMeta,
        target_equity: Decimal,
        follower_equity: Decimal,
        follower_position: Decimal,
    ) -> SizeRequest<'a> {
        SizeRequest {
            event: ev,
            meta,
            target_equity,
            follower_equity,
            follower_position,
            mark_price: dec!(60000),
        }
    }

    #[test]
    fn test_proportional_open() {
        // Target with $100k buys 1 BTC at 5x; follower has $10k.
        let meta = btc();
        let ev = event(dec!(0), dec!(1), 5.0);
        let req = request(&ev, &meta, dec!(100000), dec!(10000), dec!(0));

        match sizer(dec!(1)).size_cycle(&req).unwrap() {
            SizingOutcome::Orders(orders) => {
                assert_eq!(orders.len(), 1);
                let o = &orders[0];
                assert_eq!(o.size, dec!(0.1));
                assert_eq!(o.leverage, 5);
                assert_eq!(o.direction, OrderDirection::OpenLong);
                assert_eq!(o.side, OrderSide::Buy);
                assert!(!o.reduce_only);
                assert_eq!(o.kind, OrderKind::Market);
            }
            other => panic!("expected orders, got {:?}", other),
        }
    }

    #[test]
    fn test_leverage_adjustment_rounds_half_up() {
        // 5x at factor 0.5 scales to 2.5, which rounds to 3.
        assert_eq!(sizer(dec!(0.5)).leverage_for(5.0, &btc()), 3);
    }

    #[test]
    fn test_leverage_clamped_to_instrument_range() {
        assert_eq!(sizer(dec!(2)).leverage_for(40.0, &btc()), 50);
        assert_eq!(sizer(dec!(0.1)).leverage_for(3.0, &btc()), 1);
    }

    #[test]
    fn test_zero_target_equity_is_invalid_ratio() {
        let meta = btc();
        let ev = event(dec!(0), dec!(1), 5.0);
        let req = request(&ev, &meta, dec!(0), dec!(10000), dec!(0));

        let err = sizer(dec!(1)).size_cycle(&req).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRatio(_)));
    }

    #[test]
    fn test_direction_flip_closes_then_reopens() {
        // Target flips 1 long -> 1 short; follower holds 0.1 long.
        let meta = btc();
        let ev = event(dec!(1), dec!(-1), 5.0);
        let req = request(&ev, &meta, dec!(100000), dec!(10000), dec!(0.1));

        match sizer(dec!(1)).size_cycle(&req).unwrap() {
            SizingOutcome::Orders(orders) => {
                assert_eq!(orders.len(), 2);

                assert_eq!(orders[0].direction, OrderDirection::Close);
                assert_eq!(orders[0].side, OrderSide::Sell);
                assert_eq!(orders[0].size, dec!(0.1));
                assert!(orders[0].reduce_only);

                assert_eq!(orders[1].direction, OrderDirection::OpenShort);
                assert_eq!(orders[1].side, OrderSide::Sell);
                assert_eq!(orders[1].size, dec!(0.1));
                assert!(!orders[1].reduce_only);
            }
            other => panic!("expected orders, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_close_is_reduce_only() {
        // Target trims 1 -> 0.6; follower holds 0.1.
        let meta = btc();
        let ev = event(dec!(1), dec!(0.6), 5.0);
        let req = request(&ev, &meta, dec!(100000), dec!(10000), dec!(0.1));

        match sizer(dec!(1)).size_cycle(&req).unwrap() {
            SizingOutcome::Orders(orders) => {
                assert_eq!(orders.len(), 1);
                assert_eq!(orders[0].direction, OrderDirection::Reduce);
                assert_eq!(orders[0].side, OrderSide::Sell);
                assert_eq!(orders[0].size, dec!(0.04));
                assert!(orders[0].reduce_only);
            }
            other => panic!("expected orders, got {:?}", other),
        }
    }

    #[test]
    fn test_full_close_flattens_follower() {
        let meta = btc();
        let ev = event(dec!(1), dec!(0), 5.0);
        let req = request(&ev, &meta, dec!(100000), dec!(10000), dec!(0.1));

        match sizer(dec!(1)).size_cycle(&req).unwrap() {
            SizingOutcome::Orders(orders) => {
                assert_eq!(orders[0].direction, OrderDirection::Close);
                assert_eq!(orders[0].size, dec!(0.1));
                assert!(orders[0].reduce_only);
            }
            other => panic!("expected orders, got {:?}", other),
        }
    }

    #[test]
    fn test_below_minimum_notional_skipped() {
        // Tiny follower equity: 0.0001 BTC at $60k is $6, under the $10
        // exchange minimum.
        let meta = btc();
        let ev = event(dec!(0), dec!(1), 5.0);
        let req = request(&ev, &meta, dec!(100000), dec!(10), dec!(0));

        match sizer(dec!(1)).size_cycle(&req).unwrap() {
            SizingOutcome::BelowMinimum { notional, .. } => {
                assert!(notional < dec!(10));
            }
            other => panic!("expected below-minimum, got {:?}", other),
        }
    }

    #[test]
    fn test_already_in_sync_is_no_change() {
        let meta = btc();
        let ev = event(dec!(0.5), dec!(1), 5.0);
        let req = request(&ev, &meta, dec!(100000), dec!(10000), dec!(0.1));

        assert_eq!(
            sizer(dec!(1)).size_cycle(&req).unwrap(),
            SizingOutcome::NoChange
        );
    }

    #[test]
    fn test_size_quantized_to_instrument_precision() {
        let meta = AssetMeta {
            sz_decimals: 2,
            ..btc()
        };
        // Ratio 1/3 would give 0.333...; quantized down to 0.33.
        let ev = event(dec!(0), dec!(1), 5.0);
        let req = request(&ev, &meta, dec!(30000), dec!(10000), dec!(0));

        match sizer(dec!(1)).size_cycle(&req).unwrap() {
            SizingOutcome::Orders(orders) => assert_eq!(orders[0].size, dec!(0.33)),
            other => panic!("expected orders, got {:?}", other),
        }
    }

    #[test]
    fn test_limit_orders_carry_offset_price() {
        let meta = btc();
        let ev = event(dec!(0), dec!(1), 5.0);
        let req = request(&ev, &meta, dec!(100000), dec!(10000), dec!(0));

        let sizer = PositionSizer::new(SizerConfig {
            leverage_factor: dec!(1),
            use_limit_orders: true,
            limit_offset: dec!(0.001),
            min_notional: dec!(10),
        });

        match sizer.size_cycle(&req).unwrap() {
            SizingOutcome::Orders(orders) => {
                // Buy rests below the mark: 60000 * 0.999.
                assert_eq!(orders[0].kind, OrderKind::Limit { price: dec!(59940) });
            }
            other => panic!("expected orders, got {:?}", other),
        }
    }

    #[test]
    fn test_increase_existing_long() {
        // Target adds 1 -> 2; follower at 0.1 should add 0.1.
        let meta = btc();
        let ev = event(dec!(1), dec!(2), 5.0);
        let req = request(&ev, &meta, dec!(100000), dec!(10000), dec!(0.1));

        match sizer(dec!(1)).size_cycle(&req).unwrap() {
            SizingOutcome::Orders(orders) => {
                assert_eq!(orders[0].direction, OrderDirection::OpenLong);
                assert_eq!(orders[0].size, dec!(0.1));
                assert!(!orders[0].reduce_only);
            }
            other => panic!("expected orders, got {:?}", other),
        }
    }
}
