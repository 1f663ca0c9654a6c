//! Instrument metadata loaded once at startup.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Immutable trading constraints for one perpetual instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMeta {
    /// Symbol, e.g. "BTC".
    pub symbol: String,

    /// Position in the exchange's instrument universe. Order actions
    /// reference instruments by this index, not by symbol.
    pub index: u32,

    /// Number of decimal places allowed in order sizes.
    pub sz_decimals: u32,

    /// Maximum leverage the exchange permits for this instrument.
    pub max_leverage: u32,
}

impl AssetMeta {
    /// Smallest order size the instrument supports.
    pub fn min_size(&self) -> Decimal {
        Decimal::new(1, self.sz_decimals)
    }

    /// Quantize a size to the instrument's precision, rounding toward
    /// zero so the result never exceeds the requested exposure.
    pub fn quantize_size(&self, size: Decimal) -> Decimal {
        size.round_dp_with_strategy(self.sz_decimals, rust_decimal::RoundingStrategy::ToZero)
            .normalize()
    }
}
