//! Wire types for the Hyperliquid info API and WebSocket feed.
//!
//! Numeric fields arrive as JSON strings and are decoded straight into
//! `Decimal` to avoid float round-trips.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Response to an info request of type "meta".
#[derive(Debug, Clone, Deserialize)]
pub struct MetaResponse {
    pub universe: Vec<UniverseEntry>,
}

/// One instrument in the exchange universe. The position of the entry
/// in the universe array is the asset index used by order actions.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniverseEntry {
    pub name: String,
    pub sz_decimals: u32,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,
    #[serde(default)]
    pub only_isolated: bool,
}

fn default_max_leverage() -> u32 {
    1
}

/// Response to an info request of type "clearinghouseState".
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearinghouseState {
    pub margin_summary: MarginSummary,
    #[serde(default, with = "rust_decimal::serde::str")]
    pub withdrawable: Decimal,
    #[serde(default)]
    pub asset_positions: Vec<AssetPosition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginSummary {
    #[serde(with = "rust_decimal::serde::str")]
    pub account_value: Decimal,
    #[serde(default, with = "rust_decimal::serde::str")]
    pub total_margin_used: Decimal,
}

/// Wrapper the exchange puts around each open position.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetPosition {
    pub position: RawPosition,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPosition {
    pub coin: String,

    /// Signed position size ("szi" on the wire).
    #[serde(with = "rust_decimal::serde::str")]
    pub szi: Decimal,

    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub entry_px: Option<Decimal>,

    pub leverage: LeverageInfo,

    #[serde(default, with = "rust_decimal::serde::str")]
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeverageInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: f64,
}

/// Envelope for every WebSocket message.
#[derive(Debug, Clone, Deserialize)]
pub struct WsMessage {
    pub channel: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Payload of a "userFills" message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsUserFills {
    /// True for the historical batch sent right after subscribing.
    #[serde(default)]
    pub is_snapshot: bool,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub fills: Vec<WsFill>,
}

/// A single fill on the subscribed wallet.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsFill {
    pub coin: String,

    #[serde(with = "rust_decimal::serde::str")]
    pub px: Decimal,

    /// Unsigned fill size; direction comes from `side`.
    #[serde(with = "rust_decimal::serde::str")]
    pub sz: Decimal,

    /// "B" for buy, "A" for sell.
    pub side: String,

    /// Fill timestamp in epoch milliseconds.
    pub time: u64,

    /// Wallet's signed position in this coin before the fill.
    #[serde(default, with = "rust_decimal::serde::str")]
    pub start_position: Decimal,

    /// Human-readable direction, e.g. "Open Long" or "Close Short".
    #[serde(default)]
    pub dir: String,

    #[serde(default, with = "rust_decimal::serde::str")]
    pub closed_pnl: Decimal,

    /// Order id the fill belongs to.
    #[serde(default)]
    pub oid: u64,

    /// Unique trade id.
    #[serde(default)]
    pub tid: u64,
}

impl WsFill {
    /// Fill size signed by side.
    pub fn signed_size(&self) -> Decimal {
        if self.side == "B" {
            self.sz
        } else {
            -self.sz
        }
    }

    pub fn is_close(&self) -> bool {
        self.dir.contains("Close")
    }
}
