//! Data models for instruments, accounts, stream events, and orders.

mod asset;
mod event;
mod order;
mod position;

pub use asset::AssetMeta;
pub use event::{StreamEvent, TradeEvent};
pub use order::{OrderDirection, OrderIntent, OrderKind, OrderResult, OrderSide};
pub use position::{AccountBalance, AccountOwner, PositionSnapshot};
