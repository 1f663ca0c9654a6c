//! Exchange clients: read-only info queries and the fill stream.

mod info_client;
mod types;
mod ws;

pub use info_client::{AccountReader, InfoClient};
pub use ws::WalletStream;
