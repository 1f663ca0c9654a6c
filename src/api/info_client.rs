//! Read-only client for the Hyperliquid info API.
//!
//! Instrument metadata, account balances, open positions, and mid
//! prices all come from a single POST endpoint keyed by request type.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::models::{AccountBalance, AccountOwner, AssetMeta, PositionSnapshot};

use super::types::{ClearinghouseState, MetaResponse};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of account state for sizing decisions. The live
/// implementation queries the exchange; tests and simulation swap in
/// their own.
#[async_trait]
pub trait AccountReader: Send + Sync {
    async fn balance(&self, owner: AccountOwner) -> Result<AccountBalance>;

    async fn positions(&self, owner: AccountOwner) -> Result<Vec<PositionSnapshot>>;
}

/// Client for read-only exchange queries.
pub struct InfoClient {
    client: Client,
    api_url: String,
    target: String,
    follower: Option<String>,
}

impl InfoClient {
    pub fn new(api_url: &str, target: &str, follower: Option<String>) -> Result<Self> {
        let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            target: target.to_string(),
            follower,
        })
    }

    fn address_for(&self, owner: AccountOwner) -> Result<&str> {
        match owner {
            AccountOwner::Target => Ok(&self.target),
            AccountOwner::Follower => self.follower.as_deref().ok_or_else(|| {
                EngineError::AccountUnreachable("no follower wallet configured".to_string())
            }),
        }
    }

    async fn post_info(&self, body: serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}/info", self.api_url);
        debug!(url = %url, request = %body, "info request");

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Network(format!(
                "info request failed: {} - {}",
                status, text
            )));
        }

        Ok(response.json().await?)
    }

    /// Load the instrument universe, keyed by symbol. Called once at
    /// startup; failure here is fatal.
    pub async fn load_meta(&self) -> Result<HashMap<String, AssetMeta>> {
        let raw = self
            .post_info(json!({"type": "meta"}))
            .await
            .map_err(|e| EngineError::MetadataUnavailable(e.to_string()))?;

        let meta: MetaResponse = serde_json::from_value(raw)
            .map_err(|e| EngineError::MetadataUnavailable(e.to_string()))?;

        let assets = meta
            .universe
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                (
                    entry.name.clone(),
                    AssetMeta {
                        symbol: entry.name,
                        index: index as u32,
                        sz_decimals: entry.sz_decimals,
                        max_leverage: entry.max_leverage,
                    },
                )
            })
            .collect();

        Ok(assets)
    }

    /// Current mid price for every instrument.
    pub async fn all_mids(&self) -> Result<HashMap<String, Decimal>> {
        let raw = self.post_info(json!({"type": "allMids"})).await?;

        let mids: HashMap<String, String> = serde_json::from_value(raw)?;
        let mut out = HashMap::with_capacity(mids.len());
        for (symbol, price) in mids {
            if let Ok(p) = price.parse::<Decimal>() {
                out.insert(symbol, p);
            }
        }
        Ok(out)
    }

    async fn clearinghouse(&self, address: &str) -> Result<ClearinghouseState> {
        let raw = self
            .post_info(json!({"type": "clearinghouseState", "user": address}))
            .await
            .map_err(|e| EngineError::AccountUnreachable(e.to_string()))?;

        serde_json::from_value(raw).map_err(|e| EngineError::AccountUnreachable(e.to_string()))
    }
}

#[async_trait]
impl AccountReader for InfoClient {
    async fn balance(&self, owner: AccountOwner) -> Result<AccountBalance> {
        let address = self.address_for(owner)?;
        let state = self.clearinghouse(address).await?;

        Ok(AccountBalance {
            equity: state.margin_summary.account_value,
            margin_used: state.margin_summary.total_margin_used,
            withdrawable: state.withdrawable,
        })
    }

    async fn positions(&self, owner: AccountOwner) -> Result<Vec<PositionSnapshot>> {
        let address = self.address_for(owner)?;
        let state = self.clearinghouse(address).await?;

        let positions = state
            .asset_positions
            .into_iter()
            .filter(|p| !p.position.szi.is_zero())
            .map(|p| PositionSnapshot {
                owner,
                symbol: p.position.coin.clone(),
                size: p.position.szi,
                entry_price: p.position.entry_px.unwrap_or(Decimal::ZERO),
                leverage: p.position.leverage.value,
                unrealized_pnl: p.position.unrealized_pnl,
            })
            .collect();

        Ok(positions)
    }
}
