//! Live order execution against the exchange endpoint.
//!
//! Transport failures are retried with bounded exponential backoff.
//! Exchange rejections are permanent: the intent is abandoned and the
//! error surfaced to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::models::{AssetMeta, OrderIntent, OrderKind, OrderResult};

use super::signing::ActionSigner;
use super::{round_sig_figs, ExecutionGateway, PriceCache};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(15);
const PRICE_SIG_FIGS: u32 = 5;

pub struct LiveGateway {
    client: Client,
    signer: ActionSigner,
    exchange_url: String,
    meta: Arc<HashMap<String, AssetMeta>>,
    prices: PriceCache,
    slippage: Decimal,
    /// Last leverage set per symbol, to skip redundant updateLeverage
    /// actions.
    leverage_set: RwLock<HashMap<String, u32>>,
}

impl LiveGateway {
    pub fn new(
        api_url: &str,
        private_key: &str,
        meta: Arc<HashMap<String, AssetMeta>>,
        prices: PriceCache,
        slippage: Decimal,
    ) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let signer = ActionSigner::new(private_key)?;

        Ok(Self {
            client,
            signer,
            exchange_url: format!("{}/exchange", api_url.trim_end_matches('/')),
            meta,
            prices,
            slippage,
            leverage_set: RwLock::new(HashMap::new()),
        })
    }

    fn meta_for(&self, symbol: &str) -> Result<&AssetMeta> {
        self.meta.get(symbol).ok_or_else(|| {
            EngineError::RejectedByExchange(format!("unknown instrument {}", symbol))
        })
    }

    /// Price an IOC order so it crosses the book but caps slippage.
    async fn market_price(&self, intent: &OrderIntent) -> Result<Decimal> {
        let mark = self.prices.get(&intent.symbol).await.ok_or_else(|| {
            EngineError::Network(format!("no mark price for {}", intent.symbol))
        })?;

        let adjusted = if intent.side.is_buy() {
            mark * (Decimal::ONE + self.slippage)
        } else {
            mark * (Decimal::ONE - self.slippage)
        };
        Ok(round_sig_figs(adjusted, PRICE_SIG_FIGS))
    }

    /// Sign an action and POST it, retrying transport failures.
    async fn post_action(&self, action: serde_json::Value) -> Result<serde_json::Value> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(MAX_RETRY_ELAPSED),
            ..ExponentialBackoff::default()
        };

        let raw = backoff::future::retry(policy, || async {
            let nonce = Utc::now().timestamp_millis() as u64;
            let request = self
                .signer
                .sign_action(&action, nonce)
                .await
                .map_err(backoff::Error::permanent)?;

            let response = self
                .client
                .post(&self.exchange_url)
                .json(&request)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(EngineError::Http(e)))?;

            if response.status().is_server_error() {
                return Err(backoff::Error::transient(EngineError::Network(format!(
                    "exchange returned {}",
                    response.status()
                ))));
            }
            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(backoff::Error::permanent(EngineError::RejectedByExchange(
                    format!("{} - {}", status, text),
                )));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| backoff::Error::transient(EngineError::Http(e)))
        })
        .await?;

        if raw["status"] == "err" {
            let message = raw["response"].as_str().unwrap_or("unknown error").to_string();
            return Err(classify_rejection(&message));
        }
        Ok(raw)
    }

    /// Set leverage on the instrument if it differs from what we last
    /// sent. The exchange applies leverage per instrument, not per
    /// order, so this precedes order placement.
    async fn ensure_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        {
            let set = self.leverage_set.read().await;
            if set.get(symbol) == Some(&leverage) {
                return Ok(());
            }
        }

        let meta = self.meta_for(symbol)?;
        let action = json!({
            "type": "updateLeverage",
            "asset": meta.index,
            "isCross": true,
            "leverage": leverage,
        });

        self.post_action(action).await?;
        debug!(symbol = %symbol, leverage = leverage, "leverage updated");

        let mut set = self.leverage_set.write().await;
        set.insert(symbol.to_string(), leverage);
        Ok(())
    }
}

#[async_trait]
impl ExecutionGateway for LiveGateway {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderResult> {
        let meta = self.meta_for(&intent.symbol)?;

        if !intent.reduce_only {
            self.ensure_leverage(&intent.symbol, intent.leverage).await?;
        }

        let (price, tif) = match intent.kind {
            OrderKind::Market => (self.market_price(intent).await?, "Ioc"),
            OrderKind::Limit { price } => (round_sig_figs(price, PRICE_SIG_FIGS), "Gtc"),
        };

        let action = json!({
            "type": "order",
            "orders": [{
                "a": meta.index,
                "b": intent.side.is_buy(),
                "p": price.to_string(),
                "s": intent.size.to_string(),
                "r": intent.reduce_only,
                "t": {"limit": {"tif": tif}},
            }],
            "grouping": "na",
        });

        info!(
            symbol = %intent.symbol,
            side = ?intent.side,
            size = %intent.size,
            price = %price,
            tif = tif,
            reduce_only = intent.reduce_only,
            "submitting order"
        );

        let raw = self.post_action(action).await?;
        parse_order_response(intent, price, &raw)
    }

    fn mode(&self) -> &'static str {
        "live"
    }
}

/// Map an exchange rejection string onto the margin/other split.
fn classify_rejection(message: &str) -> EngineError {
    if message.to_lowercase().contains("margin") {
        EngineError::InsufficientMargin(message.to_string())
    } else {
        EngineError::RejectedByExchange(message.to_string())
    }
}

fn parse_order_response(
    intent: &OrderIntent,
    submitted_price: Decimal,
    raw: &serde_json::Value,
) -> Result<OrderResult> {
    let status = &raw["response"]["data"]["statuses"][0];

    if let Some(message) = status["error"].as_str() {
        warn!(symbol = %intent.symbol, error = %message, "order rejected");
        return Err(classify_rejection(message));
    }

    if let Some(filled) = status.get("filled") {
        let filled_size = filled["totalSz"]
            .as_str()
            .and_then(|s| s.parse::<Decimal>().ok())
            .unwrap_or(intent.size);
        let avg_price = filled["avgPx"]
            .as_str()
            .and_then(|s| s.parse::<Decimal>().ok())
            .unwrap_or(submitted_price);

        return Ok(OrderResult {
            intent_id: intent.id,
            oid: filled["oid"].as_u64().unwrap_or(0),
            filled_size,
            avg_price,
            leverage_applied: intent.leverage,
            filled: true,
        });
    }

    if let Some(resting) = status.get("resting") {
        return Ok(OrderResult {
            intent_id: intent.id,
            oid: resting["oid"].as_u64().unwrap_or(0),
            filled_size: intent.size,
            avg_price: submitted_price,
            leverage_applied: intent.leverage,
            filled: false,
        });
    }

    Err(EngineError::RejectedByExchange(format!(
        "unrecognized order response: {}",
        raw
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderDirection, OrderSide};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn intent() -> OrderIntent {
        OrderIntent {
            id: Uuid::new_v4(),
            symbol: "BTC".to_string(),
            direction: OrderDirection::OpenLong,
            side: OrderSide::Buy,
            size: dec!(0.1),
            leverage: 5,
            kind: OrderKind::Market,
            reduce_only: false,
        }
    }

    #[test]
    fn test_parse_filled_response() {
        let raw = json!({
            "status": "ok",
            "response": {"type": "order", "data": {"statuses": [
                {"filled": {"totalSz": "0.1", "avgPx": "60005.0", "oid": 42}}
            ]}}
        });

        let i = intent();
        let result = parse_order_response(&i, dec!(60600), &raw).unwrap();
        assert!(result.filled);
        assert_eq!(result.intent_id, i.id);
        assert_eq!(result.oid, 42);
        assert_eq!(result.filled_size, dec!(0.1));
        assert_eq!(result.avg_price, dec!(60005.0));
    }

    #[test]
    fn test_parse_resting_response() {
        let raw = json!({
            "status": "ok",
            "response": {"type": "order", "data": {"statuses": [
                {"resting": {"oid": 99}}
            ]}}
        });

        let result = parse_order_response(&intent(), dec!(59940), &raw).unwrap();
        assert!(!result.filled);
        assert_eq!(result.oid, 99);
        assert_eq!(result.avg_price, dec!(59940));
    }

    #[test]
    fn test_parse_error_response_classifies_margin() {
        let raw = json!({
            "status": "ok",
            "response": {"type": "order", "data": {"statuses": [
                {"error": "Insufficient margin to place order"}
            ]}}
        });

        let err = parse_order_response(&intent(), dec!(60600), &raw).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientMargin(_)));
    }

    #[test]
    fn test_parse_error_response_other_rejection() {
        let raw = json!({
            "status": "ok",
            "response": {"type": "order", "data": {"statuses": [
                {"error": "Order size below minimum"}
            ]}}
        });

        let err = parse_order_response(&intent(), dec!(60600), &raw).unwrap_err();
        assert!(matches!(err, EngineError::RejectedByExchange(_)));
    }
}
