//! WebSocket subscriber for the target wallet's fill stream.
//!
//! Maintains one connection to the exchange, resubscribes after every
//! disconnect with capped exponential backoff, and hands normalized
//! events to the replication controller. On each (re)subscription it
//! also fetches the target's open positions so the controller can
//! refresh its mirror of the target's state.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, Result};
use crate::models::{AccountOwner, StreamEvent, TradeEvent};

use super::info_client::{AccountReader, InfoClient};
use super::types::{WsFill, WsMessage, WsUserFills};

const PING_INTERVAL_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;
const MAX_RECONNECT_DELAY_SECS: u64 = 60;

/// Connection lifecycle of the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Subscribed,
}

/// Long-running subscriber task for one target wallet.
pub struct WalletStream {
    ws_url: String,
    target: String,
    info: Arc<InfoClient>,
    tx: mpsc::Sender<StreamEvent>,
    reconnect_delay: Duration,
}

impl WalletStream {
    pub fn new(
        ws_url: &str,
        target: &str,
        info: Arc<InfoClient>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Self {
        Self {
            ws_url: ws_url.to_string(),
            target: target.to_string(),
            info,
            tx,
            reconnect_delay: Duration::from_secs(1),
        }
    }

    /// Run until the controller side of the channel is dropped.
    /// Disconnects are retried forever; they never bubble up.
    pub async fn run(&self) {
        let mut attempt: u32 = 0;

        info!(target = %self.target, "starting fill stream");

        loop {
            let mut state = ConnState::Disconnected;
            let outcome = self.connect_and_stream(&mut state).await;

            // A session that got as far as Subscribed was healthy; only
            // failures before subscription escalate the backoff.
            if state == ConnState::Subscribed {
                attempt = 0;
            }

            match outcome {
                Ok(()) => info!("fill stream closed"),
                Err(e) => {
                    attempt += 1;
                    error!(attempt = attempt, state = ?state, error = %e, "fill stream error");
                }
            }

            if self.tx.is_closed() {
                info!("controller gone, stopping fill stream");
                return;
            }

            // Backoff with jitter so reconnect storms spread out.
            let delay = self.backoff_delay(attempt);
            let jitter_range = (delay.as_millis() as u64 / 4).max(1);
            let seed = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64;
            let final_delay = delay + Duration::from_millis(seed % jitter_range);

            info!(delay = ?final_delay, "reconnecting fill stream");
            tokio::time::sleep(final_delay).await;
        }
    }

    /// Doubles per failed attempt, capped at the maximum interval.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(6);
        (self.reconnect_delay * 2u32.pow(exp)).min(Duration::from_secs(MAX_RECONNECT_DELAY_SECS))
    }

    async fn connect_and_stream(&self, state: &mut ConnState) -> Result<()> {
        *state = ConnState::Connecting;
        debug!(url = %self.ws_url, "connecting");

        let (ws_stream, _) = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            connect_async(&self.ws_url),
        )
        .await
        .map_err(|_| EngineError::Network("websocket connect timeout".to_string()))??;

        let (mut write, mut read) = ws_stream.split();

        let subscribe = json!({
            "method": "subscribe",
            "subscription": {"type": "userFills", "user": self.target}
        });
        write.send(Message::Text(subscribe.to_string())).await?;

        *state = ConnState::Subscribed;
        info!(target = %self.target, "subscribed to fills");

        // Fresh snapshot for the controller's target mirror.
        match self.info.positions(AccountOwner::Target).await {
            Ok(positions) => {
                if self.tx.send(StreamEvent::Snapshot(positions)).await.is_err() {
                    return Ok(());
                }
            }
            Err(e) => warn!(error = %e, "could not fetch target snapshot"),
        }

        let mut ping_interval = interval(Duration::from_secs(PING_INTERVAL_SECS));

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if !self.handle_message(&text).await {
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("received close frame");
                            return Ok(());
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                        _ => {}
                    }
                }
                _ = ping_interval.tick() => {
                    write.send(Message::Text(json!({"method": "ping"}).to_string())).await?;
                }
            }
        }
    }

    /// Returns false when the controller has gone away.
    async fn handle_message(&self, text: &str) -> bool {
        let msg: WsMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(_) => {
                // Truncate on a char boundary; payloads are not ASCII-only.
                let preview: String = text.chars().take(120).collect();
                debug!(raw = %preview, "unrecognized message");
                return true;
            }
        };

        if msg.channel != "userFills" {
            return true;
        }

        let payload: WsUserFills = match serde_json::from_value(msg.data) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "bad userFills payload");
                return true;
            }
        };

        // The post-subscribe batch is history; the position snapshot
        // already covers that state.
        if payload.is_snapshot {
            debug!(fills = payload.fills.len(), "skipping historical fill batch");
            return true;
        }

        for event in normalize_fills(&payload.fills) {
            debug!(
                symbol = %event.symbol,
                delta = %event.delta,
                resulting = %event.target_position,
                "target fill"
            );
            if self.tx.send(StreamEvent::Fill(event)).await.is_err() {
                return false;
            }
        }
        true
    }
}

/// Collapse raw fills into one event per order id, preserving the order
/// in which each order first appeared. Partial fills of one order sum
/// into a single size with a volume-weighted price.
pub fn normalize_fills(fills: &[WsFill]) -> Vec<TradeEvent> {
    let mut groups: Vec<(u64, Vec<&WsFill>)> = Vec::new();

    for fill in fills {
        match groups.iter_mut().find(|(oid, _)| *oid == fill.oid) {
            Some((_, group)) => group.push(fill),
            None => groups.push((fill.oid, vec![fill])),
        }
    }

    groups
        .into_iter()
        .filter_map(|(oid, group)| {
            let first = group.first()?;
            let last = group.last()?;

            let delta: Decimal = group.iter().map(|f| f.signed_size()).sum();
            let total_size: Decimal = group.iter().map(|f| f.sz).sum();
            if total_size.is_zero() {
                return None;
            }
            let notional: Decimal = group.iter().map(|f| f.px * f.sz).sum();
            let price = notional / total_size;

            let start_position = first.start_position;
            let target_position = last.start_position + last.signed_size();
            let seq = group.iter().map(|f| f.time).max().unwrap_or(first.time);

            Some(TradeEvent {
                symbol: first.coin.clone(),
                delta,
                start_position,
                target_position,
                price,
                leverage: 0.0, // resolved from the last snapshot before sizing
                is_close: first.is_close(),
                oid,
                seq,
                timestamp: chrono::DateTime::from_timestamp_millis(seq as i64)
                    .unwrap_or_else(chrono::Utc::now),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fill(coin: &str, px: Decimal, sz: Decimal, side: &str, start: Decimal, oid: u64, time: u64) -> WsFill {
        WsFill {
            coin: coin.to_string(),
            px,
            sz,
            side: side.to_string(),
            time,
            start_position: start,
            dir: if side == "B" { "Open Long" } else { "Close Long" }.to_string(),
            closed_pnl: Decimal::ZERO,
            oid,
            tid: time,
        }
    }

    #[test]
    fn test_partial_fills_aggregate_by_oid() {
        let fills = vec![
            fill("BTC", dec!(60000), dec!(0.4), "B", dec!(0), 5, 100),
            fill("BTC", dec!(60100), dec!(0.6), "B", dec!(0.4), 5, 101),
        ];

        let events = normalize_fills(&fills);
        assert_eq!(events.len(), 1);

        let ev = &events[0];
        assert_eq!(ev.delta, dec!(1.0));
        assert_eq!(ev.start_position, dec!(0));
        assert_eq!(ev.target_position, dec!(1.0));
        assert_eq!(ev.oid, 5);
        assert_eq!(ev.seq, 101);
        // Volume-weighted: (60000*0.4 + 60100*0.6) / 1.0
        assert_eq!(ev.price, dec!(60060));
        assert!(!ev.is_close);
    }

    #[test]
    fn test_distinct_orders_stay_separate() {
        let fills = vec![
            fill("BTC", dec!(60000), dec!(0.1), "B", dec!(0), 1, 100),
            fill("ETH", dec!(3000), dec!(2), "A", dec!(2), 2, 100),
        ];

        let events = normalize_fills(&fills);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].symbol, "BTC");
        assert_eq!(events[1].symbol, "ETH");
        assert_eq!(events[1].delta, dec!(-2));
        assert_eq!(events[1].target_position, dec!(0));
        assert!(events[1].is_close);
    }

    #[test]
    fn test_empty_fills_yield_nothing() {
        assert!(normalize_fills(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_multibyte_message_is_skipped() {
        let info = Arc::new(InfoClient::new("http://localhost", "0xabc", None).unwrap());
        let (tx, _rx) = mpsc::channel(1);
        let stream = WalletStream::new("ws://localhost", "0xabc", info, tx);

        // Junk long enough that the log preview cut lands inside a
        // multi-byte character if truncation is done by byte index.
        let mut junk = "x".repeat(118);
        junk.push_str("日本語のメッセージ");
        assert!(stream.handle_message(&junk).await);
    }

    #[test]
    fn test_reconnect_backoff_doubles_up_to_the_cap() {
        let info = Arc::new(InfoClient::new("http://localhost", "0xabc", None).unwrap());
        let (tx, _rx) = mpsc::channel(1);
        let stream = WalletStream::new("ws://localhost", "0xabc", info, tx);

        assert_eq!(stream.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(stream.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(stream.backoff_delay(3), Duration::from_secs(4));
        assert_eq!(stream.backoff_delay(6), Duration::from_secs(32));
        // 2^6 = 64s overshoots the cap.
        assert_eq!(stream.backoff_delay(7), Duration::from_secs(60));
        assert_eq!(stream.backoff_delay(50), Duration::from_secs(60));
    }
}
