//! Engine error taxonomy.
//!
//! Only a metadata-load failure at startup is fatal. Everything else
//! degrades to "skip this cycle and log" or is surfaced through the
//! control channel without stopping the event loop.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors produced by the replication engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Instrument metadata could not be fetched. Startup-fatal: sizing
    /// without leverage/precision constraints is unsafe.
    #[error("instrument metadata unavailable: {0}")]
    MetadataUnavailable(String),

    /// Balance or position query failed. Retryable; the current cycle is
    /// skipped rather than sized against stale equity.
    #[error("account state unreachable: {0}")]
    AccountUnreachable(String),

    /// Target equity was zero or negative, so no safe scale ratio exists.
    #[error("invalid sizing ratio: target equity {0} is not positive")]
    InvalidRatio(Decimal),

    /// The exchange rejected the order. Not retried; the intent is
    /// abandoned and reported outward.
    #[error("order rejected by exchange: {0}")]
    RejectedByExchange(String),

    /// The follower account lacks margin for the order. Not retried.
    #[error("insufficient margin: {0}")]
    InsufficientMargin(String),

    /// Transport-level failure during submission. Retried with bounded
    /// backoff before being surfaced.
    #[error("network error: {0}")]
    Network(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("signing error: {0}")]
    Signing(String),
}

impl EngineError {
    /// True for failures the controller should retry or re-attempt next
    /// cycle rather than abandon.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::AccountUnreachable(_) | EngineError::Network(_) | EngineError::Http(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EngineError::AccountUnreachable("timeout".to_string()).is_retryable());
        assert!(EngineError::Network("reset".to_string()).is_retryable());
        assert!(!EngineError::RejectedByExchange("bad size".to_string()).is_retryable());
        assert!(!EngineError::InvalidRatio(Decimal::ZERO).is_retryable());
    }
}
