//! Runtime configuration loaded from the environment.

use std::collections::HashSet;
use std::env;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_URL: &str = "https://api.hyperliquid.xyz";
pub const DEFAULT_WS_URL: &str = "wss://api.hyperliquid.xyz/ws";

/// Engine settings. Everything except the target wallet has a default;
/// live trading additionally requires wallet credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Info/exchange REST endpoint.
    pub api_url: String,

    /// WebSocket endpoint for the fill stream.
    pub ws_url: String,

    /// Wallet address whose trades are mirrored.
    pub target_wallet: String,

    /// Our own wallet address (required for live trading).
    pub wallet_address: Option<String>,

    /// Private key used to sign exchange actions (required for live trading).
    pub private_key: Option<String>,

    /// When true, orders are filled against an in-memory ledger instead
    /// of the exchange.
    pub simulated_trading: bool,

    /// Starting balance for the simulated ledger.
    pub simulated_balance: Decimal,

    /// Multiplier applied to the target's leverage before clamping.
    pub leverage_factor: Decimal,

    /// Symbols never copied, stored uppercased.
    pub blocked_assets: HashSet<String>,

    /// Submit resting limit orders instead of slippage-bounded IOC orders.
    pub use_limit_orders: bool,

    /// Price offset for limit orders, as a fraction of the mark price.
    pub limit_offset: Decimal,

    /// Max slippage tolerated on market orders, as a fraction.
    pub slippage_tolerance: Decimal,

    /// Mirror the target's already-open positions at startup.
    pub copy_open_positions: bool,

    /// Follower equity at which copying pauses itself. None = unlimited.
    pub max_account_equity: Option<Decimal>,

    /// Orders below this notional value are skipped (exchange minimum).
    pub min_order_notional: Decimal,

    /// Bound on the controller's event queue.
    pub event_queue_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            target_wallet: String::new(),
            wallet_address: None,
            private_key: None,
            simulated_trading: true,
            simulated_balance: dec!(10000),
            leverage_factor: dec!(1),
            blocked_assets: HashSet::new(),
            use_limit_orders: false,
            limit_offset: dec!(0.001),   // 0.1%
            slippage_tolerance: dec!(0.01), // 1%
            copy_open_positions: true,
            max_account_equity: None,
            min_order_notional: dec!(10),
            event_queue_size: 256,
        }
    }
}

impl Settings {
    /// Load settings from environment variables, falling back to
    /// defaults. `.env` is loaded by the caller before this runs.
    pub fn from_env() -> Result<Self> {
        let defaults = Settings::default();

        let target_wallet = env::var("TARGET_WALLET_ADDRESS")
            .context("TARGET_WALLET_ADDRESS must be set")?
            .trim()
            .to_string();

        let settings = Self {
            api_url: env_or("HYPERLIQUID_API_URL", defaults.api_url),
            ws_url: env_or("HYPERLIQUID_WS_URL", defaults.ws_url),
            target_wallet,
            wallet_address: env::var("HYPERLIQUID_WALLET_ADDRESS").ok(),
            private_key: env::var("HYPERLIQUID_PRIVATE_KEY").ok(),
            simulated_trading: env_bool("SIMULATED_TRADING", defaults.simulated_trading),
            simulated_balance: env_decimal("SIMULATED_ACCOUNT_BALANCE", defaults.simulated_balance)?,
            leverage_factor: env_decimal("LEVERAGE_ADJUSTMENT", defaults.leverage_factor)?,
            blocked_assets: parse_blocked(&env::var("BLOCKED_ASSETS").unwrap_or_default()),
            use_limit_orders: env_bool("USE_LIMIT_ORDERS", defaults.use_limit_orders),
            limit_offset: env_decimal("LIMIT_ORDER_OFFSET", defaults.limit_offset)?,
            slippage_tolerance: env_decimal("SLIPPAGE_TOLERANCE", defaults.slippage_tolerance)?,
            copy_open_positions: env_bool("COPY_OPEN_POSITIONS", defaults.copy_open_positions),
            max_account_equity: env_optional_decimal("MAX_ACCOUNT_EQUITY")?,
            min_order_notional: defaults.min_order_notional,
            event_queue_size: defaults.event_queue_size,
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.target_wallet.is_empty() {
            anyhow::bail!("target wallet address is empty");
        }
        if self.leverage_factor <= Decimal::ZERO {
            anyhow::bail!("LEVERAGE_ADJUSTMENT must be positive");
        }
        if let Some(cap) = self.max_account_equity {
            if cap <= Decimal::ZERO {
                anyhow::bail!("MAX_ACCOUNT_EQUITY must be positive");
            }
        }
        if !self.simulated_trading {
            if self.wallet_address.is_none() || self.private_key.is_none() {
                anyhow::bail!(
                    "live trading requires HYPERLIQUID_WALLET_ADDRESS and HYPERLIQUID_PRIVATE_KEY"
                );
            }
        }
        Ok(())
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Unset, empty, or "x" means no limit.
fn env_optional_decimal(key: &str) -> Result<Option<Decimal>> {
    match env::var(key) {
        Ok(v) => {
            let v = v.trim();
            if v.is_empty() || v.eq_ignore_ascii_case("x") {
                return Ok(None);
            }
            v.parse::<Decimal>()
                .map(Some)
                .with_context(|| format!("{} is not a valid number: {}", key, v))
        }
        Err(_) => Ok(None),
    }
}

fn env_decimal(key: &str, default: Decimal) -> Result<Decimal> {
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<Decimal>()
            .with_context(|| format!("{} is not a valid number: {}", key, v)),
        Err(_) => Ok(default),
    }
}

/// Parse a comma-separated blocklist, uppercasing each entry.
fn parse_blocked(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_blocked_mixed_case() {
        let blocked = parse_blocked("btc, Eth ,SOL,,");
        assert_eq!(blocked.len(), 3);
        assert!(blocked.contains("BTC"));
        assert!(blocked.contains("ETH"));
        assert!(blocked.contains("SOL"));
    }

    #[test]
    fn test_equity_cap_must_be_positive() {
        let settings = Settings {
            target_wallet: "0xabc".to_string(),
            max_account_equity: Some(dec!(-100)),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        let settings = Settings {
            target_wallet: "0xabc".to_string(),
            max_account_equity: Some(dec!(50000)),
            ..Settings::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_live_mode_requires_credentials() {
        let settings = Settings {
            target_wallet: "0xabc".to_string(),
            simulated_trading: false,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_simulated_mode_needs_no_credentials() {
        let settings = Settings {
            target_wallet: "0xabc".to_string(),
            ..Settings::default()
        };
        assert!(settings.validate().is_ok());
    }
}
