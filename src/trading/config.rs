//! Executor configuration.

use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";

/// Receive window sent with every signed call, in milliseconds.
pub const DEFAULT_RECV_WINDOW_MS: u64 = 60_000;

/// Where orders go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Live,
    Simulated,
}

impl ExecutionMode {
    /// Venue label written into trade records.
    pub fn venue(&self) -> &'static str {
        match self {
            ExecutionMode::Live => "BINANCE",
            ExecutionMode::Simulated => "SIMULATED",
        }
    }
}

/// How the fractional digits of the reference price are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecimalCountRule {
    /// Digits after the decimal point.
    Natural,
    /// One less than the digits after the decimal point, floored at zero.
    /// Matches price ticks produced by older deployments.
    Legacy,
}

impl FromStr for DecimalCountRule {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "natural" => Ok(DecimalCountRule::Natural),
            "legacy" => Ok(DecimalCountRule::Legacy),
            other => Err(anyhow!("unknown decimal rule {:?} (expected natural or legacy)", other)),
        }
    }
}

/// Settings handed to the orchestrator at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Futures REST base URL
    pub base_url: String,

    /// Signature receive window in milliseconds
    pub recv_window_ms: u64,

    /// Per-request HTTP timeout in seconds
    pub request_timeout_secs: u64,

    pub mode: ExecutionMode,

    pub decimal_rule: DecimalCountRule,

    /// Webhook receiving every newly recorded trade
    pub notify_url: Option<String>,

    /// Wallet balance of accounts the simulator has not seen before
    pub simulated_balance: Decimal,

    /// Run overlapping signals for the same user and symbol one after the other
    pub serialize_per_symbol: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            recv_window_ms: DEFAULT_RECV_WINDOW_MS,
            request_timeout_secs: 30,
            mode: ExecutionMode::Live,
            decimal_rule: DecimalCountRule::Natural,
            notify_url: None,
            simulated_balance: dec!(10000),
            serialize_per_symbol: true,
        }
    }
}

impl ExecutorConfig {
    /// Simulated-mode defaults.
    #[cfg(test)]
    pub fn simulated() -> Self {
        Self {
            mode: ExecutionMode::Simulated,
            ..Self::default()
        }
    }

    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("EXCHANGE_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(v) = std::env::var("EXCHANGE_RECV_WINDOW_MS") {
            config.recv_window_ms = v.parse().context("Invalid EXCHANGE_RECV_WINDOW_MS")?;
        }
        if let Ok(v) = std::env::var("EXCHANGE_TIMEOUT_SECS") {
            config.request_timeout_secs = v.parse().context("Invalid EXCHANGE_TIMEOUT_SECS")?;
        }
        if let Ok(v) = std::env::var("PRICE_DECIMAL_RULE") {
            config.decimal_rule = v.parse().context("Invalid PRICE_DECIMAL_RULE")?;
        }
        config.notify_url = std::env::var("NOTIFY_URL").ok().filter(|u| !u.trim().is_empty());
        if let Ok(v) = std::env::var("SIMULATED_BALANCE") {
            config.simulated_balance = v.parse().context("Invalid SIMULATED_BALANCE")?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.recv_window_ms, 60_000);
        assert_eq!(config.mode, ExecutionMode::Live);
        assert_eq!(config.decimal_rule, DecimalCountRule::Natural);
        assert_eq!(ExecutorConfig::simulated().mode.venue(), "SIMULATED");
    }

    #[test]
    fn test_decimal_rule_parsing() {
        assert_eq!("Legacy".parse::<DecimalCountRule>().unwrap(), DecimalCountRule::Legacy);
        assert_eq!(" natural ".parse::<DecimalCountRule>().unwrap(), DecimalCountRule::Natural);
        assert!("off-by-one".parse::<DecimalCountRule>().is_err());
    }
}
