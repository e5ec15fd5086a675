//! Per-user trading parameters and exchange credentials.

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer};

use crate::error::TradeError;

/// Exchange API credentials. `Debug` never prints the secret and masks the key.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    #[serde(rename = "secret", alias = "api_secret")]
    pub api_secret: String,
}

impl Credentials {
    pub fn new(api_key: &str, api_secret: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        }
    }

    /// Key prefix safe for logs.
    pub fn masked_key(&self) -> String {
        let prefix: String = self.api_key.chars().take(4).collect();
        format!("{}***", prefix)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.masked_key())
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Accepts `true`/`false` as well as the legacy `0`/`1` flag.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Float(f64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(n) => n != 0,
        Flag::Float(x) => x != 0.0,
    })
}

/// Trading parameters for one account, supplied with each batch.
#[derive(Debug, Clone, Deserialize)]
pub struct UserTradeConfig {
    pub user_id: String,

    #[serde(flatten)]
    pub credentials: Credentials,

    /// Leverage applied to the symbol before entry
    pub leverage: u32,

    /// Share of the wallet balance committed per trade, in percent (0, 100]
    #[serde(rename = "trade_size")]
    pub trade_size_percent: Decimal,

    /// Take-profit target as a percentage of position margin
    #[serde(rename = "sell_at")]
    pub sell_at_percent: Decimal,

    /// Use a trailing stop instead of a limit order for profit-taking
    #[serde(rename = "is_trailing_stop_enabled", default, deserialize_with = "flag")]
    pub trailing_stop_enabled: bool,

    /// Trailing stop callback rate in percent
    #[serde(default)]
    pub trailing_stop_callback_rate: Decimal,

    /// Stop-loss trigger as a percentage of position margin
    #[serde(rename = "stop_loss_at")]
    pub stop_loss_at_percent: Decimal,

    /// Maximum number of simultaneously open isolated positions
    #[serde(rename = "no_of_trades")]
    pub max_concurrent_trades: u32,
}

impl UserTradeConfig {
    /// Config with conservative defaults, mostly useful for tests and tooling.
    pub fn new(user_id: &str, api_key: &str, api_secret: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            credentials: Credentials::new(api_key, api_secret),
            leverage: 10,
            trade_size_percent: dec!(10),
            sell_at_percent: dec!(20),
            trailing_stop_enabled: false,
            trailing_stop_callback_rate: Decimal::ZERO,
            stop_loss_at_percent: dec!(10),
            max_concurrent_trades: 5,
        }
    }

    pub fn validate(&self) -> Result<(), TradeError> {
        let fail = |msg: String| Err(TradeError::Validation(format!("user {}: {}", self.user_id, msg)));

        if self.user_id.trim().is_empty() {
            return Err(TradeError::Validation("user id is empty".to_string()));
        }
        if self.credentials.api_key.is_empty() || self.credentials.api_secret.is_empty() {
            return fail("missing API credentials".to_string());
        }
        if !(1..=125).contains(&self.leverage) {
            return fail(format!("leverage {} outside 1..=125", self.leverage));
        }
        if self.trade_size_percent <= Decimal::ZERO || self.trade_size_percent > dec!(100) {
            return fail(format!("trade size {}% outside (0, 100]", self.trade_size_percent));
        }
        if self.sell_at_percent <= Decimal::ZERO {
            return fail(format!("take-profit target {}% must be positive", self.sell_at_percent));
        }
        if self.stop_loss_at_percent <= Decimal::ZERO {
            return fail(format!("stop-loss target {}% must be positive", self.stop_loss_at_percent));
        }
        if self.trailing_stop_enabled
            && (self.trailing_stop_callback_rate < dec!(0.1) || self.trailing_stop_callback_rate > dec!(5))
        {
            return fail(format!(
                "trailing stop callback rate {} outside [0.1, 5]",
                self.trailing_stop_callback_rate
            ));
        }
        if self.max_concurrent_trades == 0 {
            return fail("max concurrent trades must be at least 1".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_secret() {
        let user = UserTradeConfig::new("u1", "ABCDEFGH", "topsecret");
        let out = format!("{:?}", user);

        assert!(!out.contains("topsecret"));
        assert!(!out.contains("ABCDEFGH"));
        assert!(out.contains("ABCD***"));
    }

    #[test]
    fn test_validation_bounds() {
        assert!(UserTradeConfig::new("u1", "k", "s").validate().is_ok());

        let mut user = UserTradeConfig::new("u1", "k", "s");
        user.leverage = 0;
        assert!(user.validate().is_err());

        let mut user = UserTradeConfig::new("u1", "k", "s");
        user.trade_size_percent = dec!(100.5);
        assert!(user.validate().is_err());

        let mut user = UserTradeConfig::new("u1", "k", "s");
        user.trailing_stop_enabled = true;
        user.trailing_stop_callback_rate = dec!(0.05);
        assert!(user.validate().is_err());
        user.trailing_stop_callback_rate = dec!(1.0);
        assert!(user.validate().is_ok());

        let mut user = UserTradeConfig::new("u1", "k", "");
        user.max_concurrent_trades = 1;
        assert!(user.validate().is_err());
    }

    #[test]
    fn test_flag_accepts_bool_and_int() {
        let body = r#"{"user_id":"u","api_key":"k","api_secret":"s","leverage":5,"trade_size":"10",
            "sell_at":20,"is_trailing_stop_enabled":true,"trailing_stop_callback_rate":"0.5",
            "stop_loss_at":10,"no_of_trades":2}"#;
        let user: UserTradeConfig = serde_json::from_str(body).unwrap();
        assert!(user.trailing_stop_enabled);
        assert_eq!(user.credentials.api_secret, "s");

        let body = r#"{"user_id":"u","api_key":"k","secret":"s","leverage":5,"trade_size":10,
            "sell_at":20,"is_trailing_stop_enabled":0,"stop_loss_at":10,"no_of_trades":2}"#;
        let user: UserTradeConfig = serde_json::from_str(body).unwrap();
        assert!(!user.trailing_stop_enabled);
    }
}
