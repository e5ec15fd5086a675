//! Trade signal: what to trade, in which direction, at what reference price.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TradeError;

use super::{OrderSide, UserTradeConfig};

/// Upper bound for quantity precision; exchanges never quote finer lots.
const MAX_QUANTITY_PRECISION: u32 = 16;

/// Leg of a hedge-mode futures account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }

    /// Parse the exchange's position side. `BOTH` (one-way mode) has no hedge leg.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "LONG" => Some(PositionSide::Long),
            "SHORT" => Some(PositionSide::Short),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }

    /// Order side that grows this leg.
    pub fn entry_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces this leg.
    pub fn exit_side(&self) -> OrderSide {
        self.entry_side().opposite()
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Whether the signal opens a new position or flattens the symbol.
///
/// The inbound API historically sent `BUY`/`SELL` for open/close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeType {
    #[serde(rename = "OPEN", alias = "BUY")]
    Open,
    #[serde(rename = "CLOSE", alias = "SELL")]
    Close,
}

impl TradeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeType::Open => "OPEN",
            TradeType::Close => "CLOSE",
        }
    }
}

/// A dispatched trade signal. Shared read-only by every user sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub symbol: String,
    pub position_side: PositionSide,
    pub reference_price: Decimal,
    pub quantity_precision: u32,
    pub trade_type: TradeType,
    /// Close this user's recorded trades on the opposite leg after opening.
    #[serde(default)]
    pub close_opposite: bool,
}

impl TradeSignal {
    #[cfg(test)]
    pub fn open(symbol: &str, position_side: PositionSide, reference_price: Decimal, quantity_precision: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            position_side,
            reference_price,
            quantity_precision,
            trade_type: TradeType::Open,
            close_opposite: false,
        }
    }

    #[cfg(test)]
    pub fn close(symbol: &str, reference_price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            position_side: PositionSide::Long,
            reference_price,
            quantity_precision: 0,
            trade_type: TradeType::Close,
            close_opposite: false,
        }
    }

    pub fn validate(&self) -> Result<(), TradeError> {
        if self.symbol.is_empty()
            || !self
                .symbol
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(TradeError::Validation(format!(
                "symbol must be non-empty upper-case alphanumeric, got {:?}",
                self.symbol
            )));
        }

        if self.reference_price <= Decimal::ZERO {
            return Err(TradeError::Validation(format!(
                "reference price must be positive, got {}",
                self.reference_price
            )));
        }

        if self.quantity_precision > MAX_QUANTITY_PRECISION {
            return Err(TradeError::Validation(format!(
                "quantity precision {} exceeds {}",
                self.quantity_precision, MAX_QUANTITY_PRECISION
            )));
        }

        Ok(())
    }
}

fn default_trade_type() -> TradeType {
    TradeType::Open
}

/// Validated request body handed over by the inbound API layer.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalPayload {
    pub users: Vec<UserTradeConfig>,
    pub symbol: String,
    pub position_side: PositionSide,
    #[serde(rename = "exchange_rate")]
    pub reference_price: Decimal,
    #[serde(rename = "quantity_precesion", alias = "quantity_precision")]
    pub quantity_precision: u32,
    #[serde(default = "default_trade_type")]
    pub trade_type: TradeType,
    #[serde(default)]
    pub close_opposite: bool,
}

impl SignalPayload {
    pub fn from_json(body: &str) -> Result<Self, TradeError> {
        serde_json::from_str(body).map_err(|e| TradeError::Validation(format!("malformed signal payload: {}", e)))
    }

    pub fn into_parts(self) -> (TradeSignal, Vec<UserTradeConfig>) {
        let signal = TradeSignal {
            symbol: self.symbol,
            position_side: self.position_side,
            reference_price: self.reference_price,
            quantity_precision: self.quantity_precision,
            trade_type: self.trade_type,
            close_opposite: self.close_opposite,
        };
        (signal, self.users)
    }
}
