//! Trade records kept by the record store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TradeError;

use super::{OrderAck, OrderSide, PositionSide, TradeSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TradeStatus {
    type Err = TradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" | "1" => Ok(TradeStatus::Open),
            "closed" | "0" => Ok(TradeStatus::Closed),
            other => Err(TradeError::Validation(format!("unknown trade status {:?}", other))),
        }
    }
}

/// An executed entry order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Store key
    pub id: String,
    pub user_id: String,
    /// Exchange order id of the entry
    pub trade_id: String,
    pub status: TradeStatus,
    pub pair: String,
    pub side: OrderSide,
    pub quantity: String,
    pub position_side: PositionSide,
    /// Venue the trade went to (live exchange or simulator)
    pub exchange_trade_type: String,
    pub reference_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TradeRecord {
    /// Record for an entry order the exchange just accepted.
    pub fn opened(user_id: &str, signal: &TradeSignal, ack: &OrderAck, quantity: &str, venue: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            trade_id: ack.order_id.to_string(),
            status: TradeStatus::Open,
            pair: signal.symbol.clone(),
            side: signal.position_side.entry_side(),
            quantity: quantity.to_string(),
            position_side: signal.position_side,
            exchange_trade_type: venue.to_string(),
            reference_price: signal.reference_price,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Conjunctive record filter. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub pair: Option<String>,
    pub position_side: Option<PositionSide>,
    pub status: Option<TradeStatus>,
}

impl RecordFilter {
    pub fn by_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Default::default()
        }
    }

    /// Open trades of one user on one leg.
    pub fn open_leg(user_id: &str, pair: &str, side: PositionSide) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            pair: Some(pair.to_string()),
            position_side: Some(side),
            status: Some(TradeStatus::Open),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &TradeRecord) -> bool {
        self.id.as_ref().map_or(true, |v| *v == record.id)
            && self.user_id.as_ref().map_or(true, |v| *v == record.user_id)
            && self.pair.as_ref().map_or(true, |v| *v == record.pair)
            && self.position_side.map_or(true, |v| v == record.position_side)
            && self.status.map_or(true, |v| v == record.status)
    }
}

/// Partial update applied by `update_one`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub status: Option<TradeStatus>,
    pub quantity: Option<String>,
}

impl RecordPatch {
    pub fn status(status: TradeStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn apply(&self, record: &mut TradeRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(quantity) = &self.quantity {
            record.quantity = quantity.clone();
        }
        record.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record() -> TradeRecord {
        let signal = TradeSignal::open("BTCUSDT", PositionSide::Short, dec!(27000.1), 3);
        let ack = OrderAck {
            order_id: 7,
            status: "NEW".to_string(),
            client_order_id: String::new(),
        };
        TradeRecord::opened("u1", &signal, &ack, "0.150", "SIMULATED")
    }

    #[test]
    fn test_opened_record() {
        let r = record();
        assert_eq!(r.trade_id, "7");
        assert_eq!(r.side, OrderSide::Sell);
        assert_eq!(r.position_side, PositionSide::Short);
        assert_eq!(r.status, TradeStatus::Open);
        assert_eq!(r.quantity, "0.150");
    }

    #[test]
    fn test_filter_matching() {
        let r = record();
        assert!(RecordFilter::default().matches(&r));
        assert!(RecordFilter::open_leg("u1", "BTCUSDT", PositionSide::Short).matches(&r));
        assert!(!RecordFilter::open_leg("u1", "BTCUSDT", PositionSide::Long).matches(&r));
        assert!(!RecordFilter::open_leg("u2", "BTCUSDT", PositionSide::Short).matches(&r));
        assert!(RecordFilter::by_id(&r.id).matches(&r));
    }

    #[test]
    fn test_patch_applies() {
        let mut r = record();
        RecordPatch::status(TradeStatus::Closed).apply(&mut r);
        assert_eq!(r.status, TradeStatus::Closed);
        assert_eq!("1".parse::<TradeStatus>().unwrap(), TradeStatus::Open);
        assert!("pending".parse::<TradeStatus>().is_err());
    }
}
