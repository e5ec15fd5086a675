//! Order requests sent to the exchange and their acknowledgements.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::api::Params;

use super::PositionSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(OrderSide::Buy),
            "SELL" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    TrailingStopMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TrailingStopMarket => "TRAILING_STOP_MARKET",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Good-til-cancelled
    Gtc,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
        }
    }
}

/// A single order. Built, signed and sent once; never retried automatically.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub position_side: PositionSide,
    pub order_type: OrderType,
    /// Quantity string, already formatted to the symbol's lot precision
    pub quantity: String,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub activation_price: Option<Decimal>,
    pub callback_rate: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
}

impl OrderRequest {
    fn base(symbol: &str, side: OrderSide, position_side: PositionSide, order_type: OrderType, quantity: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            position_side,
            order_type,
            quantity: quantity.to_string(),
            price: None,
            stop_price: None,
            activation_price: None,
            callback_rate: None,
            time_in_force: None,
        }
    }

    pub fn market(symbol: &str, side: OrderSide, position_side: PositionSide, quantity: &str) -> Self {
        Self::base(symbol, side, position_side, OrderType::Market, quantity)
    }

    pub fn limit(symbol: &str, side: OrderSide, position_side: PositionSide, quantity: &str, price: Decimal) -> Self {
        Self {
            price: Some(price),
            time_in_force: Some(TimeInForce::Gtc),
            ..Self::base(symbol, side, position_side, OrderType::Limit, quantity)
        }
    }

    pub fn stop_market(
        symbol: &str,
        side: OrderSide,
        position_side: PositionSide,
        quantity: &str,
        stop_price: Decimal,
    ) -> Self {
        Self {
            stop_price: Some(stop_price),
            time_in_force: Some(TimeInForce::Gtc),
            ..Self::base(symbol, side, position_side, OrderType::StopMarket, quantity)
        }
    }

    pub fn trailing_stop(
        symbol: &str,
        side: OrderSide,
        position_side: PositionSide,
        quantity: &str,
        activation_price: Decimal,
        callback_rate: Decimal,
    ) -> Self {
        Self {
            activation_price: Some(activation_price),
            callback_rate: Some(callback_rate),
            time_in_force: Some(TimeInForce::Gtc),
            ..Self::base(symbol, side, position_side, OrderType::TrailingStopMarket, quantity)
        }
    }

    /// True for orders that only rest on the book until a trigger fires.
    pub fn is_protective(&self) -> bool {
        self.order_type != OrderType::Market
    }

    /// Request parameters in the order the exchange documents them.
    pub fn to_params(&self) -> Params {
        let mut params = Params::new()
            .with("symbol", &self.symbol)
            .with("side", self.side.as_str())
            .with("positionSide", self.position_side.as_str())
            .with("type", self.order_type.as_str());

        if let Some(tif) = self.time_in_force {
            params.push("timeInForce", tif.as_str());
        }
        params.push("quantity", &self.quantity);
        if let Some(price) = self.price {
            params.push("price", price);
        }
        if let Some(stop) = self.stop_price {
            params.push("stopPrice", stop);
        }
        if let Some(activation) = self.activation_price {
            params.push("activationPrice", activation);
        }
        if let Some(rate) = self.callback_rate {
            params.push("callbackRate", rate);
        }

        params
    }
}

/// Exchange acknowledgement of an accepted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub client_order_id: String,
}
