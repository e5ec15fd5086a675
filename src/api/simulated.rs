//! In-memory futures exchange for dry runs and tests.
//!
//! Accounts are keyed by API key and created on first use with a default
//! balance. MARKET orders fill immediately at the symbol's mark price; LIMIT,
//! STOP_MARKET and TRAILING_STOP_MARKET orders rest until cancelled.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::TradeError;
use crate::models::{AccountSnapshot, Credentials, OrderAck, OrderRequest, OrderType, PositionSide, PositionView};

use super::ExchangeGateway;

/// Leverage the exchange applies before anyone changes it.
const DEFAULT_LEVERAGE: u32 = 20;

fn rejection(code: i64, message: &str) -> TradeError {
    TradeError::ExchangeRequest {
        status: 400,
        code,
        message: message.to_string(),
    }
}

#[derive(Debug, Clone)]
struct SimAccount {
    balance: Decimal,
    positions: Vec<PositionView>,
    leverage: HashMap<String, u32>,
    resting: Vec<(i64, OrderRequest)>,
}

impl SimAccount {
    fn new(balance: Decimal) -> Self {
        Self {
            balance,
            positions: Vec::new(),
            leverage: HashMap::new(),
            resting: Vec::new(),
        }
    }

    fn leg_mut(&mut self, symbol: &str, side: PositionSide) -> &mut PositionView {
        let idx = match self.positions.iter().position(|p| p.is_leg(symbol, side)) {
            Some(idx) => idx,
            None => {
                self.positions.push(PositionView {
                    symbol: symbol.to_string(),
                    position_side: side,
                    isolated_wallet_margin: Decimal::ZERO,
                    entry_price: Decimal::ZERO,
                    position_amount: Decimal::ZERO,
                });
                self.positions.len() - 1
            }
        };
        &mut self.positions[idx]
    }

    fn fill(&mut self, order: &OrderRequest, qty: Decimal, price: Decimal) -> Result<(), TradeError> {
        let leverage = Decimal::from(*self.leverage.get(&order.symbol).unwrap_or(&DEFAULT_LEVERAGE));
        let increasing = order.side == order.position_side.entry_side();
        let balance = self.balance;
        let leg = self.leg_mut(&order.symbol, order.position_side);

        if increasing {
            let margin = qty * price / leverage;
            if margin > balance {
                return Err(rejection(-2019, "Margin is insufficient."));
            }
            let held = leg.position_amount.abs();
            leg.entry_price = (leg.entry_price * held + price * qty) / (held + qty);
            leg.position_amount += match order.position_side {
                PositionSide::Long => qty,
                PositionSide::Short => -qty,
            };
            leg.isolated_wallet_margin += margin;
            self.balance -= margin;
        } else {
            let held = leg.position_amount.abs();
            if held.is_zero() || qty > held {
                return Err(rejection(-2022, "ReduceOnly Order is rejected."));
            }
            let released = leg.isolated_wallet_margin * qty / held;
            leg.position_amount += match order.position_side {
                PositionSide::Long => -qty,
                PositionSide::Short => qty,
            };
            leg.isolated_wallet_margin -= released;
            if leg.position_amount.is_zero() {
                leg.isolated_wallet_margin = Decimal::ZERO;
                leg.entry_price = Decimal::ZERO;
            }
            self.balance += released;
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
struct SimState {
    accounts: HashMap<String, SimAccount>,
    mark_prices: HashMap<String, Decimal>,
    submitted: Vec<(String, OrderRequest)>,
    cancel_calls: usize,
    next_order_id: i64,
    rejected_types: HashSet<OrderType>,
    hold_market_fills: bool,
    snapshot_budget: Option<usize>,
    cancel_unavailable: bool,
}

/// Simulated exchange with failure injection.
pub struct SimulatedExchange {
    default_balance: Decimal,
    state: Mutex<SimState>,
}

impl SimulatedExchange {
    pub fn new(default_balance: Decimal) -> Self {
        Self {
            default_balance,
            state: Mutex::new(SimState {
                next_order_id: 1,
                ..SimState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the account behind `api_key`.
    #[cfg(test)]
    pub fn seed_account(&self, api_key: &str, balance: Decimal, positions: Vec<PositionView>) {
        let mut account = SimAccount::new(balance);
        account.positions = positions;
        self.state().accounts.insert(api_key.to_string(), account);
    }

    pub fn set_mark_price(&self, symbol: &str, price: Decimal) {
        self.state().mark_prices.insert(symbol.to_string(), price);
    }

    /// Reject every order of this type with code -2021.
    #[cfg(test)]
    pub fn reject_order_type(&self, order_type: OrderType) {
        self.state().rejected_types.insert(order_type);
    }

    /// When false, MARKET orders are acknowledged but never move a position.
    #[cfg(test)]
    pub fn fill_market_orders(&self, fill: bool) {
        self.state().hold_market_fills = !fill;
    }

    /// Allow `n` more account snapshots, then fail every further one.
    #[cfg(test)]
    pub fn fail_snapshots_after(&self, n: usize) {
        self.state().snapshot_budget = Some(n);
    }

    /// Make cancel-all calls fail with a transport error.
    #[cfg(test)]
    pub fn fail_cancel_all(&self, fail: bool) {
        self.state().cancel_unavailable = fail;
    }

    /// Every order accepted or rejected so far, in submission order.
    #[cfg(test)]
    pub fn submitted_orders(&self) -> Vec<OrderRequest> {
        self.state().submitted.iter().map(|(_, o)| o.clone()).collect()
    }

    #[cfg(test)]
    pub fn orders_for(&self, api_key: &str) -> Vec<OrderRequest> {
        self.state()
            .submitted
            .iter()
            .filter(|(key, _)| key == api_key)
            .map(|(_, o)| o.clone())
            .collect()
    }

    /// Orders still resting on the book for this account.
    #[cfg(test)]
    pub fn resting_orders(&self, api_key: &str) -> Vec<OrderRequest> {
        self.state()
            .accounts
            .get(api_key)
            .map(|a| a.resting.iter().map(|(_, o)| o.clone()).collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn cancel_calls(&self) -> usize {
        self.state().cancel_calls
    }

    #[cfg(test)]
    pub fn leverage_for(&self, api_key: &str, symbol: &str) -> Option<u32> {
        self.state()
            .accounts
            .get(api_key)
            .and_then(|a| a.leverage.get(symbol).copied())
    }
}

#[async_trait]
impl ExchangeGateway for SimulatedExchange {
    async fn account(&self, creds: &Credentials) -> Result<AccountSnapshot, TradeError> {
        let default_balance = self.default_balance;
        let mut state = self.state();

        if let Some(budget) = state.snapshot_budget {
            if budget == 0 {
                return Err(TradeError::Transport("simulated exchange unavailable".to_string()));
            }
            state.snapshot_budget = Some(budget - 1);
        }

        let account = state
            .accounts
            .entry(creds.api_key.clone())
            .or_insert_with(|| SimAccount::new(default_balance));

        Ok(AccountSnapshot {
            total_cross_wallet_balance: account.balance,
            positions: account.positions.clone(),
        })
    }

    async fn set_isolated_margin(&self, _creds: &Credentials, symbol: &str) -> Result<(), TradeError> {
        debug!(symbol = %symbol, "Simulated margin type ISOLATED");
        Ok(())
    }

    async fn set_leverage(&self, creds: &Credentials, symbol: &str, leverage: u32) -> Result<(), TradeError> {
        if !(1..=125).contains(&leverage) {
            return Err(rejection(-4028, "Leverage is not valid"));
        }
        let default_balance = self.default_balance;
        self.state()
            .accounts
            .entry(creds.api_key.clone())
            .or_insert_with(|| SimAccount::new(default_balance))
            .leverage
            .insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn place_order(&self, creds: &Credentials, order: &OrderRequest) -> Result<OrderAck, TradeError> {
        let default_balance = self.default_balance;
        let mut guard = self.state();
        let state = &mut *guard;

        state.submitted.push((creds.api_key.clone(), order.clone()));

        if state.rejected_types.contains(&order.order_type) {
            return Err(rejection(-2021, "Order would immediately trigger."));
        }

        let qty = Decimal::from_str(&order.quantity)
            .map_err(|_| rejection(-1102, "Parameter 'quantity' was malformed."))?;
        if qty <= Decimal::ZERO {
            return Err(rejection(-4003, "Quantity less than or equal to zero."));
        }

        let order_id = state.next_order_id;
        state.next_order_id += 1;

        let account = state
            .accounts
            .entry(creds.api_key.clone())
            .or_insert_with(|| SimAccount::new(default_balance));

        if order.is_protective() {
            account.resting.push((order_id, order.clone()));
            return Ok(OrderAck {
                order_id,
                status: "NEW".to_string(),
                client_order_id: format!("sim-{}", order_id),
            });
        }

        if !state.hold_market_fills {
            let price = *state
                .mark_prices
                .get(&order.symbol)
                .ok_or_else(|| rejection(-1121, "Invalid symbol."))?;
            account.fill(order, qty, price)?;
        }

        debug!(order_id, symbol = %order.symbol, side = order.side.as_str(), qty = %qty, "Simulated fill");

        Ok(OrderAck {
            order_id,
            status: "FILLED".to_string(),
            client_order_id: format!("sim-{}", order_id),
        })
    }

    async fn cancel_all_orders(&self, creds: &Credentials, symbol: &str) -> Result<(), TradeError> {
        let mut state = self.state();
        state.cancel_calls += 1;
        debug!(symbol = %symbol, calls = state.cancel_calls, "Simulated cancel-all");
        if state.cancel_unavailable {
            return Err(TradeError::Transport("simulated cancel-all unavailable".to_string()));
        }
        if let Some(account) = state.accounts.get_mut(&creds.api_key) {
            account.resting.retain(|(_, o)| o.symbol != symbol);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderSide;
    use rust_decimal_macros::dec;

    fn creds() -> Credentials {
        Credentials::new("sim-key", "sim-secret")
    }

    #[tokio::test]
    async fn test_market_order_opens_and_closes_leg() {
        let exchange = SimulatedExchange::new(dec!(1000));
        exchange.set_mark_price("BTCUSDT", dec!(100));
        exchange.set_leverage(&creds(), "BTCUSDT", 10).await.unwrap();

        let open = OrderRequest::market("BTCUSDT", OrderSide::Sell, PositionSide::Short, "2.5");
        exchange.place_order(&creds(), &open).await.unwrap();

        let snapshot = exchange.account(&creds()).await.unwrap();
        let leg = snapshot.open_position("BTCUSDT", PositionSide::Short).unwrap();
        assert_eq!(leg.position_amount, dec!(-2.5));
        assert_eq!(leg.isolated_wallet_margin, dec!(25));
        assert_eq!(snapshot.total_cross_wallet_balance, dec!(975));

        let close = OrderRequest::market("BTCUSDT", OrderSide::Buy, PositionSide::Short, "2.5");
        exchange.place_order(&creds(), &close).await.unwrap();

        let snapshot = exchange.account(&creds()).await.unwrap();
        assert!(snapshot.open_position("BTCUSDT", PositionSide::Short).is_none());
        assert_eq!(snapshot.total_cross_wallet_balance, dec!(1000));
    }

    #[tokio::test]
    async fn test_protective_orders_rest_until_cancelled() {
        let exchange = SimulatedExchange::new(dec!(1000));
        let stop = OrderRequest::stop_market("BTCUSDT", OrderSide::Sell, PositionSide::Long, "1", dec!(90));

        let ack = exchange.place_order(&creds(), &stop).await.unwrap();
        assert_eq!(ack.status, "NEW");
        assert_eq!(exchange.resting_orders("sim-key").len(), 1);

        exchange.cancel_all_orders(&creds(), "BTCUSDT").await.unwrap();
        assert!(exchange.resting_orders("sim-key").is_empty());
        assert_eq!(exchange.cancel_calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let exchange = SimulatedExchange::new(dec!(1000));
        exchange.reject_order_type(OrderType::Limit);

        let tp = OrderRequest::limit("BTCUSDT", OrderSide::Sell, PositionSide::Long, "1", dec!(110));
        let err = exchange.place_order(&creds(), &tp).await.unwrap_err();
        assert_eq!(err.exchange_code(), Some(-2021));

        exchange.fail_snapshots_after(1);
        assert!(exchange.account(&creds()).await.is_ok());
        assert!(matches!(exchange.account(&creds()).await, Err(TradeError::Transport(_))));
    }

    #[tokio::test]
    async fn test_reducing_more_than_held_is_rejected() {
        let exchange = SimulatedExchange::new(dec!(1000));
        exchange.set_mark_price("BTCUSDT", dec!(100));

        let close = OrderRequest::market("BTCUSDT", OrderSide::Sell, PositionSide::Long, "1");
        let err = exchange.place_order(&creds(), &close).await.unwrap_err();
        assert_eq!(err.exchange_code(), Some(-2022));
    }
}
