//! Fans one signal out to every user and collects per-user outcomes.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::api::{ExchangeGateway, Notifier};
use crate::db::RecordStore;
use crate::error::TradeError;
use crate::models::{SignalPayload, TradeSignal, UserTradeConfig};

use super::config::ExecutorConfig;
use super::sequencer::{OrderSequencer, SequenceOutcome};

type LegLock = Arc<tokio::sync::Mutex<()>>;

/// Result of one user's sequence.
#[derive(Debug)]
pub struct UserOutcome {
    pub user_id: String,
    pub result: Result<SequenceOutcome, TradeError>,
}

impl UserOutcome {
    pub fn label(&self) -> &'static str {
        match &self.result {
            Ok(outcome) => outcome.label(),
            Err(e) => e.kind(),
        }
    }
}

/// Per-user outcomes of a batch, in the order the users were supplied.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub outcomes: Vec<UserOutcome>,
}

impl BatchResult {
    fn count(&self, label: &str) -> usize {
        self.outcomes.iter().filter(|o| o.label() == label).count()
    }

    pub fn placed(&self) -> usize {
        self.count("ENTRY_PLACED")
    }

    pub fn skipped(&self) -> usize {
        self.count("SKIPPED")
    }

    pub fn closed(&self) -> usize {
        self.count("CLOSED")
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    /// Users whose entry is open on the exchange without protection.
    pub fn unprotected(&self) -> Vec<&UserOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(&o.result, Err(e) if e.leaves_position_unprotected()))
            .collect()
    }

    #[cfg(test)]
    pub fn get(&self, user_id: &str) -> Option<&UserOutcome> {
        self.outcomes.iter().find(|o| o.user_id == user_id)
    }
}

impl fmt::Display for BatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} users: {} placed, {} skipped, {} closed, {} failed",
            self.outcomes.len(),
            self.placed(),
            self.skipped(),
            self.closed(),
            self.failed()
        )?;

        for o in &self.outcomes {
            match &o.result {
                Ok(outcome) => writeln!(f, "  {:<20} {}", o.user_id, outcome)?,
                Err(e) if e.leaves_position_unprotected() => {
                    writeln!(f, "  {:<20} UNPROTECTED {}: {}", o.user_id, e.kind(), e)?
                }
                Err(e) => writeln!(f, "  {:<20} {}: {}", o.user_id, e.kind(), e)?,
            }
        }

        Ok(())
    }
}

/// Runs a signal for many users concurrently.
pub struct BatchOrchestrator {
    sequencer: Arc<OrderSequencer>,
    locks: Mutex<HashMap<(String, String), LegLock>>,
    serialize_per_symbol: bool,
}

impl BatchOrchestrator {
    pub fn new(
        config: &ExecutorConfig,
        gateway: Arc<dyn ExchangeGateway>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self, TradeError> {
        let mut sequencer = OrderSequencer::new(gateway, store, config);
        if let Some(url) = &config.notify_url {
            let notifier = Notifier::new(url, Duration::from_secs(config.request_timeout_secs))?;
            sequencer = sequencer.with_notifier(notifier);
        }

        Ok(Self {
            sequencer: Arc::new(sequencer),
            locks: Mutex::new(HashMap::new()),
            serialize_per_symbol: config.serialize_per_symbol,
        })
    }

    fn lock_for(&self, user_id: &str, symbol: &str) -> Option<LegLock> {
        if !self.serialize_per_symbol {
            return None;
        }
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // An entry only the map still references has no holder and no waiter.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Some(
            locks
                .entry((user_id.to_string(), symbol.to_string()))
                .or_default()
                .clone(),
        )
    }

    fn release_idle_locks(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub async fn run_payload(&self, payload: SignalPayload) -> Result<BatchResult, TradeError> {
        let (signal, users) = payload.into_parts();
        self.run_signal(&signal, users).await
    }

    /// Run `signal` for every user. Only an invalid signal fails the whole batch.
    pub async fn run_signal(&self, signal: &TradeSignal, users: Vec<UserTradeConfig>) -> Result<BatchResult, TradeError> {
        signal.validate()?;

        info!(
            symbol = %signal.symbol,
            side = %signal.position_side,
            trade_type = signal.trade_type.as_str(),
            users = users.len(),
            "Dispatching signal"
        );

        let signal = Arc::new(signal.clone());
        let mut user_ids = Vec::with_capacity(users.len());
        let mut handles = Vec::with_capacity(users.len());

        for user in users {
            let sequencer = Arc::clone(&self.sequencer);
            let signal = Arc::clone(&signal);
            let lock = self.lock_for(&user.user_id, &signal.symbol);

            user_ids.push(user.user_id.clone());
            handles.push(tokio::spawn(async move {
                let _guard = match lock {
                    Some(lock) => Some(lock.lock_owned().await),
                    None => None,
                };
                sequencer.run(&signal, &user).await
            }));
        }

        let results = join_all(handles).await;
        self.release_idle_locks();

        let outcomes: Vec<UserOutcome> = user_ids
            .into_iter()
            .zip(results)
            .map(|(user_id, joined)| {
                let result = joined.unwrap_or_else(|e| Err(TradeError::Aborted(e.to_string())));
                match &result {
                    Ok(outcome) => info!(user = %user_id, outcome = %outcome, "User sequence finished"),
                    Err(e) if e.is_partial_execution() => {
                        error!(user = %user_id, error = %e, "User sequence partially executed")
                    }
                    Err(e) => warn!(user = %user_id, error = %e, "User sequence failed"),
                }
                UserOutcome { user_id, result }
            })
            .collect();

        let batch = BatchResult { outcomes };
        info!(
            placed = batch.placed(),
            skipped = batch.skipped(),
            closed = batch.closed(),
            failed = batch.failed(),
            unprotected = batch.unprotected().len(),
            "Batch complete"
        );

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SimulatedExchange;
    use crate::db::MemoryStore;
    use crate::models::{OrderSide, OrderType, PositionSide, PositionView};
    use crate::trading::eligibility::SkipReason;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn setup() -> (Arc<SimulatedExchange>, Arc<MemoryStore>, BatchOrchestrator) {
        let exchange = Arc::new(SimulatedExchange::new(dec!(1000)));
        exchange.set_mark_price("BTCUSDT", dec!(27000.0));
        let store = Arc::new(MemoryStore::new());
        let orchestrator =
            BatchOrchestrator::new(&ExecutorConfig::simulated(), exchange.clone(), store.clone()).unwrap();
        (exchange, store, orchestrator)
    }

    fn user(id: &str) -> UserTradeConfig {
        UserTradeConfig::new(id, &format!("{}-key", id), "secret")
    }

    fn open_leg(side: PositionSide, margin: Decimal, amount: Decimal) -> PositionView {
        PositionView {
            symbol: "BTCUSDT".to_string(),
            position_side: side,
            isolated_wallet_margin: margin,
            entry_price: dec!(27000),
            position_amount: amount,
        }
    }

    fn long_signal() -> TradeSignal {
        TradeSignal::open("BTCUSDT", PositionSide::Long, dec!(27000.0), 3)
    }

    #[tokio::test]
    async fn test_one_skipped_one_placed() {
        let (exchange, store, orchestrator) = setup();
        exchange.seed_account("busy-key", dec!(1000), vec![open_leg(PositionSide::Long, dec!(20), dec!(0.01))]);

        let batch = orchestrator
            .run_signal(&long_signal(), vec![user("busy"), user("free")])
            .await
            .unwrap();

        assert_eq!(batch.get("busy").unwrap().label(), "SKIPPED");
        assert_eq!(batch.get("free").unwrap().label(), "ENTRY_PLACED");
        assert_eq!(batch.placed(), 1);
        assert_eq!(batch.skipped(), 1);
        assert_eq!(store.len().await, 1);
        assert!(exchange.orders_for("busy-key").is_empty());
    }

    #[tokio::test]
    async fn test_repeated_open_is_idempotent() {
        let (exchange, store, orchestrator) = setup();

        let first = tokio_test::assert_ok!(orchestrator.run_signal(&long_signal(), vec![user("u1")]).await);
        assert_eq!(first.placed(), 1);

        for _ in 0..3 {
            let again = orchestrator.run_signal(&long_signal(), vec![user("u1")]).await.unwrap();
            assert!(matches!(
                again.get("u1").unwrap().result,
                Ok(SequenceOutcome::Skipped {
                    reason: SkipReason::AlreadyOpen
                })
            ));
        }

        assert_eq!(store.len().await, 1);
        assert_eq!(exchange.orders_for("u1-key").len(), 3);
    }

    #[tokio::test]
    async fn test_overlapping_signals_for_same_user_open_once() {
        let (exchange, store, orchestrator) = setup();

        let batch = orchestrator
            .run_signal(&long_signal(), vec![user("u1"), user("u1")])
            .await
            .unwrap();

        assert_eq!(batch.placed(), 1);
        assert_eq!(batch.skipped(), 1);
        assert_eq!(store.len().await, 1);
        assert!(orchestrator.locks.lock().unwrap().is_empty());
        let entries = exchange
            .orders_for("u1-key")
            .into_iter()
            .filter(|o| o.order_type == OrderType::Market)
            .count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_lock_table_does_not_grow_across_batches() {
        let (_exchange, _store, orchestrator) = setup();

        for symbol in ["BTCUSDT", "ETHUSDT", "SOLUSDT"] {
            let signal = TradeSignal::close(symbol, dec!(100.0));
            orchestrator
                .run_signal(&signal, vec![user("u1"), user("u2")])
                .await
                .unwrap();
            assert!(orchestrator.locks.lock().unwrap().is_empty());
        }

        // A held lock survives pruning; an idle one does not.
        let held = orchestrator.lock_for("u1", "BTCUSDT").unwrap();
        let _guard = held.lock().await;
        drop(orchestrator.lock_for("u2", "BTCUSDT"));
        orchestrator.release_idle_locks();

        let locks = orchestrator.locks.lock().unwrap();
        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key(&("u1".to_string(), "BTCUSDT".to_string())));
    }

    #[tokio::test]
    async fn test_close_signal_flattens_short() {
        let (exchange, store, orchestrator) = setup();
        exchange.seed_account("u1-key", dec!(1000), vec![open_leg(PositionSide::Short, dec!(25), dec!(-2.5))]);

        let batch = orchestrator
            .run_signal(&TradeSignal::close("BTCUSDT", dec!(27000.0)), vec![user("u1")])
            .await
            .unwrap();

        assert_eq!(batch.closed(), 1);
        let orders = exchange.orders_for("u1-key");
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_type, OrderType::Market);
        assert_eq!(orders[0].side, OrderSide::Buy);
        assert_eq!(orders[0].position_side, PositionSide::Short);
        assert_eq!(orders[0].quantity, "2.5");
        assert!(!orders.iter().any(|o| o.is_protective()));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_partial_execution_is_reported_separately() {
        let (exchange, _store, orchestrator) = setup();
        exchange.reject_order_type(OrderType::Limit);

        let batch = orchestrator
            .run_signal(&long_signal(), vec![user("u1"), user("u2")])
            .await
            .unwrap();

        assert_eq!(batch.failed(), 2);
        assert_eq!(batch.unprotected().len(), 2);
        assert_eq!(batch.get("u1").unwrap().label(), "PARTIAL_EXECUTION");

        let report = batch.to_string();
        assert!(report.contains("UNPROTECTED"));
        assert!(!report.contains("u1-key"));
        assert!(!report.contains("secret"));
    }

    #[tokio::test]
    async fn test_one_user_failure_does_not_block_others() {
        let (exchange, _store, orchestrator) = setup();
        let mut bad = user("bad");
        bad.trade_size_percent = dec!(0);

        let batch = orchestrator
            .run_signal(&long_signal(), vec![bad, user("good")])
            .await
            .unwrap();

        assert_eq!(batch.get("bad").unwrap().label(), "VALIDATION");
        assert_eq!(batch.get("good").unwrap().label(), "ENTRY_PLACED");
        assert!(exchange.orders_for("bad-key").is_empty());
    }

    #[tokio::test]
    async fn test_invalid_signal_rejects_batch() {
        let (exchange, _store, orchestrator) = setup();
        let signal = TradeSignal::open("btc-usdt", PositionSide::Long, dec!(27000.0), 3);

        let err = tokio_test::assert_err!(orchestrator.run_signal(&signal, vec![user("u1")]).await);
        assert!(matches!(err, TradeError::Validation(_)));
        assert!(exchange.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn test_run_payload() {
        let (_exchange, store, orchestrator) = setup();
        let payload = SignalPayload::from_json(
            r#"{
                "users": [{"user_id":"p1","api_key":"p1-key","secret":"s","leverage":5,"trade_size":20,
                           "sell_at":10,"stop_loss_at":5,"no_of_trades":2}],
                "symbol": "BTCUSDT",
                "position_side": "SHORT",
                "exchange_rate": "27000.0",
                "quantity_precesion": 3
            }"#,
        )
        .unwrap();

        let batch = orchestrator.run_payload(payload).await.unwrap();

        // 1000 * 20% / 27000 * 5 = 0.0370...
        match &batch.get("p1").unwrap().result {
            Ok(SequenceOutcome::EntryPlaced { quantity, .. }) => assert_eq!(quantity, "0.037"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(store.len().await, 1);
    }
}
