//! Per-user order sequencing.
//!
//! An OPEN signal walks through:
//! 1. account snapshot and eligibility verdict
//! 2. isolated margin and leverage for the symbol
//! 3. sizing, best-effort cancel of resting orders, MARKET entry
//! 4. trade record
//! 5. fresh snapshot, take-profit and stop-loss orders
//! 6. optionally, MARKET closes for recorded trades on the opposite leg
//! 7. new protection for whatever remains of the opposite leg, whose orders
//!    the cancel in step 3 removed
//!
//! A CLOSE signal flattens every open leg on the symbol with MARKET orders.
//!
//! Nothing is rolled back. Once the entry is acknowledged, any later failure
//! is wrapped in [`TradeError::PartialExecution`] naming the step that failed.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::api::{ExchangeGateway, Notifier};
use crate::db::RecordStore;
use crate::error::{ExecutionStage, TradeError};
use crate::models::{
    AccountSnapshot, OrderAck, OrderRequest, PositionSide, RecordFilter, TradeRecord, TradeSignal, TradeType,
    UserTradeConfig,
};

use super::calculator;
use super::config::{DecimalCountRule, ExecutorConfig};
use super::eligibility::{self, Eligibility, SkipReason};

/// How a user's sequence ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceOutcome {
    Skipped {
        reason: SkipReason,
    },
    EntryPlaced {
        order_id: i64,
        quantity: String,
        take_profit: Decimal,
        stop_loss: Decimal,
        hedges_closed: usize,
        /// The opposite leg lost its resting orders to the pre-entry cancel and got new ones.
        opposite_reprotected: bool,
    },
    Closed {
        orders: Vec<i64>,
    },
}

impl SequenceOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SequenceOutcome::Skipped { .. } => "SKIPPED",
            SequenceOutcome::EntryPlaced { .. } => "ENTRY_PLACED",
            SequenceOutcome::Closed { .. } => "CLOSED",
        }
    }
}

impl fmt::Display for SequenceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceOutcome::Skipped { reason } => write!(f, "SKIPPED: {}", reason),
            SequenceOutcome::EntryPlaced {
                order_id,
                quantity,
                take_profit,
                stop_loss,
                hedges_closed,
                opposite_reprotected,
            } => {
                write!(
                    f,
                    "ENTRY_PLACED: order {} qty {} tp {} sl {}",
                    order_id, quantity, take_profit, stop_loss
                )?;
                if *hedges_closed > 0 {
                    write!(f, " ({} opposite trades closed)", hedges_closed)?;
                }
                if *opposite_reprotected {
                    write!(f, " (opposite leg re-protected)")?;
                }
                Ok(())
            }
            SequenceOutcome::Closed { orders } if orders.is_empty() => write!(f, "CLOSED: nothing open"),
            SequenceOutcome::Closed { orders } => write!(f, "CLOSED: {} legs flattened", orders.len()),
        }
    }
}

/// Runs one user's sequence for one signal.
pub struct OrderSequencer {
    gateway: Arc<dyn ExchangeGateway>,
    store: Arc<dyn RecordStore>,
    notifier: Option<Notifier>,
    decimal_rule: DecimalCountRule,
    venue: &'static str,
}

impl OrderSequencer {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, store: Arc<dyn RecordStore>, config: &ExecutorConfig) -> Self {
        Self {
            gateway,
            store,
            notifier: None,
            decimal_rule: config.decimal_rule,
            venue: config.mode.venue(),
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub async fn run(&self, signal: &TradeSignal, user: &UserTradeConfig) -> Result<SequenceOutcome, TradeError> {
        user.validate()?;

        match signal.trade_type {
            TradeType::Open => self.open(signal, user).await,
            TradeType::Close => self.close_all(signal, user).await,
        }
    }

    async fn open(&self, signal: &TradeSignal, user: &UserTradeConfig) -> Result<SequenceOutcome, TradeError> {
        let creds = &user.credentials;
        let symbol = signal.symbol.as_str();
        let side = signal.position_side;

        let snapshot = self.gateway.account(creds).await?;

        if let Eligibility::Ineligible(reason) =
            eligibility::evaluate(&snapshot, symbol, side, user.max_concurrent_trades)
        {
            info!(user = %user.user_id, symbol = %symbol, side = %side, reason = %reason, "Skipping entry");
            return Ok(SequenceOutcome::Skipped { reason });
        }

        self.gateway.set_isolated_margin(creds, symbol).await?;
        self.gateway.set_leverage(creds, symbol, user.leverage).await?;

        let quantity = calculator::compute_quantity(
            snapshot.total_cross_wallet_balance,
            user.trade_size_percent,
            signal.reference_price,
            user.leverage,
            signal.quantity_precision,
        )?;
        if Decimal::from_str(&quantity).map_or(true, |q| q.is_zero()) {
            info!(user = %user.user_id, symbol = %symbol, balance = %snapshot.total_cross_wallet_balance, "Quantity rounds to zero");
            return Ok(SequenceOutcome::Skipped {
                reason: SkipReason::QuantityTooSmall,
            });
        }

        // In hedge mode this also removes the opposite leg's take-profit and stop-loss.
        let opposite_exposed = match self.gateway.cancel_all_orders(creds, symbol).await {
            Ok(()) => snapshot.open_position(symbol, side.opposite()).is_some(),
            Err(e) => {
                warn!(user = %user.user_id, symbol = %symbol, error = %e, "Could not clear resting orders before entry");
                false
            }
        };

        let entry = OrderRequest::market(symbol, side.entry_side(), side, &quantity);
        let ack = match self.gateway.place_order(creds, &entry).await {
            Ok(ack) => ack,
            Err(e) => {
                if opposite_exposed {
                    if let Err(re) = self.reprotect_opposite(signal, user, &snapshot).await {
                        error!(user = %user.user_id, symbol = %symbol, error = %re, "Opposite position is open WITHOUT protection");
                    }
                }
                return Err(e);
            }
        };
        let order_id = ack.order_id;
        info!(user = %user.user_id, symbol = %symbol, side = %side, qty = %quantity, order_id, "Entry placed");

        let record = TradeRecord::opened(&user.user_id, signal, &ack, &quantity, self.venue);
        let saved = match self.store.save(record).await {
            Ok(saved) => saved,
            Err(e) => {
                error!(user = %user.user_id, order_id, error = %e, "Failed to record entry; placing protection anyway");
                return self
                    .finish_unrecorded(signal, user, &ack, &quantity, opposite_exposed, e)
                    .await;
            }
        };

        let fresh = self
            .gateway
            .account(creds)
            .await
            .map_err(|e| self.partial(user, order_id, ExecutionStage::Snapshot, e))?;

        let (take_profit, stop_loss) = self
            .protect(signal, user, &fresh, side, &quantity)
            .await
            .map_err(|e| self.partial(user, order_id, ExecutionStage::Protection, e))?;

        let hedges_closed = if signal.close_opposite {
            self.close_opposite(signal, user, &fresh)
                .await
                .map_err(|e| self.partial(user, order_id, ExecutionStage::HedgeClose, e))?
        } else {
            0
        };

        let opposite_reprotected = if opposite_exposed {
            let refreshed;
            let current = if hedges_closed > 0 {
                refreshed = self
                    .gateway
                    .account(creds)
                    .await
                    .map_err(|e| self.partial(user, order_id, ExecutionStage::HedgeProtection, e))?;
                &refreshed
            } else {
                &fresh
            };
            self.reprotect_opposite(signal, user, current)
                .await
                .map_err(|e| self.partial(user, order_id, ExecutionStage::HedgeProtection, e))?
        } else {
            false
        };

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.publish(&saved).await {
                warn!(user = %user.user_id, order_id, error = %e, "Trade notification not delivered");
            }
        }

        Ok(SequenceOutcome::EntryPlaced {
            order_id,
            quantity,
            take_profit,
            stop_loss,
            hedges_closed,
            opposite_reprotected,
        })
    }

    /// Entry is live but its record is missing: still protect it, then report the record failure.
    async fn finish_unrecorded(
        &self,
        signal: &TradeSignal,
        user: &UserTradeConfig,
        ack: &OrderAck,
        quantity: &str,
        opposite_exposed: bool,
        cause: TradeError,
    ) -> Result<SequenceOutcome, TradeError> {
        let order_id = ack.order_id;

        let fresh = self
            .gateway
            .account(&user.credentials)
            .await
            .map_err(|e| self.partial(user, order_id, ExecutionStage::Snapshot, e))?;

        self.protect(signal, user, &fresh, signal.position_side, quantity)
            .await
            .map_err(|e| self.partial(user, order_id, ExecutionStage::Protection, e))?;

        if opposite_exposed {
            self.reprotect_opposite(signal, user, &fresh)
                .await
                .map_err(|e| self.partial(user, order_id, ExecutionStage::HedgeProtection, e))?;
        }

        Err(self.partial(user, order_id, ExecutionStage::Record, cause))
    }

    /// Place take-profit and stop-loss orders against one open leg of the signal's symbol.
    async fn protect(
        &self,
        signal: &TradeSignal,
        user: &UserTradeConfig,
        fresh: &AccountSnapshot,
        side: PositionSide,
        quantity: &str,
    ) -> Result<(Decimal, Decimal), TradeError> {
        let creds = &user.credentials;
        let symbol = signal.symbol.as_str();

        let leg = fresh.open_position(symbol, side).ok_or_else(|| {
            TradeError::InconsistentState(format!("no open {} position on {} after entry", side, symbol))
        })?;

        let precision = calculator::count_decimals(&signal.reference_price.to_string(), self.decimal_rule);
        let take_profit = calculator::compute_take_profit(
            leg.entry_price,
            leg.isolated_wallet_margin,
            user.sell_at_percent,
            leg.position_amount,
            precision,
        )?;
        let stop_loss = calculator::compute_stop_loss(
            leg.entry_price,
            leg.isolated_wallet_margin,
            user.stop_loss_at_percent,
            leg.position_amount,
            side,
            precision,
        )?;

        let exit = side.exit_side();
        let profit_order = if user.trailing_stop_enabled {
            OrderRequest::trailing_stop(
                symbol,
                exit,
                side,
                quantity,
                take_profit,
                calculator::format_callback_rate(user.trailing_stop_callback_rate),
            )
        } else {
            OrderRequest::limit(symbol, exit, side, quantity, take_profit)
        };
        let tp_ack = self.gateway.place_order(creds, &profit_order).await?;

        let stop_order = OrderRequest::stop_market(symbol, exit, side, quantity, stop_loss);
        let sl_ack = self.gateway.place_order(creds, &stop_order).await?;

        info!(
            user = %user.user_id,
            symbol = %symbol,
            side = %side,
            take_profit = %take_profit,
            stop_loss = %stop_loss,
            tp_order = tp_ack.order_id,
            sl_order = sl_ack.order_id,
            trailing = user.trailing_stop_enabled,
            "Protection placed"
        );

        Ok((take_profit, stop_loss))
    }

    /// Protect what the snapshot still holds on the opposite leg. False when nothing is left.
    async fn reprotect_opposite(
        &self,
        signal: &TradeSignal,
        user: &UserTradeConfig,
        current: &AccountSnapshot,
    ) -> Result<bool, TradeError> {
        let opposite = signal.position_side.opposite();
        let quantity = match current.open_position(&signal.symbol, opposite) {
            Some(leg) => leg.position_amount.abs().normalize().to_string(),
            None => return Ok(false),
        };

        self.protect(signal, user, current, opposite, &quantity).await?;
        Ok(true)
    }

    /// Close recorded trades on the opposite leg, never more than the exchange still holds.
    async fn close_opposite(
        &self,
        signal: &TradeSignal,
        user: &UserTradeConfig,
        fresh: &AccountSnapshot,
    ) -> Result<usize, TradeError> {
        let symbol = signal.symbol.as_str();
        let opposite = signal.position_side.opposite();

        let mut remaining = match fresh.open_position(symbol, opposite) {
            Some(leg) => leg.position_amount.abs(),
            None => return Ok(0),
        };

        let records = self
            .store
            .find_all(&RecordFilter::open_leg(&user.user_id, symbol, opposite))
            .await?;

        let mut closed = 0;
        for record in records {
            if remaining <= Decimal::ZERO {
                break;
            }

            let recorded = Decimal::from_str(&record.quantity).map_err(|_| {
                TradeError::Persistence(format!("record {} has invalid quantity {:?}", record.id, record.quantity))
            })?;
            if recorded <= Decimal::ZERO {
                continue;
            }

            let quantity = if recorded > remaining {
                remaining.normalize().to_string()
            } else {
                record.quantity.clone()
            };

            let order = OrderRequest::market(symbol, opposite.exit_side(), opposite, &quantity);
            let ack = self.gateway.place_order(&user.credentials, &order).await?;
            info!(user = %user.user_id, symbol = %symbol, side = %opposite, qty = %quantity, order_id = ack.order_id, trade_id = %record.trade_id, "Closed opposite trade");

            remaining -= recorded.min(remaining);
            closed += 1;
        }

        Ok(closed)
    }

    async fn close_all(&self, signal: &TradeSignal, user: &UserTradeConfig) -> Result<SequenceOutcome, TradeError> {
        let creds = &user.credentials;
        let symbol = signal.symbol.as_str();

        let snapshot = self.gateway.account(creds).await?;
        let legs: Vec<_> = snapshot.open_on_symbol(symbol).cloned().collect();

        let mut orders = Vec::with_capacity(legs.len());
        for leg in legs {
            let quantity = leg.position_amount.abs().normalize();
            if quantity.is_zero() {
                continue;
            }

            let order = OrderRequest::market(
                symbol,
                leg.position_side.exit_side(),
                leg.position_side,
                &quantity.to_string(),
            );
            let ack = self.gateway.place_order(creds, &order).await?;
            info!(user = %user.user_id, symbol = %symbol, side = %leg.position_side, qty = %quantity, order_id = ack.order_id, "Position flattened");
            orders.push(ack.order_id);
        }

        if !orders.is_empty() {
            if let Err(e) = self.gateway.cancel_all_orders(creds, symbol).await {
                warn!(user = %user.user_id, symbol = %symbol, error = %e, "Could not clear protective orders after close");
            }
        }

        Ok(SequenceOutcome::Closed { orders })
    }

    fn partial(&self, user: &UserTradeConfig, order_id: i64, stage: ExecutionStage, cause: TradeError) -> TradeError {
        let err = TradeError::partial(order_id, stage, cause);
        if stage == ExecutionStage::HedgeProtection {
            error!(user = %user.user_id, order_id, stage = %stage, error = %err, "Opposite position is open WITHOUT protection");
        } else if err.leaves_position_unprotected() {
            error!(user = %user.user_id, order_id, stage = %stage, error = %err, "Entry is open WITHOUT protection");
        } else {
            error!(user = %user.user_id, order_id, stage = %stage, error = %err, "Entry placed but sequence incomplete");
        }
        err
    }
}
