//! Position sizing and protective price math.
//!
//! All functions are pure and work on `Decimal` so that quantities and prices
//! round exactly the way a fixed-point string formatter would.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::error::TradeError;
use crate::models::PositionSide;

use super::config::DecimalCountRule;

/// Round half away from zero and pad to exactly `dp` fractional digits.
pub fn round_half_up(value: Decimal, dp: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(dp);
    rounded
}

/// Order quantity for a new entry, formatted with `precision` fractional digits.
///
/// `balance * trade_size_percent / 100 / reference_price * leverage`
pub fn compute_quantity(
    wallet_balance: Decimal,
    trade_size_percent: Decimal,
    reference_price: Decimal,
    leverage: u32,
    precision: u32,
) -> Result<String, TradeError> {
    if reference_price <= Decimal::ZERO {
        return Err(TradeError::Validation(format!(
            "reference price must be positive, got {}",
            reference_price
        )));
    }

    let purchase_balance = wallet_balance * trade_size_percent / dec!(100);
    let raw = purchase_balance / reference_price * Decimal::from(leverage);

    Ok(round_half_up(raw, precision).to_string())
}

fn require_position(position_amount: Decimal) -> Result<(), TradeError> {
    if position_amount.is_zero() {
        return Err(TradeError::InconsistentState(
            "position amount is zero; protective prices are undefined".to_string(),
        ));
    }
    Ok(())
}

/// Take-profit trigger: `entry + (margin / 100 * sell_at) / amount`.
///
/// Short legs carry a negative amount, which moves the target below entry.
pub fn compute_take_profit(
    entry_price: Decimal,
    margin: Decimal,
    sell_at_percent: Decimal,
    position_amount: Decimal,
    price_precision: u32,
) -> Result<Decimal, TradeError> {
    require_position(position_amount)?;

    let profit = margin / dec!(100) * sell_at_percent;
    Ok(round_half_up(entry_price + profit / position_amount, price_precision))
}

/// Stop-loss trigger.
///
/// LONG: `entry + loss / -amount`. SHORT: `entry - loss / amount`.
pub fn compute_stop_loss(
    entry_price: Decimal,
    margin: Decimal,
    stop_loss_at_percent: Decimal,
    position_amount: Decimal,
    side: PositionSide,
    price_precision: u32,
) -> Result<Decimal, TradeError> {
    require_position(position_amount)?;

    let loss = margin / dec!(100) * stop_loss_at_percent;
    let price = match side {
        PositionSide::Long => entry_price + loss / -position_amount,
        PositionSide::Short => entry_price - loss / position_amount,
    };
    Ok(round_half_up(price, price_precision))
}

/// Number of fractional digits in a numeric string.
pub fn count_decimals(value: &str, rule: DecimalCountRule) -> u32 {
    let natural = value
        .trim()
        .split_once('.')
        .map(|(_, frac)| frac.chars().take_while(|c| c.is_ascii_digit()).count() as u32)
        .unwrap_or(0);

    match rule {
        DecimalCountRule::Natural => natural,
        DecimalCountRule::Legacy => natural.saturating_sub(1),
    }
}

/// Trailing-stop callback rate with one fractional digit.
pub fn format_callback_rate(rate: Decimal) -> Decimal {
    round_half_up(rate, 1)
}
