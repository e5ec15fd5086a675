//! Whether a user may open a new position.

use std::fmt;

use crate::models::{AccountSnapshot, PositionSide};

/// Why an entry was not placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The requested (symbol, side) leg already holds margin.
    AlreadyOpen,
    /// The account already holds `max` open isolated positions.
    LimitReached { open: usize, max: u32 },
    /// Sizing rounded the order quantity down to zero.
    QuantityTooSmall,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyOpen => write!(f, "position already open"),
            SkipReason::LimitReached { open, max } => {
                write!(f, "concurrent trade limit reached ({} open, max {})", open, max)
            }
            SkipReason::QuantityTooSmall => write!(f, "quantity rounds to zero"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Ineligible(SkipReason),
}

/// Verdict for opening `(symbol, side)` given the account's open positions.
pub fn evaluate(snapshot: &AccountSnapshot, symbol: &str, side: PositionSide, max_concurrent: u32) -> Eligibility {
    if snapshot.open_position(symbol, side).is_some() {
        return Eligibility::Ineligible(SkipReason::AlreadyOpen);
    }

    let open = snapshot.open_positions().count();
    if open >= max_concurrent as usize {
        return Eligibility::Ineligible(SkipReason::LimitReached {
            open,
            max: max_concurrent,
        });
    }

    Eligibility::Eligible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionView;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn leg(symbol: &str, side: PositionSide, margin: Decimal) -> PositionView {
        PositionView {
            symbol: symbol.to_string(),
            position_side: side,
            isolated_wallet_margin: margin,
            entry_price: dec!(100),
            position_amount: dec!(1),
        }
    }

    fn snapshot(positions: Vec<PositionView>) -> AccountSnapshot {
        AccountSnapshot {
            total_cross_wallet_balance: dec!(1000),
            positions,
        }
    }

    #[test]
    fn test_open_leg_is_ineligible() {
        let s = snapshot(vec![leg("BTCUSDT", PositionSide::Long, dec!(12))]);
        assert_eq!(
            evaluate(&s, "BTCUSDT", PositionSide::Long, 5),
            Eligibility::Ineligible(SkipReason::AlreadyOpen)
        );
        // Hedge mode: the other leg is still allowed.
        assert_eq!(evaluate(&s, "BTCUSDT", PositionSide::Short, 5), Eligibility::Eligible);
    }

    #[test]
    fn test_zero_margin_leg_is_not_open() {
        let s = snapshot(vec![leg("BTCUSDT", PositionSide::Long, dec!(0))]);
        assert_eq!(evaluate(&s, "BTCUSDT", PositionSide::Long, 1), Eligibility::Eligible);
    }

    #[test]
    fn test_limit_counts_across_symbols() {
        let s = snapshot(vec![
            leg("ETHUSDT", PositionSide::Long, dec!(3)),
            leg("SOLUSDT", PositionSide::Short, dec!(4)),
            leg("XRPUSDT", PositionSide::Long, dec!(0)),
        ]);
        assert_eq!(
            evaluate(&s, "BTCUSDT", PositionSide::Long, 2),
            Eligibility::Ineligible(SkipReason::LimitReached { open: 2, max: 2 })
        );
        assert_eq!(evaluate(&s, "BTCUSDT", PositionSide::Long, 3), Eligibility::Eligible);
    }
}
