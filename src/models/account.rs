//! Account snapshot as reported by the exchange.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::PositionSide;

/// One hedge leg of the account. Non-zero isolated margin means the leg is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionView {
    pub symbol: String,
    pub position_side: PositionSide,
    pub isolated_wallet_margin: Decimal,
    pub entry_price: Decimal,
    /// Signed amount: negative for short legs
    pub position_amount: Decimal,
}

impl PositionView {
    pub fn is_open(&self) -> bool {
        !self.isolated_wallet_margin.is_zero()
    }

    pub fn is_leg(&self, symbol: &str, side: PositionSide) -> bool {
        self.symbol == symbol && self.position_side == side
    }
}

/// Read-only account state fetched at the start of a user sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub total_cross_wallet_balance: Decimal,
    pub positions: Vec<PositionView>,
}

impl AccountSnapshot {
    pub fn open_positions(&self) -> impl Iterator<Item = &PositionView> {
        self.positions.iter().filter(|p| p.is_open())
    }

    /// The open leg for `(symbol, side)`, if any.
    pub fn open_position(&self, symbol: &str, side: PositionSide) -> Option<&PositionView> {
        self.open_positions().find(|p| p.is_leg(symbol, side))
    }

    /// Every open leg on `symbol`, regardless of side.
    pub fn open_on_symbol<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a PositionView> + 'a {
        self.open_positions().filter(move |p| p.symbol == symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn leg(symbol: &str, side: PositionSide, margin: Decimal, amount: Decimal) -> PositionView {
        PositionView {
            symbol: symbol.to_string(),
            position_side: side,
            isolated_wallet_margin: margin,
            entry_price: dec!(100),
            position_amount: amount,
        }
    }

    #[test]
    fn test_open_position_lookup() {
        let snapshot = AccountSnapshot {
            total_cross_wallet_balance: dec!(1000),
            positions: vec![
                leg("BTCUSDT", PositionSide::Long, dec!(0), dec!(0)),
                leg("BTCUSDT", PositionSide::Short, dec!(12.5), dec!(-0.5)),
                leg("ETHUSDT", PositionSide::Long, dec!(3), dec!(1)),
            ],
        };

        assert_eq!(snapshot.open_positions().count(), 2);
        assert!(snapshot.open_position("BTCUSDT", PositionSide::Long).is_none());
        assert_eq!(
            snapshot.open_position("BTCUSDT", PositionSide::Short).map(|p| p.position_amount),
            Some(dec!(-0.5))
        );
        assert_eq!(snapshot.open_on_symbol("BTCUSDT").count(), 1);
    }
}
