//! Wire types for the futures REST API.

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::models::{AccountSnapshot, PositionSide, PositionView};

/// Structured rejection body, e.g. `{"code":-2019,"msg":"Margin is insufficient."}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeErrorBody {
    pub code: i64,
    pub msg: String,
}

/// Response from `GET /fapi/v2/account`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub total_cross_wallet_balance: Decimal,
    #[serde(default)]
    pub positions: Vec<PositionResponse>,
}

/// One entry of the account's `positions` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResponse {
    pub symbol: String,
    pub position_side: String,
    #[serde(default)]
    pub isolated_wallet: Decimal,
    #[serde(default)]
    pub entry_price: Decimal,
    #[serde(default)]
    pub position_amt: Decimal,
}

impl From<AccountResponse> for AccountSnapshot {
    fn from(resp: AccountResponse) -> Self {
        let positions = resp
            .positions
            .into_iter()
            .filter_map(|p| match PositionSide::from_wire(&p.position_side) {
                Some(side) => Some(PositionView {
                    symbol: p.symbol,
                    position_side: side,
                    isolated_wallet_margin: p.isolated_wallet,
                    entry_price: p.entry_price,
                    position_amount: p.position_amt,
                }),
                None => {
                    debug!(symbol = %p.symbol, side = %p.position_side, "Ignoring non-hedge position");
                    None
                }
            })
            .collect();

        AccountSnapshot {
            total_cross_wallet_balance: resp.total_cross_wallet_balance,
            positions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_account_response_to_snapshot() {
        let body = r#"{
            "totalCrossWalletBalance": "1523.40000000",
            "positions": [
                {"symbol":"BTCUSDT","positionSide":"LONG","isolatedWallet":"25.01","entryPrice":"27000.0","positionAmt":"0.010"},
                {"symbol":"BTCUSDT","positionSide":"SHORT","isolatedWallet":"0","entryPrice":"0.0","positionAmt":"0.000"},
                {"symbol":"ETHUSDT","positionSide":"BOTH","isolatedWallet":"0","entryPrice":"0.0","positionAmt":"0"}
            ]
        }"#;

        let resp: AccountResponse = serde_json::from_str(body).unwrap();
        let snapshot = AccountSnapshot::from(resp);

        assert_eq!(snapshot.total_cross_wallet_balance, dec!(1523.4));
        assert_eq!(snapshot.positions.len(), 2);
        let long = snapshot.open_position("BTCUSDT", PositionSide::Long).unwrap();
        assert_eq!(long.isolated_wallet_margin, dec!(25.01));
        assert_eq!(long.position_amount, dec!(0.010));
    }
}
