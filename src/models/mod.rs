//! Domain models: signals, user configs, account snapshots, orders and trade records.

mod account;
mod order;
mod record;
mod signal;
mod user;

pub use account::{AccountSnapshot, PositionView};
pub use order::{OrderAck, OrderRequest, OrderSide, OrderType};
pub use record::{RecordFilter, RecordPatch, TradeRecord, TradeStatus};
pub use signal::{PositionSide, SignalPayload, TradeSignal, TradeType};
pub use user::{Credentials, UserTradeConfig};
