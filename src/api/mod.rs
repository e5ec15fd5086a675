//! Exchange access: request signing, live and simulated transports, trade notifications.

mod futures_client;
mod notifier;
pub(crate) mod signer;
mod simulated;
mod types;

use async_trait::async_trait;

use crate::error::TradeError;
use crate::models::{AccountSnapshot, Credentials, OrderAck, OrderRequest};

pub use futures_client::FuturesClient;
pub use notifier::Notifier;
pub use signer::Params;
pub use simulated::SimulatedExchange;

/// Exchange operations the order sequencer needs, signed with the caller's credentials.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Wallet balance and hedge-mode positions.
    async fn account(&self, creds: &Credentials) -> Result<AccountSnapshot, TradeError>;

    /// Switch the symbol to isolated margin. Already-isolated is not an error.
    async fn set_isolated_margin(&self, creds: &Credentials, symbol: &str) -> Result<(), TradeError>;

    async fn set_leverage(&self, creds: &Credentials, symbol: &str, leverage: u32) -> Result<(), TradeError>;

    async fn place_order(&self, creds: &Credentials, order: &OrderRequest) -> Result<OrderAck, TradeError>;

    /// Cancel every resting order on the symbol.
    async fn cancel_all_orders(&self, creds: &Credentials, symbol: &str) -> Result<(), TradeError>;
}
