//! Error taxonomy for signal execution.
//!
//! Every per-user failure is reported as a [`TradeError`]. None of the variants
//! carry API keys, secrets or request signatures.

use std::fmt;

use thiserror::Error;

/// Step of the sequence that failed after the entry order was acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStage {
    /// Writing the trade record.
    Record,
    /// Re-fetching the account to locate the new position.
    Snapshot,
    /// Placing take-profit / stop-loss orders.
    Protection,
    /// Closing recorded trades on the opposite side.
    HedgeClose,
    /// Re-placing protection on the opposite side after the pre-entry cancel cleared it.
    HedgeProtection,
}

impl fmt::Display for ExecutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStage::Record => "record",
            ExecutionStage::Snapshot => "snapshot",
            ExecutionStage::Protection => "protection",
            ExecutionStage::HedgeClose => "hedge-close",
            ExecutionStage::HedgeProtection => "hedge-protection",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum TradeError {
    /// Malformed signal or user configuration. Raised before any network call.
    #[error("validation error: {0}")]
    Validation(String),

    /// The exchange could not be reached or answered with something unparseable.
    #[error("transport error: {0}")]
    Transport(String),

    /// The exchange answered with a structured rejection.
    #[error("exchange rejected request (HTTP {status}, code {code}): {message}")]
    ExchangeRequest {
        status: u16,
        code: i64,
        message: String,
    },

    /// Protective-order math was attempted without a usable open position.
    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    /// The entry order is live but a later step failed.
    #[error("entry order {order_id} placed but {stage} step failed: {source}")]
    PartialExecution {
        order_id: i64,
        stage: ExecutionStage,
        #[source]
        source: Box<TradeError>,
    },

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("record store error: {0}")]
    Persistence(String),

    /// The per-user task panicked or was cancelled.
    #[error("sequence aborted: {0}")]
    Aborted(String),
}

impl TradeError {
    pub fn partial(order_id: i64, stage: ExecutionStage, source: TradeError) -> Self {
        TradeError::PartialExecution {
            order_id,
            stage,
            source: Box::new(source),
        }
    }

    /// True when a position is open on the exchange without take-profit / stop-loss orders.
    pub fn leaves_position_unprotected(&self) -> bool {
        matches!(
            self,
            TradeError::PartialExecution {
                stage: ExecutionStage::Snapshot | ExecutionStage::Protection | ExecutionStage::HedgeProtection,
                ..
            }
        )
    }

    pub fn is_partial_execution(&self) -> bool {
        matches!(self, TradeError::PartialExecution { .. })
    }

    /// Exchange error code, if the exchange produced one.
    pub fn exchange_code(&self) -> Option<i64> {
        match self {
            TradeError::ExchangeRequest { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Short machine-friendly label used in batch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            TradeError::Validation(_) => "VALIDATION",
            TradeError::Transport(_) => "TRANSPORT",
            TradeError::ExchangeRequest { .. } => "EXCHANGE",
            TradeError::InconsistentState(_) => "INCONSISTENT_STATE",
            TradeError::PartialExecution { .. } => "PARTIAL_EXECUTION",
            TradeError::RecordNotFound(_) => "NOT_FOUND",
            TradeError::Persistence(_) => "PERSISTENCE",
            TradeError::Aborted(_) => "ABORTED",
        }
    }
}

impl From<sqlx::Error> for TradeError {
    fn from(e: sqlx::Error) -> Self {
        TradeError::Persistence(e.to_string())
    }
}

impl From<reqwest::Error> for TradeError {
    fn from(e: reqwest::Error) -> Self {
        // The request URL holds the signature; never let it into the message.
        TradeError::Transport(e.without_url().to_string())
    }
}
