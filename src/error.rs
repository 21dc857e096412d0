// src/error.rs
use thiserror::Error;

/// Invariant violations in the portfolio ledger. The engine's pre-checks
/// (duplicate/cap enforcement before sizing) are supposed to prevent these
/// from ever surfacing; seeing one at runtime is a logic defect.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("a position for {0} is already open")]
    DuplicateSymbol(String),

    #[error("no open position for {0}")]
    UnknownPosition(String),
}

/// Fatal-to-start failures. The run does not proceed past initialization.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("broker session failed: {0}")]
    BrokerConnect(String),

    #[error("model training failed: {0}")]
    Training(String),
}
