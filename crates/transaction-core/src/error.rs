//! Transaction layer errors.

use thiserror::Error;

use crate::key::TransactionKey;

/// Result type alias for transaction operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the transaction layer API.
///
/// Timeout and transport failure during a transaction's lifetime are not
/// errors here; they arrive through the terminal [`crate::client::TsxEvent`].
#[derive(Error, Debug)]
pub enum Error {
    /// A transaction with this key already exists
    #[error("transaction already exists: {0}")]
    DuplicateTransaction(TransactionKey),

    /// No transaction matches this key
    #[error("no such transaction: {0}")]
    TransactionNotFound(TransactionKey),

    /// The layer's task is gone
    #[error("transaction layer is shut down")]
    LayerClosed,

    /// Caller contract violated
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}
