use std::io;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the statistics store.
///
/// `Io` and `Corruption` are fatal: the operation that hit them is aborted
/// and the error propagates to the caller. Reads past the end of the index
/// file are *not* errors; they surface as absent rows.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("corruption detected: {0}")]
    Corruption(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
