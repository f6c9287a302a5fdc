//! Aggregator error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("bus error: {0}")]
    BusError(String),

    #[error("command timed out")]
    Timeout,

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("bad argument: {0}")]
    BadArgument(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::BadArgument(e.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::StorageError(e.to_string())
    }
}
