//! Dispatcher-level error type (C7/C11).
//!
//! Mirrors `cp02_transport::Error`'s grouped-by-comment-header style; adds
//! the dispatcher-only kinds (`UnknownAction`, `Unauthorized`) that the
//! transport crate has no business knowing about.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not connected")]
    NotConnected,

    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] cp02_transport::Error),

    #[error(transparent)]
    Parse(#[from] cp02_transport::parsers::ParseError),

    #[error(transparent)]
    Aggregator(#[from] cp02_aggregator::Error),
}

impl DispatchError {
    /// Short, human-readable message for the client-facing
    /// `{success: false, message}` shape — never a `Debug`-formatted
    /// internal error.
    pub fn client_message(&self) -> String {
        self.to_string()
    }
}
