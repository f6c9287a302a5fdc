//! Transport error types.

use thiserror::Error;

/// Errors that can occur in the codec, session, token and connection layers.
#[derive(Error, Debug)]
pub enum Error {
    // Codec errors
    #[error("frame too short: need at least 9 bytes, got {0}")]
    FrameTooShort(usize),

    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumError { expected: u8, actual: u8 },

    #[error("payload length mismatch: header declared {declared}, buffer has {available}")]
    ParseError { declared: usize, available: usize },

    // Session / connection errors
    #[error("not connected")]
    NotConnected,

    #[error("session busy: a request is already in flight")]
    Busy,

    #[error("command timed out")]
    Timeout,

    #[error("BLE error: {0}")]
    BleError(String),

    #[error("GATT characteristic not found: {0}")]
    CharacteristicNotFound(String),

    // Token layer
    #[error("no valid token found for this device")]
    TokenUnavailable,

    // Storage
    #[error("storage error: {0}")]
    StorageError(String),

    #[error("bad argument: {0}")]
    BadArgument(String),
}

impl From<btleplug::Error> for Error {
    fn from(e: btleplug::Error) -> Self {
        Error::BleError(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::StorageError(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::StorageError(e.to_string())
    }
}
