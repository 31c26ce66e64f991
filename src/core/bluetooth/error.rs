//! Error types of the link layer.

use std::time::Duration;

use thiserror::Error;

/// Failures reported by a [`Transport`](super::Transport) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("No Bluetooth adapter available")]
    Unavailable,

    #[error("Peripheral not found: {0}")]
    PeripheralNotFound(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(String),

    #[error("Peripheral disconnected")]
    Disconnected,

    #[error("Wire encoding error: {0}")]
    Codec(#[from] CodecError),

    #[error("{0}")]
    Backend(String),
}

impl From<bluest::Error> for TransportError {
    fn from(e: bluest::Error) -> Self {
        TransportError::Backend(e.to_string())
    }
}

/// Base64 wire value could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid base64 wire value: {0}")]
pub struct CodecError(pub String);

/// Discovery could not be started or continued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Scan failed: {reason}")]
pub struct ScanError {
    pub reason: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("A connection attempt is already in progress")]
    AlreadyConnecting,

    #[error("Already connected to a peripheral")]
    AlreadyConnected,

    #[error("Connection failed: {reason}")]
    Transport { reason: String },

    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection attempt cancelled by disconnect")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    #[error("No device connected")]
    NotConnected,

    #[error("Write failed: {cause}")]
    Transport { cause: String },
}

/// Umbrella error for the consumer-facing facade.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
