//! Error types for the voip.ms bridge.

use std::time::Duration;

/// Top-level error type for the bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors from parsing a link request. Reported straight back to the
/// requester; nothing is created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("Usage: link <voip ms user> <voip ms api password> <did>")]
    Usage,

    #[error("Invalid DID. Format is ########## (I.E. 5555555555)")]
    InvalidDid,
}

/// Errors talking to the voip.ms REST API.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Request for {method} failed: {reason}")]
    RequestFailed { method: String, reason: String },

    #[error("Request for {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("Provider returned HTTP {status} for {method}")]
    HttpStatus { method: String, status: u16 },

    #[error("Provider rejected {method}: {status}")]
    Rejected { method: String, status: String },

    #[error("Invalid response for {method}: {reason}")]
    InvalidResponse { method: String, reason: String },
}

/// Errors raised by the chat substrate while delivering events.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Delivery to room {room_id} failed: {reason}")]
    DeliveryFailed { room_id: String, reason: String },
}

/// Result type alias for the bridge.
pub type Result<T> = std::result::Result<T, Error>;
