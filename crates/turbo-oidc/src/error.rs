//! Error types for the OIDC client engine
//!
//! Expected absence (no token stored, token expired) is modelled with
//! `Option`; everything here is a hard failure the embedding application
//! should surface or recover from by starting a new sign-in.

use thiserror::Error;

use crate::jwt::JwtError;
use crate::storage::StorageError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, OidcError>;

/// Errors raised by the client engine
#[derive(Debug, Clone, Error)]
pub enum OidcError {
    /// Missing or inconsistent client configuration
    #[error("{0}")]
    Configuration(String),

    /// Discovery document missing, unreachable or invalid
    #[error("{0}")]
    Metadata(String),

    /// Malformed or forged authorization callback
    #[error("{0}")]
    Callback(String),

    /// Code exchange against the token endpoint failed
    #[error("{0}")]
    TokenRequest(String),

    /// Token failed structural, claims or nonce validation
    #[error("Invalid token: {0}")]
    InvalidToken(#[from] JwtError),

    /// Storage key outside the fixed key set
    #[error("Invalid storage key: {0}")]
    StorageKey(String),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// HTTP transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Iframe / postMessage channel failure
    #[error("Frame error: {0}")]
    Frame(String),

    /// Silent sign-in timed out or came back without a session
    #[error("{0}")]
    SilentSignIn(String),

    /// Unknown event type name
    #[error("Unknown event type: {0}")]
    Event(String),
}

impl OidcError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a metadata error
    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }

    /// Create a callback error
    pub fn callback(msg: impl Into<String>) -> Self {
        Self::Callback(msg.into())
    }

    /// Create a token request error
    pub fn token_request(msg: impl Into<String>) -> Self {
        Self::TokenRequest(msg.into())
    }

    /// Whether the failure happened inside the token validation engine
    pub fn is_invalid_token(&self) -> bool {
        matches!(self, Self::InvalidToken(_))
    }
}

impl From<StorageError> for OidcError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidKey(key) => Self::StorageKey(key),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<crate::transport::TransportError> for OidcError {
    fn from(err: crate::transport::TransportError) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<crate::frame::FrameError> for OidcError {
    fn from(err: crate::frame::FrameError) -> Self {
        Self::Frame(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_error_maps_to_storage_key_variant() {
        let err: OidcError = StorageError::InvalidKey("bogus".to_string()).into();
        assert!(matches!(err, OidcError::StorageKey(ref k) if k == "bogus"));
    }

    #[test]
    fn test_not_set_maps_to_storage_variant() {
        let err: OidcError = StorageError::NotSet("accessToken".to_string()).into();
        assert!(matches!(err, OidcError::Storage(_)));
    }

    #[test]
    fn test_callback_message_is_verbatim() {
        let err = OidcError::callback("Missing state in callback params");
        assert_eq!(err.to_string(), "Missing state in callback params");
    }
}
