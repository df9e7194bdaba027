//! Transport- and provider-level error types.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors raised by the light-client chain session underneath a provider.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The light client could not create the chain.
    #[error("chain creation failed: {0}")]
    ChainCreation(String),

    /// Writing a request to the chain failed synchronously.
    #[error("chain write failed: {0}")]
    Write(String),

    /// The chain has already been removed.
    #[error("chain has been removed")]
    Removed,

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

/// Errors returned by [`Provider`](crate::provider::Provider) operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// `connect()` was called on a provider that is already ready.
    #[error("Already connected!")]
    AlreadyConnected,

    /// The provider has no chain or the chain is not ready.
    #[error("Provider is not connected")]
    NotConnected,

    /// The connection was torn down while the request was outstanding.
    #[error("Disconnected")]
    Disconnected,

    /// JSON-RPC error object returned by the chain.
    #[error("{}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// A response that is valid JSON but not a valid JSON-RPC payload.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Response or request could not be (de)serialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The method has no entry in the subscribe/unsubscribe table.
    #[error("Unsupported subscribe method: {method}")]
    UnsupportedSubscribeMethod { method: String },

    /// `unsubscribe` was called for a key that is not registered.
    #[error("Unable to find active subscription={key}")]
    UnknownSubscription { key: String },

    /// Providers model one exclusive connection and cannot be cloned.
    #[error("clone() is not supported.")]
    CloneUnsupported,

    /// The underlying chain failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ProviderError {
    /// Returns `true` if the error was caused by losing the connection
    /// rather than by the request itself.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Disconnected | Self::Transport(_)
        )
    }

    /// JSON-RPC error code used when this error is reported back to a
    /// JSON-RPC client.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::Rpc(err) => err.code,
            Self::Deserialization(_) | Self::Protocol(_) => -32700,
            Self::UnsupportedSubscribeMethod { .. } => -32601,
            Self::UnknownSubscription { .. } => -32602,
            _ => -32000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_wire_contract() {
        assert_eq!(ProviderError::AlreadyConnected.to_string(), "Already connected!");
        assert_eq!(ProviderError::NotConnected.to_string(), "Provider is not connected");
        assert_eq!(ProviderError::Disconnected.to_string(), "Disconnected");
        assert_eq!(
            ProviderError::UnsupportedSubscribeMethod { method: "bar".into() }.to_string(),
            "Unsupported subscribe method: bar"
        );
        assert_eq!(
            ProviderError::UnknownSubscription { key: "::".into() }.to_string(),
            "Unable to find active subscription=::"
        );
    }

    #[test]
    fn connection_errors() {
        assert!(ProviderError::Disconnected.is_connection_error());
        assert!(ProviderError::Transport(TransportError::Removed).is_connection_error());
        assert!(!ProviderError::CloneUnsupported.is_connection_error());
    }
}
