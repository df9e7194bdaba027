//! Manager-level error types.

use chainmux_core::ProviderError;
use thiserror::Error;

/// Errors returned by [`ConnectionManager`](crate::ConnectionManager)
/// operations.
///
/// Identity and topology errors are also posted on the originating port as
/// `{type: "error", payload}` before being returned.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The port name is not `<app_name>::<chain_name>`.
    #[error("Invalid port name {name} expected <app_name>::<chain_name>")]
    InvalidPortName { name: String },

    /// An app with the same identity is already registered.
    #[error("App {identity} already exists.")]
    AppExists { identity: String },

    /// A parachain spec names a relay chain no network knows about.
    #[error("Relay chain spec was not found")]
    RelayChainNotFound,

    #[error("Cannot disconnect - already disconnected")]
    AlreadyDisconnected,

    /// The chain spec is not a JSON object with string `name` and `id`.
    #[error("Invalid chain spec: {0}")]
    InvalidChainSpec(String),

    /// Not a well-known chain id or name.
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    /// The network did not report ready within `ManagerConfig::ready_timeout`.
    #[error("Network {network} did not become ready in time")]
    ReadyTimeout { network: String },

    /// Apps run their session on the Tokio runtime they were created in.
    #[error("no tokio runtime: {0}")]
    Runtime(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Failure of the external notification collaborator.
#[derive(Debug, Clone, Error)]
#[error("notification failed: {0}")]
pub struct NotificationError(pub String);
