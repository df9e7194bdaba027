//! The chain session traits: the opaque light-client transport underneath
//! every provider.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportError;

/// Callback receiving every raw JSON-RPC message produced by a chain.
pub type ResponseHandler = Arc<dyn Fn(String) + Send + Sync>;

/// One chain inside a light client: send bytes in, receive bytes through the
/// [`ResponseHandler`] given at creation.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; responses may be delivered from
/// any task, including synchronously from inside `send_json_rpc`.
pub trait Chain: Send + Sync + 'static {
    /// Queue a JSON-RPC request. Fails synchronously if the chain is dead.
    fn send_json_rpc(&self, request: &str) -> Result<(), TransportError>;

    /// Tear the chain down. No responses are delivered afterwards.
    fn remove(&self) -> Result<(), TransportError>;
}

/// Asynchronously acquires a [`Chain`].
///
/// A provider calls this once per connection; reconnecting after
/// `disconnect()` acquires a fresh chain.
#[async_trait]
pub trait ChainFactory: Send + Sync + 'static {
    /// Create the chain and install `on_response` as its response callback.
    async fn create_chain(
        &self,
        on_response: ResponseHandler,
    ) -> Result<Arc<dyn Chain>, TransportError>;

    /// Human-readable identifier of what this factory connects to.
    fn describe(&self) -> &str;
}
