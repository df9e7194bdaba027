//! The light-client engine seam.

use std::sync::Arc;

use async_trait::async_trait;
use chainmux_core::{Chain, ChainFactory, ResponseHandler, TransportError};

use crate::chain_spec::{ChainSource, WellKnownChain};

/// An in-process light client able to run several chains.
#[async_trait]
pub trait LightClient: Send + Sync + 'static {
    /// Start a chain from its JSON spec. Parachains pass their relay chain.
    async fn add_chain(
        &self,
        chain_spec: &str,
        relay_chain: Option<&ChainSource>,
        on_response: ResponseHandler,
    ) -> Result<Arc<dyn Chain>, TransportError>;

    /// Start one of the chains bundled with the light client.
    async fn add_well_known_chain(
        &self,
        chain: WellKnownChain,
        on_response: ResponseHandler,
    ) -> Result<Arc<dyn Chain>, TransportError>;
}

/// Acquires one [`ChainSource`] from a [`LightClient`] for a provider.
pub struct LightClientChainFactory {
    client: Arc<dyn LightClient>,
    source: ChainSource,
    label: String,
}

impl LightClientChainFactory {
    pub fn new(client: Arc<dyn LightClient>, source: ChainSource) -> Self {
        let label = source.label();
        Self {
            client,
            source,
            label,
        }
    }
}

#[async_trait]
impl ChainFactory for LightClientChainFactory {
    async fn create_chain(
        &self,
        on_response: ResponseHandler,
    ) -> Result<Arc<dyn Chain>, TransportError> {
        match &self.source {
            ChainSource::Spec(spec) => self.client.add_chain(spec, None, on_response).await,
            ChainSource::WellKnown(chain) => {
                self.client.add_well_known_chain(*chain, on_response).await
            }
            ChainSource::Parachain { spec, relay } => {
                self.client.add_chain(spec, Some(relay.as_ref()), on_response).await
            }
        }
    }

    fn describe(&self) -> &str {
        &self.label
    }
}
