//! chainmux-core: a JSON-RPC provider over an in-process light client.
//!
//! # Overview
//!
//! The core crate turns an opaque light-client chain (send text in, receive
//! text through a callback) into a request/response and subscription API:
//!
//! - [`Provider`]: one exclusive logical connection to one chain
//! - [`Chain`] / [`ChainFactory`]: the transport traits underneath it
//! - [`HealthMonitor`]: readiness tracking, with [`SystemHealthChecker`]
//!   polling `system_health`
//! - [`SubscriptionRegistry`] and the subscribe/unsubscribe method table
//! - [`EventEmitter`]: synchronous per-kind observer sets
//! - [`ProviderError`] / [`TransportError`]: structured errors

pub mod error;
pub mod events;
pub mod health;
pub mod provider;
pub mod request;
pub mod subscriptions;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{ProviderError, TransportError};
pub use events::{EventEmitter, EventKind, ListenerHandle};
pub use health::{
    readiness_transition, HealthCheckerConfig, HealthMonitor, HealthMonitorFactory, HealthStatus,
    SystemHealthChecker,
};
pub use provider::{
    PendingResponse, PendingSubscription, Provider, ProviderConfig, ProviderEvent,
    ProviderEventKind,
};
pub use request::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RpcId, RpcParam};
pub use subscriptions::{
    subscription_method, unsubscription_method, SubscriptionCallback, SubscriptionId,
    SubscriptionMethod, SubscriptionRegistry, UnsubscribeDescriptor, SUBSCRIPTION_METHODS,
};
pub use transport::{Chain, ChainFactory, ResponseHandler};
