//! chainmux-manager: many app sessions over a few shared light-client
//! connections.
//!
//! # Overview
//!
//! - [`ConnectionManager`]: app registry, per-network shared [`Provider`]s,
//!   handshake buffering and request routing
//! - [`Port`]: the app-facing channel, with [`MemoryPort`] for in-process apps
//! - [`LightClient`]: the light-client engine seam
//! - [`NotificationService`]: user notifications when an app connects
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainmux_manager::{ConnectionManager, LightClient, MemoryPort, PortSender, InboundPortMessage};
//!
//! # async fn example(light_client: Arc<dyn LightClient>) -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConnectionManager::new(light_client);
//! let port = MemoryPort::new("my-app::westend", PortSender { tab_id: 1, url: "local".into() });
//! manager.add_app(port.clone())?;
//! port.trigger_message(InboundPortMessage::Spec { payload: "westend".into(), parachain_payload: None });
//! # Ok(())
//! # }
//! ```
//!
//! [`Provider`]: chainmux_core::Provider

pub mod app;
pub mod chain_spec;
pub mod diagnostics;
pub mod error;
pub mod light_client;
pub mod manager;
pub mod network;
pub mod notifications;
pub mod port;
mod session;

pub use app::{AppHandle, AppState};
pub use chain_spec::{ChainSource, ChainSpec, WellKnownChain};
pub use diagnostics::{DiagnosticEntry, DiagnosticLevel};
pub use error::{ManagerError, NotificationError};
pub use light_client::{LightClient, LightClientChainFactory};
pub use manager::{
    AppInfo, ConnectionManager, ConnectionManagerBuilder, ManagerConfig, ManagerEvent,
    ManagerEventKind, ManagerState, NetworkName,
};
pub use network::{NetworkInfo, NetworkStatus};
pub use notifications::{DisabledNotifications, Notification, NotificationService};
pub use port::{
    InboundPortMessage, MemoryPort, OutboundPortMessage, Port, PortDisconnectHandler,
    PortMessageHandler, PortSender,
};
