//! chainmux-ws: WebSocket ports for the chainmux connection manager.
//!
//! Applications outside the process connect over WebSocket; each connection
//! becomes one [`Port`](chainmux_manager::Port) named by the request path.
//!
//! ```rust,no_run
//! use chainmux_manager::ConnectionManager;
//! use chainmux_ws::{serve, WsPortConfig, WsPortListener};
//!
//! # async fn example(manager: ConnectionManager) -> Result<(), chainmux_ws::WsPortError> {
//! let listener = WsPortListener::bind("127.0.0.1:9944", WsPortConfig::default()).await?;
//! serve(listener, manager).await
//! # }
//! ```

pub mod error;
pub mod listener;
pub mod port;

pub use error::WsPortError;
pub use listener::{serve, WsPortListener};
pub use port::{WsPort, WsPortConfig};
