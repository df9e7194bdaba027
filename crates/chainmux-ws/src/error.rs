use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors accepting WebSocket ports.
#[derive(Debug, Error)]
pub enum WsPortError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The client connected but the WebSocket handshake failed.
    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),

    #[error("websocket handshake with {peer} timed out")]
    HandshakeTimeout { peer: std::net::SocketAddr },
}
