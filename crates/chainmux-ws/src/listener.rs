//! Accepting WebSocket ports and handing them to a manager.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chainmux_manager::{ConnectionManager, PortSender};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use crate::error::WsPortError;
use crate::port::{WsPort, WsPortConfig};

/// Accepts WebSocket clients as ports.
///
/// The request path names the port: a client connecting to
/// `ws://host/my-app::westend` opens the port `my-app::westend`. The tab id
/// is taken from a `tab` query parameter when present, otherwise every
/// connection gets a fresh one.
pub struct WsPortListener {
    listener: TcpListener,
    config: WsPortConfig,
    next_tab: AtomicU64,
}

impl WsPortListener {
    pub async fn bind(addr: impl ToSocketAddrs, config: WsPortConfig) -> Result<Self, WsPortError> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = ?listener.local_addr().ok(), "listening for websocket ports");
        Ok(Self {
            listener,
            config,
            next_tab: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, WsPortError> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for the next client and complete its handshake.
    pub async fn accept(&self) -> Result<Arc<WsPort>, WsPortError> {
        let (stream, peer) = self.listener.accept().await?;
        let tab_id = self.next_tab.fetch_add(1, Ordering::Relaxed);
        handshake(stream, peer, tab_id, &self.config).await
    }
}

/// Complete the WebSocket handshake on an accepted stream and spawn its
/// port. `fallback_tab` is used when the request carries no `tab` query.
async fn handshake(
    stream: TcpStream,
    peer: SocketAddr,
    fallback_tab: u64,
    config: &WsPortConfig,
) -> Result<Arc<WsPort>, WsPortError> {
    let mut target = None;
    let upgrade = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let uri = request.uri();
            target = Some((uri.path().to_string(), uri.query().map(str::to_string)));
            Ok(response)
        },
    );
    let socket = tokio::time::timeout(config.handshake_timeout, upgrade)
        .await
        .map_err(|_| WsPortError::HandshakeTimeout { peer })??;

    let (path, query) = target.unwrap_or_default();
    let tab_id = query.as_deref().and_then(tab_from_query).unwrap_or(fallback_tab);
    let sender = PortSender {
        tab_id,
        url: peer.to_string(),
    };
    Ok(WsPort::spawn(port_name(&path), sender, socket, config))
}

/// Accept clients forever, registering each as an app of `manager`.
///
/// Each handshake runs on its own task, so a client that never completes
/// one does not hold up the others. Failed handshakes are logged and
/// skipped; only listener errors end the loop.
pub async fn serve(listener: WsPortListener, manager: ConnectionManager) -> Result<(), WsPortError> {
    let config = Arc::new(listener.config.clone());
    loop {
        let (stream, peer) = listener.listener.accept().await?;
        let tab_id = listener.next_tab.fetch_add(1, Ordering::Relaxed);
        let config = Arc::clone(&config);
        let manager = manager.clone();
        tokio::spawn(async move {
            let port = match handshake(stream, peer, tab_id, &config).await {
                Ok(port) => port,
                Err(e) => {
                    tracing::warn!(%peer, error = %e, "websocket handshake failed");
                    return;
                }
            };
            // Rejections are reported on the port itself.
            if let Err(e) = manager.add_app(port) {
                tracing::debug!(error = %e, "port rejected");
            }
        });
    }
}

fn port_name(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

fn tab_from_query(query: &str) -> Option<u64> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "tab")
        .and_then(|(_, value)| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_name_from_path() {
        assert_eq!(port_name("/my-app::westend"), "my-app::westend");
        assert_eq!(port_name("/"), "");
    }

    #[test]
    fn tab_query_parameter() {
        assert_eq!(tab_from_query("tab=42"), Some(42));
        assert_eq!(tab_from_query("x=1&tab=7"), Some(7));
        assert_eq!(tab_from_query("tab=abc"), None);
        assert_eq!(tab_from_query("other=1"), None);
    }
}
