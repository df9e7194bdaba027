//! A [`Port`] backed by one WebSocket connection.
//!
//! Each text frame from the client is one JSON-encoded
//! [`InboundPortMessage`]; each message posted by the manager becomes one
//! text frame. Two background tasks own the socket halves: the reader
//! decodes frames and runs the message handlers, the writer drains the
//! outbound queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chainmux_manager::{
    InboundPortMessage, OutboundPortMessage, Port, PortDisconnectHandler, PortMessageHandler,
    PortSender,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Configuration for WebSocket ports.
#[derive(Debug, Clone)]
pub struct WsPortConfig {
    /// Frames queued for a client before it is considered too slow and
    /// disconnected.
    pub outbound_buffer: usize,
    /// How long a client may take to complete the WebSocket handshake.
    pub handshake_timeout: Duration,
}

impl Default for WsPortConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 1024,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

enum Outbound {
    Frame(Message),
    Close,
}

#[derive(Default)]
struct Shared {
    message_handlers: Mutex<Vec<Arc<PortMessageHandler>>>,
    disconnect_handlers: Mutex<Vec<PortDisconnectHandler>>,
    /// Messages that arrived before any handler was installed.
    backlog: Mutex<Vec<InboundPortMessage>>,
    closed: AtomicBool,
    kill: Notify,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn deliver(&self, message: InboundPortMessage) {
        let handlers = {
            let handlers = self.message_handlers.lock();
            if handlers.is_empty() {
                self.backlog.lock().push(message);
                return;
            }
            handlers.clone()
        };
        for handler in handlers {
            handler(message.clone());
        }
    }

    fn abort_writer(&self) {
        if let Some(writer) = self.writer.lock().take() {
            writer.abort();
        }
    }
}

/// One application connected over WebSocket.
pub struct WsPort {
    name: String,
    sender: PortSender,
    outbound: mpsc::Sender<Outbound>,
    shared: Arc<Shared>,
}

impl WsPort {
    /// Take over an accepted WebSocket and start its reader and writer tasks.
    pub fn spawn<S>(
        name: impl Into<String>,
        sender: PortSender,
        socket: WebSocketStream<S>,
        config: &WsPortConfig,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let name = name.into();
        let (sink, stream) = socket.split();
        let (outbound, outbound_rx) = mpsc::channel(config.outbound_buffer.max(1));
        let shared = Arc::new(Shared::default());

        let writer = tokio::spawn(write_loop(name.clone(), sink, outbound_rx));
        *shared.writer.lock() = Some(writer);
        tokio::spawn(read_loop(
            name.clone(),
            stream,
            Arc::clone(&shared),
            outbound.clone(),
        ));

        tracing::debug!(port = %name, tab = sender.tab_id, url = %sender.url, "websocket port opened");
        Arc::new(Self {
            name,
            sender,
            outbound,
            shared,
        })
    }

    pub fn is_disconnected(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Port for WsPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn sender(&self) -> &PortSender {
        &self.sender
    }

    fn post_message(&self, message: OutboundPortMessage) {
        if self.is_disconnected() {
            tracing::trace!(port = %self.name, "dropping message posted to closed port");
            return;
        }
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(port = %self.name, error = %e, "failed to encode port message");
                return;
            }
        };
        if let Err(e) = self.outbound.try_send(Outbound::Frame(Message::Text(text))) {
            tracing::warn!(port = %self.name, error = %e, "client not keeping up, closing port");
            self.shared.kill.notify_one();
        }
    }

    fn disconnect(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.disconnect_handlers.lock().clear();
        self.shared.kill.notify_one();
    }

    fn on_message(&self, handler: PortMessageHandler) {
        let handler = Arc::new(handler);
        let backlog = {
            let mut handlers = self.shared.message_handlers.lock();
            handlers.push(Arc::clone(&handler));
            std::mem::take(&mut *self.shared.backlog.lock())
        };
        for message in backlog {
            handler(message);
        }
    }

    fn on_disconnect(&self, handler: PortDisconnectHandler) {
        if self.is_disconnected() {
            return;
        }
        self.shared.disconnect_handlers.lock().push(handler);
    }
}

impl std::fmt::Debug for WsPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsPort")
            .field("name", &self.name)
            .field("sender", &self.sender)
            .field("closed", &self.is_disconnected())
            .finish()
    }
}

async fn read_loop<S>(
    name: String,
    mut stream: SplitStream<WebSocketStream<S>>,
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Outbound>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = shared.kill.notified() => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<InboundPortMessage>(&text) {
                    Ok(message) => shared.deliver(message),
                    Err(e) => tracing::warn!(port = %name, error = %e, "undecodable port message"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                // Pings are answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(port = %name, error = %e, "websocket read failed");
                    break;
                }
            }
        }
    }

    shared.closed.store(true, Ordering::SeqCst);
    if outbound.try_send(Outbound::Close).is_err() {
        shared.abort_writer();
    }
    let handlers = std::mem::take(&mut *shared.disconnect_handlers.lock());
    tracing::debug!(port = %name, notify = !handlers.is_empty(), "websocket port closed");
    for handler in handlers {
        handler();
    }
}

async fn write_loop<S>(
    name: String,
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(command) = outbound.recv().await {
        match command {
            Outbound::Frame(frame) => {
                if let Err(e) = sink.send(frame).await {
                    tracing::debug!(port = %name, error = %e, "websocket write failed");
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}
