//! The application-facing channel.
//!
//! A [`Port`] is one application's bidirectional connection to the manager,
//! named `<appName>::<networkName>`. The concrete transport is pluggable:
//! [`MemoryPort`] serves in-process applications (and tests), the
//! `chainmux-ws` crate serves WebSocket clients.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Messages an application sends to the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundPortMessage {
    /// Names the chain: a chain spec, a well-known chain, or a parachain
    /// spec with its relay chain in `payload`.
    Spec {
        payload: String,
        #[serde(
            rename = "parachainPayload",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        parachain_payload: Option<String>,
    },
    /// A JSON-RPC request as text.
    Rpc { payload: String },
}

/// Messages the manager sends to an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundPortMessage {
    Error { payload: String },
    /// A JSON-RPC response or notification as text.
    Rpc { payload: String },
}

/// Where a port was opened from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortSender {
    pub tab_id: u64,
    pub url: String,
}

pub type PortMessageHandler = Box<dyn Fn(InboundPortMessage) + Send + Sync>;
pub type PortDisconnectHandler = Box<dyn FnOnce() + Send>;

/// One application's connection to the manager.
///
/// `disconnect` closes the port from the manager side and does not fire the
/// port's own disconnect handlers; those fire only when the application
/// goes away.
pub trait Port: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn sender(&self) -> &PortSender;

    fn post_message(&self, message: OutboundPortMessage);

    fn disconnect(&self);

    /// Install the handler receiving every inbound message, in order.
    fn on_message(&self, handler: PortMessageHandler);

    /// Install a handler fired once when the application disconnects.
    fn on_disconnect(&self, handler: PortDisconnectHandler);
}

// ─── In-memory port ───────────────────────────────────────────────────────────

/// A port whose application side lives in the same process.
///
/// The application drives it with [`trigger_message`](MemoryPort::trigger_message)
/// and [`trigger_disconnect`](MemoryPort::trigger_disconnect) and reads
/// what the manager posted.
pub struct MemoryPort {
    name: String,
    sender: PortSender,
    posted: Mutex<Vec<OutboundPortMessage>>,
    posted_signal: Notify,
    message_handlers: Mutex<Vec<Arc<PortMessageHandler>>>,
    disconnect_handlers: Mutex<Vec<PortDisconnectHandler>>,
    closed: AtomicBool,
}

impl MemoryPort {
    pub fn new(name: impl Into<String>, sender: PortSender) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            sender,
            posted: Mutex::new(Vec::new()),
            posted_signal: Notify::new(),
            message_handlers: Mutex::new(Vec::new()),
            disconnect_handlers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Deliver `message` from the application.
    pub fn trigger_message(&self, message: InboundPortMessage) {
        let handlers = self.message_handlers.lock().clone();
        for handler in handlers {
            handler(message.clone());
        }
    }

    /// Disconnect from the application side.
    pub fn trigger_disconnect(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let handlers = std::mem::take(&mut *self.disconnect_handlers.lock());
        for handler in handlers {
            handler();
        }
    }

    /// Everything the manager posted so far.
    pub fn posted(&self) -> Vec<OutboundPortMessage> {
        self.posted.lock().clone()
    }

    /// Wait until at least `count` messages have been posted.
    pub async fn wait_for_posted(&self, count: usize) -> Vec<OutboundPortMessage> {
        loop {
            let notified = self.posted_signal.notified();
            {
                let posted = self.posted.lock();
                if posted.len() >= count {
                    return posted.clone();
                }
            }
            notified.await;
        }
    }

    /// Whether either side closed the port.
    pub fn is_disconnected(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Port for MemoryPort {
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
        self.posted.lock().push(message);
        self.posted_signal.notify_waiters();
    }

    fn disconnect(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.disconnect_handlers.lock().clear();
    }

    fn on_message(&self, handler: PortMessageHandler) {
        self.message_handlers.lock().push(Arc::new(handler));
    }

    fn on_disconnect(&self, handler: PortDisconnectHandler) {
        self.disconnect_handlers.lock().push(handler);
    }
}

/// Split a port name into `(app_name, network_name)`.
pub fn parse_port_name(name: &str) -> Option<(&str, &str)> {
    let (app, network) = name.split_once("::")?;
    if app.is_empty() || network.is_empty() || network.contains("::") {
        return None;
    }
    Some((app, network))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_name_shape() {
        assert_eq!(parse_port_name("test-app::westend"), Some(("test-app", "westend")));
        assert_eq!(parse_port_name("invalid"), None);
        assert_eq!(parse_port_name("::westend"), None);
        assert_eq!(parse_port_name("a::b::c"), None);
    }

    #[test]
    fn inbound_wire_shape() {
        let spec: InboundPortMessage = serde_json::from_str(
            r#"{"type":"spec","payload":"","parachainPayload":"{}"}"#,
        )
        .unwrap();
        assert_eq!(
            spec,
            InboundPortMessage::Spec {
                payload: String::new(),
                parachain_payload: Some("{}".into()),
            }
        );

        let rpc: InboundPortMessage =
            serde_json::from_str(r#"{"type":"rpc","payload":"{}"}"#).unwrap();
        assert_eq!(rpc, InboundPortMessage::Rpc { payload: "{}".into() });
    }

    #[test]
    fn outbound_wire_shape() {
        let json = serde_json::to_string(&OutboundPortMessage::Error {
            payload: "Relay chain spec was not found".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"type":"error","payload":"Relay chain spec was not found"}"#
        );
    }

    #[test]
    fn memory_port_dispatch() {
        let port = MemoryPort::new("a::b", PortSender::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        port.on_message(Box::new(move |m| sink.lock().push(m)));
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        port.on_disconnect(Box::new(move || flag.store(true, Ordering::SeqCst)));

        port.trigger_message(InboundPortMessage::Rpc { payload: "1".into() });
        port.trigger_disconnect();

        assert_eq!(seen.lock().len(), 1);
        assert!(fired.load(Ordering::SeqCst));
        assert!(port.is_disconnected());
    }

    #[test]
    fn manager_side_disconnect_is_silent() {
        let port = MemoryPort::new("a::b", PortSender::default());
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        port.on_disconnect(Box::new(move || flag.store(true, Ordering::SeqCst)));

        port.disconnect();
        port.post_message(OutboundPortMessage::Rpc { payload: "x".into() });

        assert!(!fired.load(Ordering::SeqCst));
        assert!(port.posted().is_empty());
    }
}
