//! Application sessions.

use std::fmt;
use std::sync::{Arc, Weak};

use chainmux_core::{HealthMonitor, SubscriptionId};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::port::{OutboundPortMessage, Port};

/// Lifecycle of an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppState {
    /// Waiting for the `spec` message.
    Handshake,
    Connected,
    Disconnected,
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handshake => f.write_str("handshake"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// A subscription an app opened on its network's shared provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AppSubscription {
    pub event_type: String,
    pub unsubscribe_method: String,
    pub id: SubscriptionId,
}

pub(crate) struct AppInner {
    pub name: String,
    pub app_name: String,
    pub network_name: String,
    pub tab_id: u64,
    pub url: String,
    pub port: Arc<dyn Port>,
    pub state: Mutex<AppState>,
    pub health_checker: Mutex<Option<Arc<dyn HealthMonitor>>>,
    /// Chain id of the network the app is attached to.
    pub network_id: Mutex<Option<String>>,
    pub subscriptions: Mutex<Vec<AppSubscription>>,
    pub session: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to one app (`appName::networkName`) managed by a
/// [`ConnectionManager`](crate::ConnectionManager).
#[derive(Clone)]
pub struct AppHandle {
    pub(crate) inner: Arc<AppInner>,
}

impl AppHandle {
    pub(crate) fn new(
        app_name: &str,
        network_name: &str,
        port: Arc<dyn Port>,
    ) -> Self {
        let sender = port.sender().clone();
        Self {
            inner: Arc::new(AppInner {
                name: format!("{app_name}::{network_name}"),
                app_name: app_name.to_string(),
                network_name: network_name.to_string(),
                tab_id: sender.tab_id,
                url: sender.url,
                port,
                state: Mutex::new(AppState::Handshake),
                health_checker: Mutex::new(None),
                network_id: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
                session: Mutex::new(None),
            }),
        }
    }

    /// The app identity, `appName::networkName`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn app_name(&self) -> &str {
        &self.inner.app_name
    }

    pub fn network_name(&self) -> &str {
        &self.inner.network_name
    }

    pub fn tab_id(&self) -> u64 {
        self.inner.tab_id
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> AppState {
        *self.inner.state.lock()
    }

    /// Health monitor of the network, once the spec resolved.
    pub fn health_checker(&self) -> Option<Arc<dyn HealthMonitor>> {
        self.inner.health_checker.lock().clone()
    }

    /// Both handles refer to the same app.
    pub fn ptr_eq(&self, other: &AppHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<AppInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn post_rpc(&self, payload: String) {
        self.inner.port.post_message(OutboundPortMessage::Rpc { payload });
    }

    pub(crate) fn post_error(&self, payload: String) {
        self.inner.port.post_message(OutboundPortMessage::Error { payload });
    }

    pub(crate) fn track_subscription(&self, subscription: AppSubscription) {
        self.inner.subscriptions.lock().push(subscription);
    }

    /// Stop tracking `event_type::id`. Returns the entry if the app owned it.
    pub(crate) fn forget_subscription(
        &self,
        event_type: &str,
        id: &SubscriptionId,
    ) -> Option<AppSubscription> {
        let mut subscriptions = self.inner.subscriptions.lock();
        let index = subscriptions
            .iter()
            .position(|s| s.event_type == event_type && &s.id == id)?;
        Some(subscriptions.remove(index))
    }

    pub(crate) fn owns_subscription(&self, event_type: &str, id: &SubscriptionId) -> bool {
        self.inner
            .subscriptions
            .lock()
            .iter()
            .any(|s| s.event_type == event_type && &s.id == id)
    }
}

impl fmt::Debug for AppHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppHandle")
            .field("name", &self.inner.name)
            .field("tab_id", &self.inner.tab_id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{MemoryPort, PortSender};

    fn app() -> AppHandle {
        let port = MemoryPort::new(
            "test-app::westend",
            PortSender {
                tab_id: 42,
                url: "http://test.com".into(),
            },
        );
        AppHandle::new("test-app", "westend", port)
    }

    #[test]
    fn identity_from_port() {
        let app = app();
        assert_eq!(app.name(), "test-app::westend");
        assert_eq!(app.app_name(), "test-app");
        assert_eq!(app.network_name(), "westend");
        assert_eq!(app.tab_id(), 42);
        assert_eq!(app.url(), "http://test.com");
        assert_eq!(app.state(), AppState::Handshake);
        assert!(app.health_checker().is_none());
    }

    #[test]
    fn subscription_tracking() {
        let app = app();
        let id = SubscriptionId::from("tok");
        app.track_subscription(AppSubscription {
            event_type: "chain_newHead".into(),
            unsubscribe_method: "chain_unsubscribeNewHeads".into(),
            id: id.clone(),
        });

        assert!(app.owns_subscription("chain_newHead", &id));
        assert!(!app.owns_subscription("state_storage", &id));
        assert!(app.forget_subscription("chain_newHead", &id).is_some());
        assert!(app.forget_subscription("chain_newHead", &id).is_none());
    }
}
