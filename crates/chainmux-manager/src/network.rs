//! Shared per-network connections.

use std::fmt;
use std::sync::Arc;

use chainmux_core::{ListenerHandle, Provider, ProviderEventKind};
use parking_lot::Mutex;
use serde::Serialize;

use crate::chain_spec::ChainSource;

/// Readiness of a network's connection as seen by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    Connected,
    Disconnected,
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Flattened view of a registered network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInfo {
    pub name: String,
    pub status: NetworkStatus,
    pub id: String,
}

/// One shared connection, reference counted by the apps attached to it
/// plus one pin when it was added with `add_chain`.
pub(crate) struct Network {
    pub name: String,
    pub id: String,
    pub source: ChainSource,
    pub provider: Arc<Provider>,
    pub status: Arc<Mutex<NetworkStatus>>,
    pub apps: usize,
    pub pinned: bool,
    listeners: Vec<ListenerHandle>,
}

impl Network {
    pub fn new(name: String, id: String, source: ChainSource, provider: Arc<Provider>) -> Self {
        let status = Arc::new(Mutex::new(NetworkStatus::Disconnected));
        let mut network = Self {
            name,
            id,
            source,
            provider,
            status: Arc::clone(&status),
            apps: 0,
            pinned: false,
            listeners: Vec::new(),
        };

        let watched = [
            (ProviderEventKind::Connected, NetworkStatus::Connected),
            (ProviderEventKind::Disconnected, NetworkStatus::Disconnected),
            (ProviderEventKind::Error, NetworkStatus::Disconnected),
        ];
        for (kind, next) in watched {
            let status = Arc::clone(&status);
            let handle = network.provider.on(kind, move |_| *status.lock() = next);
            network.listeners.push(handle);
        }
        network
    }

    /// Forward every status edge of `provider` to `callback`.
    ///
    /// Calls `callback` right away when the provider is already connected,
    /// so it must not run under the registry lock. Each `add_chain` of the
    /// same network adds its own watcher; all of them live until teardown.
    pub fn watch<F>(provider: &Provider, callback: F) -> Vec<ListenerHandle>
    where
        F: Fn(NetworkStatus) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        [
            (ProviderEventKind::Connected, NetworkStatus::Connected),
            (ProviderEventKind::Disconnected, NetworkStatus::Disconnected),
        ]
        .into_iter()
        .map(|(kind, status)| {
            let callback = Arc::clone(&callback);
            provider.on(kind, move |_| callback(status))
        })
        .collect()
    }

    /// Keep `listeners` until the network is torn down.
    pub fn retain_listeners(&mut self, listeners: Vec<ListenerHandle>) {
        self.listeners.extend(listeners);
    }

    pub fn status(&self) -> NetworkStatus {
        *self.status.lock()
    }

    pub fn info(&self) -> NetworkInfo {
        NetworkInfo {
            name: self.name.clone(),
            status: self.status(),
            id: self.id.clone(),
        }
    }

    /// No app is attached and it was not pinned.
    pub fn is_unused(&self) -> bool {
        self.apps == 0 && !self.pinned
    }

    pub fn matches(&self, name_or_id: &str) -> bool {
        self.id == name_or_id || self.name == name_or_id.to_lowercase()
    }

    /// Unregister every listener this network installed on its provider.
    pub fn release_listeners(&mut self) {
        for handle in self.listeners.drain(..) {
            handle.remove();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainmux_core::testing::{MockChainFactory, MockHealthMonitorFactory};
    use chainmux_core::{ChainFactory, ProviderConfig};

    #[tokio::test]
    async fn status_follows_provider() {
        let chains = MockChainFactory::new();
        let monitors = MockHealthMonitorFactory::new();
        let provider = Arc::new(Provider::new(
            "westend",
            chains as Arc<dyn ChainFactory>,
            monitors.factory(),
            ProviderConfig::default(),
        ));
        let mut network = Network::new(
            "westend".into(),
            "westend2".into(),
            ChainSource::Spec("{}".into()),
            Arc::clone(&provider),
        );
        let edges = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&edges);
        let watchers = Network::watch(&provider, move |s| sink.lock().push(s));
        network.retain_listeners(watchers);

        provider.connect().await.unwrap();
        assert_eq!(network.status(), NetworkStatus::Disconnected);
        monitors.latest().unwrap().set_ready(true);
        assert_eq!(network.status(), NetworkStatus::Connected);
        monitors.latest().unwrap().set_ready(false);

        assert_eq!(
            edges.lock().as_slice(),
            &[NetworkStatus::Connected, NetworkStatus::Disconnected]
        );
        assert_eq!(network.info().status.to_string(), "disconnected");
        assert!(network.matches("Westend"));
        assert!(network.is_unused());
    }
}
