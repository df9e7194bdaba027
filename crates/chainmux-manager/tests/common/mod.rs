#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chainmux_core::testing::{MockChain, MockChainFactory, MockHealthMonitorFactory};
use chainmux_core::{Chain, ChainFactory, ResponseHandler, TransportError};
use chainmux_manager::{
    ChainSource, ConnectionManager, LightClient, ManagerConfig, MemoryPort, Notification,
    NotificationError, NotificationService, PortSender, WellKnownChain,
};
use parking_lot::Mutex;

pub const WESTEND: &str = r#"{"name":"Westend","id":"westend2","bootNodes":[]}"#;
pub const KUSAMA: &str = r#"{"name":"Kusama","id":"ksmcc3","bootNodes":[]}"#;

/// A light client handing out mock chains, keyed by chain id.
#[derive(Default)]
pub struct MockLightClient {
    factory: Arc<MockChainFactory>,
    chains: Mutex<Vec<(String, Arc<MockChain>)>>,
    relays: Mutex<Vec<ChainSource>>,
}

impl MockLightClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn create(&self, id: String, on_response: ResponseHandler) -> Result<Arc<dyn Chain>, TransportError> {
        let chain = self.factory.create_chain(on_response).await?;
        if let Some(mock) = self.factory.latest() {
            self.chains.lock().push((id, mock));
        }
        Ok(chain)
    }

    /// The latest chain started for `id`.
    pub fn chain(&self, id: &str) -> Arc<MockChain> {
        self.chains
            .lock()
            .iter()
            .rev()
            .find(|(chain_id, _)| chain_id == id)
            .map(|(_, chain)| Arc::clone(chain))
            .unwrap_or_else(|| panic!("no chain started for {id}"))
    }

    pub fn started(&self) -> usize {
        self.chains.lock().len()
    }

    pub fn relays(&self) -> Vec<ChainSource> {
        self.relays.lock().clone()
    }
}

#[async_trait]
impl LightClient for MockLightClient {
    async fn add_chain(
        &self,
        chain_spec: &str,
        relay_chain: Option<&ChainSource>,
        on_response: ResponseHandler,
    ) -> Result<Arc<dyn Chain>, TransportError> {
        let id = serde_json::from_str::<serde_json::Value>(chain_spec)
            .ok()
            .and_then(|v| v["id"].as_str().map(str::to_string))
            .unwrap_or_default();
        if let Some(relay) = relay_chain {
            self.relays.lock().push(relay.clone());
        }
        self.create(id, on_response).await
    }

    async fn add_well_known_chain(
        &self,
        chain: WellKnownChain,
        on_response: ResponseHandler,
    ) -> Result<Arc<dyn Chain>, TransportError> {
        self.create(chain.id().to_string(), on_response).await
    }
}

/// Notification service recording what it was asked to show.
pub struct RecordingNotifications {
    enabled: bool,
    pub lookups: AtomicUsize,
    pub sent: Mutex<Vec<(String, Notification)>>,
}

impl RecordingNotifications {
    pub fn new(enabled: bool) -> Arc<Self> {
        Arc::new(Self {
            enabled,
            lookups: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl NotificationService for RecordingNotifications {
    async fn enabled(&self) -> Result<bool, NotificationError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.enabled)
    }

    async fn notify(&self, id: &str, notification: Notification) -> Result<(), NotificationError> {
        self.sent.lock().push((id.to_string(), notification));
        Ok(())
    }
}

pub struct Harness {
    pub manager: ConnectionManager,
    pub light_client: Arc<MockLightClient>,
    pub monitors: Arc<MockHealthMonitorFactory>,
}

pub fn config() -> ManagerConfig {
    ManagerConfig {
        ready_timeout: Duration::from_millis(500),
        ..ManagerConfig::default()
    }
}

pub fn harness() -> Harness {
    harness_with(Arc::new(chainmux_manager::DisabledNotifications))
}

pub fn harness_with(notifications: Arc<dyn NotificationService>) -> Harness {
    let light_client = MockLightClient::new();
    let monitors = MockHealthMonitorFactory::ready();
    let manager = ConnectionManager::builder(Arc::clone(&light_client) as Arc<dyn LightClient>)
        .config(config())
        .health_monitor(monitors.factory())
        .notifications(notifications)
        .build();
    Harness {
        manager,
        light_client,
        monitors,
    }
}

/// Harness with westend and kusama already added.
pub async fn harness_with_chains() -> Harness {
    let h = harness();
    h.manager.add_chain(WESTEND, |_| {}).await.unwrap();
    h.manager.add_chain(KUSAMA, |_| {}).await.unwrap();
    h
}

pub fn port(tab_id: u64, name: &str) -> Arc<MemoryPort> {
    MemoryPort::new(
        name,
        PortSender {
            tab_id,
            url: format!("https://app.example/{tab_id}"),
        },
    )
}

pub fn connect_app(manager: &ConnectionManager, tab_id: u64, app: &str, network: &str) -> Arc<MemoryPort> {
    let port = port(tab_id, &format!("{app}::{network}"));
    manager.add_app(port.clone()).unwrap();
    port
}

pub async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
