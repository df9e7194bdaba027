//! The connection manager: app registry, shared networks and routing.
//!
//! # Topology
//!
//! Each network owns one [`Provider`]. Apps attach to a network once their
//! `spec` message resolves and detach on disconnect; a network is torn down
//! when its last app detaches, unless it was pinned by
//! [`add_chain`](ConnectionManager::add_chain).

use std::sync::Arc;
use std::time::Duration;

use chainmux_core::{
    EventEmitter, EventKind, HealthCheckerConfig, HealthMonitorFactory, ListenerHandle, Provider,
    ProviderConfig, ProviderError, SystemHealthChecker,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::{AppHandle, AppState};
use crate::chain_spec::{relay_chain_of, ChainSource, ChainSpec, WellKnownChain};
use crate::diagnostics::{DiagnosticEntry, DiagnosticLevel, DiagnosticLog};
use crate::error::ManagerError;
use crate::light_client::{LightClient, LightClientChainFactory};
use crate::network::{Network, NetworkInfo, NetworkStatus};
use crate::notifications::{DisabledNotifications, Notification, NotificationService};
use crate::port::{parse_port_name, InboundPortMessage, OutboundPortMessage, Port};
use crate::session::Session;

/// Configuration for [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long `add_chain` and app handshakes wait for a network to be ready.
    pub ready_timeout: Duration,
    /// Title of the notification raised when an app connects.
    pub notification_title: String,
    /// Entries kept by the diagnostic log.
    pub diagnostic_log_capacity: usize,
    pub provider: ProviderConfig,
    pub health_check: HealthCheckerConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(30),
            notification_title: "chainmux".to_string(),
            diagnostic_log_capacity: 5,
            provider: ProviderConfig::default(),
            health_check: HealthCheckerConfig::default(),
        }
    }
}

// ─── State views ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkName {
    pub name: String,
}

/// One app name in one tab, with every network it connected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub name: String,
    pub tab_id: u64,
    pub networks: Vec<NetworkName>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ManagerState {
    pub apps: Vec<AppInfo>,
}

// ─── Events ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerEventKind {
    StateChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// An app was added or removed.
    StateChanged,
}

impl EventKind for ManagerEvent {
    type Kind = ManagerEventKind;

    fn kind(&self) -> ManagerEventKind {
        match self {
            Self::StateChanged => ManagerEventKind::StateChanged,
        }
    }
}

// ─── Manager ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Registry {
    apps: Vec<AppHandle>,
    networks: Vec<Network>,
}

impl Registry {
    fn network_index(&self, name_or_id: &str) -> Option<usize> {
        self.networks.iter().position(|n| n.matches(name_or_id))
    }
}

pub(crate) struct ManagerInner {
    config: ManagerConfig,
    light_client: Arc<dyn LightClient>,
    health: HealthMonitorFactory,
    notifications: Arc<dyn NotificationService>,
    registry: Mutex<Registry>,
    events: EventEmitter<ManagerEvent>,
    diagnostics: Mutex<DiagnosticLog>,
}

/// Builder for [`ConnectionManager`].
pub struct ConnectionManagerBuilder {
    light_client: Arc<dyn LightClient>,
    config: ManagerConfig,
    health: Option<HealthMonitorFactory>,
    notifications: Arc<dyn NotificationService>,
}

impl ConnectionManagerBuilder {
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default `system_health` poller.
    pub fn health_monitor(mut self, factory: HealthMonitorFactory) -> Self {
        self.health = Some(factory);
        self
    }

    pub fn notifications(mut self, service: Arc<dyn NotificationService>) -> Self {
        self.notifications = service;
        self
    }

    pub fn build(self) -> ConnectionManager {
        let health = self
            .health
            .unwrap_or_else(|| SystemHealthChecker::factory(self.config.health_check.clone()));
        let diagnostics = DiagnosticLog::new(self.config.diagnostic_log_capacity);
        ConnectionManager {
            inner: Arc::new(ManagerInner {
                config: self.config,
                light_client: self.light_client,
                health,
                notifications: self.notifications,
                registry: Mutex::new(Registry::default()),
                events: EventEmitter::new(),
                diagnostics: Mutex::new(diagnostics),
            }),
        }
    }
}

/// Multiplexes app sessions onto shared per-network connections.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn builder(light_client: Arc<dyn LightClient>) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            light_client,
            config: ManagerConfig::default(),
            health: None,
            notifications: Arc::new(DisabledNotifications),
        }
    }

    pub fn new(light_client: Arc<dyn LightClient>) -> Self {
        Self::builder(light_client).build()
    }

    /// Add a chain from its JSON spec, pin it, and wait until it is ready.
    ///
    /// A chain whose id is already registered is reused. `health_callback`
    /// receives every readiness edge of the network.
    pub async fn add_chain<F>(
        &self,
        chain_spec: &str,
        health_callback: F,
    ) -> Result<NetworkInfo, ManagerError>
    where
        F: Fn(NetworkStatus) + Send + Sync + 'static,
    {
        let spec = ChainSpec::parse(chain_spec)?;
        let source = ChainSource::Spec(chain_spec.to_string());
        self.inner
            .establish(spec.network_name(), spec.id, source, health_callback)
            .await
    }

    /// Add one of the light client's bundled chains. See [`add_chain`](Self::add_chain).
    pub async fn add_well_known_chain<F>(
        &self,
        chain: WellKnownChain,
        health_callback: F,
    ) -> Result<NetworkInfo, ManagerError>
    where
        F: Fn(NetworkStatus) + Send + Sync + 'static,
    {
        self.inner
            .establish(
                chain.network_name().to_string(),
                chain.id().to_string(),
                ChainSource::WellKnown(chain),
                health_callback,
            )
            .await
    }

    /// Build an app for `port` without registering it.
    ///
    /// # Errors
    ///
    /// [`ManagerError::InvalidPortName`] if the port name is not
    /// `<app_name>::<chain_name>`; the error is posted on the port and the
    /// port is disconnected.
    pub fn create_app(&self, port: Arc<dyn Port>) -> Result<AppHandle, ManagerError> {
        let (app_name, network_name) = validate_port(port.as_ref())?;
        self.inner.build_app(port, &app_name, &network_name)
    }

    /// Build and register an app for `port`, then emit `stateChanged`.
    ///
    /// # Errors
    ///
    /// As [`create_app`](Self::create_app), plus [`ManagerError::AppExists`]
    /// if the identity is already registered; the registered app is left
    /// untouched.
    pub fn add_app(&self, port: Arc<dyn Port>) -> Result<AppHandle, ManagerError> {
        let (app_name, network_name) = validate_port(port.as_ref())?;
        let identity = format!("{app_name}::{network_name}");
        if self.inner.is_registered(&identity) {
            return Err(reject(port.as_ref(), ManagerError::AppExists { identity }));
        }

        let app = self.inner.build_app(Arc::clone(&port), &app_name, &network_name)?;
        {
            let mut registry = self.inner.registry.lock();
            if registry.apps.iter().any(|a| a.name() == identity) {
                drop(registry);
                self.inner.discard(&app);
                return Err(reject(port.as_ref(), ManagerError::AppExists { identity }));
            }
            registry.apps.push(app.clone());
        }

        info!(app = %identity, tab = app.tab_id(), "app added");
        self.inner
            .record(DiagnosticLevel::Info, &identity, &network_name, "app added");
        self.inner.events.emit(&ManagerEvent::StateChanged);
        Ok(app)
    }

    /// Detach `app`, close its port and emit `stateChanged`.
    pub fn disconnect(&self, app: &AppHandle) -> Result<(), ManagerError> {
        self.inner.detach(app, true)
    }

    /// Disconnect every app opened from `tab_id`.
    pub fn disconnect_tab(&self, tab_id: u64) {
        let apps: Vec<AppHandle> = self
            .inner
            .registry
            .lock()
            .apps
            .iter()
            .filter(|a| a.tab_id() == tab_id)
            .cloned()
            .collect();
        for app in apps {
            let _ = self.inner.detach(&app, true);
        }
    }

    /// Disconnect every registered app.
    pub fn disconnect_all(&self) {
        let apps = self.inner.registry.lock().apps.clone();
        for app in apps {
            let _ = self.inner.detach(&app, true);
        }
    }

    /// Disconnect every app and tear down every network. Idempotent.
    pub async fn shutdown(&self) {
        self.disconnect_all();
        let networks = std::mem::take(&mut self.inner.registry.lock().networks);
        for mut network in networks {
            network.release_listeners();
            network.provider.disconnect().await;
            debug!(network = %network.name, "network torn down");
        }
    }

    /// Apps grouped by app name and tab, in insertion order.
    pub fn state(&self) -> ManagerState {
        let registry = self.inner.registry.lock();
        let mut state = ManagerState::default();
        for app in &registry.apps {
            let network = NetworkName {
                name: app.network_name().to_string(),
            };
            match state
                .apps
                .iter_mut()
                .find(|a| a.name == app.app_name() && a.tab_id == app.tab_id())
            {
                Some(entry) => {
                    if !entry.networks.contains(&network) {
                        entry.networks.push(network);
                    }
                }
                None => state.apps.push(AppInfo {
                    name: app.app_name().to_string(),
                    tab_id: app.tab_id(),
                    networks: vec![network],
                }),
            }
        }
        state
    }

    /// Call `handler` every time an app is added or removed.
    pub fn on_state_changed<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .events
            .on(ManagerEventKind::StateChanged, Arc::new(move |_| handler()))
    }

    /// Identities of the registered apps.
    pub fn registered_apps(&self) -> Vec<String> {
        self.inner
            .registry
            .lock()
            .apps
            .iter()
            .map(|a| a.name().to_string())
            .collect()
    }

    pub fn registered_networks(&self) -> Vec<NetworkInfo> {
        self.inner
            .registry
            .lock()
            .networks
            .iter()
            .map(Network::info)
            .collect()
    }

    pub fn apps(&self) -> Vec<AppHandle> {
        self.inner.registry.lock().apps.clone()
    }

    /// The most recent manager events, oldest first.
    pub fn diagnostics(&self) -> Vec<DiagnosticEntry> {
        self.inner.diagnostics.lock().entries()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.registry.lock();
        f.debug_struct("ConnectionManager")
            .field("apps", &registry.apps.len())
            .field("networks", &registry.networks.len())
            .finish()
    }
}

/// Post `error` on the port, close it, and hand the error back.
fn reject(port: &dyn Port, error: ManagerError) -> ManagerError {
    warn!(port = %port.name(), error = %error, "rejecting port");
    port.post_message(OutboundPortMessage::Error {
        payload: error.to_string(),
    });
    port.disconnect();
    error
}

fn validate_port(port: &dyn Port) -> Result<(String, String), ManagerError> {
    match parse_port_name(port.name()) {
        Some((app, network)) => Ok((app.to_string(), network.to_string())),
        None => Err(reject(
            port,
            ManagerError::InvalidPortName {
                name: port.name().to_string(),
            },
        )),
    }
}

impl ManagerInner {
    fn record(&self, level: DiagnosticLevel, app: &str, network: &str, message: &str) {
        self.diagnostics.lock().record(level, app, network, message);
    }

    fn is_registered(&self, identity: &str) -> bool {
        self.registry.lock().apps.iter().any(|a| a.name() == identity)
    }

    fn new_network(&self, name: String, id: String, source: ChainSource) -> Network {
        let factory = LightClientChainFactory::new(Arc::clone(&self.light_client), source.clone());
        let provider = Provider::new(
            name.clone(),
            Arc::new(factory),
            Arc::clone(&self.health),
            self.config.provider.clone(),
        );
        info!(network = %name, id = %id, source = %source.label(), "network created");
        Network::new(name, id, source, Arc::new(provider))
    }

    async fn establish<F>(
        &self,
        name: String,
        id: String,
        source: ChainSource,
        health_callback: F,
    ) -> Result<NetworkInfo, ManagerError>
    where
        F: Fn(NetworkStatus) + Send + Sync + 'static,
    {
        let (provider, was_pinned) = {
            let mut registry = self.registry.lock();
            let index = match registry.networks.iter().position(|n| n.id == id) {
                Some(index) => index,
                None => {
                    let network = self.new_network(name.clone(), id.clone(), source);
                    registry.networks.push(network);
                    registry.networks.len() - 1
                }
            };
            let network = &mut registry.networks[index];
            let was_pinned = std::mem::replace(&mut network.pinned, true);
            (Arc::clone(&network.provider), was_pinned)
        };
        let watchers = Network::watch(&provider, health_callback);

        if let Err(e) = self.connect_network(&provider, &name).await {
            warn!(network = %name, error = %e, "network failed to start");
            self.record(DiagnosticLevel::Error, "", &name, &e.to_string());
            for handle in watchers {
                handle.remove();
            }
            let removed = {
                let mut registry = self.registry.lock();
                match registry.networks.iter().position(|n| n.id == id) {
                    Some(index) => {
                        let network = &mut registry.networks[index];
                        network.pinned = was_pinned;
                        if network.is_unused() {
                            Some(registry.networks.remove(index))
                        } else {
                            None
                        }
                    }
                    None => None,
                }
            };
            if let Some(mut network) = removed {
                network.release_listeners();
                network.provider.disconnect().await;
            }
            return Err(e);
        }

        self.record(DiagnosticLevel::Info, "", &name, "network ready");
        let mut registry = self.registry.lock();
        match registry.networks.iter_mut().find(|n| n.id == id) {
            Some(network) => {
                network.retain_listeners(watchers);
                Ok(network.info())
            }
            None => {
                drop(registry);
                for handle in watchers {
                    handle.remove();
                }
                Ok(NetworkInfo {
                    name,
                    status: NetworkStatus::Connected,
                    id,
                })
            }
        }
    }

    /// Connect the provider if needed, then wait for it to be ready.
    async fn connect_network(&self, provider: &Provider, name: &str) -> Result<(), ManagerError> {
        match provider.connect().await {
            Ok(()) | Err(ProviderError::AlreadyConnected) => {}
            Err(e) => return Err(e.into()),
        }
        match tokio::time::timeout(self.config.ready_timeout, provider.ready()).await {
            Ok(result) => result.map_err(ManagerError::from),
            Err(_) => Err(ManagerError::ReadyTimeout {
                network: name.to_string(),
            }),
        }
    }

    pub(crate) fn build_app(
        self: &Arc<Self>,
        port: Arc<dyn Port>,
        app_name: &str,
        network_name: &str,
    ) -> Result<AppHandle, ManagerError> {
        let runtime = Handle::try_current().map_err(|e| ManagerError::Runtime(e.to_string()))?;
        let app = AppHandle::new(app_name, network_name, Arc::clone(&port));
        let (tx, rx) = mpsc::unbounded_channel();

        port.on_message(Box::new(move |message: InboundPortMessage| {
            let _ = tx.send(message);
        }));
        let manager = Arc::downgrade(self);
        let weak_app = app.downgrade();
        port.on_disconnect(Box::new(move || {
            let (Some(manager), Some(inner)) = (manager.upgrade(), weak_app.upgrade()) else {
                return;
            };
            let app = AppHandle { inner };
            debug!(app = %app.name(), "port closed by app");
            let _ = manager.detach(&app, false);
        }));

        let session = Session::new(app.clone(), Arc::downgrade(self));
        let task = runtime.spawn(session.run(rx));
        *app.inner.session.lock() = Some(task);
        Ok(app)
    }

    /// Stop an app that was never registered.
    fn discard(&self, app: &AppHandle) {
        *app.inner.state.lock() = AppState::Disconnected;
        if let Some(task) = app.inner.session.lock().take() {
            task.abort();
        }
    }

    /// Resolve the app's spec, attach it to its network and wait for the
    /// network to be usable.
    pub(crate) async fn attach(
        &self,
        app: &AppHandle,
        payload: &str,
        parachain_payload: Option<&str>,
    ) -> Result<Arc<Provider>, ManagerError> {
        let (provider, network) = self.resolve(app, payload, parachain_payload)?;

        match provider.connect().await {
            Ok(()) | Err(ProviderError::AlreadyConnected) => {}
            Err(e) => return Err(e.into()),
        }
        if tokio::time::timeout(self.config.ready_timeout, provider.ready())
            .await
            .is_err()
        {
            warn!(app = %app.name(), %network, "network not ready yet, attaching anyway");
        }

        *app.inner.health_checker.lock() = provider.health_monitor();
        {
            let mut state = app.inner.state.lock();
            if *state == AppState::Handshake {
                *state = AppState::Connected;
            }
        }
        info!(app = %app.name(), %network, "app connected");
        self.record(DiagnosticLevel::Info, app.name(), &network, "app connected");
        self.notify_connected(app);
        Ok(provider)
    }

    /// Find or create the network for the app's spec and take a reference
    /// on it.
    fn resolve(
        &self,
        app: &AppHandle,
        payload: &str,
        parachain_payload: Option<&str>,
    ) -> Result<(Arc<Provider>, String), ManagerError> {
        let mut registry = self.registry.lock();
        // `detach` holds the registry lock while it releases the app's
        // network, so a detached app must not take a new reference.
        if app.state() == AppState::Disconnected {
            return Err(ManagerError::AlreadyDisconnected);
        }

        let (index, network) = if let Some(parachain) = parachain_payload {
            let relay_name = relay_chain_of(parachain)?;
            let relay = registry
                .network_index(&relay_name)
                .map(|i| registry.networks[i].source.clone())
                .ok_or(ManagerError::RelayChainNotFound)?;
            let spec = ChainSpec::parse(parachain)?;
            let source = ChainSource::Parachain {
                spec: parachain.to_string(),
                relay: Box::new(relay),
            };
            self.network_for(&mut registry, spec.network_name(), spec.id, source)
        } else if let Some(index) = registry.network_index(app.network_name()) {
            (index, registry.networks[index].name.clone())
        } else if let Ok(chain) = payload.parse::<WellKnownChain>() {
            self.network_for(
                &mut registry,
                chain.network_name().to_string(),
                chain.id().to_string(),
                ChainSource::WellKnown(chain),
            )
        } else {
            let spec = ChainSpec::parse(payload)?;
            let source = ChainSource::Spec(payload.to_string());
            self.network_for(&mut registry, spec.network_name(), spec.id, source)
        };

        let entry = &mut registry.networks[index];
        entry.apps += 1;
        *app.inner.network_id.lock() = Some(entry.id.clone());
        debug!(app = %app.name(), network = %entry.name, apps = entry.apps, "app attached");
        Ok((Arc::clone(&entry.provider), network))
    }

    fn network_for(
        &self,
        registry: &mut Registry,
        name: String,
        id: String,
        source: ChainSource,
    ) -> (usize, String) {
        if let Some(index) = registry.networks.iter().position(|n| n.id == id) {
            return (index, registry.networks[index].name.clone());
        }
        registry.networks.push(self.new_network(name.clone(), id, source));
        (registry.networks.len() - 1, name)
    }

    fn notify_connected(&self, app: &AppHandle) {
        let service = Arc::clone(&self.notifications);
        let id = app.name().to_string();
        let notification = Notification::app_connected(
            &self.config.notification_title,
            app.app_name(),
            app.network_name(),
        );
        tokio::spawn(async move {
            match service.enabled().await {
                Ok(true) => {
                    if let Err(e) = service.notify(&id, notification).await {
                        warn!(app = %id, error = %e, "notification failed");
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(app = %id, error = %e, "notification preference lookup failed"),
            }
        });
    }

    /// Report a handshake failure on the app's port and drop the app.
    pub(crate) fn fail_app(&self, app: &AppHandle, error: &ManagerError) {
        warn!(app = %app.name(), error = %error, "handshake failed");
        self.record(
            DiagnosticLevel::Error,
            app.name(),
            app.network_name(),
            &error.to_string(),
        );
        app.post_error(error.to_string());
        let _ = self.detach(app, true);
    }

    /// Deregister the app, cancel its subscriptions and release its
    /// network reference.
    fn detach(&self, app: &AppHandle, close_port: bool) -> Result<(), ManagerError> {
        let (provider, teardown) = {
            let mut registry = self.registry.lock();
            {
                let mut state = app.inner.state.lock();
                if *state == AppState::Disconnected {
                    return Err(ManagerError::AlreadyDisconnected);
                }
                *state = AppState::Disconnected;
            }
            registry.apps.retain(|a| !a.ptr_eq(app));

            let network_id = app.inner.network_id.lock().take();
            match network_id.and_then(|id| registry.networks.iter().position(|n| n.id == id)) {
                Some(index) => {
                    let network = &mut registry.networks[index];
                    network.apps = network.apps.saturating_sub(1);
                    let provider = Arc::clone(&network.provider);
                    let teardown = if network.is_unused() {
                        Some(registry.networks.remove(index))
                    } else {
                        None
                    };
                    (Some(provider), teardown)
                }
                None => (None, None),
            }
        };

        if let Some(task) = app.inner.session.lock().take() {
            task.abort();
        }
        if close_port {
            app.inner.port.disconnect();
        }

        let subscriptions = std::mem::take(&mut *app.inner.subscriptions.lock());
        if let Some(provider) = &provider {
            for subscription in subscriptions {
                // The response is not awaited; dropping it frees the slot.
                let _ = provider.start_unsubscribe(
                    &subscription.event_type,
                    &subscription.unsubscribe_method,
                    &subscription.id,
                );
            }
        }

        if let Some(mut network) = teardown {
            network.release_listeners();
            info!(network = %network.name, "last app detached, tearing down network");
            match Handle::try_current() {
                Ok(runtime) => {
                    let provider = Arc::clone(&network.provider);
                    runtime.spawn(async move { provider.disconnect().await });
                }
                Err(e) => warn!(network = %network.name, error = %e, "no runtime to tear down network"),
            }
        }

        info!(app = %app.name(), "app disconnected");
        self.record(
            DiagnosticLevel::Info,
            app.name(),
            app.network_name(),
            "app disconnected",
        );
        self.events.emit(&ManagerEvent::StateChanged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{MemoryPort, PortSender};
    use async_trait::async_trait;
    use chainmux_core::testing::{MockChainFactory, MockHealthMonitorFactory};
    use chainmux_core::{Chain, ChainFactory, ResponseHandler, TransportError};

    struct MockChains(Arc<MockChainFactory>);

    #[async_trait]
    impl LightClient for MockChains {
        async fn add_chain(
            &self,
            _chain_spec: &str,
            _relay_chain: Option<&ChainSource>,
            on_response: ResponseHandler,
        ) -> Result<Arc<dyn Chain>, TransportError> {
            self.0.create_chain(on_response).await
        }

        async fn add_well_known_chain(
            &self,
            _chain: WellKnownChain,
            on_response: ResponseHandler,
        ) -> Result<Arc<dyn Chain>, TransportError> {
            self.0.create_chain(on_response).await
        }
    }

    fn manager() -> ConnectionManager {
        ConnectionManager::builder(Arc::new(MockChains(MockChainFactory::new())))
            .health_monitor(MockHealthMonitorFactory::ready().factory())
            .build()
    }

    #[tokio::test]
    async fn detached_app_takes_no_network_reference() {
        let manager = manager();
        let port = MemoryPort::new(
            "test-app::westend",
            PortSender {
                tab_id: 1,
                url: "local".into(),
            },
        );
        let app = manager.add_app(port).unwrap();
        manager.disconnect(&app).unwrap();

        // A handshake still in flight when the app was detached.
        let err = manager.inner.attach(&app, "westend", None).await.unwrap_err();

        assert!(matches!(err, ManagerError::AlreadyDisconnected));
        assert!(manager.registered_networks().is_empty());
        assert!(app.inner.network_id.lock().is_none());
    }

    #[tokio::test]
    async fn detach_releases_the_reference_taken_by_attach() {
        let manager = manager();
        let port = MemoryPort::new(
            "test-app::westend",
            PortSender {
                tab_id: 1,
                url: "local".into(),
            },
        );
        let app = manager.add_app(port).unwrap();
        manager.inner.attach(&app, "westend", None).await.unwrap();
        assert_eq!(manager.registered_networks().len(), 1);

        manager.disconnect(&app).unwrap();
        assert!(manager.registered_networks().is_empty());
    }
}
