//! JSON-RPC provider over a light-client chain.
//!
//! A [`Provider`] owns one logical connection: it acquires a [`Chain`] from
//! its [`ChainFactory`], correlates responses with requests by id, routes
//! notifications to subscriptions, and follows the chain's health.
//!
//! # Readiness
//!
//! The chain exists long before it is usable. The provider is *connected*
//! only while the last health report was ready. When readiness is lost,
//! every pending request and subscription is settled with
//! [`ProviderError::Disconnected`] and the subscriptions' unsubscribe calls
//! are queued as *stale*. When readiness returns, the stale queue is drained
//! one entry at a time before `connected` is emitted.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::error::{ProviderError, TransportError};
use crate::events::{EventEmitter, EventKind, ListenerHandle};
use crate::health::{readiness_transition, HealthMonitor, HealthMonitorFactory, HealthStatus};
use crate::request::{InboundMessage, RequestCoder, RpcParam};
use crate::subscriptions::{
    subscription_method, SubscriptionCallback, SubscriptionId, SubscriptionRegistry,
    UnsubscribeDescriptor,
};
use crate::transport::{Chain, ChainFactory, ResponseHandler};

/// Configuration for [`Provider`].
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Upper bound on each stale unsubscribe attempt after reconnecting.
    pub stale_unsubscribe_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            stale_unsubscribe_timeout: Duration::from_millis(500),
        }
    }
}

/// Kinds of [`ProviderEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderEventKind {
    Connected,
    Disconnected,
    Error,
}

/// Events emitted by a provider.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    Connected,
    Disconnected,
    Error(Arc<ProviderError>),
}

impl EventKind for ProviderEvent {
    type Kind = ProviderEventKind;

    fn kind(&self) -> ProviderEventKind {
        match self {
            Self::Connected => ProviderEventKind::Connected,
            Self::Disconnected => ProviderEventKind::Disconnected,
            Self::Error(_) => ProviderEventKind::Error,
        }
    }
}

/// A subscription whose send has been written but not yet answered.
pub type PendingSubscription = BoxFuture<'static, Result<SubscriptionId, ProviderError>>;

type Settle = oneshot::Sender<Result<Value, ProviderError>>;

struct ActiveChain {
    chain: Arc<dyn Chain>,
    monitor: Arc<dyn HealthMonitor>,
    runtime: Handle,
}

#[derive(Default)]
struct State {
    chain: Option<ActiveChain>,
    is_ready: bool,
    requests: HashMap<u64, Settle>,
    subscriptions: SubscriptionRegistry,
    stale: VecDeque<UnsubscribeDescriptor>,
    draining: bool,
}

struct Inner {
    name: String,
    factory: Arc<dyn ChainFactory>,
    health: HealthMonitorFactory,
    config: ProviderConfig,
    coder: RequestCoder,
    state: Mutex<State>,
    events: EventEmitter<ProviderEvent>,
    connect_lock: tokio::sync::Mutex<()>,
}

/// One exclusive logical JSON-RPC connection to one chain.
pub struct Provider {
    inner: Arc<Inner>,
}

impl Provider {
    pub fn new(
        name: impl Into<String>,
        factory: Arc<dyn ChainFactory>,
        health: HealthMonitorFactory,
        config: ProviderConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                factory,
                health,
                config,
                coder: RequestCoder::new(),
                state: Mutex::new(State::default()),
                events: EventEmitter::new(),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Acquire the chain and start following its health.
    ///
    /// Returns immediately if a chain already exists, even if it is not
    /// ready yet. Concurrent calls wait for the attempt in flight.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::AlreadyConnected`] if the provider is ready
    /// - [`ProviderError::Transport`] if the chain could not be created
    pub async fn connect(&self) -> Result<(), ProviderError> {
        if self.is_connected() {
            return Err(ProviderError::AlreadyConnected);
        }

        let _guard = self.inner.connect_lock.lock().await;
        if self.inner.state.lock().chain.is_some() {
            return Ok(());
        }

        let runtime = Handle::try_current()
            .map_err(|e| TransportError::Other(format!("no tokio runtime: {e}")))?;
        let monitor = (self.inner.health)();

        let on_response: ResponseHandler = {
            let weak = Arc::downgrade(&self.inner);
            let monitor = Arc::clone(&monitor);
            Arc::new(move |raw: String| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_response(monitor.as_ref(), raw);
                }
            })
        };

        debug!(provider = %self.inner.name, chain = self.inner.factory.describe(), "acquiring chain");
        let chain = match self.inner.factory.create_chain(on_response).await {
            Ok(chain) => chain,
            Err(e) => {
                warn!(provider = %self.inner.name, error = %e, "chain acquisition failed");
                self.inner
                    .events
                    .emit(&ProviderEvent::Error(Arc::new(ProviderError::Transport(e.clone()))));
                return Err(ProviderError::Transport(e));
            }
        };

        monitor.set_send_json_rpc(Arc::clone(&chain));
        {
            let mut state = self.inner.state.lock();
            state.chain = Some(ActiveChain {
                chain,
                monitor: Arc::clone(&monitor),
                runtime,
            });
            state.is_ready = false;
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        monitor.start(Arc::new(move |health| {
            if let Some(inner) = weak.upgrade() {
                inner.on_health(health);
            }
        }));

        info!(provider = %self.inner.name, "chain acquired");
        Ok(())
    }

    /// A chain exists and its last health report was ready.
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Subscriptions are always supported.
    pub fn has_subscriptions(&self) -> bool {
        true
    }

    /// The health monitor of the current chain, if any.
    pub fn health_monitor(&self) -> Option<Arc<dyn HealthMonitor>> {
        self.inner
            .state
            .lock()
            .chain
            .as_ref()
            .map(|active| Arc::clone(&active.monitor))
    }

    /// Register a handler for `kind`.
    ///
    /// Registering for [`ProviderEventKind::Connected`] on a connected
    /// provider calls the handler immediately.
    pub fn on<F>(&self, kind: ProviderEventKind, handler: F) -> ListenerHandle
    where
        F: Fn(&ProviderEvent) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        if kind == ProviderEventKind::Connected && self.is_connected() {
            handler(&ProviderEvent::Connected);
        }
        self.inner.events.on(kind, handler)
    }

    /// Resolves once the provider is connected.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Disconnected`] if the provider reports an error first.
    pub async fn ready(&self) -> Result<(), ProviderError> {
        let (tx, rx) = oneshot::channel::<Result<(), ProviderError>>();
        let tx = Arc::new(Mutex::new(Some(tx)));

        let on_error = {
            let tx = Arc::clone(&tx);
            self.inner.events.on(
                ProviderEventKind::Error,
                Arc::new(move |_: &ProviderEvent| {
                    if let Some(tx) = tx.lock().take() {
                        let _ = tx.send(Err(ProviderError::Disconnected));
                    }
                }),
            )
        };
        let on_connected = {
            let tx = Arc::clone(&tx);
            self.on(ProviderEventKind::Connected, move |_| {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(Ok(()));
                }
            })
        };

        let result = rx.await.unwrap_or(Err(ProviderError::Disconnected));
        on_connected.remove();
        on_error.remove();
        result
    }

    /// Send a request and wait for its response.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::NotConnected`] if the provider is not ready
    /// - [`ProviderError::Disconnected`] if the connection drops first
    /// - [`ProviderError::Rpc`] if the chain answers with an error
    pub async fn send(&self, method: &str, params: Vec<RpcParam>) -> Result<Value, ProviderError> {
        self.start_request(method, params)?.await
    }

    /// Write a request now and return a future for its response.
    ///
    /// The request is on the wire when this returns, so callers can keep
    /// their write order while awaiting responses concurrently.
    pub fn start_request(
        &self,
        method: &str,
        params: Vec<RpcParam>,
    ) -> Result<PendingResponse, ProviderError> {
        self.inner.start_request(method, params)
    }

    /// Subscribe and return the subscription token.
    ///
    /// `callback` receives every notification published under
    /// `event_type::token` until [`unsubscribe`](Self::unsubscribe) or
    /// disconnection.
    ///
    /// # Errors
    ///
    /// [`ProviderError::UnsupportedSubscribeMethod`] if `method` cannot be
    /// unsubscribed later, plus every error of [`send`](Self::send).
    pub async fn subscribe<F>(
        &self,
        event_type: &str,
        method: &str,
        params: Vec<RpcParam>,
        callback: F,
    ) -> Result<SubscriptionId, ProviderError>
    where
        F: Fn(Result<Value, ProviderError>) + Send + Sync + 'static,
    {
        self.start_subscribe(event_type, method, params, callback)?.await
    }

    /// Write a subscribe request now; the returned future registers the
    /// subscription once the token arrives.
    pub fn start_subscribe<F>(
        &self,
        event_type: &str,
        method: &str,
        params: Vec<RpcParam>,
        callback: F,
    ) -> Result<PendingSubscription, ProviderError>
    where
        F: Fn(Result<Value, ProviderError>) + Send + Sync + 'static,
    {
        let row = subscription_method(method).ok_or_else(|| {
            ProviderError::UnsupportedSubscribeMethod {
                method: method.to_string(),
            }
        })?;
        let pending = self.inner.start_request(method, params)?;
        let inner = Arc::clone(&self.inner);
        let event_type = event_type.to_string();

        Ok(async move {
            let result = pending.await?;
            let id = SubscriptionId::from_value(&result).ok_or_else(|| {
                ProviderError::Protocol(format!("invalid subscription id: {result}"))
            })?;
            let descriptor = UnsubscribeDescriptor {
                unsubscribe_method: row.unsubscribe.to_string(),
                id: id.clone(),
            };
            inner.register_subscription(&event_type, descriptor, Arc::new(callback))?;
            Ok(id)
        }
        .boxed())
    }

    /// Cancel a subscription and send `method` with `[id]`.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::NotConnected`] if the provider is not ready
    /// - [`ProviderError::UnknownSubscription`] if `event_type::id` is not live
    pub async fn unsubscribe(
        &self,
        event_type: &str,
        method: &str,
        id: &SubscriptionId,
    ) -> Result<Value, ProviderError> {
        self.start_unsubscribe(event_type, method, id)?.await
    }

    /// Remove the subscription and write the unsubscribe request now.
    pub fn start_unsubscribe(
        &self,
        event_type: &str,
        method: &str,
        id: &SubscriptionId,
    ) -> Result<PendingResponse, ProviderError> {
        if !self.is_connected() {
            return Err(ProviderError::NotConnected);
        }
        let key = SubscriptionRegistry::key(event_type, id);
        if !self.inner.state.lock().subscriptions.remove(&key) {
            return Err(ProviderError::UnknownSubscription { key });
        }
        self.inner.start_request(method, vec![id.to_value()])
    }

    /// Drop the chain and settle everything outstanding.
    ///
    /// Does nothing if the provider never connected. Failures to remove the
    /// chain are logged and ignored.
    pub async fn disconnect(&self) {
        let _guard = self.inner.connect_lock.lock().await;
        let active = {
            let mut state = self.inner.state.lock();
            state.is_ready = false;
            state.chain.take()
        };
        let Some(active) = active else {
            return;
        };

        self.inner.release(active);
        info!(provider = %self.inner.name, "disconnected");
        self.inner.events.emit(&ProviderEvent::Disconnected);
    }

    /// Providers cannot be cloned: each one is an exclusive connection.
    pub fn try_clone(&self) -> Result<Provider, ProviderError> {
        Err(ProviderError::CloneUnsupported)
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().requests.len()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.state.lock().subscriptions.len()
    }

    /// Number of stale subscriptions waiting to be cancelled.
    pub fn stale_count(&self) -> usize {
        self.inner.state.lock().stale.len()
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.inner.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Inner {
    fn is_connected(&self) -> bool {
        let state = self.state.lock();
        state.chain.is_some() && state.is_ready
    }

    fn start_request(
        self: &Arc<Self>,
        method: &str,
        params: Vec<RpcParam>,
    ) -> Result<PendingResponse, ProviderError> {
        let (tx, rx) = oneshot::channel();
        let (id, json, monitor) = {
            let mut state = self.state.lock();
            let monitor = match &state.chain {
                Some(active) if state.is_ready => Arc::clone(&active.monitor),
                _ => return Err(ProviderError::NotConnected),
            };
            let (id, json) = self.coder.encode(method, params)?;
            state.requests.insert(id, tx);
            (id, json, monitor)
        };

        let pending = PendingResponse {
            id,
            rx,
            inner: Arc::downgrade(self),
        };

        trace!(provider = %self.name, id, method, "request sent");
        if let Err(e) = monitor.send_json_rpc(&json) {
            self.fail_connection(e);
        }
        Ok(pending)
    }

    fn register_subscription(
        &self,
        event_type: &str,
        descriptor: UnsubscribeDescriptor,
        callback: SubscriptionCallback,
    ) -> Result<(), ProviderError> {
        let key = SubscriptionRegistry::key(event_type, &descriptor.id);
        let mut state = self.state.lock();
        match (state.chain.is_some(), state.is_ready) {
            (true, true) => {
                state.subscriptions.register(key, callback, descriptor);
                Ok(())
            }
            // Readiness was lost between the response and this point: the
            // node holds the subscription, so cancel it once ready again.
            (true, false) => {
                state.stale.push_back(descriptor);
                Err(ProviderError::Disconnected)
            }
            (false, _) => Err(ProviderError::Disconnected),
        }
    }

    fn handle_response(&self, monitor: &dyn HealthMonitor, raw: String) {
        let Some(text) = monitor.response_pass_through(raw) else {
            return;
        };
        let message = match InboundMessage::parse(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!(provider = %self.name, error = %e, "undecodable message from chain");
                return;
            }
        };

        match message.notification_key() {
            None => {
                let Some(id) = message.id.as_ref().and_then(|id| id.as_number()) else {
                    trace!(provider = %self.name, "response without numeric id");
                    return;
                };
                let settle = self.state.lock().requests.remove(&id);
                match settle {
                    Some(settle) => {
                        let _ = settle.send(message.into_response_result());
                    }
                    None => trace!(provider = %self.name, id, "response for unknown request"),
                }
            }
            Some(key) => {
                let callback = self.state.lock().subscriptions.callback(&key);
                match callback {
                    Some(callback) => callback(message.into_notification_result()),
                    None => trace!(provider = %self.name, %key, "notification for unknown subscription"),
                }
            }
        }
    }

    fn on_health(self: &Arc<Self>, health: HealthStatus) {
        let mut state = self.state.lock();
        let Some(runtime) = state.chain.as_ref().map(|active| active.runtime.clone()) else {
            return;
        };
        let Some(ready) = readiness_transition(state.is_ready, &health) else {
            return;
        };
        state.is_ready = ready;

        if !ready {
            let requests: Vec<Settle> = state.requests.drain().map(|(_, settle)| settle).collect();
            let (callbacks, descriptors) = state.subscriptions.drain();
            state.stale.extend(descriptors);
            let stale = state.stale.len();
            drop(state);

            info!(provider = %self.name, ?health, stale, "chain not ready");
            for settle in requests {
                let _ = settle.send(Err(ProviderError::Disconnected));
            }
            for callback in callbacks {
                callback(Err(ProviderError::Disconnected));
            }
            self.events.emit(&ProviderEvent::Disconnected);
            return;
        }

        // A drain still running from an earlier ready edge emits `connected`.
        if state.draining {
            return;
        }
        if state.stale.is_empty() {
            drop(state);
            info!(provider = %self.name, "chain ready");
            self.events.emit(&ProviderEvent::Connected);
            return;
        }
        state.draining = true;
        drop(state);

        let inner = Arc::clone(self);
        runtime.spawn(async move { inner.drain_stale().await });
    }

    /// Cancel stale subscriptions one at a time, then emit `connected`.
    ///
    /// Stops early, leaving the rest queued, as soon as readiness is lost.
    async fn drain_stale(self: Arc<Self>) {
        let mut cancelled = 0usize;
        loop {
            let next = {
                let mut state = self.state.lock();
                if state.chain.is_none() || !state.is_ready {
                    state.draining = false;
                    return;
                }
                match state.stale.pop_front() {
                    Some(next) => next,
                    None => {
                        state.draining = false;
                        break;
                    }
                }
            };

            let attempt = match self.start_request(&next.unsubscribe_method, vec![next.id.to_value()]) {
                Ok(attempt) => attempt,
                Err(ProviderError::NotConnected) => {
                    self.state.lock().stale.push_front(next);
                    continue;
                }
                Err(e) => {
                    debug!(provider = %self.name, error = %e, "stale unsubscribe not sent");
                    continue;
                }
            };
            if tokio::time::timeout(self.config.stale_unsubscribe_timeout, attempt)
                .await
                .is_err()
            {
                debug!(provider = %self.name, id = %next.id, "stale unsubscribe timed out");
            }
            cancelled += 1;
        }

        info!(provider = %self.name, cancelled, "chain ready");
        self.events.emit(&ProviderEvent::Connected);
    }

    /// Tear down after a synchronous write failure.
    fn fail_connection(&self, error: TransportError) {
        let active = {
            let mut state = self.state.lock();
            state.is_ready = false;
            state.chain.take()
        };
        warn!(provider = %self.name, error = %error, "chain write failed, dropping chain");
        if let Some(active) = active {
            self.release(active);
        }
        self.events
            .emit(&ProviderEvent::Error(Arc::new(ProviderError::Transport(error))));
    }

    /// Stop the monitor, settle everything outstanding, remove the chain.
    fn release(&self, active: ActiveChain) {
        active.monitor.stop();

        let (requests, callbacks) = {
            let mut state = self.state.lock();
            let requests: Vec<Settle> = state.requests.drain().map(|(_, settle)| settle).collect();
            let (callbacks, _) = state.subscriptions.drain();
            state.stale.clear();
            state.draining = false;
            (requests, callbacks)
        };
        for settle in requests {
            let _ = settle.send(Err(ProviderError::Disconnected));
        }
        for callback in callbacks {
            callback(Err(ProviderError::Disconnected));
        }

        if let Err(e) = active.chain.remove() {
            warn!(provider = %self.name, error = %e, "chain removal failed");
        }
    }
}

/// Response future of a request already written to the chain.
///
/// Dropping it removes the pending entry, so an abandoned request never
/// leaks its slot.
pub struct PendingResponse {
    id: u64,
    rx: oneshot::Receiver<Result<Value, ProviderError>>,
    inner: Weak<Inner>,
}

impl PendingResponse {
    /// The JSON-RPC id assigned to the request.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingResponse {
    type Output = Result<Value, ProviderError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(ProviderError::Disconnected)))
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.state.lock().requests.remove(&self.id);
        }
    }
}
