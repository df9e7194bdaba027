//! In-memory chain and health monitor for tests.
//!
//! Enabled for this crate's own tests and, through the `testing` feature,
//! for downstream crates.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::TransportError;
use crate::health::{HealthCallback, HealthMonitor, HealthMonitorFactory, HealthStatus};
use crate::transport::{Chain, ChainFactory, ResponseHandler};

// ─── Chain ────────────────────────────────────────────────────────────────────

/// A chain that records what it is sent and answers only when told to.
pub struct MockChain {
    requests: Mutex<Vec<String>>,
    on_response: ResponseHandler,
    removed: AtomicBool,
    fail_writes: AtomicBool,
}

impl MockChain {
    pub fn new(on_response: ResponseHandler) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            on_response,
            removed: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Every request written so far, as wire text.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    /// Every request written so far, parsed.
    pub fn requests_json(&self) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .filter_map(|r| serde_json::from_str(r).ok())
            .collect()
    }

    /// Deliver `response` as if it came from the light client.
    ///
    /// Ignored once the chain has been removed.
    pub fn trigger(&self, response: impl Into<String>) {
        if !self.is_removed() {
            (self.on_response)(response.into());
        }
    }

    /// Deliver a successful response to request `id`.
    pub fn respond(&self, id: u64, result: Value) {
        self.trigger(serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string());
    }

    /// Make every following write fail synchronously.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }
}

impl Chain for MockChain {
    fn send_json_rpc(&self, request: &str) -> Result<(), TransportError> {
        if self.is_removed() {
            return Err(TransportError::Removed);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Write("mock write failure".into()));
        }
        self.requests.lock().push(request.to_string());
        Ok(())
    }

    fn remove(&self) -> Result<(), TransportError> {
        if self.removed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Removed);
        }
        Ok(())
    }
}

/// Hands out [`MockChain`]s and keeps them for inspection.
#[derive(Default)]
pub struct MockChainFactory {
    chains: Mutex<Vec<Arc<MockChain>>>,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl MockChainFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following `create_chain` fail.
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Sleep for `delay` inside every following `create_chain`.
    pub fn delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Number of `create_chain` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most recently created chain.
    pub fn latest(&self) -> Option<Arc<MockChain>> {
        self.chains.lock().last().cloned()
    }

    pub fn chains(&self) -> Vec<Arc<MockChain>> {
        self.chains.lock().clone()
    }
}

#[async_trait]
impl ChainFactory for MockChainFactory {
    async fn create_chain(
        &self,
        on_response: ResponseHandler,
    ) -> Result<Arc<dyn Chain>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::ChainCreation("mock chain creation failure".into()));
        }
        let chain = Arc::new(MockChain::new(on_response));
        self.chains.lock().push(Arc::clone(&chain));
        Ok(chain)
    }

    fn describe(&self) -> &str {
        "mock"
    }
}

// ─── Health ───────────────────────────────────────────────────────────────────

/// A health monitor driven by the test instead of by the chain.
pub struct MockHealthMonitor {
    chain: Mutex<Option<Arc<dyn Chain>>>,
    on_health: Mutex<Option<HealthCallback>>,
    ready_on_start: bool,
    stopped: AtomicBool,
}

impl MockHealthMonitor {
    pub fn new(ready_on_start: bool) -> Self {
        Self {
            chain: Mutex::new(None),
            on_health: Mutex::new(None),
            ready_on_start,
            stopped: AtomicBool::new(false),
        }
    }

    /// Report `health` to the provider.
    pub fn trigger(&self, health: HealthStatus) {
        let callback = self.on_health.lock().clone();
        if let Some(callback) = callback {
            callback(health);
        }
    }

    /// Report a synced chain with peers, or a syncing one.
    pub fn set_ready(&self, ready: bool) {
        self.trigger(HealthStatus {
            is_syncing: !ready,
            peers: 1,
            should_have_peers: true,
        });
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl HealthMonitor for MockHealthMonitor {
    fn set_send_json_rpc(&self, chain: Arc<dyn Chain>) {
        *self.chain.lock() = Some(chain);
    }

    fn start(&self, on_health: HealthCallback) {
        *self.on_health.lock() = Some(on_health);
        if self.ready_on_start {
            self.set_ready(true);
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        *self.on_health.lock() = None;
        *self.chain.lock() = None;
    }

    fn response_pass_through(&self, response: String) -> Option<String> {
        Some(response)
    }

    fn send_json_rpc(&self, request: &str) -> Result<(), TransportError> {
        let chain = self.chain.lock().clone();
        match chain {
            Some(chain) => chain.send_json_rpc(request),
            None => Err(TransportError::Removed),
        }
    }
}

/// Creates [`MockHealthMonitor`]s and keeps them for inspection.
#[derive(Default)]
pub struct MockHealthMonitorFactory {
    monitors: Mutex<Vec<Arc<MockHealthMonitor>>>,
    ready_on_start: bool,
}

impl MockHealthMonitorFactory {
    /// Monitors stay silent until the test reports health.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Monitors report a ready chain as soon as they start.
    pub fn ready() -> Arc<Self> {
        Arc::new(Self {
            monitors: Mutex::new(Vec::new()),
            ready_on_start: true,
        })
    }

    pub fn factory(self: &Arc<Self>) -> HealthMonitorFactory {
        let this = Arc::clone(self);
        Arc::new(move || {
            let monitor = Arc::new(MockHealthMonitor::new(this.ready_on_start));
            this.monitors.lock().push(Arc::clone(&monitor));
            monitor as Arc<dyn HealthMonitor>
        })
    }

    /// The most recently created monitor.
    pub fn latest(&self) -> Option<Arc<MockHealthMonitor>> {
        self.monitors.lock().last().cloned()
    }
}
