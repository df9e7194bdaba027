//! Chain health: the status model, the readiness state machine and the
//! health monitor that feeds it.
//!
//! Readiness is a pure function of the previous readiness and the latest
//! [`HealthStatus`]; [`readiness_transition`] only reports edges, which keeps
//! the effects (stale capture, drain, events) in the provider.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, RpcId};
use crate::transport::Chain;

/// Health as reported by the light client's `system_health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub is_syncing: bool,
    pub peers: u32,
    pub should_have_peers: bool,
}

impl HealthStatus {
    /// Synced, and either has peers or is not expected to have any.
    pub fn is_ready(&self) -> bool {
        !self.is_syncing && (self.peers > 0 || !self.should_have_peers)
    }
}

/// Returns the new readiness if `health` changes it, `None` otherwise.
pub fn readiness_transition(previous: bool, health: &HealthStatus) -> Option<bool> {
    let next = health.is_ready();
    (next != previous).then_some(next)
}

/// Callback receiving each health report.
pub type HealthCallback = Arc<dyn Fn(HealthStatus) + Send + Sync>;

/// Watches a chain's health and reports it on its own cadence.
///
/// Health checks share the chain with regular traffic, so every response
/// goes through [`response_pass_through`](HealthMonitor::response_pass_through)
/// first and every request through
/// [`send_json_rpc`](HealthMonitor::send_json_rpc).
pub trait HealthMonitor: Send + Sync + 'static {
    /// Give the monitor the chain it checks.
    fn set_send_json_rpc(&self, chain: Arc<dyn Chain>);

    /// Start reporting health to `on_health`.
    fn start(&self, on_health: HealthCallback);

    /// Stop reporting and release the chain.
    fn stop(&self);

    /// Consume the monitor's own traffic; return everything else unchanged.
    fn response_pass_through(&self, response: String) -> Option<String>;

    /// Write a request to the chain.
    fn send_json_rpc(&self, request: &str) -> Result<(), TransportError>;
}

/// Creates one monitor per connection.
pub type HealthMonitorFactory = Arc<dyn Fn() -> Arc<dyn HealthMonitor> + Send + Sync>;

// ─── System health checker ────────────────────────────────────────────────────

/// Prefix of the request ids owned by [`SystemHealthChecker`].
const HEALTH_ID_PREFIX: &str = "health-checker:";

/// Configuration for [`SystemHealthChecker`].
#[derive(Debug, Clone)]
pub struct HealthCheckerConfig {
    /// Time between two `system_health` requests.
    pub interval: Duration,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

#[derive(Default)]
struct CheckerState {
    chain: Option<Arc<dyn Chain>>,
    on_health: Option<HealthCallback>,
    task: Option<JoinHandle<()>>,
    next_id: u64,
}

/// Polls `system_health` on a fixed interval.
///
/// Its requests carry string ids (`health-checker:N`) that never collide
/// with the numeric ids of the provider's coder.
pub struct SystemHealthChecker {
    config: HealthCheckerConfig,
    state: Arc<Mutex<CheckerState>>,
}

impl SystemHealthChecker {
    pub fn new(config: HealthCheckerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(CheckerState::default())),
        }
    }

    /// A factory producing one checker per connection.
    pub fn factory(config: HealthCheckerConfig) -> HealthMonitorFactory {
        Arc::new(move || Arc::new(SystemHealthChecker::new(config.clone())) as Arc<dyn HealthMonitor>)
    }

    fn check(state: &Mutex<CheckerState>) {
        let (chain, id) = {
            let mut state = state.lock();
            let Some(chain) = state.chain.clone() else {
                return;
            };
            state.next_id += 1;
            (chain, state.next_id)
        };

        let mut request = JsonRpcRequest::new(0, "system_health", vec![]);
        request.id = RpcId::String(format!("{HEALTH_ID_PREFIX}{id}"));
        let json = match serde_json::to_string(&request) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode health check");
                return;
            }
        };
        if let Err(e) = chain.send_json_rpc(&json) {
            tracing::warn!(error = %e, "health check could not be sent");
        }
    }
}

impl HealthMonitor for SystemHealthChecker {
    fn set_send_json_rpc(&self, chain: Arc<dyn Chain>) {
        self.state.lock().chain = Some(chain);
    }

    fn start(&self, on_health: HealthCallback) {
        let state = Arc::clone(&self.state);
        let interval = self.config.interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                Self::check(&state);
            }
        });

        let mut state = self.state.lock();
        state.on_health = Some(on_health);
        if let Some(previous) = state.task.replace(task) {
            previous.abort();
        }
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.on_health = None;
        state.chain = None;
    }

    fn response_pass_through(&self, response: String) -> Option<String> {
        if !response.contains(HEALTH_ID_PREFIX) {
            return Some(response);
        }
        let Ok(value) = serde_json::from_str::<Value>(&response) else {
            return Some(response);
        };
        let owned = value
            .get("id")
            .and_then(Value::as_str)
            .is_some_and(|id| id.starts_with(HEALTH_ID_PREFIX));
        if !owned {
            return Some(response);
        }

        match value.get("result").cloned().map(serde_json::from_value::<HealthStatus>) {
            Some(Ok(health)) => {
                let callback = self.state.lock().on_health.clone();
                if let Some(callback) = callback {
                    callback(health);
                }
            }
            Some(Err(e)) => tracing::warn!(error = %e, "malformed system_health result"),
            None => tracing::debug!(response = %response, "system_health failed"),
        }
        None
    }

    fn send_json_rpc(&self, request: &str) -> Result<(), TransportError> {
        let chain = self.state.lock().chain.clone();
        match chain {
            Some(chain) => chain.send_json_rpc(request),
            None => Err(TransportError::Removed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(is_syncing: bool, peers: u32, should_have_peers: bool) -> HealthStatus {
        HealthStatus {
            is_syncing,
            peers,
            should_have_peers,
        }
    }

    #[test]
    fn readiness_rule() {
        assert!(health(false, 1, true).is_ready());
        assert!(health(false, 0, false).is_ready());
        assert!(!health(false, 0, true).is_ready());
        assert!(!health(true, 5, true).is_ready());
    }

    #[test]
    fn transitions_are_edge_triggered() {
        assert_eq!(readiness_transition(false, &health(false, 1, true)), Some(true));
        assert_eq!(readiness_transition(true, &health(false, 1, true)), None);
        assert_eq!(readiness_transition(true, &health(true, 1, true)), Some(false));
        assert_eq!(readiness_transition(false, &health(true, 1, true)), None);
    }

    #[test]
    fn health_wire_shape() {
        let h: HealthStatus =
            serde_json::from_str(r#"{"isSyncing":false,"peers":3,"shouldHavePeers":true}"#).unwrap();
        assert_eq!(h, health(false, 3, true));
    }

    #[test]
    fn pass_through_consumes_only_own_responses() {
        let checker = SystemHealthChecker::new(HealthCheckerConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        checker.state.lock().on_health = Some(Arc::new(move |h| sink.lock().push(h)));

        let other = r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#.to_string();
        assert_eq!(checker.response_pass_through(other.clone()), Some(other));

        let own = r#"{"jsonrpc":"2.0","id":"health-checker:1","result":{"isSyncing":true,"peers":0,"shouldHavePeers":true}}"#;
        assert_eq!(checker.response_pass_through(own.to_string()), None);
        assert_eq!(seen.lock().as_slice(), &[health(true, 0, true)]);
    }

    #[test]
    fn send_without_chain_fails() {
        let checker = SystemHealthChecker::new(HealthCheckerConfig::default());
        assert!(matches!(
            checker.send_json_rpc("{}"),
            Err(TransportError::Removed)
        ));
    }
}
