//! Subscription bookkeeping.
//!
//! Tracks live subscriptions by `eventType::subscriptionId` and knows, for
//! every supported subscribe method, which method cancels it and which
//! notification method its events arrive under.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;

/// A subscription token returned by a `*_subscribe*` call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubscriptionId {
    Number(u64),
    String(String),
}

impl SubscriptionId {
    /// Interpret a JSON value as a token. Only strings and unsigned
    /// integers are valid tokens.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => n.as_u64().map(Self::Number),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// One row of the subscribe/unsubscribe table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionMethod {
    pub subscribe: &'static str,
    pub unsubscribe: &'static str,
    /// Method name carried by the notifications of this subscription.
    pub notification: &'static str,
}

const fn row(
    subscribe: &'static str,
    unsubscribe: &'static str,
    notification: &'static str,
) -> SubscriptionMethod {
    SubscriptionMethod {
        subscribe,
        unsubscribe,
        notification,
    }
}

/// Subscribe methods the light client understands (legacy JSON-RPC API).
///
/// `chain_subscribeFinalisedHeads` maps to itself as observed on the node
/// side; see DESIGN.md before changing it.
pub const SUBSCRIPTION_METHODS: &[SubscriptionMethod] = &[
    row("author_submitAndWatchExtrinsic", "author_unwatchExtrinsic", "author_extrinsicUpdate"),
    row("chain_subscribeAllHeads", "chain_unsubscribeAllHeads", "chain_allHead"),
    row("chain_subscribeFinalizedHeads", "chain_unsubscribeFinalizedHeads", "chain_finalizedHead"),
    row("chain_subscribeFinalisedHeads", "chain_subscribeFinalisedHeads", "chain_finalizedHead"),
    row("chain_subscribeNewHeads", "chain_unsubscribeNewHeads", "chain_newHead"),
    row("chain_subscribeNewHead", "chain_unsubscribeNewHead", "chain_newHead"),
    row("chain_subscribeRuntimeVersion", "chain_unsubscribeRuntimeVersion", "state_runtimeVersion"),
    row("subscribe_newHead", "unsubscribe_newHead", "chain_newHead"),
    row("state_subscribeRuntimeVersion", "state_unsubscribeRuntimeVersion", "state_runtimeVersion"),
    row("state_subscribeStorage", "state_unsubscribeStorage", "state_storage"),
];

/// Look up a subscribe method.
pub fn subscription_method(subscribe: &str) -> Option<&'static SubscriptionMethod> {
    SUBSCRIPTION_METHODS.iter().find(|m| m.subscribe == subscribe)
}

/// Look up the row whose unsubscribe method is `unsubscribe`.
///
/// Rows whose unsubscribe equals their subscribe method are skipped, since
/// such a call is a subscription, not a cancellation.
pub fn unsubscription_method(unsubscribe: &str) -> Option<&'static SubscriptionMethod> {
    SUBSCRIPTION_METHODS
        .iter()
        .find(|m| m.unsubscribe == unsubscribe && m.unsubscribe != m.subscribe)
}

/// Callback receiving every notification of one subscription.
pub type SubscriptionCallback = Arc<dyn Fn(Result<Value, ProviderError>) + Send + Sync>;

/// What is needed to cancel a subscription later on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeDescriptor {
    pub unsubscribe_method: String,
    pub id: SubscriptionId,
}

struct SubscriptionEntry {
    callback: SubscriptionCallback,
    descriptor: UnsubscribeDescriptor,
}

/// Live subscriptions keyed by `eventType::subscriptionId`.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<String, SubscriptionEntry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch key of a subscription.
    pub fn key(event_type: &str, id: &SubscriptionId) -> String {
        format!("{event_type}::{id}")
    }

    /// Register a subscription, replacing any entry with the same key.
    pub fn register(
        &mut self,
        key: String,
        callback: SubscriptionCallback,
        descriptor: UnsubscribeDescriptor,
    ) {
        self.entries.insert(
            key,
            SubscriptionEntry {
                callback,
                descriptor,
            },
        );
    }

    /// The callback registered under `key`.
    pub fn callback(&self, key: &str) -> Option<SubscriptionCallback> {
        self.entries.get(key).map(|e| Arc::clone(&e.callback))
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every subscription, returning their callbacks and
    /// unsubscribe descriptors.
    pub fn drain(&mut self) -> (Vec<SubscriptionCallback>, Vec<UnsubscribeDescriptor>) {
        self.entries
            .drain()
            .map(|(_, e)| (e.callback, e.descriptor))
            .unzip()
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no active subscriptions.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn descriptor(id: &str) -> UnsubscribeDescriptor {
        UnsubscribeDescriptor {
            unsubscribe_method: "chain_unsubscribeNewHeads".into(),
            id: id.into(),
        }
    }

    #[test]
    fn register_and_dispatch() {
        let mut registry = SubscriptionRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let key = SubscriptionRegistry::key("chain_newHead", &"0xdeadbeef".into());
        registry.register(
            key.clone(),
            Arc::new(move |msg| sink.lock().push(msg.unwrap())),
            descriptor("0xdeadbeef"),
        );

        (registry.callback(&key).unwrap())(Ok(serde_json::json!({"number": "0x1"})));

        assert_eq!(seen.lock()[0]["number"], "0x1");
    }

    #[test]
    fn remove_subscription() {
        let mut registry = SubscriptionRegistry::new();
        registry.register("a::1".into(), Arc::new(|_| {}), descriptor("1"));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove("a::1"));
        assert!(!registry.remove("a::1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn drain_returns_descriptors_for_stale_cleanup() {
        let mut registry = SubscriptionRegistry::new();
        registry.register("a::1".into(), Arc::new(|_| {}), descriptor("1"));
        registry.register("b::2".into(), Arc::new(|_| {}), descriptor("2"));

        let (callbacks, descriptors) = registry.drain();
        assert_eq!(callbacks.len(), 2);
        assert_eq!(descriptors.len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn method_table_lookups() {
        let row = subscription_method("chain_subscribeNewHeads").unwrap();
        assert_eq!(row.unsubscribe, "chain_unsubscribeNewHeads");
        assert_eq!(row.notification, "chain_newHead");
        assert!(subscription_method("bar").is_none());

        let row = unsubscription_method("state_unsubscribeStorage").unwrap();
        assert_eq!(row.subscribe, "state_subscribeStorage");
        assert!(unsubscription_method("chain_subscribeFinalisedHeads").is_none());
    }

    #[test]
    fn token_from_value() {
        assert_eq!(
            SubscriptionId::from_value(&serde_json::json!(5)),
            Some(SubscriptionId::Number(5))
        );
        assert_eq!(SubscriptionId::from_value(&serde_json::json!(null)), None);
        assert_eq!(SubscriptionId::String("x".into()).to_string(), "x");
    }
}
