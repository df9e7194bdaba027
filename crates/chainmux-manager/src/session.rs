//! The per-app session task.
//!
//! Every app has one task consuming its port messages in arrival order.
//! RPC messages arriving before `spec` are buffered and flushed in order once
//! the app is attached to its network. Requests are written to the shared
//! provider in arrival order; their responses are awaited concurrently and
//! posted back as they complete.

use std::sync::{Arc, OnceLock, Weak};

use chainmux_core::{
    subscription_method, unsubscription_method, JsonRpcError, JsonRpcNotification,
    JsonRpcResponse, Provider, ProviderError, RpcId, SubscriptionId, SubscriptionRegistry,
};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, trace, warn};

use crate::app::{AppHandle, AppInner, AppSubscription};
use crate::error::ManagerError;
use crate::manager::ManagerInner;
use crate::port::InboundPortMessage;

/// A JSON-RPC request as sent by an app. Every field is optional so that
/// malformed requests can still be answered with the right id.
#[derive(Debug, Deserialize)]
struct AppRequest {
    #[serde(default)]
    id: Option<RpcId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

pub(crate) struct Session {
    app: AppHandle,
    manager: Weak<ManagerInner>,
    buffer: Vec<String>,
    provider: Option<Arc<Provider>>,
    inflight: FuturesUnordered<BoxFuture<'static, Option<String>>>,
}

impl Session {
    pub fn new(app: AppHandle, manager: Weak<ManagerInner>) -> Self {
        Self {
            app,
            manager,
            buffer: Vec::new(),
            provider: None,
            inflight: FuturesUnordered::new(),
        }
    }

    pub async fn run(mut self, mut inbox: UnboundedReceiver<InboundPortMessage>) {
        loop {
            tokio::select! {
                Some(reply) = self.inflight.next(), if !self.inflight.is_empty() => {
                    if let Some(reply) = reply {
                        self.app.post_rpc(reply);
                    }
                }
                message = inbox.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    if !self.handle(message).await {
                        break;
                    }
                }
            }
        }
        trace!(app = %self.app.name(), "session ended");
    }

    /// Returns `false` once the session is over.
    async fn handle(&mut self, message: InboundPortMessage) -> bool {
        match message {
            InboundPortMessage::Rpc { payload } => {
                match self.provider.clone() {
                    Some(provider) => self.route(&provider, &payload),
                    None => self.buffer.push(payload),
                }
                true
            }
            InboundPortMessage::Spec {
                payload,
                parachain_payload,
            } => {
                if self.provider.is_some() {
                    debug!(app = %self.app.name(), "ignoring repeated spec");
                    return true;
                }
                let Some(manager) = self.manager.upgrade() else {
                    return false;
                };
                match manager
                    .attach(&self.app, &payload, parachain_payload.as_deref())
                    .await
                {
                    Ok(provider) => {
                        for payload in std::mem::take(&mut self.buffer) {
                            self.route(&provider, &payload);
                        }
                        self.provider = Some(provider);
                        true
                    }
                    Err(ManagerError::AlreadyDisconnected) => false,
                    Err(e) => {
                        manager.fail_app(&self.app, &e);
                        false
                    }
                }
            }
        }
    }

    fn route(&mut self, provider: &Arc<Provider>, payload: &str) {
        match route_request(&self.app, provider, payload) {
            Routed::Reply(reply) => {
                if let Some(reply) = reply {
                    self.app.post_rpc(reply);
                }
            }
            Routed::Pending(pending) => self.inflight.push(pending),
        }
    }
}

enum Routed {
    Reply(Option<String>),
    Pending(BoxFuture<'static, Option<String>>),
}

/// Write one app request to the provider.
fn route_request(app: &AppHandle, provider: &Provider, payload: &str) -> Routed {
    let request: AppRequest = match serde_json::from_str(payload) {
        Ok(request) => request,
        Err(e) => {
            debug!(app = %app.name(), error = %e, "undecodable request");
            return Routed::Reply(failure(RpcId::Null, -32700, "Parse error"));
        }
    };
    let id = request.id.unwrap_or(RpcId::Null);
    let Some(method) = request.method else {
        return Routed::Reply(failure(id, -32600, "Invalid request"));
    };
    let params = match request.params {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(params)) => params,
        Some(_) => return Routed::Reply(failure(id, -32602, "Invalid params")),
    };
    trace!(app = %app.name(), %id, %method, "routing request");

    if let Some(row) = subscription_method(&method) {
        return subscribe(app, provider, id, &method, row.notification, row.unsubscribe, params);
    }
    if let Some(row) = unsubscription_method(&method) {
        return unsubscribe(app, provider, id, &method, row.notification, params);
    }

    match provider.start_request(&method, params) {
        Ok(pending) => Routed::Pending(
            async move {
                match pending.await {
                    Ok(result) => success(id, result),
                    Err(e) => provider_failure(id, e),
                }
            }
            .boxed(),
        ),
        Err(e) => Routed::Reply(provider_failure(id, e)),
    }
}

fn subscribe(
    app: &AppHandle,
    provider: &Provider,
    id: RpcId,
    method: &str,
    notification: &'static str,
    unsubscribe_method: &'static str,
    params: Vec<Value>,
) -> Routed {
    // Notifications carry the token, which is known once the subscribe
    // response arrived.
    let token: Arc<OnceLock<SubscriptionId>> = Arc::new(OnceLock::new());
    let callback = {
        let token = Arc::clone(&token);
        let weak = app.downgrade();
        move |result: Result<Value, ProviderError>| forward(&weak, notification, &token, result)
    };

    let pending = match provider.start_subscribe(notification, method, params, callback) {
        Ok(pending) => pending,
        Err(e) => return Routed::Reply(provider_failure(id, e)),
    };
    let app = app.clone();
    Routed::Pending(
        async move {
            match pending.await {
                Ok(subscription) => {
                    let _ = token.set(subscription.clone());
                    app.track_subscription(AppSubscription {
                        event_type: notification.to_string(),
                        unsubscribe_method: unsubscribe_method.to_string(),
                        id: subscription.clone(),
                    });
                    success(id, subscription.to_value())
                }
                Err(e) => provider_failure(id, e),
            }
        }
        .boxed(),
    )
}

fn unsubscribe(
    app: &AppHandle,
    provider: &Provider,
    id: RpcId,
    method: &str,
    notification: &'static str,
    params: Vec<Value>,
) -> Routed {
    let Some(subscription) = params.first().and_then(SubscriptionId::from_value) else {
        return Routed::Reply(failure(id, -32602, "Invalid params"));
    };
    // Apps share the provider; only the owner may cancel a subscription.
    if !app.owns_subscription(notification, &subscription) {
        let e = ProviderError::UnknownSubscription {
            key: SubscriptionRegistry::key(notification, &subscription),
        };
        return Routed::Reply(provider_failure(id, e));
    }

    match provider.start_unsubscribe(notification, method, &subscription) {
        Ok(pending) => {
            app.forget_subscription(notification, &subscription);
            Routed::Pending(
                async move {
                    match pending.await {
                        Ok(result) => success(id, result),
                        Err(e) => provider_failure(id, e),
                    }
                }
                .boxed(),
            )
        }
        Err(e) => Routed::Reply(provider_failure(id, e)),
    }
}

/// Post one notification to the app owning the subscription.
fn forward(
    app: &Weak<AppInner>,
    notification: &str,
    token: &OnceLock<SubscriptionId>,
    result: Result<Value, ProviderError>,
) {
    let Some(inner) = app.upgrade() else {
        return;
    };
    let app = AppHandle { inner };
    let Some(subscription) = token.get() else {
        trace!(app = %app.name(), notification, "notification before subscription settled");
        return;
    };

    let payload = match result {
        Ok(value) => Ok(value),
        Err(ProviderError::Disconnected) => {
            app.forget_subscription(notification, subscription);
            Err(error_object(ProviderError::Disconnected.rpc_code(), "Disconnected"))
        }
        Err(ProviderError::Rpc(e)) => Err(error_object(e.code, &e.message)),
        Err(e) => Err(error_object(e.rpc_code(), &e.to_string())),
    };
    let message = JsonRpcNotification::new(notification, subscription.clone(), payload);
    match serde_json::to_string(&message) {
        Ok(text) => app.post_rpc(text),
        Err(e) => warn!(app = %app.name(), error = %e, "failed to encode notification"),
    }
}

fn error_object(code: i64, message: &str) -> Value {
    json!({ "code": code, "message": message })
}

fn success(id: RpcId, result: Value) -> Option<String> {
    encode(&JsonRpcResponse::success(id, result))
}

fn failure(id: RpcId, code: i64, message: &str) -> Option<String> {
    encode(&JsonRpcResponse::failure(id, JsonRpcError::new(code, message)))
}

fn provider_failure(id: RpcId, error: ProviderError) -> Option<String> {
    let error = match error {
        ProviderError::Rpc(e) => e,
        other => JsonRpcError::new(other.rpc_code(), other.to_string()),
    };
    encode(&JsonRpcResponse::failure(id, error))
}

fn encode(response: &JsonRpcResponse) -> Option<String> {
    match serde_json::to_string(response) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(error = %e, "failed to encode response");
            None
        }
    }
}
