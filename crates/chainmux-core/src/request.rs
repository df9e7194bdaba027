//! JSON-RPC 2.0 wire types and the request coder.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ProviderError;
use crate::subscriptions::SubscriptionId;

/// JSON-RPC request ID: string, number, or null.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl RpcId {
    pub fn number(n: u64) -> Self {
        Self::Number(n)
    }

    /// The numeric id, if this is one.
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A single JSON-RPC parameter value.
pub type RpcParam = Value;

/// A JSON-RPC 2.0 request.
///
/// Field order is the wire order: `id`, `jsonrpc`, `method`, `params`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: RpcId,
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<RpcParam>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(id: u64, method: impl Into<String>, params: Vec<RpcParam>) -> Self {
        Self {
            id: RpcId::Number(id),
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Build an error from whatever the node put in the `error` field.
    ///
    /// Light clients do not always send a proper error object; plain strings
    /// are accepted too.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(message) => Self::new(-32000, message),
            Value::Object(_) => serde_json::from_value(value.clone())
                .unwrap_or_else(|_| Self::new(-32000, value.to_string())),
            other => Self::new(-32000, other.to_string()),
        }
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RpcId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Returns `true` if this is a successful response (has result, no error).
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }
}

/// A JSON-RPC 2.0 subscription notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: NotificationParams,
}

/// The `params` object of a subscription notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationParams {
    pub subscription: SubscriptionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(
        method: impl Into<String>,
        subscription: SubscriptionId,
        payload: Result<Value, Value>,
    ) -> Self {
        let (result, error) = match payload {
            Ok(result) => (Some(result), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params: NotificationParams {
                subscription,
                result,
                error,
            },
        }
    }
}

/// Any message coming back from the chain: a response or a notification.
///
/// `result` and `error` distinguish "absent" from an explicit `null`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub id: Option<RpcId>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub result: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub error: Option<Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, ProviderError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The subscription id if this message is a notification.
    pub fn subscription(&self) -> Option<SubscriptionId> {
        self.params
            .as_ref()
            .and_then(|params| params.get("subscription"))
            .and_then(SubscriptionId::from_value)
    }

    /// Dispatch key `method::subscription` for a notification.
    pub fn notification_key(&self) -> Option<String> {
        let subscription = self.subscription()?;
        Some(format!(
            "{}::{}",
            self.method.as_deref().unwrap_or_default(),
            subscription
        ))
    }

    /// Decode a request response into its result.
    pub fn into_response_result(self) -> Result<Value, ProviderError> {
        if let Some(error) = self.error {
            return Err(ProviderError::Rpc(JsonRpcError::from_value(error)));
        }
        self.result.ok_or_else(|| {
            ProviderError::Protocol("response carries neither result nor error".into())
        })
    }

    /// Decode a notification into its result.
    pub fn into_notification_result(self) -> Result<Value, ProviderError> {
        let mut params = match self.params {
            Some(Value::Object(map)) => map,
            _ => return Err(ProviderError::Protocol("notification without params".into())),
        };
        if let Some(error) = params.remove("error") {
            return Err(ProviderError::Rpc(JsonRpcError::from_value(error)));
        }
        Ok(params.remove("result").unwrap_or(Value::Null))
    }
}

/// Assigns request ids and encodes requests.
///
/// Ids start at 1 and increase monotonically for the lifetime of the coder.
#[derive(Debug)]
pub struct RequestCoder {
    next_id: AtomicU64,
}

impl RequestCoder {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Assign the next id and encode `method(params)` as wire text.
    pub fn encode(
        &self,
        method: &str,
        params: Vec<RpcParam>,
    ) -> Result<(u64, String), ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let json = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        Ok((id, json))
    }
}

impl Default for RequestCoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serialization_order() {
        let req = JsonRpcRequest::new(1, "getData", vec![json!("foo")]);
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"id":1,"jsonrpc":"2.0","method":"getData","params":["foo"]}"#
        );
    }

    #[test]
    fn coder_ids_increase() {
        let coder = RequestCoder::new();
        let (a, _) = coder.encode("a", vec![]).unwrap();
        let (b, json) = coder.encode("b", vec![]).unwrap();
        assert_eq!((a, b), (1, 2));
        assert!(json.starts_with(r#"{"id":2,"#));
    }

    #[test]
    fn response_result_null_is_present() {
        let msg = InboundMessage::parse(r#"{"jsonrpc":"2.0","id":3,"result":null}"#).unwrap();
        assert_eq!(msg.into_response_result().unwrap(), Value::Null);
    }

    #[test]
    fn response_without_result_is_protocol_error() {
        let msg = InboundMessage::parse(r#"{"jsonrpc":"2.0","id":1}"#).unwrap();
        assert!(matches!(
            msg.into_response_result(),
            Err(ProviderError::Protocol(_))
        ));
    }

    #[test]
    fn response_error_object() {
        let msg = InboundMessage::parse(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"execution reverted"}}"#,
        )
        .unwrap();
        match msg.into_response_result() {
            Err(ProviderError::Rpc(err)) => assert_eq!(err.code, -32000),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn notification_key_and_error_string() {
        let msg = InboundMessage::parse(
            r#"{"jsonrpc":"2.0","method":"foo","params":{"error":"boom","subscription":"tok"}}"#,
        )
        .unwrap();
        assert_eq!(msg.notification_key().as_deref(), Some("foo::tok"));
        match msg.into_notification_result() {
            Err(ProviderError::Rpc(err)) => assert_eq!(err.message, "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn notification_round_trips_subscription_type() {
        let n = JsonRpcNotification::new("chain_newHead", SubscriptionId::Number(7), Ok(json!(1)));
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["params"]["subscription"], json!(7));
        assert_eq!(json["params"]["result"], json!(1));
    }
}
