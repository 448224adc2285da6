//! JSON-RPC message model: requests, responses, and notifications.
//!
//! [`Message::decode`] classifies a frame body generically by the presence
//! of `id` and `method`. It knows nothing about per-method payloads.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(crate) const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC "Method not found".
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

fn jsonrpc_version() -> Cow<'static, str> {
    Cow::Borrowed(JSONRPC_VERSION)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: Cow<'static, str>,
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: Cow<'static, str>,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: u64, error: ResponseError) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            method: method.into(),
            params,
        }
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

/// A body that could not be decoded as a [`Message`].
///
/// `id` is set when the body was JSON with an integer `id`, so the failure
/// can still be attributed to the request waiting on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    pub id: Option<u64>,
    pub reason: String,
}

impl DecodeFailure {
    fn new(id: Option<u64>, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }
}

impl Message {
    /// Serialize to a compact JSON body.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(body: &[u8]) -> Result<Self, DecodeFailure> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| DecodeFailure::new(None, format!("body is not JSON: {e}")))?;

        let id = match value.get("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(raw.as_u64().ok_or_else(|| {
                DecodeFailure::new(None, format!("unsupported request id {raw}"))
            })?),
        };
        let has_method = value.get("method").is_some_and(Value::is_string);

        match (id, has_method) {
            (Some(id), true) => serde_json::from_value(value)
                .map(Message::Request)
                .map_err(|e| DecodeFailure::new(Some(id), e.to_string())),
            (Some(id), false) => serde_json::from_value(value)
                .map(Message::Response)
                .map_err(|e| DecodeFailure::new(Some(id), e.to_string())),
            (None, true) => serde_json::from_value(value)
                .map(Message::Notification)
                .map_err(|e| DecodeFailure::new(None, e.to_string())),
            (None, false) => Err(DecodeFailure::new(None, "message has neither id nor method")),
        }
    }
}
