//! JSON-RPC 2.0 message codec
//!
//! Message shapes exchanged with a backend and the `encode`/`decode` pair
//! that maps them to and from framed message bodies.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::lsp::error::SessionError;
use crate::lsp::jsonrpc_utils::JSONRPC_VERSION;

// ============================================================================
// JSON-RPC Types
// ============================================================================

/// JSON-RPC 2.0 request message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier
    pub id: Value,

    /// Method name
    pub method: String,

    /// Optional parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier (matches the request)
    pub id: Value,

    /// Result (present if successful, may be JSON null)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error (present if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

/// JSON-RPC 2.0 notification message (no response expected)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Method name
    pub method: String,

    /// Optional parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    /// Error code
    pub code: i32,

    /// Error message
    pub message: String,

    /// Optional additional data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

impl JsonRpcResponse {
    /// Convert into the outcome seen by the caller of the correlated request
    pub fn into_result(self) -> Result<Value, SessionError> {
        match (self.error, self.result) {
            (Some(error), _) => Err(SessionError::Server {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Any message that can travel in either direction
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl Message {
    /// Method name for requests and notifications
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(request) => Some(&request.method),
            Message::Notification(notification) => Some(&notification.method),
            Message::Response(_) => None,
        }
    }
}

impl From<JsonRpcRequest> for Message {
    fn from(request: JsonRpcRequest) -> Self {
        Message::Request(request)
    }
}

impl From<JsonRpcResponse> for Message {
    fn from(response: JsonRpcResponse) -> Self {
        Message::Response(response)
    }
}

impl From<JsonRpcNotification> for Message {
    fn from(notification: JsonRpcNotification) -> Self {
        Message::Notification(notification)
    }
}

/// Serialize a message into a message body (framing is added by the transport layer)
pub fn encode(message: &Message) -> Result<Vec<u8>, SessionError> {
    let bytes = match message {
        Message::Request(request) => serde_json::to_vec(request)?,
        Message::Response(response) => serde_json::to_vec(response)?,
        Message::Notification(notification) => serde_json::to_vec(notification)?,
    };
    Ok(bytes)
}

/// Deserialize a message body
///
/// Shapes that are not a request, response or notification fail with
/// [`SessionError::ProtocolViolation`].
pub fn decode(bytes: &[u8]) -> Result<Message, SessionError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| SessionError::ProtocolViolation(format!("invalid JSON: {e}")))?;

    let Value::Object(mut object) = value else {
        return Err(SessionError::ProtocolViolation(
            "message is not a JSON object".to_string(),
        ));
    };

    match object.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        Some(other) => {
            return Err(SessionError::ProtocolViolation(format!(
                "unsupported jsonrpc version '{other}'"
            )));
        }
        None => {
            return Err(SessionError::ProtocolViolation(
                "missing jsonrpc version".to_string(),
            ));
        }
    }

    let id = object.remove("id").filter(|id| !id.is_null());
    let method = match object.remove("method") {
        Some(Value::String(method)) => Some(method),
        Some(_) => {
            return Err(SessionError::ProtocolViolation(
                "method is not a string".to_string(),
            ));
        }
        None => None,
    };
    let params = object.remove("params");

    match (method, id) {
        (Some(method), Some(id)) => {
            check_id(&id)?;
            Ok(Message::Request(JsonRpcRequest {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id,
                method,
                params,
            }))
        }
        (Some(method), None) => Ok(Message::Notification(JsonRpcNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method,
            params,
        })),
        (None, Some(id)) => {
            check_id(&id)?;
            decode_response(id, object).map(Message::Response)
        }
        (None, None) => Err(SessionError::ProtocolViolation(
            "message has neither method nor id".to_string(),
        )),
    }
}

fn check_id(id: &Value) -> Result<(), SessionError> {
    if id.is_number() || id.is_string() {
        Ok(())
    } else {
        Err(SessionError::ProtocolViolation(format!(
            "invalid message id {id}"
        )))
    }
}

/// Build a response by hand so that `"result": null` stays distinguishable
/// from an absent result
fn decode_response(id: Value, mut object: Map<String, Value>) -> Result<JsonRpcResponse, SessionError> {
    let result = object.remove("result");
    let error = match object.remove("error") {
        Some(Value::Null) | None => None,
        Some(error) => Some(serde_json::from_value::<JsonRpcErrorObject>(error).map_err(
            |e| SessionError::ProtocolViolation(format!("malformed error object: {e}")),
        )?),
    };

    if result.is_none() && error.is_none() {
        return Err(SessionError::ProtocolViolation(format!(
            "response {id} carries neither result nor error"
        )));
    }

    Ok(JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        result,
        error,
    })
}
