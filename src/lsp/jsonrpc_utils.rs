//! JSON-RPC 2.0 protocol utilities
//!
//! Constants and response builders for the JSON-RPC 2.0 layer underneath
//! LSP, as per https://www.jsonrpc.org/specification

use crate::lsp::protocol::{JsonRpcErrorObject, JsonRpcResponse};
use serde_json::Value;

/// JSON-RPC 2.0 version identifier
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 and LSP error codes
pub mod error_codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i32 = -32700;

    /// The JSON sent is not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;

    /// The method does not exist / is not available
    pub const METHOD_NOT_FOUND: i32 = -32601;

    /// Invalid method parameter(s)
    pub const INVALID_PARAMS: i32 = -32602;

    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;

    /// LSP: a request arrived before `initialize`
    pub const SERVER_NOT_INITIALIZED: i32 = -32002;

    /// LSP: the request was cancelled
    pub const REQUEST_CANCELLED: i32 = -32800;
}

/// Create a successful JSON-RPC response
pub fn success_response(id: Value, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        result: Some(result),
        error: None,
    }
}

/// Create a JSON-RPC error response
pub fn error_response(
    id: Value,
    code: i32,
    message: impl Into<String>,
    data: Option<Value>,
) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        result: None,
        error: Some(JsonRpcErrorObject {
            code,
            message: message.into(),
            data,
        }),
    }
}

/// Create a "method not found" error response
pub fn method_not_found_response(id: Value, method: &str) -> JsonRpcResponse {
    error_response(
        id,
        error_codes::METHOD_NOT_FOUND,
        format!("Method not found: {method}"),
        None,
    )
}

/// Create a null success response (for requests that return void)
pub fn null_success_response(id: Value) -> JsonRpcResponse {
    success_response(id, Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_success_response_keeps_result() {
        let response = null_success_response(json!(7));
        assert_eq!(response.result, Some(Value::Null));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_method_not_found_response() {
        let response = method_not_found_response(json!("abc"), "custom/thing");
        let error = response.error.unwrap();
        assert_eq!(error.code, error_codes::METHOD_NOT_FOUND);
        assert!(error.message.contains("custom/thing"));
        assert_eq!(response.id, json!("abc"));
    }
}
