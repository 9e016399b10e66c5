//! JSON-RPC 2.0 protocol types.
//!
//! Requests and responses travel as one JSON object per line. Responses may
//! additionally carry an `rpc_metadata` object describing which server
//! instance answered, so clients can pin follow-up calls to it.
//! See: https://www.jsonrpc.org/specification

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 request object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Must be exactly "2.0"
    pub jsonrpc: String,
    /// Method name to invoke
    pub method: String,
    /// Optional parameters (can be object or array)
    #[serde(default)]
    pub params: Option<Value>,
    /// Request identifier. If None, this is a notification (no response expected).
    #[serde(default)]
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Result on success (mutually exclusive with error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure (mutually exclusive with result)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Address of the server instance that produced this response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_metadata: Option<RpcServerMetadata>,
    /// Request identifier (echoed from request)
    pub id: Value,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// The reachable `host:port` address a server advertises to its clients.
///
/// Computed once per server start from the actually bound port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcServerMetadata {
    pub server_address: String,
}

impl RpcServerMetadata {
    pub fn new(server_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
        }
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }
}

impl fmt::Display for RpcServerMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.server_address)
    }
}

// Standard JSON-RPC 2.0 error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INTERNAL_ERROR: i32 = -32603;

impl Response {
    /// Create a success response with the given result.
    pub fn success(id: Value, result: impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self {
                jsonrpc: "2.0".to_string(),
                result: Some(value),
                error: None,
                rpc_metadata: None,
                id,
            },
            Err(e) => Self::internal_error(id, e.to_string()),
        }
    }

    /// Create an error response.
    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
            rpc_metadata: None,
            id,
        }
    }

    /// Create a parse error response (used when request ID is unknown).
    pub fn parse_error() -> Self {
        Self::error(Value::Null, PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(id: Value) -> Self {
        Self::error(id, INVALID_REQUEST, "Invalid request")
    }

    pub fn method_not_found(id: Value, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn internal_error(id: Value, details: impl Into<String>) -> Self {
        Self::error(id, INTERNAL_ERROR, details.into())
    }

    /// Attach the answering server's address to this response.
    pub fn with_metadata(mut self, metadata: Option<RpcServerMetadata>) -> Self {
        self.rpc_metadata = metadata;
        self
    }
}

impl Request {
    /// Build a request with a numeric id.
    pub fn new(method: impl Into<String>, params: Option<Value>, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id: Some(Value::Number(id.into())),
        }
    }

    /// Check if this request is a notification (no response expected).
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// The id to echo back; notifications and malformed ids answer with null.
    pub fn response_id(&self) -> Value {
        self.id.clone().unwrap_or(Value::Null)
    }

    /// Validate the request conforms to JSON-RPC 2.0.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.jsonrpc != "2.0" {
            return Err("jsonrpc must be \"2.0\"");
        }
        if self.method.is_empty() {
            return Err("method must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request() {
        let json = r#"{"jsonrpc":"2.0","method":"server.info","params":{"verbose":true},"id":1}"#;
        let req: Request = serde_json::from_str(json).unwrap();

        assert_eq!(req.method, "server.info");
        assert!(req.params.is_some());
        assert_eq!(req.id, Some(Value::Number(1.into())));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_parse_notification() {
        let json = r#"{"jsonrpc":"2.0","method":"server.ping"}"#;
        let req: Request = serde_json::from_str(json).unwrap();

        assert!(req.is_notification());
        assert_eq!(req.response_id(), Value::Null);
    }

    #[test]
    fn test_validate_rejects_wrong_version() {
        let req = Request {
            jsonrpc: "1.0".to_string(),
            method: "echo".to_string(),
            params: None,
            id: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_metadata_omitted_when_absent() {
        let resp = Response::success(Value::Number(1.into()), "ok");
        let json = serde_json::to_string(&resp).unwrap();

        assert!(json.contains(r#""result":"ok""#));
        assert!(!json.contains("rpc_metadata"));
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_metadata_serialized_when_attached() {
        let resp = Response::method_not_found(Value::String("abc".into()), "nope")
            .with_metadata(Some(RpcServerMetadata::new("db-1:8765")));
        let json = serde_json::to_string(&resp).unwrap();

        assert!(json.contains(r#""code":-32601"#));
        assert!(json.contains(r#""rpc_metadata":{"server_address":"db-1:8765"}"#));
        assert!(!json.contains("result"));
    }
}
