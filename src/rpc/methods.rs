//! Built-in RPC methods.
//!
//! [`MethodHandler`] is a full-capability [`RequestHandler`]: it remembers
//! the address the server advertised and stamps it on every response, so a
//! client behind a load balancer can tell which instance answered.

use std::sync::{PoisonError, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::protocol::{Request, Response, RpcServerMetadata};
use crate::server::RequestHandler;

/// Handles the `server.*` and `echo` methods.
pub struct MethodHandler {
    started_at: DateTime<Utc>,
    start_time: Instant,
    metadata: RwLock<Option<RpcServerMetadata>>,
}

impl Default for MethodHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodHandler {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            start_time: Instant::now(),
            metadata: RwLock::new(None),
        }
    }

    /// The address most recently pushed by the hosting server.
    pub fn server_metadata(&self) -> Option<RpcServerMetadata> {
        self.metadata
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn dispatch(&self, request: &Request) -> Option<Response> {
        let id = request.response_id();

        let response = match request.method.as_str() {
            "server.info" => self.server_info(id),
            "server.ping" => Response::success(id, "pong"),
            "echo" => Response::success(id, request.params.clone().unwrap_or(Value::Null)),
            _ => return None,
        };

        Some(response.with_metadata(self.server_metadata()))
    }

    fn server_info(&self, id: Value) -> Response {
        #[derive(Serialize)]
        struct ServerInfo {
            version: &'static str,
            started_at: DateTime<Utc>,
            uptime_secs: u64,
            server_address: Option<String>,
        }

        Response::success(
            id,
            ServerInfo {
                version: env!("CARGO_PKG_VERSION"),
                started_at: self.started_at,
                uptime_secs: self.start_time.elapsed().as_secs(),
                server_address: self.server_metadata().map(|m| m.server_address),
            },
        )
    }
}

#[async_trait]
impl RequestHandler for MethodHandler {
    async fn handle(&self, request: &Request) -> Option<Response> {
        self.dispatch(request)
    }

    fn set_server_metadata(&self, metadata: RpcServerMetadata) {
        *self.metadata.write().unwrap_or_else(PoisonError::into_inner) = Some(metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unknown_methods_are_not_claimed() {
        let handler = MethodHandler::new();
        assert!(handler.handle(&Request::new("jobs.list", None, 1)).await.is_none());
    }

    #[tokio::test]
    async fn responses_carry_latest_metadata() {
        let handler = MethodHandler::new();

        let before = handler.handle(&Request::new("server.ping", None, 1)).await.unwrap();
        assert!(before.rpc_metadata.is_none());

        handler.set_server_metadata(RpcServerMetadata::new("db-1:4000"));
        handler.set_server_metadata(RpcServerMetadata::new("db-1:4001"));

        let after = handler
            .handle(&Request::new("echo", Some(json!({"a": 1})), 2))
            .await
            .unwrap();
        assert_eq!(after.result, Some(json!({"a": 1})));
        assert_eq!(after.rpc_metadata.unwrap().server_address(), "db-1:4001");
    }

    #[tokio::test]
    async fn server_info_reports_address() {
        let handler = MethodHandler::new();
        handler.set_server_metadata(RpcServerMetadata::new("db-1:4000"));

        let resp = handler.handle(&Request::new("server.info", None, 1)).await.unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["server_address"], "db-1:4000");
        assert_eq!(result["version"], env!("CARGO_PKG_VERSION"));
    }
}
