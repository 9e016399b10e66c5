//! Primary-then-fallback request dispatch.

use std::sync::Arc;

use serde_json::json;

use super::handler::RequestHandler;
use crate::rpc::{Request, Response};

/// Method answered by the fallback when the primary handler does not claim it.
pub const HEALTH_METHOD: &str = "health";

/// Terminal handler that answers every request the primary left unclaimed.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackHandler;

impl FallbackHandler {
    pub fn handle(&self, request: &Request) -> Response {
        let id = request.response_id();
        match request.method.as_str() {
            HEALTH_METHOD => Response::success(id, json!({ "status": "ok" })),
            method => Response::method_not_found(id, method),
        }
    }
}

/// The handler chain installed into a running server.
///
/// The order is fixed at construction and the chain cannot be extended
/// afterwards.
pub struct HandlerChain {
    primary: Arc<dyn RequestHandler>,
    fallback: FallbackHandler,
}

impl HandlerChain {
    pub fn new(primary: Arc<dyn RequestHandler>) -> Self {
        Self {
            primary,
            fallback: FallbackHandler,
        }
    }

    pub async fn handle(&self, request: &Request) -> Response {
        match self.primary.handle(request).await {
            Some(response) => response,
            None => self.fallback.handle(request),
        }
    }
}
