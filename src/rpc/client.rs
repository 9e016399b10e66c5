//! RPC client for talking to a running server.
//!
//! Connects per call, so it can follow a server's advertised `host:port`
//! without holding a connection open.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::protocol::{Request, Response, RpcError};

/// RPC client bound to one server address.
pub struct RpcClient {
    addr: String,
}

/// Error returned by RPC client operations.
#[derive(Debug)]
pub enum ClientError {
    /// Failed to connect to the server
    Connect(std::io::Error),
    /// Failed to send/receive data
    Io(std::io::Error),
    /// Server closed the connection without answering
    Closed,
    /// Failed to serialize request
    Serialize(serde_json::Error),
    /// Failed to parse response
    Parse(serde_json::Error),
    /// Server returned an error
    Rpc(RpcError),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Connect(e) => write!(f, "Failed to connect to server: {}", e),
            ClientError::Io(e) => write!(f, "Communication error: {}", e),
            ClientError::Closed => write!(f, "Server closed the connection"),
            ClientError::Serialize(e) => write!(f, "Failed to serialize request: {}", e),
            ClientError::Parse(e) => write!(f, "Failed to parse response: {}", e),
            ClientError::Rpc(e) => write!(f, "RPC error {}: {}", e.code, e.message),
        }
    }
}

impl std::error::Error for ClientError {}

impl RpcClient {
    /// `addr` is a `host:port` string, such as a server's advertised address.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Send a request and return the raw response, error or not.
    pub async fn send(&self, request: &Request) -> Result<Response, ClientError> {
        let mut stream = TcpStream::connect(self.addr.as_str())
            .await
            .map_err(ClientError::Connect)?;

        let mut request_json = serde_json::to_string(request).map_err(ClientError::Serialize)?;
        request_json.push('\n');

        stream
            .write_all(request_json.as_bytes())
            .await
            .map_err(ClientError::Io)?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        let read = reader
            .read_line(&mut response_line)
            .await
            .map_err(ClientError::Io)?;
        if read == 0 {
            return Err(ClientError::Closed);
        }

        serde_json::from_str(&response_line).map_err(ClientError::Parse)
    }

    /// Call an RPC method and return the result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, ClientError> {
        let response = self.send(&Request::new(method, params, 1)).await?;

        if let Some(error) = response.error {
            return Err(ClientError::Rpc(error));
        }

        let result = response.result.unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(ClientError::Parse)
    }
}
