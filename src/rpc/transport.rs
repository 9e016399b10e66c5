//! TCP transport layer for the RPC server.
//!
//! Handles TCP connections with newline-delimited JSON framing.
//! Each connection is handled in its own task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::protocol::{Request, Response};
use crate::logging::LogThrottle;
use crate::server::chain::HandlerChain;

const LISTEN_BACKLOG: u32 = 1024;

/// Per-connection socket policy.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// Close a connection after this long without a complete request line.
    pub idle_timeout: Duration,
    /// SO_LINGER for accepted sockets; `None` leaves it disabled.
    pub linger: Option<Duration>,
}

/// Bind a listening socket. Port 0 asks the OS for a free ephemeral port.
///
/// Must be called from within a tokio runtime.
pub fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// Accepts connections and feeds them through a handler chain.
pub struct Transport {
    chain: Arc<HandlerChain>,
    settings: ConnectionSettings,
}

impl Transport {
    pub fn new(chain: HandlerChain, settings: ConnectionSettings) -> Self {
        Self {
            chain: Arc::new(chain),
            settings,
        }
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// The listener is dropped, and the port released, when this returns.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) {
        let local_addr = listener.local_addr().ok();
        let accept_errors = LogThrottle::new(Duration::from_secs(1));
        debug!(addr = ?local_addr, "Accept loop running");

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "Client connected");
                            if let Err(e) = stream.set_linger(self.settings.linger) {
                                debug!(peer = %peer_addr, error = %e, "Failed to set linger");
                            }
                            let chain = self.chain.clone();
                            let idle_timeout = self.settings.idle_timeout;
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                tokio::select! {
                                    result = handle_connection(stream, peer_addr, chain, idle_timeout) => {
                                        if let Err(e) = result {
                                            debug!(peer = %peer_addr, error = %e, "Connection error");
                                        }
                                    }
                                    _ = shutdown.cancelled() => {}
                                }
                                debug!(peer = %peer_addr, "Client disconnected");
                            });
                        }
                        Err(e) => {
                            if accept_errors.should_log() {
                                error!(error = %e, "Failed to accept connection");
                            }
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    info!(addr = ?local_addr, "Accept loop shutting down");
                    break;
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    chain: Arc<HandlerChain>,
    idle_timeout: Duration,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = match tokio::time::timeout(idle_timeout, reader.read_line(&mut line)).await
        {
            Ok(result) => result?,
            Err(_) => {
                debug!(peer = %peer_addr, "Idle timeout");
                break;
            }
        };

        if bytes_read == 0 {
            // EOF - client disconnected
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(trimmed) {
            Ok(request) => {
                if let Err(msg) = request.validate() {
                    warn!(peer = %peer_addr, error = msg, "Invalid request");
                    Response::invalid_request(request.response_id())
                } else if request.is_notification() {
                    debug!(peer = %peer_addr, method = %request.method, "Notification received");
                    chain.handle(&request).await;
                    continue;
                } else {
                    chain.handle(&request).await
                }
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "Parse error");
                Response::parse_error()
            }
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::protocol::{INVALID_REQUEST, PARSE_ERROR};
    use crate::server::handler::{DelegatingHandler, handler_fn};
    use serde_json::Value;

    fn echo_chain() -> HandlerChain {
        HandlerChain::new(Arc::new(DelegatingHandler::new(handler_fn(
            |req: &Request| {
                (req.method == "echo")
                    .then(|| Response::success(req.response_id(), req.params.clone()))
            },
        ))))
    }

    async fn start(idle_timeout: Duration) -> (SocketAddr, CancellationToken) {
        start_with(ConnectionSettings {
            idle_timeout,
            linger: None,
        })
        .await
    }

    async fn start_with(settings: ConnectionSettings) -> (SocketAddr, CancellationToken) {
        let listener = bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let transport = Transport::new(echo_chain(), settings);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move { transport.serve(listener, token).await });
        (addr, shutdown)
    }

    async fn exchange(stream: &mut BufReader<TcpStream>, line: &str) -> Response {
        stream.get_mut().write_all(line.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_line(&mut response).await.unwrap();
        serde_json::from_str(&response).unwrap()
    }

    #[tokio::test]
    async fn serves_requests_line_by_line() {
        let (addr, shutdown) = start(Duration::from_secs(5)).await;
        let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());

        let resp = exchange(
            &mut stream,
            "{\"jsonrpc\":\"2.0\",\"method\":\"echo\",\"params\":[1],\"id\":1}\n",
        )
        .await;
        assert_eq!(resp.result, Some(serde_json::json!([1])));

        let resp = exchange(&mut stream, "{\"jsonrpc\":\"2.0\",\"method\":\"health\",\"id\":2}\n").await;
        assert_eq!(resp.id, Value::Number(2.into()));
        assert!(resp.error.is_none());

        shutdown.cancel();
    }

    #[tokio::test]
    async fn malformed_lines_get_protocol_errors() {
        let (addr, shutdown) = start(Duration::from_secs(5)).await;
        let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());

        let resp = exchange(&mut stream, "not json\n").await;
        assert_eq!(resp.error.unwrap().code, PARSE_ERROR);

        let resp = exchange(&mut stream, "{\"jsonrpc\":\"1.0\",\"method\":\"echo\",\"id\":3}\n").await;
        assert_eq!(resp.error.unwrap().code, INVALID_REQUEST);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn idle_connections_are_closed() {
        let (addr, shutdown) = start(Duration::from_millis(50)).await;
        let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());

        let mut buf = String::new();
        let read = tokio::time::timeout(Duration::from_secs(2), stream.read_line(&mut buf))
            .await
            .expect("connection was not closed");
        assert_eq!(read.unwrap(), 0);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn lingering_connections_are_served() {
        let (addr, shutdown) = start_with(ConnectionSettings {
            idle_timeout: Duration::from_secs(5),
            linger: Some(Duration::from_secs(1)),
        })
        .await;
        let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());

        let resp = exchange(
            &mut stream,
            "{\"jsonrpc\":\"2.0\",\"method\":\"echo\",\"params\":\"x\",\"id\":9}\n",
        )
        .await;
        assert_eq!(resp.result, Some(Value::String("x".into())));

        // The server closes its side without error once the client hangs up.
        stream.get_mut().shutdown().await.unwrap();
        let mut rest = String::new();
        assert_eq!(stream.read_line(&mut rest).await.unwrap(), 0);

        shutdown.cancel();
    }
}
