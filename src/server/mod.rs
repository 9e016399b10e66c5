//! Lifecycle management for the RPC server.
//!
//! [`RpcServer`] binds a listening socket, installs the handler chain,
//! publishes the advertised address to the handler and tears everything
//! down again on [`RpcServer::stop`].
//!
//! ## Lifecycle
//!
//! ```text
//! Initial --start()--> Running --stop()--> Stopped --start()--> Running ...
//! ```
//!
//! `start`, `stop` and `join` block the calling thread until the bind,
//! teardown or termination completes. They may be called from inside
//! another tokio runtime; the server never shares that runtime.

pub mod address;
pub mod chain;
mod error;
pub mod handler;
mod runtime;

use std::mem;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::rpc::RpcServerMetadata;
use crate::rpc::transport::{self, ConnectionSettings, Transport};

pub use address::{AddressResolutionError, AddressResolver, HostnameSource, SystemHostname};
pub use chain::{FallbackHandler, HandlerChain};
pub use error::{ServerError, ShutdownError, StartupError};
pub use handler::{DelegatingHandler, FnHandler, Handler, RequestHandler, handler_fn};
use runtime::WorkerPool;

/// Port reported while the server is not running.
pub const NOT_RUNNING: i32 = -1;

enum ServerState {
    Initial,
    Running(Running),
    Stopped,
}

/// Everything a single successful `start()` acquired.
struct Running {
    pool: WorkerPool,
    shutdown: CancellationToken,
    accept_loop: JoinHandle<()>,
    termination: Arc<Termination>,
}

impl Running {
    fn shutdown(self) -> Result<(), ShutdownError> {
        let Running {
            pool,
            shutdown,
            accept_loop,
            ..
        } = self;

        shutdown.cancel();
        // The listener lives inside the accept loop; once it returns the port is closed.
        let result = pool.block_on(accept_loop);
        pool.shutdown();
        result.map_err(ShutdownError::AcceptLoop)
    }
}

/// Signalled when an accept loop ends, whether it returned or was dropped.
#[derive(Default)]
struct Termination {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Termination {
    fn wait(&self) {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*done {
            done = self
                .cond
                .wait(done)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn finish(&self) {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_all();
    }
}

struct TerminationGuard(Arc<Termination>);

impl Drop for TerminationGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// A restartable RPC server hosting a single [`RequestHandler`].
pub struct RpcServer {
    config: ServerConfig,
    handler: Arc<dyn RequestHandler>,
    resolver: AddressResolver,
    state: Mutex<ServerState>,
    port: AtomicI32,
}

impl RpcServer {
    /// Server on an ephemeral port with default settings.
    pub fn new(handler: impl RequestHandler + 'static) -> Self {
        Self::with_port(0, handler)
    }

    pub fn with_port(port: u16, handler: impl RequestHandler + 'static) -> Self {
        Self::with_config(ServerConfig::with_port(port), Arc::new(handler))
    }

    /// Host a handler that does not care about server metadata.
    pub fn from_handler(handler: impl Handler + 'static) -> Self {
        Self::from_handler_with_port(0, handler)
    }

    pub fn from_handler_with_port(port: u16, handler: impl Handler + 'static) -> Self {
        Self::with_port(port, DelegatingHandler::new(handler))
    }

    pub fn with_config(config: ServerConfig, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            config,
            handler,
            resolver: AddressResolver::default(),
            state: Mutex::new(ServerState::Initial),
            port: AtomicI32::new(NOT_RUNNING),
        }
    }

    /// Replace how the advertised address is computed.
    pub fn with_resolver(mut self, resolver: AddressResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Bind, start serving and publish the advertised address to the handler.
    ///
    /// On failure nothing acquired by this call stays alive and the server
    /// keeps its previous state.
    pub fn start(&self) -> Result<(), ServerError> {
        let mut state = self.lock_state();
        if matches!(*state, ServerState::Running(_)) {
            return Err(ServerError::AlreadyStarted);
        }

        let running = self.launch()?;
        *state = ServerState::Running(running);
        Ok(())
    }

    fn launch(&self) -> Result<Running, StartupError> {
        let pool = WorkerPool::new(self.config.worker_threads, self.config.daemon)
            .map_err(StartupError::WorkerPool)?;

        let bind_addr = self.config.bind_addr();
        let bind_error = |source: std::io::Error| StartupError::Bind {
            addr: bind_addr,
            source,
        };
        let listener = pool
            .block_on(async { transport::bind(bind_addr) })
            .map_err(bind_error)?;
        let port = listener.local_addr().map_err(bind_error)?.port();

        let transport = Transport::new(
            HandlerChain::new(self.handler.clone()),
            ConnectionSettings {
                idle_timeout: self.config.idle_timeout(),
                linger: self.config.linger(),
            },
        );
        let shutdown = CancellationToken::new();
        let termination = Arc::new(Termination::default());
        let accept_loop = pool.handle().spawn({
            let shutdown = shutdown.clone();
            let guard = TerminationGuard(termination.clone());
            async move {
                let _guard = guard;
                transport.serve(listener, shutdown).await;
            }
        });

        let running = Running {
            pool,
            shutdown,
            accept_loop,
            termination,
        };

        let address = match self.resolver.resolve(self.config.host, port) {
            Ok(address) => address,
            Err(e) => {
                if let Err(shutdown_err) = running.shutdown() {
                    debug!(error = %shutdown_err, "Accept loop failed during aborted start");
                }
                return Err(e.into());
            }
        };

        self.handler
            .set_server_metadata(RpcServerMetadata::new(address.as_str()));
        self.port.store(i32::from(port), Ordering::SeqCst);

        info!(port, address = %address, "Service listening on port {}.", port);
        Ok(running)
    }

    /// Stop accepting connections and tear down the worker pool.
    ///
    /// In-flight requests are dropped, not drained.
    pub fn stop(&self) -> Result<(), ServerError> {
        let mut state = self.lock_state();
        if !matches!(*state, ServerState::Running(_)) {
            return Err(ServerError::AlreadyStopped);
        }

        info!("Service terminating.");

        // Publish "stopped" before the socket is actually closed.
        self.port.store(NOT_RUNNING, Ordering::SeqCst);
        let ServerState::Running(running) = mem::replace(&mut *state, ServerState::Stopped) else {
            unreachable!("state checked above");
        };

        running.shutdown()?;
        Ok(())
    }

    /// Block until the accept loop terminates.
    ///
    /// Returns immediately when the server is not running.
    pub fn join(&self) {
        let termination = match &*self.lock_state() {
            ServerState::Running(running) => running.termination.clone(),
            ServerState::Initial | ServerState::Stopped => return,
        };
        termination.wait();
    }

    /// The actually bound port, or `-1` when not running.
    pub fn port(&self) -> i32 {
        self.port.load(Ordering::SeqCst)
    }

    fn lock_state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);

        if let ServerState::Running(running) = mem::replace(state, ServerState::Stopped) {
            debug!("Dropping running server");
            running.shutdown.cancel();
            // WorkerPool's own Drop tears the runtime down.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{Request, Response};

    struct Counting {
        pushes: Mutex<Vec<RpcServerMetadata>>,
    }

    #[async_trait::async_trait]
    impl RequestHandler for Counting {
        async fn handle(&self, _request: &Request) -> Option<Response> {
            None
        }

        fn set_server_metadata(&self, metadata: RpcServerMetadata) {
            self.pushes.lock().unwrap().push(metadata);
        }
    }

    fn loopback_config() -> ServerConfig {
        ServerConfig {
            host: Some("127.0.0.1".parse().unwrap()),
            ..ServerConfig::with_port(0)
        }
    }

    #[test]
    fn new_server_reports_not_running() {
        let server = RpcServer::from_handler(handler_fn(|_: &Request| None));
        assert_eq!(server.port(), NOT_RUNNING);
        assert!(matches!(server.stop(), Err(ServerError::AlreadyStopped)));
    }

    #[test]
    fn join_returns_immediately_when_not_running() {
        let server = RpcServer::from_handler(handler_fn(|_: &Request| None));
        server.join();
    }

    #[test]
    fn metadata_pushed_once_per_start() {
        let handler = Arc::new(Counting {
            pushes: Mutex::new(Vec::new()),
        });
        let server = RpcServer::with_config(loopback_config(), handler.clone());

        server.start().unwrap();
        let first_port = server.port();
        server.stop().unwrap();
        server.start().unwrap();
        let second_port = server.port();
        server.stop().unwrap();

        let pushes = handler.pushes.lock().unwrap();
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0].server_address(), format!("127.0.0.1:{}", first_port));
        assert_eq!(pushes[1].server_address(), format!("127.0.0.1:{}", second_port));
    }

    #[test]
    fn dropping_a_running_server_does_not_hang() {
        let server = RpcServer::with_config(
            loopback_config(),
            Arc::new(DelegatingHandler::new(handler_fn(|_: &Request| None))),
        );
        server.start().unwrap();
        drop(server);
    }
}
