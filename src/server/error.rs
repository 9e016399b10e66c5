use std::net::SocketAddr;

use thiserror::Error;

use super::address::AddressResolutionError;

/// Errors returned by the [`RpcServer`](super::RpcServer) lifecycle operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already started")]
    AlreadyStarted,

    #[error("server is already stopped")]
    AlreadyStopped,

    #[error("failed to start server")]
    Startup(#[from] StartupError),

    #[error("failed to stop server")]
    Shutdown(#[from] ShutdownError),
}

/// Why a start attempt failed. Nothing acquired by the attempt outlives it.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to create worker pool")]
    WorkerPool(#[source] std::io::Error),

    #[error("failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    AddressResolution(#[from] AddressResolutionError),
}

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("accept loop terminated abnormally")]
    AcceptLoop(#[source] tokio::task::JoinError),
}
