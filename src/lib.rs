pub mod config;
pub mod logging;
pub mod rpc;
pub mod server;

pub use server::{RpcServer, ServerError};
