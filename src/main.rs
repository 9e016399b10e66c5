use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rpchost::config::AppConfig;
use rpchost::logging::{self, LogConfig};
use rpchost::rpc::{MethodHandler, RpcClient};
use rpchost::RpcServer;
use serde::Serialize;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "rpchost")]
#[command(about = "JSON-RPC server host", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./rpchost.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server until Ctrl-C
    Serve(ServeArgs),
    /// Query a running server
    Status(StatusArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Interface to bind (all interfaces when omitted)
    #[arg(long)]
    host: Option<IpAddr>,

    /// Port to listen on, 0 for any free port
    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    verbose: Option<bool>,

    #[arg(long)]
    json_logs: Option<bool>,
}

#[derive(Serialize)]
struct ServerSection<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<&'a IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
}

#[derive(Serialize)]
struct Overrides<'a> {
    server: ServerSection<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verbose: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_logs: Option<bool>,
}

impl ServeArgs {
    fn overrides(&self) -> Overrides<'_> {
        Overrides {
            server: ServerSection {
                host: self.host.as_ref(),
                port: self.port,
            },
            verbose: self.verbose,
            json_logs: self.json_logs,
        }
    }
}

#[derive(Args)]
struct StatusArgs {
    /// Server address as host:port
    #[arg(long, default_value = "127.0.0.1:8765")]
    addr: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve(args) => {
            let config = AppConfig::new(cli.config.as_deref(), Some(&args.overrides()))?;
            logging::init(LogConfig::from(&config));
            run_server(config).context("Failed to run server")?
        }
        Commands::Status(args) => run_status(&args.addr).context("Failed to query server")?,
    }

    Ok(())
}

fn run_server(config: AppConfig) -> Result<()> {
    let handler = Arc::new(MethodHandler::new());
    let server = RpcServer::with_config(config.server, handler.clone());
    server.start()?;

    if let Some(metadata) = handler.server_metadata() {
        tracing::info!(address = %metadata, "Advertising server address");
    }

    let signals = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    signals
        .block_on(tokio::signal::ctrl_c())
        .context("Failed to listen for Ctrl-C")?;

    server.stop()?;
    Ok(())
}

fn run_status(addr: &str) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let client = RpcClient::new(addr);
    let info: Value = runtime.block_on(client.call("server.info", None))?;

    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
