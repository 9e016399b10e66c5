//! Layered configuration.
//!
//! Values are merged in order: built-in defaults, the TOML file
//! (`rpchost.toml` unless another path is given), `RPCHOST_*` environment
//! variables, then command line overrides.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "rpchost.toml";
const ENV_PREFIX: &str = "RPCHOST_";

/// Socket and threading settings for one [`RpcServer`](crate::RpcServer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind; absent means all interfaces.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<IpAddr>,
    /// 0 lets the OS pick a free port.
    pub port: u16,
    pub idle_timeout_ms: u64,
    /// SO_LINGER in seconds; absent disables lingering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linger_secs: Option<u64>,
    pub daemon: bool,
    pub worker_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 0,
            idle_timeout_ms: 60 * 1000,
            linger_secs: None,
            daemon: true,
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl ServerConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::new(host, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            verbose: false,
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Load configuration, letting `overrides` win over every other source.
    ///
    /// `overrides` should skip serializing unset fields so they do not mask
    /// file or environment values.
    pub fn new<T: Serialize>(config_file: Option<&Path>, overrides: Option<&T>) -> Result<Self> {
        let path = config_file.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        figment
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Serialize)]
    struct Overrides {
        #[serde(skip_serializing_if = "Option::is_none")]
        verbose: Option<bool>,
    }

    #[test]
    fn defaults_match_server_container() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 0);
        assert_eq!(config.idle_timeout(), Duration::from_secs(60));
        assert_eq!(config.linger(), None);
        assert!(config.daemon);
        assert!(config.worker_threads >= 1);
        assert_eq!(config.bind_addr().to_string(), "0.0.0.0:0");
    }

    #[test]
    fn file_values_are_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpchost.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "json_logs = true\n[server]\nhost = \"127.0.0.1\"\nport = 8765\nlinger_secs = 2"
        )
        .unwrap();

        let config = AppConfig::new::<Overrides>(Some(&path), None).unwrap();
        assert!(config.json_logs);
        assert_eq!(config.server.port, 8765);
        assert_eq!(config.server.linger(), Some(Duration::from_secs(2)));
        assert_eq!(config.server.bind_addr().to_string(), "127.0.0.1:8765");
    }

    #[test]
    fn overrides_win_and_unset_fields_fall_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpchost.toml");
        std::fs::write(&path, "verbose = false\njson_logs = true\n").unwrap();

        let overrides = Overrides {
            verbose: Some(true),
        };
        let config = AppConfig::new(Some(&path), Some(&overrides)).unwrap();
        assert!(config.verbose);
        assert!(config.json_logs);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            AppConfig::new::<Overrides>(Some(&dir.path().join("absent.toml")), None).unwrap();
        assert_eq!(config.server, ServerConfig::default());
    }
}
