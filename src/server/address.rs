//! Advertised address computation.
//!
//! A server bound to every interface cannot hand `0.0.0.0` to remote
//! clients, so wildcard binds advertise the local hostname instead.

use std::net::IpAddr;

use thiserror::Error;

/// The local hostname could not be determined.
#[derive(Debug, Error)]
#[error("failed to resolve local hostname")]
pub struct AddressResolutionError {
    #[source]
    source: std::io::Error,
}

impl AddressResolutionError {
    pub fn new(source: std::io::Error) -> Self {
        Self { source }
    }
}

/// Source of the local machine's hostname.
pub trait HostnameSource: Send + Sync {
    fn hostname(&self) -> Result<String, AddressResolutionError>;
}

/// Reads the hostname from the operating system via `gethostname(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHostname;

impl HostnameSource for SystemHostname {
    fn hostname(&self) -> Result<String, AddressResolutionError> {
        let name = nix::unistd::gethostname()
            .map_err(|errno| AddressResolutionError::new(errno.into()))?;

        match name.into_string() {
            Ok(name) if !name.is_empty() => Ok(name),
            Ok(_) => Err(AddressResolutionError::new(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "hostname is empty",
            ))),
            Err(_) => Err(AddressResolutionError::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "hostname is not valid UTF-8",
            ))),
        }
    }
}

/// Turns a bound host/port into the `host:port` string clients should use.
pub struct AddressResolver {
    hostnames: Box<dyn HostnameSource>,
}

impl Default for AddressResolver {
    fn default() -> Self {
        Self::new(SystemHostname)
    }
}

impl AddressResolver {
    pub fn new(hostnames: impl HostnameSource + 'static) -> Self {
        Self {
            hostnames: Box::new(hostnames),
        }
    }

    /// `None` and unspecified addresses mean "bound to all interfaces".
    pub fn resolve(
        &self,
        bound_host: Option<IpAddr>,
        bound_port: u16,
    ) -> Result<String, AddressResolutionError> {
        let host = match bound_host {
            Some(ip) if !ip.is_unspecified() => ip.to_string(),
            _ => self.hostnames.hostname()?,
        };

        Ok(format!("{}:{}", host, bound_port))
    }
}
