//! Core data models for provisioning and benchmarking

use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Server process placed inside the isolated environment
///
/// Serialized under the same names as [`ProcessKind::label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessKind {
    /// nginx serving a static page
    #[serde(rename = "nginx")]
    WebServer,
    /// memcached
    #[serde(rename = "memcached")]
    Cache,
}

impl ProcessKind {
    /// Name of the server program, used in directory names and logs
    pub fn label(&self) -> &'static str {
        match self {
            ProcessKind::WebServer => "nginx",
            ProcessKind::Cache => "memcached",
        }
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Isolation backend hosting the managed process
///
/// Serialized under the same names as [`BackendKind::label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// Docker container on the default bridge
    #[serde(rename = "docker")]
    Docker,
    /// LXC namespace container
    #[serde(rename = "linux")]
    Lxc,
    /// Docker image booted as a Xen HVM guest
    #[serde(rename = "xcontainer")]
    XContainer,
}

impl BackendKind {
    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::Docker => "docker",
            BackendKind::Lxc => "linux",
            BackendKind::XContainer => "xcontainer",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Naming and port conventions for one managed process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub name: String,
    pub kind: ProcessKind,
    /// Machine port used when the backend does not publish ports itself
    pub machine_port: u16,
    pub container_port: u16,
}

impl ProcessSpec {
    /// Conventional container name and ports for a process kind
    pub fn default_for(kind: ProcessKind) -> Self {
        match kind {
            ProcessKind::WebServer => Self {
                name: "nginx_container".to_string(),
                kind,
                machine_port: 80,
                container_port: 80,
            },
            ProcessKind::Cache => Self {
                name: "memcached_container".to_string(),
                kind,
                machine_port: 11101,
                container_port: 11211,
            },
        }
    }
}

/// Port published by a backend: container side and host side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
}

/// State of a managed process as last reported by its backend.
/// Never cached between invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedProcess {
    pub name: String,
    pub kind: ProcessKind,
    pub backend: BackendKind,
    pub address: Option<Ipv4Addr>,
    pub container_port: u16,
    pub core_limit: u32,
}

/// Externally reachable address of a benchmark target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = BenchError;

    /// Accepts `host` (port 80) or `host:port`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(BenchError::InvalidAddress(s.to_string()));
        }

        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port: u32 = port
                    .parse()
                    .map_err(|_| BenchError::InvalidAddress(s.to_string()))?;
                let port = crate::network::validate_port(port)?;
                if host.is_empty() {
                    return Err(BenchError::InvalidAddress(s.to_string()));
                }
                Ok(Self::new(host, port))
            }
            None => Ok(Self::new(s, 80)),
        }
    }
}
