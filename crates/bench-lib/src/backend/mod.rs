//! Container backends hosting the benchmark target
//!
//! Three drivers share the [`BackendDriver`] contract:
//! - [`DockerDriver`]: plain Docker container, ports published by Docker
//! - [`LxcDriver`]: LXC namespace container on fixed ports
//! - [`XContainerDriver`]: Docker image booted as a Xen HVM guest whose
//!   address is derived from the Xen bridge
//!
//! Drivers never remember anything between calls; every query goes back to
//! the backend's own state.

mod docker;
mod lxc;
mod xcontainer;

#[cfg(test)]
mod tests;

pub use docker::{parse_port_mapping, DockerDriver, DOCKER_INSPECT_FILTER, NGINX_CONFIG};
pub use lxc::LxcDriver;
pub use xcontainer::{XContainerDriver, XCONTAINER_INSPECT_FILTER};

use crate::error::{BenchError, Result};
use crate::exec::CommandRunner;
use crate::models::{BackendKind, PortMapping, ProcessSpec};
use crate::network::InterfaceResolver;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// How long to wait for a freshly created process to report an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryPolicy {
    /// Fixed delay before the first poll
    pub settle: Duration,
    /// Delay between polls
    pub poll_interval: Duration,
    /// Give up after this long (measured after the settle delay)
    pub timeout: Duration,
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

impl DiscoveryPolicy {
    /// No waiting at all; a single poll after launch
    pub fn immediate() -> Self {
        Self {
            settle: Duration::ZERO,
            poll_interval: Duration::ZERO,
            timeout: Duration::ZERO,
        }
    }
}

/// Host interfaces used with one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceNames {
    /// Externally routable interface clients connect to
    pub machine: String,
    /// Bridge the backend attaches containers to
    pub bridge: String,
}

impl InterfaceNames {
    pub fn new(machine: impl Into<String>, bridge: impl Into<String>) -> Self {
        Self {
            machine: machine.into(),
            bridge: bridge.into(),
        }
    }
}

/// Settings shared by the driver constructors
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub docker: InterfaceNames,
    pub lxc: InterfaceNames,
    pub xcontainer: InterfaceNames,
    pub discovery: DiscoveryPolicy,
    /// Where the nginx configuration mounted into web-server containers is written
    pub nginx_config_path: PathBuf,
    /// Working directory of the Xen guest launcher (`run.py`)
    pub launcher_dir: PathBuf,
    /// LXC template used by `lxc-create`
    pub lxc_template: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            docker: InterfaceNames::new("eno1", "docker0"),
            lxc: InterfaceNames::new("eno1", "lxcbr0"),
            xcontainer: InterfaceNames::new("em1", "xenbr0"),
            discovery: DiscoveryPolicy::default(),
            nginx_config_path: PathBuf::from("/dev/nginx.conf"),
            launcher_dir: PathBuf::from("/root/experiments/native/compute06/docker"),
            lxc_template: "ubuntu".to_string(),
        }
    }
}

/// Lifecycle and address discovery for one isolation backend
#[async_trait]
pub trait BackendDriver: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn interfaces(&self) -> &InterfaceNames;

    fn discovery_policy(&self) -> DiscoveryPolicy;

    /// Query the backend for the process address.
    ///
    /// `Ok(None)` means the backend answered and knows no such process;
    /// errors mean the backend itself could not be queried.
    async fn try_discover(&self, name: &str) -> Result<Option<Ipv4Addr>>;

    /// Start the process. Only called when discovery found nothing.
    async fn launch(&self, spec: &ProcessSpec, core_limit: u32) -> Result<()>;

    /// Work done once a freshly launched process has an address
    async fn prepare(&self, _spec: &ProcessSpec) -> Result<()> {
        Ok(())
    }

    /// Ports published by the backend itself, if it publishes any
    async fn port_mapping(&self, name: &str) -> Option<PortMapping>;

    async fn set_core_limit(&self, name: &str, cores: u32) -> Result<()>;

    /// Best effort; failures are logged only
    async fn stop(&self, name: &str);

    /// Best effort; failures are logged only
    async fn destroy(&self, name: &str);

    /// Process address, or `None` when absent *or* when the backend could
    /// not be queried. The two cases are reported identically on purpose;
    /// use [`BackendDriver::try_discover`] to tell them apart.
    async fn discover(&self, name: &str) -> Option<Ipv4Addr> {
        match self.try_discover(name).await {
            Ok(address) => address,
            Err(e) => {
                debug!(container = %name, backend = %self.kind(), error = %e, "Discovery failed, treating as absent");
                None
            }
        }
    }

    /// Create the process unless it already exists, then wait for its address
    async fn create(&self, spec: &ProcessSpec, core_limit: u32) -> Result<Ipv4Addr> {
        if let Some(address) = self.discover(&spec.name).await {
            debug!(container = %spec.name, address = %address, "Process already running");
            return Ok(address);
        }

        info!(container = %spec.name, backend = %self.kind(), kind = %spec.kind, "Creating process");
        self.launch(spec, core_limit).await?;

        let address = wait_for_address(self, &spec.name, self.discovery_policy()).await?;
        self.prepare(spec).await?;
        Ok(address)
    }
}

/// Poll discovery until an address appears or the policy times out
pub async fn wait_for_address<D>(
    driver: &D,
    name: &str,
    policy: DiscoveryPolicy,
) -> Result<Ipv4Addr>
where
    D: BackendDriver + ?Sized,
{
    if !policy.settle.is_zero() {
        debug!(container = %name, settle_secs = policy.settle.as_secs(), "Waiting for backend to settle");
        tokio::time::sleep(policy.settle).await;
    }

    let start = Instant::now();
    loop {
        if let Some(address) = driver.discover(name).await {
            info!(container = %name, address = %address, "Process address discovered");
            return Ok(address);
        }

        if start.elapsed() >= policy.timeout {
            return Err(BenchError::DiscoveryTimeout {
                name: name.to_string(),
                waited: policy.settle + start.elapsed(),
            });
        }

        tokio::time::sleep(policy.poll_interval).await;
    }
}

/// Create the driver for a backend
pub fn create_driver(
    kind: BackendKind,
    runner: Arc<dyn CommandRunner>,
    resolver: Arc<dyn InterfaceResolver>,
    settings: &BackendSettings,
) -> Arc<dyn BackendDriver> {
    match kind {
        BackendKind::Docker => {
            info!("Using Docker backend");
            Arc::new(DockerDriver::new(
                runner,
                settings.docker.clone(),
                settings.discovery,
                settings.nginx_config_path.clone(),
            ))
        }
        BackendKind::Lxc => {
            info!("Using LXC backend");
            Arc::new(LxcDriver::new(
                runner,
                settings.lxc.clone(),
                settings.discovery,
                settings.lxc_template.clone(),
            ))
        }
        BackendKind::XContainer => {
            info!("Using X-Container backend");
            Arc::new(XContainerDriver::new(runner, resolver, settings))
        }
    }
}

/// Whether backend stderr says the object does not exist
fn reports_missing(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    ["no such", "doesn't exist", "does not exist", "cannot find"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// First IPv4 address among the whitespace-separated tokens of inspection output
fn first_ipv4(output: &str) -> Option<Ipv4Addr> {
    output
        .split_whitespace()
        .find_map(|token| token.parse::<Ipv4Addr>().ok())
}
