//! LXC namespace containers
//!
//! LXC does not publish ports, so the orchestrator forwards the process's
//! conventional machine port. The server itself is installed inside the
//! container after it first obtains an address.

use super::{first_ipv4, reports_missing, BackendDriver, DiscoveryPolicy, InterfaceNames};
use crate::error::{BenchError, Result};
use crate::exec::{args, command_line, run_checked, CommandRunner};
use crate::models::{BackendKind, PortMapping, ProcessKind, ProcessSpec};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct LxcDriver {
    runner: Arc<dyn CommandRunner>,
    interfaces: InterfaceNames,
    policy: DiscoveryPolicy,
    template: String,
}

impl LxcDriver {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        interfaces: InterfaceNames,
        policy: DiscoveryPolicy,
        template: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            interfaces,
            policy,
            template: template.into(),
        }
    }

    /// Shell commands that install and start the server inside the container
    pub fn bootstrap_commands(kind: ProcessKind) -> &'static [&'static str] {
        match kind {
            ProcessKind::WebServer => &[
                "sudo apt-get update",
                "sudo apt-get install -y nginx",
                "systemctl status nginx",
            ],
            ProcessKind::Cache => &[
                "sudo apt-get update",
                "sudo apt-get install -y memcached",
                "memcached -u root -d",
            ],
        }
    }

    /// Run a shell command inside the container
    pub async fn attach(&self, name: &str, command: &str) -> Result<()> {
        let attach = args(["--name", name, "--", "/bin/sh", "-c", command]);
        let output = self.runner.run("lxc-attach", &attach).await?;
        if !output.is_success() {
            // Bootstrap continues; a failed status check is not fatal
            warn!(container = %name, command = %command_line("lxc-attach", &attach), status = output.status, "Command inside container failed");
        }
        Ok(())
    }

    async fn best_effort(&self, program: &str, name: &str) {
        match self.runner.run(program, &args(["--name", name])).await {
            Ok(output) if output.is_success() => debug!(container = %name, "{} done", program),
            Ok(output) => {
                debug!(container = %name, status = output.status, stderr = %output.stderr.trim(), "{} failed", program)
            }
            Err(e) => debug!(container = %name, error = %e, "{} failed", program),
        }
    }
}

#[async_trait]
impl BackendDriver for LxcDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Lxc
    }

    fn interfaces(&self) -> &InterfaceNames {
        &self.interfaces
    }

    fn discovery_policy(&self) -> DiscoveryPolicy {
        self.policy
    }

    async fn try_discover(&self, name: &str) -> Result<Option<Ipv4Addr>> {
        let output = self.runner.run("lxc-info", &args(["-n", name, "-iH"])).await?;

        if !output.is_success() {
            if reports_missing(&output.stderr) {
                return Ok(None);
            }
            return Err(BenchError::BackendUnavailable {
                name: name.to_string(),
                reason: output.stderr.trim().to_string(),
            });
        }

        // One address per line; IPv6 entries are skipped
        Ok(first_ipv4(&output.stdout))
    }

    async fn launch(&self, spec: &ProcessSpec, _core_limit: u32) -> Result<()> {
        run_checked(
            self.runner.as_ref(),
            "lxc-create",
            &args(["--name", spec.name.as_str(), "-t", self.template.as_str()]),
        )
        .await?;
        run_checked(
            self.runner.as_ref(),
            "lxc-start",
            &args(["--name", spec.name.as_str(), "-d"]),
        )
        .await?;

        info!(container = %spec.name, template = %self.template, "LXC container started");
        Ok(())
    }

    async fn prepare(&self, spec: &ProcessSpec) -> Result<()> {
        info!(container = %spec.name, kind = %spec.kind, "Installing server inside container");
        for command in Self::bootstrap_commands(spec.kind) {
            self.attach(&spec.name, command).await?;
        }
        Ok(())
    }

    async fn port_mapping(&self, _name: &str) -> Option<PortMapping> {
        None
    }

    async fn set_core_limit(&self, name: &str, cores: u32) -> Result<()> {
        run_checked(
            self.runner.as_ref(),
            "lxc",
            &args([
                "config".to_string(),
                "set".to_string(),
                name.to_string(),
                "limits.cpu".to_string(),
                cores.to_string(),
            ]),
        )
        .await?;
        Ok(())
    }

    async fn stop(&self, name: &str) {
        self.best_effort("lxc-stop", name).await;
    }

    async fn destroy(&self, name: &str) {
        self.best_effort("lxc-destroy", name).await;
    }
}
