//! X-Containers: a Docker image booted as a Xen HVM guest
//!
//! The image is first created as an ordinary Docker container so its id is
//! known, then stopped and handed to the guest launcher. The guest has no
//! Docker network; its address sits next to the Xen bridge address.

use super::{
    reports_missing, BackendDriver, BackendSettings, DiscoveryPolicy, DockerDriver, InterfaceNames,
};
use crate::error::{BenchError, Result};
use crate::exec::{args, run_checked, CommandRunner};
use crate::models::{BackendKind, PortMapping, ProcessSpec};
use crate::network::{derive_guest_address, require_interface_address, InterfaceResolver};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Inspect template for containers destined to run as guests
pub const XCONTAINER_INSPECT_FILTER: &str = "{{.NetworkSettings.IPAddress}}";

pub struct XContainerDriver {
    runner: Arc<dyn CommandRunner>,
    resolver: Arc<dyn InterfaceResolver>,
    docker: DockerDriver,
    interfaces: InterfaceNames,
    policy: DiscoveryPolicy,
    launcher_dir: PathBuf,
}

impl XContainerDriver {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        resolver: Arc<dyn InterfaceResolver>,
        settings: &BackendSettings,
    ) -> Self {
        let docker = DockerDriver::new(
            runner.clone(),
            settings.docker.clone(),
            settings.discovery,
            settings.nginx_config_path.clone(),
        )
        .with_inspect_filter(XCONTAINER_INSPECT_FILTER)
        .without_cpu_limit();

        Self {
            runner,
            resolver,
            docker,
            interfaces: settings.xcontainer.clone(),
            policy: settings.discovery,
            launcher_dir: settings.launcher_dir.clone(),
        }
    }

    /// Guest address derived from the current bridge address
    pub async fn guest_address(&self) -> Result<Ipv4Addr> {
        let bridge = require_interface_address(self.resolver.as_ref(), &self.interfaces.bridge).await?;
        Ok(derive_guest_address(bridge))
    }

    async fn xl_best_effort(&self, subcommand: &str, name: &str) {
        match self.runner.run("xl", &args([subcommand, name])).await {
            Ok(output) if output.is_success() => debug!(guest = %name, "xl {} done", subcommand),
            Ok(output) => {
                debug!(guest = %name, status = output.status, stderr = %output.stderr.trim(), "xl {} failed", subcommand)
            }
            Err(e) => debug!(guest = %name, error = %e, "xl {} failed", subcommand),
        }
    }
}

#[async_trait]
impl BackendDriver for XContainerDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::XContainer
    }

    fn interfaces(&self) -> &InterfaceNames {
        &self.interfaces
    }

    fn discovery_policy(&self) -> DiscoveryPolicy {
        self.policy
    }

    async fn try_discover(&self, name: &str) -> Result<Option<Ipv4Addr>> {
        // The guest exists while Xen knows a domain id for it
        let output = self.runner.run("xl", &args(["domid", name])).await?;
        if !output.is_success() {
            if reports_missing(&output.stderr) {
                return Ok(None);
            }
            return Err(BenchError::BackendUnavailable {
                name: name.to_string(),
                reason: output.stderr.trim().to_string(),
            });
        }
        if output.stdout.trim().is_empty() {
            return Ok(None);
        }

        self.guest_address().await.map(Some)
    }

    async fn launch(&self, spec: &ProcessSpec, core_limit: u32) -> Result<()> {
        // Core limits are applied by the launcher, not by Docker
        self.docker.create(spec, 0).await?;
        let image_id = self.docker.container_id(&spec.name).await?;
        self.docker.stop(&spec.name).await;

        let guest_ip = self.guest_address().await?;
        let launch = vec![
            "run.py".to_string(),
            "--id".to_string(),
            image_id,
            "--ip".to_string(),
            guest_ip.to_string(),
            "--hvm".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            format!("--cpu={}", core_limit.max(1)),
        ];
        self.runner
            .spawn_detached("python", &launch, &self.launcher_dir)
            .await?;

        info!(guest = %spec.name, address = %guest_ip, "X-Container guest launched");
        Ok(())
    }

    async fn port_mapping(&self, _name: &str) -> Option<PortMapping> {
        None
    }

    async fn set_core_limit(&self, name: &str, cores: u32) -> Result<()> {
        run_checked(
            self.runner.as_ref(),
            "xl",
            &args(["vcpu-set".to_string(), name.to_string(), cores.to_string()]),
        )
        .await?;
        Ok(())
    }

    async fn stop(&self, name: &str) {
        self.xl_best_effort("shutdown", name).await;
    }

    async fn destroy(&self, name: &str) {
        self.xl_best_effort("destroy", name).await;
        self.docker.destroy(name).await;
    }
}
