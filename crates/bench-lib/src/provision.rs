//! Provisioning orchestration
//!
//! Drives one backend through create-or-reuse, resolves host addressing and
//! installs the forwarding plan that makes the process reachable from the
//! machine's external interface. Teardown retracts that plan before the
//! process is stopped and destroyed.

use crate::backend::BackendDriver;
use crate::error::Result;
use crate::models::{Endpoint, ManagedProcess, PortMapping, ProcessKind, ProcessSpec};
use crate::network::{
    require_interface_address, ForwardingInstaller, ForwardingPlan, ForwardingRequest,
    InstallReport, InterfaceResolver,
};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Immutable per-run provisioning settings
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub web_server: ProcessSpec,
    pub cache: ProcessSpec,
    /// Delay after each inserted forwarding rule
    pub rule_settle: Duration,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            web_server: ProcessSpec::default_for(ProcessKind::WebServer),
            cache: ProcessSpec::default_for(ProcessKind::Cache),
            rule_settle: Duration::from_secs(1),
        }
    }
}

impl ProvisionConfig {
    pub fn spec(&self, kind: ProcessKind) -> &ProcessSpec {
        match kind {
            ProcessKind::WebServer => &self.web_server,
            ProcessKind::Cache => &self.cache,
        }
    }
}

/// Result of a successful provisioning run
#[derive(Debug, Clone, Serialize)]
pub struct Provisioned {
    pub process: ManagedProcess,
    pub endpoint: Endpoint,
    pub mapping: PortMapping,
    pub rules_inserted: usize,
    pub rules_present: usize,
    pub rules_failed: usize,
}

/// Result of a teardown run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// Whether the process was still discoverable before it was stopped
    pub was_running: bool,
    pub rules_removed: usize,
}

/// Provisions and tears down managed processes on one backend
pub struct Provisioner {
    driver: Arc<dyn BackendDriver>,
    resolver: Arc<dyn InterfaceResolver>,
    installer: ForwardingInstaller,
    config: ProvisionConfig,
}

impl Provisioner {
    pub fn new(
        driver: Arc<dyn BackendDriver>,
        resolver: Arc<dyn InterfaceResolver>,
        installer: ForwardingInstaller,
        config: ProvisionConfig,
    ) -> Self {
        Self {
            driver,
            resolver,
            installer,
            config,
        }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Bring the process up and make it reachable on the machine interface
    pub async fn provision(&self, kind: ProcessKind, core_limit: u32) -> Result<Provisioned> {
        let spec = self.config.spec(kind);
        info!(container = %spec.name, backend = %self.driver.kind(), cores = core_limit, "Provisioning");

        let address = self.driver.create(spec, core_limit).await?;
        let plan = self.forwarding_plan(spec, address).await?;

        if let Err(e) = self.driver.set_core_limit(&spec.name, core_limit).await {
            warn!(container = %spec.name, cores = core_limit, error = %e, "Failed to apply core limit");
        }

        let report: InstallReport = self.installer.install(&plan).await;
        if report.failed > 0 {
            warn!(failed = report.failed, "Some forwarding rules were not installed");
        }

        let request = plan.request();
        let mapping = PortMapping {
            container_port: request.process_port(),
            host_port: request.machine_port(),
        };
        let endpoint = Endpoint::new(request.machine_ip().to_string(), mapping.host_port);
        info!(
            container = %spec.name,
            endpoint = %endpoint,
            address = %address,
            container_port = mapping.container_port,
            "Process reachable"
        );

        Ok(Provisioned {
            process: ManagedProcess {
                name: spec.name.clone(),
                kind,
                backend: self.driver.kind(),
                address: Some(address),
                container_port: mapping.container_port,
                core_limit,
            },
            endpoint,
            mapping,
            rules_inserted: report.inserted,
            rules_present: report.already_present,
            rules_failed: report.failed,
        })
    }

    /// Retract forwarding, then stop and destroy the process
    pub async fn teardown(&self, kind: ProcessKind) -> TeardownReport {
        let spec = self.config.spec(kind);
        info!(container = %spec.name, backend = %self.driver.kind(), "Tearing down");

        let mut report = TeardownReport::default();

        if let Some(address) = self.driver.discover(&spec.name).await {
            report.was_running = true;
            match self.forwarding_plan(spec, address).await {
                Ok(plan) => report.rules_removed = self.installer.retract(&plan).await,
                Err(e) => {
                    warn!(container = %spec.name, error = %e, "Cannot rebuild forwarding plan, rules left in place")
                }
            }
        }

        self.driver.stop(&spec.name).await;
        self.driver.destroy(&spec.name).await;
        report
    }

    /// Current state of the process as reported by the backend
    pub async fn inspect(&self, kind: ProcessKind) -> ManagedProcess {
        let spec = self.config.spec(kind);
        let address = self.driver.discover(&spec.name).await;
        let mapping = match address {
            Some(_) => self.port_mapping(spec).await,
            None => Self::fixed_mapping(spec),
        };

        ManagedProcess {
            name: spec.name.clone(),
            kind,
            backend: self.driver.kind(),
            address,
            container_port: mapping.container_port,
            core_limit: 0,
        }
    }

    /// Resolve host addressing and validate it into a plan for `address`
    async fn forwarding_plan(&self, spec: &ProcessSpec, address: Ipv4Addr) -> Result<ForwardingPlan> {
        let mapping = self.port_mapping(spec).await;
        let interfaces = self.driver.interfaces();
        let machine_ip = require_interface_address(self.resolver.as_ref(), &interfaces.machine).await?;
        let bridge_ip = require_interface_address(self.resolver.as_ref(), &interfaces.bridge).await?;

        let request = ForwardingRequest::new(
            machine_ip,
            u32::from(mapping.host_port),
            address,
            u32::from(mapping.container_port),
            bridge_ip,
        )?;
        Ok(ForwardingPlan::new(request))
    }

    /// Published mapping, or the conventional ports for backends that do not publish
    async fn port_mapping(&self, spec: &ProcessSpec) -> PortMapping {
        match self.driver.port_mapping(&spec.name).await {
            Some(mapping) => mapping,
            None => Self::fixed_mapping(spec),
        }
    }

    fn fixed_mapping(spec: &ProcessSpec) -> PortMapping {
        PortMapping {
            container_port: spec.container_port,
            host_port: spec.machine_port,
        }
    }
}
