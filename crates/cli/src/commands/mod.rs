//! Command implementations

pub mod benchmark;
pub mod provision;
pub mod teardown;

use crate::config::BenchConfig;
use bench_lib::backend::{create_driver, DiscoveryPolicy};
use bench_lib::exec::{CommandRunner, DryRunRunner, SystemRunner};
use bench_lib::network::{ForwardingInstaller, IpCommandResolver, IptablesSink};
use bench_lib::{BackendKind, Provisioner};
use std::sync::Arc;
use std::time::Duration;

/// Everything a command needs, assembled once at startup
pub struct AppContext {
    pub config: BenchConfig,
    pub backend: BackendKind,
    pub runner: Arc<dyn CommandRunner>,
    pub dry_run: bool,
}

impl AppContext {
    pub fn new(config: BenchConfig, backend: BackendKind, dry_run: bool) -> Self {
        let runner: Arc<dyn CommandRunner> = if dry_run {
            Arc::new(DryRunRunner::new())
        } else {
            Arc::new(SystemRunner)
        };

        Self {
            config,
            backend,
            runner,
            dry_run,
        }
    }

    /// Provisioner for the selected backend.
    ///
    /// Dry runs do not wait for anything: nothing was started.
    pub fn provisioner(&self) -> Provisioner {
        let mut settings = self.config.backend_settings();
        let mut provision = self.config.provision_config();
        if self.dry_run {
            settings.discovery = DiscoveryPolicy::immediate();
            provision.rule_settle = Duration::ZERO;
        }

        let resolver = Arc::new(IpCommandResolver::new(self.runner.clone()));
        let driver = create_driver(self.backend, self.runner.clone(), resolver.clone(), &settings);
        let sink = Arc::new(IptablesSink::with_program(
            self.runner.clone(),
            self.config.iptables.clone(),
        ));
        let installer = ForwardingInstaller::new(sink, provision.rule_settle);

        Provisioner::new(driver, resolver, installer, provision)
    }
}

/// Load-generator parameters from the command line
#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Empty means the default sweep
    pub rates: Vec<u32>,
    pub threads: u32,
    pub connections: u32,
    pub duration_secs: u32,
}
