//! Configuration management for the CLI
//!
//! Values come from built-in defaults, then an optional config file, then
//! `CBENCH_*` environment variables (`CBENCH_DOCKER__MACHINE=eth0`).

use anyhow::{Context, Result};
use bench_lib::backend::{BackendSettings, DiscoveryPolicy, InterfaceNames};
use bench_lib::{ProcessKind, ProcessSpec, ProvisionConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Interfaces used with one backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub machine: String,
    pub bridge: String,
}

impl InterfaceConfig {
    fn new(machine: &str, bridge: &str) -> Self {
        Self {
            machine: machine.to_string(),
            bridge: bridge.to_string(),
        }
    }
}

impl From<InterfaceConfig> for InterfaceNames {
    fn from(config: InterfaceConfig) -> Self {
        InterfaceNames::new(config.machine, config.bridge)
    }
}

/// Name and ports of one managed process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub name: String,
    pub machine_port: u16,
    pub container_port: u16,
}

impl ProcessConfig {
    fn default_for(kind: ProcessKind) -> Self {
        let spec = ProcessSpec::default_for(kind);
        Self {
            name: spec.name,
            machine_port: spec.machine_port,
            container_port: spec.container_port,
        }
    }

    fn to_spec(&self, kind: ProcessKind) -> ProcessSpec {
        ProcessSpec {
            name: self.name.clone(),
            kind,
            machine_port: self.machine_port,
            container_port: self.container_port,
        }
    }
}

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub docker: InterfaceConfig,
    pub lxc: InterfaceConfig,
    pub xcontainer: InterfaceConfig,
    pub web_server: ProcessConfig,
    pub cache: ProcessConfig,
    /// Delay after launching a container before its address is polled
    pub settle_secs: u64,
    /// Delay after each inserted forwarding rule
    pub rule_settle_ms: u64,
    pub poll_interval_ms: u64,
    pub discovery_timeout_secs: u64,
    /// wrk2 binary
    pub wrk2_path: PathBuf,
    /// Directory holding `load_memcache` and `mutated_memcache`
    pub cache_tools_dir: PathBuf,
    pub nginx_config_path: PathBuf,
    /// Working directory of the X-Container guest launcher
    pub launcher_dir: PathBuf,
    pub lxc_template: String,
    /// Root of the benchmark session directories
    pub output_root: PathBuf,
    pub iptables: String,
}

impl Default for BenchConfig {
    fn default() -> Self {
        let backend = BackendSettings::default();
        Self {
            docker: InterfaceConfig::new("eno1", "docker0"),
            lxc: InterfaceConfig::new("eno1", "lxcbr0"),
            xcontainer: InterfaceConfig::new("em1", "xenbr0"),
            web_server: ProcessConfig::default_for(ProcessKind::WebServer),
            cache: ProcessConfig::default_for(ProcessKind::Cache),
            settle_secs: 5,
            rule_settle_ms: 1000,
            poll_interval_ms: 1000,
            discovery_timeout_secs: 60,
            wrk2_path: PathBuf::from("XContainerBolt/wrk2/wrk"),
            cache_tools_dir: PathBuf::from("XContainerBolt/mutated/client"),
            nginx_config_path: backend.nginx_config_path,
            launcher_dir: backend.launcher_dir,
            lxc_template: backend.lxc_template,
            output_root: PathBuf::from("benchmark"),
            iptables: "iptables".to_string(),
        }
    }
}

impl BenchConfig {
    /// Load configuration, layering file and environment over the defaults.
    ///
    /// An explicitly given file must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (file, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::config_path() {
                Some(path) => (path, false),
                None => return Self::from_sources(None, false),
            },
        };
        Self::from_sources(Some(&file), required)
    }

    fn from_sources(file: Option<&Path>, required: bool) -> Result<Self> {
        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&Self::default()).context("Failed to encode default config")?,
        );

        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(required));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("CBENCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Default configuration file location
    fn config_path() -> Option<PathBuf> {
        let home = dirs_next::home_dir()?;
        Some(home.join(".config").join("cbench").join("config.toml"))
    }

    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            docker: self.docker.clone().into(),
            lxc: self.lxc.clone().into(),
            xcontainer: self.xcontainer.clone().into(),
            discovery: DiscoveryPolicy {
                settle: Duration::from_secs(self.settle_secs),
                poll_interval: Duration::from_millis(self.poll_interval_ms),
                timeout: Duration::from_secs(self.discovery_timeout_secs),
            },
            nginx_config_path: self.nginx_config_path.clone(),
            launcher_dir: self.launcher_dir.clone(),
            lxc_template: self.lxc_template.clone(),
        }
    }

    pub fn provision_config(&self) -> ProvisionConfig {
        ProvisionConfig {
            web_server: self.web_server.to_spec(ProcessKind::WebServer),
            cache: self.cache.to_spec(ProcessKind::Cache),
            rule_settle: self.rule_settle(),
        }
    }

    pub fn rule_settle(&self) -> Duration {
        Duration::from_millis(self.rule_settle_ms)
    }
}
