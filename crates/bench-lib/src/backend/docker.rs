//! Plain Docker containers
//!
//! The web server is started with `-P`, so Docker picks the host port and
//! reports it through `docker port`. The cache is published explicitly on
//! its conventional machine port.

use super::{first_ipv4, reports_missing, BackendDriver, DiscoveryPolicy, InterfaceNames};
use crate::error::{BenchError, Result};
use crate::exec::{args, run_checked, CommandRunner};
use crate::models::{BackendKind, PortMapping, ProcessKind, ProcessSpec};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Inspect template printing every attached network's address, space separated
pub const DOCKER_INSPECT_FILTER: &str = "{{range .NetworkSettings.Networks}}{{.IPAddress}} {{end}}";

/// nginx configuration mounted read-only into web-server containers
pub const NGINX_CONFIG: &str = r#"
user  nginx;
worker_processes  1;

error_log  /var/log/nginx/error.log warn;
pid        /var/run/nginx.pid;

events {
    worker_connections  1024;
}

http {
    access_log off;
    include       /etc/nginx/mime.types;
    default_type  application/octet-stream;

    sendfile        off;

    keepalive_timeout  120;

    include /etc/nginx/conf.d/*.conf;
}
"#;

/// Memory given to memcached, in MiB
const MEMCACHED_MEMORY_MB: u32 = 256;

pub struct DockerDriver {
    runner: Arc<dyn CommandRunner>,
    interfaces: InterfaceNames,
    policy: DiscoveryPolicy,
    nginx_config_path: PathBuf,
    inspect_filter: String,
    /// Pass `--cpus` at `docker run`
    limit_cpus: bool,
}

impl DockerDriver {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        interfaces: InterfaceNames,
        policy: DiscoveryPolicy,
        nginx_config_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            interfaces,
            policy,
            nginx_config_path: nginx_config_path.into(),
            inspect_filter: DOCKER_INSPECT_FILTER.to_string(),
            limit_cpus: true,
        }
    }

    /// Use a different `docker inspect -f` template for address lookup
    pub fn with_inspect_filter(mut self, filter: impl Into<String>) -> Self {
        self.inspect_filter = filter.into();
        self
    }

    /// Do not pass a CPU limit to `docker run`
    pub fn without_cpu_limit(mut self) -> Self {
        self.limit_cpus = false;
        self
    }

    /// Full image/container id of a container
    pub async fn container_id(&self, name: &str) -> Result<String> {
        let output = run_checked(
            self.runner.as_ref(),
            "docker",
            &args(["inspect", "--format={{.Id}}", name]),
        )
        .await?;

        let id = output.stdout.trim().to_string();
        if id.is_empty() {
            return Err(BenchError::BackendUnavailable {
                name: name.to_string(),
                reason: "docker inspect returned no id".to_string(),
            });
        }
        Ok(id)
    }

    fn run_args(&self, spec: &ProcessSpec, core_limit: u32) -> Vec<String> {
        let mut run = args(["run", "--name", spec.name.as_str()]);

        match spec.kind {
            ProcessKind::WebServer => run.push("-P".to_string()),
            ProcessKind::Cache => {
                run.push("-p".to_string());
                run.push(format!(
                    "0.0.0.0:{}:{}",
                    spec.machine_port, spec.container_port
                ));
            }
        }

        if self.limit_cpus && core_limit > 0 {
            run.push(format!("--cpus={}", core_limit));
        }

        match spec.kind {
            ProcessKind::WebServer => {
                run.push("-v".to_string());
                run.push(format!(
                    "{}:/etc/nginx/nginx.conf:ro",
                    self.nginx_config_path.display()
                ));
                run.extend(args(["-d", "nginx"]));
            }
            ProcessKind::Cache => {
                run.extend(args(["-d", "memcached", "-m"]));
                run.push(MEMCACHED_MEMORY_MB.to_string());
            }
        }

        run
    }

    async fn best_effort(&self, subcommand: &str, name: &str) {
        match self.runner.run("docker", &args([subcommand, name])).await {
            Ok(output) if output.is_success() => {
                debug!(container = %name, "docker {} done", subcommand);
            }
            Ok(output) => {
                debug!(container = %name, status = output.status, stderr = %output.stderr.trim(), "docker {} failed", subcommand);
            }
            Err(e) => debug!(container = %name, error = %e, "docker {} failed", subcommand),
        }
    }
}

/// First `<container>/tcp -> 0.0.0.0:<host>` entry of `docker port` output
pub fn parse_port_mapping(output: &str) -> Option<PortMapping> {
    const MARKER: &str = "/tcp -> 0.0.0.0:";

    for line in output.lines() {
        let Some(pos) = line.find(MARKER) else {
            continue;
        };

        let before = &line[..pos];
        let container_digits: String = before
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let host_digits: String = line[pos + MARKER.len()..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();

        if let (Ok(container_port), Ok(host_port)) =
            (container_digits.parse(), host_digits.parse())
        {
            return Some(PortMapping {
                container_port,
                host_port,
            });
        }
    }

    None
}

#[async_trait]
impl BackendDriver for DockerDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Docker
    }

    fn interfaces(&self) -> &InterfaceNames {
        &self.interfaces
    }

    fn discovery_policy(&self) -> DiscoveryPolicy {
        self.policy
    }

    async fn try_discover(&self, name: &str) -> Result<Option<Ipv4Addr>> {
        let output = self
            .runner
            .run(
                "docker",
                &args(["inspect", "-f", self.inspect_filter.as_str(), name]),
            )
            .await?;

        if !output.is_success() {
            if reports_missing(&output.stderr) {
                return Ok(None);
            }
            return Err(BenchError::BackendUnavailable {
                name: name.to_string(),
                reason: output.stderr.trim().to_string(),
            });
        }

        let text = output.stdout.trim();
        if text.is_empty() {
            // Container exists but is not attached to a network yet
            return Ok(None);
        }

        first_ipv4(text)
            .map(Some)
            .ok_or_else(|| BenchError::InvalidAddress(text.to_string()))
    }

    async fn launch(&self, spec: &ProcessSpec, core_limit: u32) -> Result<()> {
        if spec.kind == ProcessKind::WebServer {
            self.runner
                .write_file(&self.nginx_config_path, NGINX_CONFIG)
                .await?;
        }

        run_checked(self.runner.as_ref(), "docker", &self.run_args(spec, core_limit)).await?;
        info!(container = %spec.name, "Docker container started");
        Ok(())
    }

    async fn port_mapping(&self, name: &str) -> Option<PortMapping> {
        let output = self.runner.run("docker", &args(["port", name])).await.ok()?;
        if !output.is_success() {
            return None;
        }
        parse_port_mapping(&output.stdout)
    }

    async fn set_core_limit(&self, name: &str, cores: u32) -> Result<()> {
        run_checked(
            self.runner.as_ref(),
            "docker",
            &args(["update".to_string(), format!("--cpus={}", cores), name.to_string()]),
        )
        .await?;
        Ok(())
    }

    async fn stop(&self, name: &str) {
        self.best_effort("stop", name).await;
    }

    async fn destroy(&self, name: &str) {
        self.best_effort("rm", name).await;
    }
}
