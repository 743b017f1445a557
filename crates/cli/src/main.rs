//! Container benchmark CLI
//!
//! Provisions a web server or cache inside a container backend, forwards a
//! machine port to it, sweeps it with a load generator and tears it down.

mod commands;
mod config;
mod output;

use anyhow::Result;
use bench_lib::{BackendKind, Endpoint, ProcessKind};
use clap::{Parser, ValueEnum};
use commands::{benchmark, provision, teardown, AppContext, SweepOptions};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Container benchmark CLI
#[derive(Parser)]
#[command(name = "cbench")]
#[command(author, version, about = "Provision and benchmark servers in Docker, LXC and X-Containers", long_about = None)]
pub struct Cli {
    /// Container backend hosting the server
    #[arg(long, short = 'c', value_enum, default_value = "docker")]
    pub container: ContainerArg,

    /// Server process to run
    #[arg(long, short = 'p', value_enum)]
    pub process: ProcessArg,

    /// Benchmark this address (`host` or `host:port`) instead of provisioning
    #[arg(long, short = 'b')]
    pub benchmark_address: Option<Endpoint>,

    /// Stop and destroy the container, retracting its port forwarding
    #[arg(long, short = 'd', conflicts_with = "benchmark_address")]
    pub destroy: bool,

    /// CPU cores granted to the container
    #[arg(long, default_value_t = 1)]
    pub cores: u32,

    /// Duration of each benchmark run in seconds
    #[arg(long, default_value_t = 60)]
    pub duration: u32,

    /// Offered rates to sweep, comma separated (defaults to the standard sweep)
    #[arg(long, value_delimiter = ',')]
    pub rates: Vec<u32>,

    /// Load generator threads
    #[arg(long, default_value_t = 1)]
    pub threads: u32,

    /// Load generator connections
    #[arg(long, default_value_t = 1)]
    pub connections: u32,

    /// Root directory for benchmark results (overrides the config file)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Configuration file (defaults to ~/.config/cbench/config.toml)
    #[arg(long, env = "CBENCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log every command instead of running it
    #[arg(long)]
    pub dry_run: bool,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ContainerArg {
    /// Plain Docker container
    Docker,
    /// LXC namespace container
    Linux,
    /// Docker image booted as a Xen guest
    Xcontainer,
}

impl From<ContainerArg> for BackendKind {
    fn from(arg: ContainerArg) -> Self {
        match arg {
            ContainerArg::Docker => BackendKind::Docker,
            ContainerArg::Linux => BackendKind::Lxc,
            ContainerArg::Xcontainer => BackendKind::XContainer,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProcessArg {
    /// nginx web server
    Nginx,
    /// memcached cache
    Memcached,
}

impl From<ProcessArg> for ProcessKind {
    fn from(arg: ProcessArg) -> Self {
        match arg {
            ProcessArg::Nginx => ProcessKind::WebServer,
            ProcessArg::Memcached => ProcessKind::Cache,
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so JSON results on stdout stay parseable
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = config::BenchConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.output_dir {
        config.output_root = dir;
    }

    let backend = BackendKind::from(cli.container);
    let process = ProcessKind::from(cli.process);
    let ctx = AppContext::new(config, backend, cli.dry_run);

    if let Some(endpoint) = cli.benchmark_address {
        let options = SweepOptions {
            rates: cli.rates,
            threads: cli.threads,
            connections: cli.connections,
            duration_secs: cli.duration,
        };
        benchmark::run_benchmark(&ctx, process, &endpoint, options, cli.format).await?;
    } else if cli.destroy {
        teardown::teardown(&ctx, process, cli.format).await?;
    } else {
        provision::provision(&ctx, process, cli.cores, cli.format).await?;
    }

    Ok(())
}
