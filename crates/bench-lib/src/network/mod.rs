//! Host network queries and port forwarding
//!
//! This module resolves interface addresses on the host and installs the
//! packet-filter chain that forwards a machine port into a container's
//! private address.

mod forwarding;

pub use forwarding::{
    Action, Chain, ForwardingInstaller, ForwardingPlan, ForwardingRequest, ForwardingRule,
    InstallReport, IptablesSink, RuleOp, RuleSink, Table,
};

use crate::error::{BenchError, Result};
use crate::exec::{args, CommandRunner};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::debug;

/// Looks up the IPv4 address bound to a host interface
#[async_trait]
pub trait InterfaceResolver: Send + Sync {
    /// Returns `None` when the interface does not exist or has no IPv4 address
    async fn interface_address(&self, interface: &str) -> Result<Option<Ipv4Addr>>;
}

/// Resolve an interface address, failing when none is bound
pub async fn require_interface_address(
    resolver: &dyn InterfaceResolver,
    interface: &str,
) -> Result<Ipv4Addr> {
    resolver
        .interface_address(interface)
        .await?
        .ok_or_else(|| BenchError::NoInterfaceAddress(interface.to_string()))
}

/// Resolver backed by `ip -4 -o addr show dev <interface>`
pub struct IpCommandResolver {
    runner: Arc<dyn CommandRunner>,
}

impl IpCommandResolver {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Parse the first `inet a.b.c.d/nn` entry of `ip -o` output
    pub fn parse_ip_output(output: &str) -> Option<Ipv4Addr> {
        for line in output.lines() {
            let mut parts = line.split_whitespace();
            while let Some(part) = parts.next() {
                if part == "inet" {
                    let cidr = parts.next()?;
                    let address = cidr.split('/').next()?;
                    if let Ok(ip) = address.parse() {
                        return Some(ip);
                    }
                }
            }
        }
        None
    }
}

#[async_trait]
impl InterfaceResolver for IpCommandResolver {
    async fn interface_address(&self, interface: &str) -> Result<Option<Ipv4Addr>> {
        let output = self
            .runner
            .run("ip", &args(["-4", "-o", "addr", "show", "dev", interface]))
            .await?;

        if !output.is_success() {
            debug!(interface = %interface, status = output.status, "Interface lookup failed");
            return Ok(None);
        }

        Ok(Self::parse_ip_output(&output.stdout))
    }
}

/// Parse a dotted-quad IPv4 address
pub fn parse_ipv4(value: &str) -> Result<Ipv4Addr> {
    let trimmed = value.trim();
    trimmed
        .parse()
        .map_err(|_| BenchError::InvalidAddress(value.to_string()))
}

/// Check a port number lies in 1..=65535
pub fn validate_port(port: u32) -> Result<u16> {
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(BenchError::InvalidPort(port)),
    }
}

/// Guest address next to a bridge: last octet incremented modulo 255
pub fn derive_guest_address(bridge: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, d] = bridge.octets();
    let last = ((u16::from(d) + 1) % 255) as u8;
    Ipv4Addr::new(a, b, c, last)
}
