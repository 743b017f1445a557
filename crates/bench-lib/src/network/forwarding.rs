//! Port forwarding into a container's private address
//!
//! A [`ForwardingPlan`] is the fixed six-rule chain that exposes one
//! container port on a machine port:
//! 1. FORWARD accept to the container
//! 2. FORWARD accept from the container
//! 3. INPUT accept new connections on the machine port
//! 4. PREROUTING DNAT machine:port -> container:port
//! 5. POSTROUTING SNAT to the bridge for container-bound traffic
//! 6. OUTPUT DNAT for connections originating on the host itself
//!
//! Rules are applied in this order with a settle delay after each insert.
//! Installation checks for each rule first, so re-running a plan never
//! stacks duplicates at the head of a chain.

use crate::error::{BenchError, Result};
use crate::exec::{command_line, CommandRunner};
use crate::network::{parse_ipv4, validate_port};
use async_trait::async_trait;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on duplicate copies removed per rule during retraction
const MAX_DUPLICATES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Filter,
    Nat,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Filter => "filter",
            Table::Nat => "nat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    Forward,
    Input,
    Prerouting,
    Postrouting,
    Output,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Forward => "FORWARD",
            Chain::Input => "INPUT",
            Chain::Prerouting => "PREROUTING",
            Chain::Postrouting => "POSTROUTING",
            Chain::Output => "OUTPUT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Accept,
    Dnat(SocketAddrV4),
    Snat(Ipv4Addr),
}

/// One TCP packet-filter or NAT rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardingRule {
    pub table: Table,
    pub chain: Chain,
    /// `Some(0.0.0.0)` matches any source
    pub source: Option<Ipv4Addr>,
    pub destination: Option<Ipv4Addr>,
    pub destination_port: Option<u16>,
    /// Only match packets opening a new connection
    pub new_connections: bool,
    pub action: Action,
}

/// How a rule is handed to iptables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    Check,
    Insert,
    Delete,
}

impl RuleOp {
    fn flag(&self) -> &'static str {
        match self {
            RuleOp::Check => "-C",
            RuleOp::Insert => "-I",
            RuleOp::Delete => "-D",
        }
    }
}

impl ForwardingRule {
    /// iptables arguments for this rule
    pub fn to_args(&self, op: RuleOp) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            self.table.as_str().to_string(),
            op.flag().to_string(),
            self.chain.as_str().to_string(),
        ];

        if self.new_connections {
            args.extend(["-m", "state", "--state", "NEW"].map(String::from));
        }
        args.extend(["-p", "tcp"].map(String::from));
        if let Some(source) = self.source {
            args.push("-s".to_string());
            if source.is_unspecified() {
                args.push("0.0.0.0/0".to_string());
            } else {
                args.push(source.to_string());
            }
        }
        if let Some(destination) = self.destination {
            args.push("-d".to_string());
            args.push(destination.to_string());
        }
        if let Some(port) = self.destination_port {
            args.push("--dport".to_string());
            args.push(port.to_string());
        }

        match self.action {
            Action::Accept => args.extend(["-j", "ACCEPT"].map(String::from)),
            Action::Dnat(to) => {
                args.extend(["-j", "DNAT", "--to-destination"].map(String::from));
                args.push(to.to_string());
            }
            Action::Snat(to) => {
                args.extend(["-j", "SNAT", "--to-source"].map(String::from));
                args.push(to.to_string());
            }
        }

        args
    }
}

impl fmt::Display for ForwardingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args = self.to_args(RuleOp::Insert);
        f.write_str(&args[2..].join(" "))
    }
}

/// Validated addressing for one forwarded port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardingRequest {
    machine_ip: Ipv4Addr,
    machine_port: u16,
    process_ip: Ipv4Addr,
    process_port: u16,
    bridge_ip: Ipv4Addr,
}

impl ForwardingRequest {
    pub fn new(
        machine_ip: Ipv4Addr,
        machine_port: u32,
        process_ip: Ipv4Addr,
        process_port: u32,
        bridge_ip: Ipv4Addr,
    ) -> Result<Self> {
        for ip in [machine_ip, process_ip, bridge_ip] {
            if ip.is_unspecified() || ip.is_broadcast() {
                return Err(BenchError::InvalidAddress(ip.to_string()));
            }
        }

        Ok(Self {
            machine_ip,
            machine_port: validate_port(machine_port)?,
            process_ip,
            process_port: validate_port(process_port)?,
            bridge_ip,
        })
    }

    /// Build a request from textual addresses as reported by backends
    pub fn parse(
        machine_ip: &str,
        machine_port: u32,
        process_ip: &str,
        process_port: u32,
        bridge_ip: &str,
    ) -> Result<Self> {
        Self::new(
            parse_ipv4(machine_ip)?,
            machine_port,
            parse_ipv4(process_ip)?,
            process_port,
            parse_ipv4(bridge_ip)?,
        )
    }

    pub fn machine_ip(&self) -> Ipv4Addr {
        self.machine_ip
    }

    pub fn machine_port(&self) -> u16 {
        self.machine_port
    }

    pub fn process_ip(&self) -> Ipv4Addr {
        self.process_ip
    }

    pub fn process_port(&self) -> u16 {
        self.process_port
    }

    pub fn bridge_ip(&self) -> Ipv4Addr {
        self.bridge_ip
    }
}

/// The ordered rule chain for one forwarded port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingPlan {
    request: ForwardingRequest,
    rules: [ForwardingRule; 6],
}

impl ForwardingPlan {
    pub fn new(request: ForwardingRequest) -> Self {
        let process_target = SocketAddrV4::new(request.process_ip, request.process_port);

        let rules = [
            ForwardingRule {
                table: Table::Filter,
                chain: Chain::Forward,
                source: None,
                destination: Some(request.process_ip),
                destination_port: None,
                new_connections: false,
                action: Action::Accept,
            },
            ForwardingRule {
                table: Table::Filter,
                chain: Chain::Forward,
                source: Some(request.process_ip),
                destination: None,
                destination_port: None,
                new_connections: false,
                action: Action::Accept,
            },
            ForwardingRule {
                table: Table::Filter,
                chain: Chain::Input,
                source: Some(Ipv4Addr::UNSPECIFIED),
                destination: None,
                destination_port: Some(request.machine_port),
                new_connections: true,
                action: Action::Accept,
            },
            ForwardingRule {
                table: Table::Nat,
                chain: Chain::Prerouting,
                source: None,
                destination: Some(request.machine_ip),
                destination_port: Some(request.machine_port),
                new_connections: false,
                action: Action::Dnat(process_target),
            },
            ForwardingRule {
                table: Table::Nat,
                chain: Chain::Postrouting,
                source: None,
                destination: Some(request.process_ip),
                destination_port: Some(request.process_port),
                new_connections: false,
                action: Action::Snat(request.bridge_ip),
            },
            ForwardingRule {
                table: Table::Nat,
                chain: Chain::Output,
                source: None,
                destination: Some(request.machine_ip),
                destination_port: Some(request.machine_port),
                new_connections: false,
                action: Action::Dnat(process_target),
            },
        ];

        Self { request, rules }
    }

    pub fn request(&self) -> &ForwardingRequest {
        &self.request
    }

    /// Rules in installation order
    pub fn rules(&self) -> &[ForwardingRule] {
        &self.rules
    }
}

/// Host packet filter
#[async_trait]
pub trait RuleSink: Send + Sync {
    /// Whether an identical rule is already installed
    async fn contains(&self, rule: &ForwardingRule) -> Result<bool>;

    /// Insert the rule at the head of its chain
    async fn insert(&self, rule: &ForwardingRule) -> Result<()>;

    /// Remove one copy of the rule
    async fn delete(&self, rule: &ForwardingRule) -> Result<()>;
}

/// [`RuleSink`] backed by the `iptables` binary
pub struct IptablesSink {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl IptablesSink {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_program(runner, "iptables")
    }

    /// Use a different binary, e.g. `iptables-legacy`
    pub fn with_program(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    async fn apply(&self, rule: &ForwardingRule, op: RuleOp) -> Result<()> {
        let args = rule.to_args(op);
        let output = self.runner.run(&self.program, &args).await?;
        if !output.is_success() {
            return Err(BenchError::CommandFailed {
                command: command_line(&self.program, &args),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RuleSink for IptablesSink {
    async fn contains(&self, rule: &ForwardingRule) -> Result<bool> {
        // `-C` exits 1 when the rule is absent
        let output = self
            .runner
            .run(&self.program, &rule.to_args(RuleOp::Check))
            .await?;
        Ok(output.is_success())
    }

    async fn insert(&self, rule: &ForwardingRule) -> Result<()> {
        self.apply(rule, RuleOp::Insert).await
    }

    async fn delete(&self, rule: &ForwardingRule) -> Result<()> {
        self.apply(rule, RuleOp::Delete).await
    }
}

/// Outcome of installing a plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub inserted: usize,
    pub already_present: usize,
    pub failed: usize,
}

/// Applies and retracts forwarding plans
pub struct ForwardingInstaller {
    sink: Arc<dyn RuleSink>,
    settle: Duration,
}

impl ForwardingInstaller {
    pub fn new(sink: Arc<dyn RuleSink>, settle: Duration) -> Self {
        Self { sink, settle }
    }

    /// Install every missing rule of the plan, in order.
    ///
    /// A failing insert is logged and the remaining rules are still tried.
    pub async fn install(&self, plan: &ForwardingPlan) -> InstallReport {
        let request = plan.request();
        info!(
            machine = %SocketAddrV4::new(request.machine_ip(), request.machine_port()),
            process = %SocketAddrV4::new(request.process_ip(), request.process_port()),
            bridge = %request.bridge_ip(),
            "Installing port forwarding"
        );

        let mut report = InstallReport::default();

        for rule in plan.rules() {
            let present = match self.sink.contains(rule).await {
                Ok(present) => present,
                Err(e) => {
                    debug!(rule = %rule, error = %e, "Rule check failed, inserting anyway");
                    false
                }
            };

            if present {
                debug!(rule = %rule, "Rule already installed");
                report.already_present += 1;
                continue;
            }

            match self.sink.insert(rule).await {
                Ok(()) => {
                    debug!(rule = %rule, "Rule inserted");
                    report.inserted += 1;
                }
                Err(e) => {
                    warn!(rule = %rule, error = %e, "Failed to insert rule");
                    report.failed += 1;
                }
            }

            if !self.settle.is_zero() {
                tokio::time::sleep(self.settle).await;
            }
        }

        report
    }

    /// Remove every copy of the plan's rules, last rule first.
    /// Returns the number of rules deleted.
    pub async fn retract(&self, plan: &ForwardingPlan) -> usize {
        let mut removed = 0;

        for rule in plan.rules().iter().rev() {
            for _ in 0..MAX_DUPLICATES {
                match self.sink.contains(rule).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        warn!(rule = %rule, error = %e, "Rule check failed during retraction");
                        break;
                    }
                }

                if let Err(e) = self.sink.delete(rule).await {
                    warn!(rule = %rule, error = %e, "Failed to delete rule");
                    break;
                }
                removed += 1;
            }
        }

        info!(removed, "Retracted port forwarding");
        removed
    }
}
