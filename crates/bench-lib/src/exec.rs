//! External command execution
//!
//! Every backend, firewall and load-generator call goes through
//! [`CommandRunner`], so whole provisioning flows can be replayed against a
//! [`RecordingRunner`] without touching the host.

use crate::error::{BenchError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::process::Command;
use tracing::{debug, info};

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

/// Runs external programs
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a program to completion and capture its output.
    /// A non-zero exit is reported in [`CommandOutput::status`], not as an error.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    /// Launch a program without waiting for it
    async fn spawn_detached(&self, program: &str, args: &[String], cwd: &Path) -> Result<()>;

    /// Write a file consumed by a launched program
    async fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        tokio::fs::write(path, contents).await?;
        debug!(path = %path.display(), "Wrote file");
        Ok(())
    }
}

/// Render a command line for logs and error messages
pub fn command_line(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Run a command and turn a non-zero exit into [`BenchError::CommandFailed`]
pub async fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
) -> Result<CommandOutput> {
    let output = runner.run(program, args).await?;
    if !output.is_success() {
        return Err(BenchError::CommandFailed {
            command: command_line(program, args),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

/// Build an owned argument vector from string slices
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Runner backed by real processes
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!(command = %command_line(program, args), "Running command");

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|source| BenchError::Spawn {
                command: command_line(program, args),
                source,
            })?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn spawn_detached(&self, program: &str, args: &[String], cwd: &Path) -> Result<()> {
        info!(command = %command_line(program, args), cwd = %cwd.display(), "Launching detached command");

        Command::new(program)
            .args(args)
            .current_dir(cwd)
            .spawn()
            .map_err(|source| BenchError::Spawn {
                command: command_line(program, args),
                source,
            })?;

        Ok(())
    }
}

/// Host address reported by a [`DryRunRunner`] (TEST-NET-1)
pub const DRY_RUN_HOST: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

/// Process address reported by a [`DryRunRunner`]
pub const DRY_RUN_PROCESS: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 2);

/// Logs every command instead of running it.
///
/// Lookups a provisioning flow depends on get placeholder answers so the
/// whole flow can be previewed. Every interface has [`DRY_RUN_HOST`]. A
/// process is absent on its first lookup and at [`DRY_RUN_PROCESS`] after
/// that, so launch commands show up too. Rule checks always report the
/// rule missing. Files are not written.
#[derive(Debug, Default)]
pub struct DryRunRunner {
    looked_up: Mutex<HashSet<String>>,
}

impl DryRunRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty on the first lookup of a command line, `found` afterwards
    fn lookup(&self, line: &str, found: String) -> CommandOutput {
        let first = self
            .looked_up
            .lock()
            .map(|mut seen| seen.insert(line.to_string()))
            .unwrap_or(false);
        if first {
            CommandOutput::default()
        } else {
            CommandOutput::success(found)
        }
    }

    fn answer(&self, program: &str, args: &[String], line: &str) -> CommandOutput {
        let first = args.first().map(String::as_str).unwrap_or("");
        let second = args.get(1).map(String::as_str).unwrap_or("");

        if args.iter().any(|a| a == "-C") {
            return CommandOutput::failure(1, "dry-run: rule not present");
        }

        match (program, first, second) {
            ("ip", _, _) => {
                let dev = args.last().map(String::as_str).unwrap_or("dry0");
                CommandOutput::success(format!(
                    "1: {}    inet {}/24 scope global {}\n",
                    dev, DRY_RUN_HOST, dev
                ))
            }
            ("docker", "inspect", "-f") | ("lxc-info", _, _) => {
                self.lookup(line, format!("{}\n", DRY_RUN_PROCESS))
            }
            ("docker", "inspect", _) => CommandOutput::success("dry-run\n"),
            ("xl", "domid", _) => self.lookup(line, "1\n".to_string()),
            _ => CommandOutput::default(),
        }
    }
}

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let line = command_line(program, args);
        info!(command = %line, "dry-run");
        Ok(self.answer(program, args, &line))
    }

    async fn spawn_detached(&self, program: &str, args: &[String], cwd: &Path) -> Result<()> {
        info!(command = %command_line(program, args), cwd = %cwd.display(), "dry-run (detached)");
        Ok(())
    }

    async fn write_file(&self, path: &Path, _contents: &str) -> Result<()> {
        info!(path = %path.display(), "dry-run (write)");
        Ok(())
    }
}

/// A command issued to a [`RecordingRunner`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub line: String,
    pub cwd: Option<PathBuf>,
}

/// Records issued commands and answers them from scripted responses.
///
/// Responses are matched by command-line prefix; the most recently added
/// script for a prefix wins, and a queued script is consumed once before
/// falling back to the persistent one. Unscripted commands succeed with
/// empty output.
#[derive(Default)]
pub struct RecordingRunner {
    history: Mutex<Vec<RecordedCommand>>,
    scripts: Mutex<Vec<Script>>,
}

struct Script {
    prefix: String,
    output: CommandOutput,
    once: bool,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every command starting with `prefix`
    pub fn respond(&self, prefix: impl Into<String>, output: CommandOutput) -> &Self {
        self.push_script(prefix.into(), output, false);
        self
    }

    /// Answer the next command starting with `prefix`, then forget the script
    pub fn respond_once(&self, prefix: impl Into<String>, output: CommandOutput) -> &Self {
        self.push_script(prefix.into(), output, true);
        self
    }

    fn push_script(&self, prefix: String, output: CommandOutput, once: bool) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push(Script {
                prefix,
                output,
                once,
            });
        }
    }

    /// All command lines issued so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.history
            .lock()
            .map(|h| h.iter().map(|c| c.line.clone()).collect())
            .unwrap_or_default()
    }

    /// Full records including working directories of detached launches
    pub fn records(&self) -> Vec<RecordedCommand> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Issued command lines starting with `prefix`
    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    fn answer(&self, line: &str) -> CommandOutput {
        let Ok(mut scripts) = self.scripts.lock() else {
            return CommandOutput::default();
        };

        // Queued one-shot answers take priority over persistent ones
        let once = scripts
            .iter()
            .position(|s| s.once && line.starts_with(&s.prefix));
        if let Some(index) = once {
            return scripts.remove(index).output;
        }

        scripts
            .iter()
            .rev()
            .find(|s| line.starts_with(&s.prefix))
            .map(|s| s.output.clone())
            .unwrap_or_default()
    }

    fn record(&self, line: String, cwd: Option<PathBuf>) {
        if let Ok(mut history) = self.history.lock() {
            history.push(RecordedCommand { line, cwd });
        }
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let line = command_line(program, args);
        let output = self.answer(&line);
        self.record(line, None);
        Ok(output)
    }

    async fn spawn_detached(&self, program: &str, args: &[String], cwd: &Path) -> Result<()> {
        let line = command_line(program, args);
        self.record(line, Some(cwd.to_path_buf()));
        Ok(())
    }
}
