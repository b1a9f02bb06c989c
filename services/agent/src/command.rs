//! Host command execution.
//!
//! Every host-side effect of a recovery (network plumbing, hypervisor calls)
//! goes through the `CommandRunner` interface:
//! - `SystemCommandRunner` executes commands, optionally under `sudo`
//! - `DryRunRunner` only logs them
//! - `MockCommandRunner` records them and can simulate failures (tests)
//!
//! Commands are argument vectors, never shell strings.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::StepError;

/// A program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl HostCommand {
    /// Start building an invocation of `program`.
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit status; -1 if the process was killed by a signal.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Returns true if the command exited with status 0.
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs privileged host commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output.
    ///
    /// An `Err` means the command could not be executed at all; a command
    /// that ran and failed is an `Ok` with a non-zero status.
    async fn run(&self, command: &HostCommand) -> io::Result<CommandOutput>;
}

/// Run a command and turn a non-zero exit into a `StepError`.
pub async fn run_checked(
    runner: &dyn CommandRunner,
    command: &HostCommand,
) -> Result<CommandOutput, StepError> {
    let output = runner
        .run(command)
        .await
        .map_err(|source| StepError::Spawn {
            command: command.to_string(),
            source,
        })?;

    if !output.success() {
        return Err(StepError::CommandFailed {
            command: command.to_string(),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        });
    }

    Ok(output)
}

/// Executes commands on the local host.
pub struct SystemCommandRunner {
    use_sudo: bool,
}

impl SystemCommandRunner {
    /// Create a runner; with `use_sudo` every command is prefixed by `sudo`.
    pub fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, command: &HostCommand) -> io::Result<CommandOutput> {
        let mut process = if self.use_sudo {
            let mut process = Command::new("sudo");
            process.arg("-n").arg(&command.program);
            process
        } else {
            Command::new(&command.program)
        };
        process.args(&command.args);

        debug!(command = %command, sudo = self.use_sudo, "Running host command");
        let output = process.output().await?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Logs commands instead of running them.
#[derive(Debug, Default)]
pub struct DryRunRunner;

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn run(&self, command: &HostCommand) -> io::Result<CommandOutput> {
        info!(command = %command, "[DRY-RUN] Host command");
        Ok(CommandOutput::default())
    }
}

/// Mock runner for testing.
///
/// Records every command. Commands whose program or first argument is in
/// the failure set exit with status 1.
#[derive(Debug, Default)]
pub struct MockCommandRunner {
    executed: Mutex<Vec<HostCommand>>,
    failing: HashSet<String>,
    stderr: String,
}

impl MockCommandRunner {
    /// Create a runner where every command succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a runner that fails commands matching `selector`, e.g.
    /// `"virsh"` or `"start"`.
    pub fn failing_on(selector: &str) -> Self {
        Self {
            failing: HashSet::from([selector.to_string()]),
            ..Self::default()
        }
    }

    /// Set the stderr reported by failing commands.
    pub fn with_stderr(mut self, stderr: &str) -> Self {
        self.stderr = stderr.to_string();
        self
    }

    /// Commands run so far, rendered.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|executed| executed.iter().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    fn fails(&self, command: &HostCommand) -> bool {
        self.failing.contains(&command.program)
            || command
                .args
                .first()
                .is_some_and(|first| self.failing.contains(first))
    }
}

#[async_trait]
impl CommandRunner for MockCommandRunner {
    async fn run(&self, command: &HostCommand) -> io::Result<CommandOutput> {
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(command.clone());
        }

        if self.fails(command) {
            return Ok(CommandOutput {
                status: 1,
                stdout: String::new(),
                stderr: self.stderr.clone(),
            });
        }

        Ok(CommandOutput::default())
    }
}
