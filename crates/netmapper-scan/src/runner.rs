//! External tool execution.
//!
//! Every stage drives its scanning engine through a [`CommandRunner`]. The
//! production [`ProcessRunner`] spawns a child via `tokio::process::Command`
//! and hands back its stdout. It never fails: a non-zero exit still yields
//! whatever the tool printed, and a missing binary yields an empty string.
//! Runtime bounds are the invoked tool's business (e.g. `--host-timeout`).

use std::fmt;
use std::future::Future;
use std::process::Stdio;

use tokio::process::Command;

/// An executable plus its ordered argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The argument following `flag`, e.g. the output path after `-oX`.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Runs external tools and returns their standard output.
pub trait CommandRunner: Send + Sync + 'static {
    fn run(&self, command: &ToolCommand) -> impl Future<Output = String> + Send;
}

/// Spawns real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &ToolCommand) -> String {
        tracing::debug!(command = %command, "Running external tool");

        let output = match Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(program = %command.program, error = %e, "Failed to launch tool");
                return String::new();
            }
        };

        if !output.status.success() {
            tracing::debug!(
                program = %command.program,
                code = output.status.code().unwrap_or(-1),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Tool exited with non-zero status"
            );
        }

        String::from_utf8_lossy(&output.stdout).into_owned()
    }
}

/// Check that nmap is installed. Returns its version banner, if any.
pub async fn verify_nmap<R: CommandRunner>(runner: &R, nmap_path: &str) -> Option<String> {
    let output = runner
        .run(&ToolCommand::new(nmap_path).arg("--version"))
        .await;
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(String::from)
}
