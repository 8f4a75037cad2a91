//! External process execution.
//!
//! Mounting and unmounting shell out to tools like `s3fs` and `umount`.
//! The services only see [`CommandRunner`], so tests can swap in a
//! [`RecordingRunner`] and never touch the host.

use std::collections::VecDeque;
use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

/// A program invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment variables.  Values are credentials and never
    /// printed.
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, _) in &self.env {
            write!(f, "{key}=<redacted> ")?;
        }
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field(
                "env",
                &self.env.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Exit status and captured output of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            ..Default::default()
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout and stderr joined, trimmed.
    pub fn combined(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match (out.is_empty(), err.is_empty()) {
            (true, _) => err.to_owned(),
            (false, true) => out.to_owned(),
            (false, false) => format!("{out}\n{err}"),
        }
    }
}

/// Runs a program to completion.
///
/// There is no timeout: the call returns when the process exits.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// `Err` only when the process could not be started.
    async fn run(&self, cmd: &CommandSpec) -> std::io::Result<CommandOutput>;
}

/// Runs commands on the host through `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &CommandSpec) -> std::io::Result<CommandOutput> {
        debug!(command = %cmd, "running");
        let output = tokio::process::Command::new(&cmd.program)
            .args(&cmd.args)
            .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .await?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Records every invocation and replays scripted outcomes.
///
/// Unscripted calls succeed with empty output.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    script: Mutex<VecDeque<std::io::Result<CommandOutput>>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next unscripted call.
    pub fn push_output(&self, output: CommandOutput) {
        self.script.lock().push_back(Ok(output));
    }

    /// Make the next call fail to start, as if the program were missing.
    pub fn push_spawn_error(&self, kind: std::io::ErrorKind) {
        self.script.lock().push_back(Err(kind.into()));
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    /// Programs invoked so far, in order.
    pub fn programs(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.program.clone()).collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, cmd: &CommandSpec) -> std::io::Result<CommandOutput> {
        self.calls.lock().push(cmd.clone());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(CommandOutput::success()))
    }
}
