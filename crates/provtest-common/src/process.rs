//! External command execution
//!
//! Every external tool the harness drives (terraform, juju, git, make, go)
//! goes through the same primitive: describe the invocation with a
//! [`CommandSpec`], run it, and get back its captured output, or an
//! [`Error::CommandFailed`] when it exits non-zero.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Number of trailing output lines kept in a `CommandFailed` message
const ERROR_TAIL_LINES: usize = 20;

/// Where a command's stdout and stderr go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Echo each line to the harness console and capture it
    #[default]
    Tee,
    /// Capture without echoing
    Capture,
}

/// Description of one external command invocation
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    envs: BTreeMap<String, String>,
    output: OutputMode,
    timeout: Option<Duration>,
}

impl CommandSpec {
    /// Start describing an invocation of `program`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: BTreeMap::new(),
            output: OutputMode::default(),
            timeout: None,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the command from `dir`
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Set one environment variable for the child
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    /// Set several environment variables for the child
    pub fn envs(mut self, envs: &BTreeMap<String, String>) -> Self {
        self.envs
            .extend(envs.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Choose where output goes
    pub fn output(mut self, mode: OutputMode) -> Self {
        self.output = mode;
        self
    }

    /// Kill the command if it runs longer than `timeout`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Program name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments, in order
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Working directory, if set
    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (None when terminated by a signal)
    pub code: Option<i32>,
    /// Whether the command exited successfully
    pub success: bool,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Stdout followed by stderr
    pub fn combined(&self) -> String {
        let mut text = String::with_capacity(self.stdout.len() + self.stderr.len());
        text.push_str(&self.stdout);
        text.push_str(&self.stderr);
        text
    }

    /// Last lines of stderr, or of stdout when stderr is empty
    fn error_tail(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = source.lines().collect();
        let start = lines.len().saturating_sub(ERROR_TAIL_LINES);
        lines[start..].join("\n")
    }

    /// Convert a non-zero exit into `Error::CommandFailed`
    pub fn into_result(self, command: &CommandSpec) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        Err(Error::CommandFailed {
            command: command.to_string(),
            code: self.code,
            message: self.error_tail(),
        })
    }
}

/// Run a command; a non-zero exit is an error.
pub async fn run(spec: &CommandSpec) -> Result<CommandOutput> {
    run_allow_fail(spec).await?.into_result(spec)
}

/// Run a command and return its output regardless of exit status.
///
/// Only failures to start, await or time-bound the process are errors.
pub async fn run_allow_fail(spec: &CommandSpec) -> Result<CommandOutput> {
    debug!(command = %spec, dir = ?spec.current_dir, "Running command");

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.envs)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = &spec.current_dir {
        cmd.current_dir(dir);
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let child = cmd.spawn().map_err(|source| Error::Spawn {
        command: spec.to_string(),
        source,
    })?;

    let echo = spec.output == OutputMode::Tee;
    let collected = match spec.timeout {
        Some(timeout) => tokio::time::timeout(timeout, collect(child, echo))
            .await
            .map_err(|_| {
                warn!(command = %spec, ?timeout, "Command timed out");
                Error::Timeout {
                    command: spec.to_string(),
                    timeout,
                }
            })?,
        None => collect(child, echo).await,
    };

    collected.map_err(|source| Error::Spawn {
        command: spec.to_string(),
        source,
    })
}

/// Check whether `program` resolves on PATH (via `which`)
pub async fn executable_exists(program: &str) -> Result<bool> {
    let spec = CommandSpec::new("which")
        .arg(program)
        .output(OutputMode::Capture);
    Ok(run_allow_fail(&spec).await?.success)
}

async fn collect(mut child: Child, echo: bool) -> std::io::Result<CommandOutput> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (stdout, stderr, status) = tokio::try_join!(
        read_stream(stdout, echo, false),
        read_stream(stderr, echo, true),
        child.wait(),
    )?;

    Ok(CommandOutput {
        code: status.code(),
        success: status.success(),
        stdout,
        stderr,
    })
}

async fn read_stream<R>(stream: Option<R>, echo: bool, is_stderr: bool) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return Ok(String::new());
    };

    let mut reader = BufReader::new(stream);
    let mut captured = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        if echo {
            if is_stderr {
                eprint!("{line}");
            } else {
                print!("{line}");
            }
        }
        captured.push_str(&line);
    }
    Ok(captured)
}
