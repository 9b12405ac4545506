//! Subprocess execution for the external build system.
//!
//! Extractor builds can print megabytes of logs and occasionally hang, so every invocation runs
//! with bounded output capture and an optional wall-clock timeout. On Unix the child is placed
//! in its own process group and the whole group is killed on timeout.

use std::collections::{BTreeMap, VecDeque};
use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Captured stdout/stderr from a command. Each stream keeps at most its last `max_bytes`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundedOutput {
    pub stdout: String,
    pub stderr: String,
    /// Set when the head of either stream was dropped.
    pub truncated: bool,
}

impl BoundedOutput {
    /// stdout followed by stderr, separated by a newline when needed.
    pub fn combined(&self) -> String {
        let mut s = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !s.is_empty() && !s.ends_with('\n') {
                s.push('\n');
            }
            s.push_str(&self.stderr);
        }
        s
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Kill the process group if it hasn't exited after this duration.
    pub timeout: Option<Duration>,
    /// Maximum bytes to capture per stream, counted from the end.
    pub max_bytes: usize,
    /// Delay between SIGTERM and SIGKILL when a timeout fires.
    pub kill_grace: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            max_bytes: 4 * 1024 * 1024,
            kill_grace: Duration::from_millis(250),
        }
    }
}

/// A full command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub cwd: Option<PathBuf>,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Variables added to (or overriding) the inherited environment.
    pub env: BTreeMap<String, OsString>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Human-readable only, not a round-trippable shell snippet.
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.contains(' ') || arg.contains('\t') {
                write!(f, " \"{}\"", arg.replace('"', "\\\""))?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: ExitStatus,
    pub output: BoundedOutput,
    pub timed_out: bool,
}

/// A command that exited unsuccessfully or was killed on timeout.
#[derive(Debug, Clone)]
pub struct CommandFailure {
    pub command: CommandSpec,
    pub status: ExitStatus,
    pub output: BoundedOutput,
    pub timed_out: bool,
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.timed_out {
            write!(f, "`{}` timed out", self.command)?;
        } else {
            write!(f, "`{}` exited with {}", self.command, self.status)?;
        }
        if self.output.truncated {
            write!(f, " (output truncated)")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunCommandError {
    #[error("failed to run `{command}`: {source}")]
    Io {
        command: CommandSpec,
        #[source]
        source: io::Error,
    },
    #[error("{0}")]
    Failed(Box<CommandFailure>),
}

impl RunCommandError {
    /// Captured output of a failed command, if it ran at all.
    pub fn output(&self) -> Option<&BoundedOutput> {
        match self {
            Self::Io { .. } => None,
            Self::Failed(failure) => Some(&failure.output),
        }
    }

    pub fn timed_out(&self) -> bool {
        matches!(self, Self::Failed(failure) if failure.timed_out)
    }
}

/// Run a command, capturing the last `opts.max_bytes` of stdout and stderr each.
///
/// Always returns the exit status; a timeout kills the process group and sets `timed_out`.
pub fn run_command(command: &CommandSpec, opts: &RunOptions) -> io::Result<CommandResult> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .envs(&command.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &command.cwd {
        cmd.current_dir(cwd);
    }

    #[cfg(unix)]
    unsafe {
        use std::os::unix::process::CommandExt;

        cmd.pre_exec(|| {
            // SAFETY: `setpgid` is async-signal-safe and runs in the forked child.
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    tracing::debug!(target: "depcrawl.process", command = %command, "spawning");
    let mut child = cmd.spawn()?;

    let Some(stdout) = child.stdout.take() else {
        return Err(io::Error::other("child stdout was not captured"));
    };
    let Some(stderr) = child.stderr.take() else {
        return Err(io::Error::other("child stderr was not captured"));
    };

    let max_bytes = opts.max_bytes;
    let stdout_handle = thread::spawn(move || read_bounded(stdout, max_bytes));
    let stderr_handle = thread::spawn(move || read_bounded(stderr, max_bytes));

    let start = Instant::now();
    let mut timed_out = false;
    let status = match opts.timeout {
        Some(timeout) => loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() >= timeout {
                timed_out = true;
                tracing::debug!(
                    target: "depcrawl.process",
                    command = %command,
                    timeout_secs = timeout.as_secs_f64(),
                    "killing timed out process group"
                );
                break terminate_process_group(&mut child, opts.kill_grace)?;
            }
            let poll = Duration::from_millis(50);
            thread::sleep(poll.min(timeout.saturating_sub(start.elapsed())));
        },
        None => child.wait()?,
    };

    let (stdout_bytes, stdout_truncated) = join_reader(stdout_handle, "stdout")??;
    let (stderr_bytes, stderr_truncated) = join_reader(stderr_handle, "stderr")??;

    Ok(CommandResult {
        status,
        output: BoundedOutput {
            stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
            truncated: stdout_truncated || stderr_truncated,
        },
        timed_out,
    })
}

/// Run a command and treat non-zero exits and timeouts as errors.
pub fn run_command_checked(
    command: &CommandSpec,
    opts: &RunOptions,
) -> Result<CommandResult, RunCommandError> {
    let result = run_command(command, opts).map_err(|source| RunCommandError::Io {
        command: command.clone(),
        source,
    })?;

    if result.timed_out || !result.status.success() {
        return Err(RunCommandError::Failed(Box::new(CommandFailure {
            command: command.clone(),
            status: result.status,
            output: result.output,
            timed_out: result.timed_out,
        })));
    }
    Ok(result)
}

fn terminate_process_group(
    child: &mut std::process::Child,
    grace: Duration,
) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        // The child leads its own group (`setpgid(0, 0)` above); a negative pid targets it.
        let pid = child.id() as i32;
        unsafe {
            let _ = libc::kill(-pid, libc::SIGTERM);
        }

        let start = Instant::now();
        while start.elapsed() < grace {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            thread::sleep(Duration::from_millis(25));
        }

        unsafe {
            let _ = libc::kill(-pid, libc::SIGKILL);
        }
        child.wait()
    }

    #[cfg(not(unix))]
    {
        let _ = grace;
        let _ = child.kill();
        child.wait()
    }
}

fn join_reader(
    handle: thread::JoinHandle<io::Result<(Vec<u8>, bool)>>,
    stream: &'static str,
) -> io::Result<io::Result<(Vec<u8>, bool)>> {
    handle
        .join()
        .map_err(|_| io::Error::other(format!("{stream} reader thread panicked")))
}

/// Drain `reader`, keeping only its last `max_bytes`. Build tools report the cause of a
/// failure at the end of their output.
fn read_bounded(mut reader: impl Read, max_bytes: usize) -> io::Result<(Vec<u8>, bool)> {
    let mut tail: VecDeque<u8> = VecDeque::new();
    let mut truncated = false;
    let mut buf = [0u8; 8 * 1024];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        tail.extend(&buf[..n]);
        if tail.len() > max_bytes {
            let excess = tail.len() - max_bytes;
            tail.drain(..excess);
            truncated = true;
        }
    }

    Ok((tail.into(), truncated))
}
