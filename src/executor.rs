use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use std::os::unix::process::{CommandExt, ExitStatusExt};

        pub const DEFAULT_INTERPRETER: &str = "python3";

        fn own_process_group(cmd: &mut Command) {
            cmd.process_group(0);
        }

        /// Kills the child's whole process group so grandchildren holding our
        /// pipes go down with it.
        fn kill_tree(child: &mut Child) -> io::Result<()> {
            let pgid = child.id() as libc::pid_t;
            // SAFETY: killpg has no memory-safety preconditions. The group id
            // stays reserved while any member is alive, and an empty group
            // just fails with ESRCH.
            if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
                return Ok(());
            }
            child.kill()
        }

        fn signal_name(status: ExitStatus) -> Option<String> {
            status.signal().map(|sig| match sig {
                libc::SIGSEGV => "SIGSEGV".to_string(),
                libc::SIGABRT => "SIGABRT".to_string(),
                libc::SIGFPE => "SIGFPE".to_string(),
                libc::SIGKILL => "SIGKILL".to_string(),
                libc::SIGTERM => "SIGTERM".to_string(),
                other => format!("signal {other}"),
            })
        }
    } else {
        pub const DEFAULT_INTERPRETER: &str = "python";

        fn own_process_group(_cmd: &mut Command) {}

        fn kill_tree(child: &mut Child) -> io::Result<()> {
            child.kill()
        }

        fn signal_name(_status: ExitStatus) -> Option<String> {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    /// `code` is `None` when the process was killed by a signal.
    NonZeroExit {
        code: Option<i32>,
        diagnostic: String,
    },
    Timeout {
        limit: Duration,
    },
    UnexpectedFailure {
        diagnostic: String,
    },
}

fn format_secs(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOutcome::Success => f.write_str("success"),
            ExecutionOutcome::NonZeroExit { diagnostic, .. } => f.write_str(diagnostic),
            ExecutionOutcome::Timeout { limit } => write!(f, "timed out after {}", format_secs(*limit)),
            ExecutionOutcome::UnexpectedFailure { diagnostic } => write!(f, "cannot execute: {diagnostic}"),
        }
    }
}

/// Runs one submission and classifies what happened. Implementations never
/// fail; problems are reported through the returned outcome.
pub trait Execute {
    fn execute(&self, path: &Path) -> ExecutionOutcome;
}

/// Runs `<interpreter> <file>` as a child process under a wall-clock limit.
#[derive(Debug, Clone)]
pub struct ExecutionChecker {
    interpreter: String,
    timeout: Duration,
}

impl ExecutionChecker {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }

    fn run(&self, path: &Path) -> Result<ExecutionOutcome> {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        own_process_group(&mut cmd);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to start {}", self.interpreter))?;
        let deadline = Instant::now() + self.timeout;

        // Drain both pipes while we wait so a chatty child can't fill them
        // and block forever.
        let mut capture = Capture::start(&mut child);

        let exited = match child.wait_timeout(self.timeout) {
            Ok(exited) => exited,
            Err(e) => {
                let _ = kill_tree(&mut child);
                let _ = child.wait();
                capture.abandon(path);
                return Err(e).context("failed while waiting for the child");
            }
        };

        // The limit covers anything the child started that still holds its
        // output open, not just the child itself.
        let status = match exited {
            Some(status) if capture.wait_until(deadline) => status,
            Some(_) => {
                let _ = kill_tree(&mut child);
                capture.abandon(path);
                tracing::debug!("{} left processes holding its output", path.display());
                return Ok(ExecutionOutcome::Timeout {
                    limit: self.timeout,
                });
            }
            None => {
                kill_tree(&mut child).context("failed to kill timed out child")?;
                child.wait()?;
                capture.abandon(path);
                tracing::debug!("{} exceeded {:?}", path.display(), self.timeout);
                return Ok(ExecutionOutcome::Timeout {
                    limit: self.timeout,
                });
            }
        };

        let (stdout, stderr) = capture.join().context("failed to read child output")?;
        tracing::debug!(
            "{} exited with {status}: {} bytes stdout, {} bytes stderr",
            path.display(),
            stdout.len(),
            stderr.len()
        );

        Ok(classify(status, &String::from_utf8_lossy(&stderr)))
    }
}

impl Execute for ExecutionChecker {
    fn execute(&self, path: &Path) -> ExecutionOutcome {
        self.run(path)
            .unwrap_or_else(|e| ExecutionOutcome::UnexpectedFailure {
                diagnostic: format!("{e:#}"),
            })
    }
}

/// How long a killed process group gets to release the pipes.
const KILL_GRACE: Duration = Duration::from_secs(1);

type Reader = JoinHandle<io::Result<Vec<u8>>>;

/// Reader threads for the child's stdout and stderr. Each reports on `done`
/// when its pipe reaches end of file.
struct Capture {
    stdout: Reader,
    stderr: Reader,
    done: Receiver<()>,
    closed: usize,
}

impl Capture {
    fn start(child: &mut Child) -> Self {
        let (tx, done) = mpsc::channel();
        Self {
            stdout: drain(child.stdout.take(), tx.clone()),
            stderr: drain(child.stderr.take(), tx),
            done,
            closed: 0,
        }
    }

    /// Blocks until both pipes are closed or `deadline` passes. Returns
    /// whether both closed.
    fn wait_until(&mut self, deadline: Instant) -> bool {
        while self.closed < 2 {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.done.recv_timeout(left) {
                Ok(()) => self.closed += 1,
                Err(RecvTimeoutError::Timeout) => return false,
                // both senders gone means both readers finished
                Err(RecvTimeoutError::Disconnected) => self.closed = 2,
            }
        }
        true
    }

    fn join(self) -> io::Result<(Vec<u8>, Vec<u8>)> {
        Ok((collect(self.stdout)?, collect(self.stderr)?))
    }

    /// Joins the readers after a kill, discarding what they read. Readers
    /// still blocked once the grace period is over are left detached; that
    /// only happens when something outside the process group holds a pipe.
    fn abandon(mut self, path: &Path) {
        if self.wait_until(Instant::now() + KILL_GRACE) {
            let _ = self.join();
        } else {
            tracing::warn!("output of {} is still held open after kill", path.display());
        }
    }
}

fn drain<R>(pipe: Option<R>, done: Sender<()>) -> Reader
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        let read = match pipe {
            Some(mut pipe) => pipe.read_to_end(&mut buf).map(|_| ()),
            None => Ok(()),
        };
        let _ = done.send(());
        read.map(|()| buf)
    })
}

fn collect(handle: Reader) -> io::Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "pipe reader panicked"))?
}

fn classify(status: ExitStatus, stderr: &str) -> ExecutionOutcome {
    if status.success() {
        return ExecutionOutcome::Success;
    }

    let last_line = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(String::from);

    match status.code() {
        Some(code) => ExecutionOutcome::NonZeroExit {
            code: Some(code),
            diagnostic: last_line.unwrap_or_else(|| format!("runtime error (exit code {code})")),
        },
        None => ExecutionOutcome::NonZeroExit {
            code: None,
            diagnostic: last_line.unwrap_or_else(|| {
                format!(
                    "terminated by {}",
                    signal_name(status).unwrap_or_else(|| "signal".to_string())
                )
            }),
        },
    }
}
