mod pid;


pub use pid::{pidof, replace_pid_tokens};

use crate::metrics::SourceMode;
use std::io::{self, BufRead, BufReader, IsTerminal, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Where lines come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Stdin,
    Command(CommandSpec),
}

/// A shell command whose stdout is captured.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    pub command: String,
    /// Added on top of the inherited environment.
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl SourceSpec {
    pub fn mode(&self) -> SourceMode {
        match self {
            SourceSpec::Stdin => SourceMode::Stdin,
            SourceSpec::Command(_) => SourceMode::Command,
        }
    }

    /// Read-only description for the config view.
    pub fn describe(&self) -> String {
        match self {
            SourceSpec::Stdin => "stdin".to_string(),
            SourceSpec::Command(cmd) => cmd.command.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("child process for `{command}` has no stdout pipe")]
    MissingStdout { command: String },
}

/// An opened source: the line reader plus the child, if any.
pub struct OpenSource {
    pub reader: Box<dyn BufRead + Send>,
    pub child: Option<ChildHandle>,
}

/// Shared handle so shutdown can kill a child blocked in a write.
#[derive(Clone)]
pub struct ChildHandle {
    child: Arc<Mutex<Child>>,
    pid: u32,
}

impl ChildHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Kill the child if it is still running. Idempotent.
    pub fn kill(&self) {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        match child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                if let Err(e) = child.kill() {
                    tracing::debug!(pid = self.pid, error = %e, "kill failed");
                }
            }
        }
    }

    /// Reap the child, waiting at most `timeout`. Returns the exit code if known.
    pub fn wait(&self, timeout: Duration) -> Option<i32> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
                match child.try_wait() {
                    Ok(Some(status)) => return status.code(),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!(pid = self.pid, error = %e, "wait failed");
                        return None;
                    }
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

/// Open `spec` for reading.
///
/// Commands run as `sh -c "exec <command>"` so the shell is replaced and a
/// kill reaches the real process. `PID:<name>` tokens are resolved first.
pub fn open(spec: &SourceSpec) -> Result<OpenSource, SourceError> {
    match spec {
        SourceSpec::Stdin => {
            if io::stdin().is_terminal() {
                tracing::warn!("reading from a terminal; pipe input in or pass --cmd");
            }
            tracing::info!("reading from stdin");
            Ok(OpenSource {
                reader: Box::new(BufReader::new(io::stdin())),
                child: None,
            })
        }
        SourceSpec::Command(cmd) => spawn(cmd),
    }
}

fn spawn(spec: &CommandSpec) -> Result<OpenSource, SourceError> {
    let command = replace_pid_tokens(&spec.command, pidof);

    let mut builder = Command::new("sh");
    builder
        .arg("-c")
        .arg(format!("exec {command}"))
        .envs(spec.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &spec.cwd {
        builder.current_dir(cwd);
    }

    let mut child = builder.spawn().map_err(|source| SourceError::Spawn {
        command: command.clone(),
        source,
    })?;

    let Some(stdout) = child.stdout.take() else {
        let _ = child.kill();
        return Err(SourceError::MissingStdout { command });
    };

    if let Some(stderr) = child.stderr.take() {
        let forwarded = thread::Builder::new()
            .name("linetap-stderr".to_string())
            .spawn(move || forward_stderr(BufReader::new(stderr)));
        if let Err(e) = forwarded {
            tracing::warn!(error = %e, "failed to start stderr forwarding");
        }
    }

    let pid = child.id();
    tracing::info!(pid, command = %command, "spawned source command");

    Ok(OpenSource {
        reader: Box::new(BufReader::new(stdout)),
        child: Some(ChildHandle {
            child: Arc::new(Mutex::new(child)),
            pid,
        }),
    })
}

/// Copy the child's stderr to ours, line by line.
fn forward_stderr<R: BufRead>(mut reader: R) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return,
            Ok(_) => {
                let mut err = io::stderr().lock();
                let _ = err.write_all(&buf).and_then(|_| err.flush());
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => return,
        }
    }
}
