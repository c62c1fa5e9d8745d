//! Opener abstraction for the privileged shell process
//!
//! The session layer treats privilege escalation as an external concern: an
//! opener hands back a spawned shell with piped stdio, and everything above
//! it only speaks the line protocol.

use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::info;

use super::types::{OpenOptions, ShellError};

use crate::config::ShellConfig;

/// A spawned (or emulated) privileged shell with piped stdio.
///
/// `child` is present for real processes and absent for in-memory fakes;
/// the channel layer kills and reaps it when the conduit dies.
pub struct ShellProcess {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
    pub child: Option<Child>,
}

/// Provider of privileged shells.
///
/// Implementations may block briefly while spawning; they are only ever
/// invoked from the channel's own worker task, never from a submitter.
pub trait ShellOpener: Send + Sync {
    fn open(&self, options: &OpenOptions) -> Result<ShellProcess, ShellError>;
}

/// Opener that spawns an escalation program (`su` by default) and keeps it
/// running as a long-lived interactive shell.
pub struct SuOpener {
    program: String,
    args: Vec<String>,
}

impl SuOpener {
    /// Create a new opener for the given escalation program
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build an opener from the shell section of the configuration
    pub fn from_config(config: &ShellConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }
}

impl ShellOpener for SuOpener {
    fn open(&self, options: &OpenOptions) -> Result<ShellProcess, ShellError> {
        info!("spawning privileged shell: {}", self.program);

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if options.want_stderr {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| ShellError::SpawnError(format!("{}: {}", self.program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ShellError::SpawnError("stdin pipe unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ShellError::SpawnError("stdout pipe unavailable".to_string()))?;
        let stderr = if options.want_stderr {
            let pipe = child
                .stderr
                .take()
                .ok_or_else(|| ShellError::SpawnError("stderr pipe unavailable".to_string()))?;
            Some(Box::new(pipe) as Box<dyn AsyncRead + Send + Unpin>)
        } else {
            None
        };

        Ok(ShellProcess {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr,
            child: Some(child),
        })
    }
}
