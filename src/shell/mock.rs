//! Mock opener and scripted fake shell
//!
//! Used for testing in environments where a real escalation program is
//! unavailable (CI, the demo subcommand). The fake shell speaks just enough
//! of the line protocol to exercise the channel: `echo` with `$?`
//! substitution and `>&2` redirection, `true`/`false`, `exit`, and `hang`
//! (stops answering, which is how tests trip the watchdog).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, DuplexStream};
use tokio::time::sleep;

use super::opener::{ShellOpener, ShellProcess};
use super::types::{OpenOptions, ShellError};

const PIPE_CAPACITY: usize = 8192;

/// How a single mock open attempt behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Spawn a fake shell that answers the handshake and runs commands
    Healthy,
    /// Refuse to spawn at all
    SpawnError,
    /// Spawn pipes whose far end is already closed, so the handshake fails
    DeadOnProbe,
}

/// Opener returning scripted fake shells instead of real processes
pub struct MockOpener {
    default_behavior: MockBehavior,
    script: Mutex<VecDeque<MockBehavior>>,
    open_count: AtomicUsize,
}

impl MockOpener {
    /// Opener whose every attempt yields a working fake shell
    pub fn healthy() -> Arc<Self> {
        Self::with_behavior(MockBehavior::Healthy)
    }

    /// Opener with a fixed behavior for every attempt
    pub fn with_behavior(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            default_behavior: behavior,
            script: Mutex::new(VecDeque::new()),
            open_count: AtomicUsize::new(0),
        })
    }

    /// Opener that plays `script` one entry per open attempt, then falls
    /// back to `Healthy`
    pub fn with_script(script: Vec<MockBehavior>) -> Arc<Self> {
        Arc::new(Self {
            default_behavior: MockBehavior::Healthy,
            script: Mutex::new(script.into()),
            open_count: AtomicUsize::new(0),
        })
    }

    /// Number of open attempts observed so far
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    fn next_behavior(&self) -> MockBehavior {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or(self.default_behavior)
    }
}

impl ShellOpener for MockOpener {
    fn open(&self, options: &OpenOptions) -> Result<ShellProcess, ShellError> {
        self.open_count.fetch_add(1, Ordering::SeqCst);

        match self.next_behavior() {
            MockBehavior::SpawnError => {
                Err(ShellError::SpawnError("mock opener refused to spawn".to_string()))
            }
            MockBehavior::DeadOnProbe => {
                let (stdin_host, stdin_shell) = tokio::io::duplex(PIPE_CAPACITY);
                let (stdout_host, stdout_shell) = tokio::io::duplex(PIPE_CAPACITY);
                drop(stdin_shell);
                drop(stdout_shell);
                Ok(ShellProcess {
                    stdin: Box::new(stdin_host),
                    stdout: Box::new(stdout_host),
                    stderr: None,
                    child: None,
                })
            }
            MockBehavior::Healthy => {
                let (stdin_host, stdin_shell) = tokio::io::duplex(PIPE_CAPACITY);
                let (stdout_host, stdout_shell) = tokio::io::duplex(PIPE_CAPACITY);
                let (stderr_host, stderr_shell) = if options.want_stderr {
                    let (host, shell) = tokio::io::duplex(PIPE_CAPACITY);
                    (Some(host), Some(shell))
                } else {
                    (None, None)
                };

                tokio::spawn(run_fake_shell(stdin_shell, stdout_shell, stderr_shell));

                Ok(ShellProcess {
                    stdin: Box::new(stdin_host),
                    stdout: Box::new(stdout_host),
                    stderr: stderr_host
                        .map(|pipe| Box::new(pipe) as Box<dyn AsyncRead + Send + Unpin>),
                    child: None,
                })
            }
        }
    }
}

/// Minimal shell interpreter driving the far end of the mock pipes
async fn run_fake_shell(
    stdin: DuplexStream,
    mut stdout: DuplexStream,
    mut stderr: Option<DuplexStream>,
) {
    let mut lines = BufReader::new(stdin).lines();
    let mut last_status: i32 = 0;

    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts: Vec<&str> = trimmed.split_whitespace().collect();

        match parts[0] {
            "echo" => {
                let mut to_stderr = false;
                if parts.last() == Some(&">&2") || parts.last() == Some(&"1>&2") {
                    to_stderr = true;
                    parts.pop();
                }
                let rendered: Vec<String> = parts[1..]
                    .iter()
                    .map(|token| {
                        if *token == "$?" {
                            last_status.to_string()
                        } else {
                            (*token).to_string()
                        }
                    })
                    .collect();
                let out = format!("{}\n", rendered.join(" "));
                let write_failed = if to_stderr {
                    match stderr.as_mut() {
                        Some(pipe) => pipe.write_all(out.as_bytes()).await.is_err(),
                        None => false,
                    }
                } else {
                    stdout.write_all(out.as_bytes()).await.is_err()
                };
                if write_failed {
                    break;
                }
                last_status = 0;
            }
            "true" => last_status = 0,
            "false" => last_status = 1,
            "exit" => break,
            "hang" => {
                // stop answering entirely but keep the pipes open
                sleep(Duration::from_secs(3600)).await;
                break;
            }
            other => {
                if let Some(pipe) = stderr.as_mut() {
                    let message = format!("mock: {}: command not found\n", other);
                    let _ = pipe.write_all(message.as_bytes()).await;
                }
                last_status = 127;
            }
        }
    }
    // dropping the pipes signals EOF to the channel
}
