//! Elevated channel: one long-lived privileged shell conduit
//!
//! A channel owns a single spawned shell and a FIFO of pending commands. A
//! dedicated worker task performs the open handshake, then executes queued
//! commands one at a time, so submission order is execution order. Liveness
//! is tracked through a watch channel; once the conduit dies no further
//! command is dispatched to it.
//!
//! Commands and their exit codes travel over the shell's stdio as plain
//! lines: each command block is followed by an `echo <token> $?` marker (and
//! a bare `echo <token> >&2` when stderr is captured), and output lines are
//! collected until the marker carrying the exit code is observed. The token
//! is unique per channel so command output cannot be mistaken for a marker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::opener::{ShellOpener, ShellProcess};
use super::types::{ChannelObserver, ChannelState, OpenOptions, OpenStatus, ShellCommand, ShellError};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to one privileged shell conduit.
///
/// Cheap to share; all execution happens on the channel's worker task.
pub struct ElevatedChannel {
    id: u64,
    command_tx: mpsc::UnboundedSender<ShellCommand>,
    kill_tx: mpsc::Sender<()>,
    state_rx: watch::Receiver<ChannelState>,
    child: Arc<Mutex<Option<Child>>>,
}

impl ElevatedChannel {
    /// Open a new channel through `opener`.
    ///
    /// Returns immediately; the handshake runs on the worker task and the
    /// observer hears `on_open_result` exactly once when it resolves.
    /// Commands queued before that point are flushed in order on success and
    /// fail with `on_failed` if the shell never comes up.
    pub fn open(
        opener: Arc<dyn ShellOpener>,
        options: OpenOptions,
        observer: Arc<dyn ChannelObserver>,
    ) -> Arc<Self> {
        let id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
        let token = make_token(id);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = mpsc::channel(1);
        let (state_tx, state_rx) = watch::channel(ChannelState::Opening);
        let child = Arc::new(Mutex::new(None));

        info!(
            "opening privileged channel {} (watchdog {}s)",
            id, options.watchdog_timeout_seconds
        );

        tokio::spawn(run_worker(
            id,
            opener,
            options,
            observer,
            command_rx,
            kill_rx,
            state_tx,
            child.clone(),
            token,
        ));

        Arc::new(Self {
            id,
            command_tx,
            kill_tx,
            state_rx,
            child,
        })
    }

    /// Channel identifier, unique for the lifetime of the process
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        self.state_rx.borrow().clone()
    }

    /// Whether the handshake has confirmed a live shell
    pub fn is_alive(&self) -> bool {
        matches!(self.state(), ChannelState::Alive)
    }

    /// Append a command to the channel's FIFO.
    ///
    /// Returns the command back if the queue has already been closed by a
    /// dead worker; the caller must then deliver `on_failed` itself so the
    /// submission is never silently dropped.
    pub fn add_command(&self, command: ShellCommand) -> Result<(), ShellCommand> {
        self.command_tx.send(command).map_err(|e| e.0)
    }

    /// Forcibly terminate the conduit.
    ///
    /// Idempotent and best-effort: termination errors are logged and
    /// swallowed, and commands still pending when the kill lands receive no
    /// further callback.
    pub fn kill(&self) {
        debug!("kill requested for channel {}", self.id);
        let _ = self.kill_tx.try_send(());
        kill_child(&self.child);
    }
}

/// Per-channel marker token for the line protocol
fn make_token(id: u64) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("privsh-{:08x}-{:08x}", id, nanos)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Kill and reap the shell process, tolerating an already-dead child
fn kill_child(slot: &Arc<Mutex<Option<Child>>>) {
    let child = lock(slot).take();
    if let Some(mut child) = child {
        if let Err(e) = child.start_kill() {
            warn!("failed to kill privileged shell: {}", e);
        }
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
    }
}

/// Line-oriented view over the shell's stdio
struct ShellIo {
    stdin: Box<dyn AsyncWrite + Send + Unpin>,
    stdout: Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>,
    stderr: Option<Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>>,
}

impl ShellIo {
    fn new(process: ShellProcess) -> (Self, Option<Child>) {
        let ShellProcess {
            stdin,
            stdout,
            stderr,
            child,
        } = process;
        let io = Self {
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stderr: stderr.map(|pipe| BufReader::new(pipe).lines()),
        };
        (io, child)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    id: u64,
    opener: Arc<dyn ShellOpener>,
    options: OpenOptions,
    observer: Arc<dyn ChannelObserver>,
    mut command_rx: mpsc::UnboundedReceiver<ShellCommand>,
    mut kill_rx: mpsc::Receiver<()>,
    state_tx: watch::Sender<ChannelState>,
    child_slot: Arc<Mutex<Option<Child>>>,
    token: String,
) {
    let watchdog = Duration::from_secs(options.watchdog_timeout_seconds);

    let process = match opener.open(&options) {
        Ok(process) => process,
        Err(e) => {
            warn!("channel {} failed to spawn: {}", id, e);
            fail_open(id, &observer, &state_tx, &mut command_rx);
            return;
        }
    };
    let (mut io, child) = ShellIo::new(process);
    if let Some(child) = child {
        *lock(&child_slot) = Some(child);
    }

    let probed = tokio::select! {
        _ = kill_rx.recv() => {
            shutdown_quietly(id, &state_tx, &mut command_rx, &child_slot);
            return;
        }
        result = probe(&mut io, &token, watchdog) => result,
    };
    if let Err(e) = probed {
        warn!("channel {} failed to establish: {}", id, e);
        kill_child(&child_slot);
        fail_open(id, &observer, &state_tx, &mut command_rx);
        return;
    }

    let _ = state_tx.send(ChannelState::Alive);
    observer.on_open_result(id, OpenStatus::ChannelAlive);
    info!("privileged channel {} established", id);

    loop {
        let command = tokio::select! {
            _ = kill_rx.recv() => {
                shutdown_quietly(id, &state_tx, &mut command_rx, &child_slot);
                return;
            }
            command = command_rx.recv() => command,
        };
        let Some(command) = command else {
            // every handle dropped: nobody can submit or observe anymore
            shutdown_quietly(id, &state_tx, &mut command_rx, &child_slot);
            return;
        };

        if !options.minimal_logging {
            info!("channel {} executing command {}", id, command.code);
        }

        let executed = tokio::select! {
            _ = kill_rx.recv() => {
                shutdown_quietly(id, &state_tx, &mut command_rx, &child_slot);
                return;
            }
            result = execute(&mut io, &command, &token, watchdog, options.minimal_logging) => result,
        };

        match executed {
            Ok((exit_code, output)) => {
                if !options.minimal_logging {
                    debug!(
                        "channel {} command {} finished: exit {} ({} lines)",
                        id,
                        command.code,
                        exit_code,
                        output.len()
                    );
                }
                command.listener.on_command_result(command.code, exit_code, output);
            }
            Err(e) => {
                warn!(
                    "channel {} died while executing command {}: {}",
                    id, command.code, e
                );
                let _ = state_tx.send(ChannelState::Dead);
                kill_child(&child_slot);
                command_rx.close();
                // clear the session slot first so a retry observed after
                // on_failed always lands on a fresh open
                observer.on_terminated(id);
                command.listener.on_failed();
                drain_failed(&mut command_rx);
                return;
            }
        }
    }
}

/// Open-failure path: the triggering command (and anything queued behind it)
/// fails exactly once, after the observer has reconciled the session slot
fn fail_open(
    id: u64,
    observer: &Arc<dyn ChannelObserver>,
    state_tx: &watch::Sender<ChannelState>,
    command_rx: &mut mpsc::UnboundedReceiver<ShellCommand>,
) {
    let _ = state_tx.send(ChannelState::Dead);
    command_rx.close();
    observer.on_open_result(id, OpenStatus::ChannelDead);
    drain_failed(command_rx);
}

fn drain_failed(command_rx: &mut mpsc::UnboundedReceiver<ShellCommand>) {
    while let Ok(command) = command_rx.try_recv() {
        command.listener.on_failed();
    }
}

/// Kill path: terminate without delivering further per-command callbacks
fn shutdown_quietly(
    id: u64,
    state_tx: &watch::Sender<ChannelState>,
    command_rx: &mut mpsc::UnboundedReceiver<ShellCommand>,
    child_slot: &Arc<Mutex<Option<Child>>>,
) {
    let _ = state_tx.send(ChannelState::Dead);
    command_rx.close();
    kill_child(child_slot);
    debug!("channel {} shut down", id);
}

/// Liveness probe: ask the freshly spawned shell to echo the token back.
/// Anything printed before it (banners, prompts) is discarded.
async fn probe(io: &mut ShellIo, token: &str, watchdog: Duration) -> Result<(), ShellError> {
    io.stdin
        .write_all(format!("echo {} ready\n", token).as_bytes())
        .await?;
    io.stdin.flush().await?;

    let expected = format!("{} ready", token);
    loop {
        let line = timeout(watchdog, io.stdout.next_line())
            .await
            .map_err(|_| ShellError::WatchdogTimeout(watchdog.as_secs()))??;
        match line {
            Some(line) if line == expected => return Ok(()),
            Some(line) => debug!("discarding pre-handshake output: {}", line),
            None => return Err(ShellError::ChannelClosed),
        }
    }
}

/// Execute one command block and collect its output until the exit-code
/// marker (and the stderr marker, when stderr is captured) is observed
async fn execute(
    io: &mut ShellIo,
    command: &ShellCommand,
    token: &str,
    watchdog: Duration,
    minimal_logging: bool,
) -> Result<(i32, Vec<String>), ShellError> {
    let mut block = String::new();
    for line in &command.argv {
        block.push_str(line);
        block.push('\n');
    }
    block.push_str(&format!("echo {} $?\n", token));
    let capture_stderr = io.stderr.is_some();
    if capture_stderr {
        block.push_str(&format!("echo {} >&2\n", token));
    }

    io.stdin.write_all(block.as_bytes()).await?;
    io.stdin.flush().await?;

    let mut output = Vec::new();
    let mut exit_code: Option<i32> = None;
    let mut stderr_done = !capture_stderr;

    while exit_code.is_none() || !stderr_done {
        let stdout_lines = &mut io.stdout;
        let next = match io.stderr.as_mut() {
            Some(stderr_lines) if !stderr_done => {
                timeout(watchdog, async {
                    tokio::select! {
                        line = stdout_lines.next_line() => (false, line),
                        line = stderr_lines.next_line() => (true, line),
                    }
                })
                .await
            }
            _ => timeout(watchdog, async { (false, stdout_lines.next_line().await) }).await,
        };

        let (from_stderr, line) =
            next.map_err(|_| ShellError::WatchdogTimeout(watchdog.as_secs()))?;
        let Some(line) = line? else {
            return Err(ShellError::ChannelClosed);
        };

        if from_stderr {
            if line == token {
                stderr_done = true;
            } else {
                if !minimal_logging {
                    debug!("command {} stderr: {}", command.code, line);
                }
                output.push(line);
            }
        } else if let Some(rest) = line.strip_prefix(token) {
            exit_code = Some(rest.trim().parse::<i32>().unwrap_or(-1));
        } else {
            if !minimal_logging {
                debug!("command {} stdout: {}", command.code, line);
            }
            output.push(line);
        }
    }

    Ok((exit_code.unwrap_or(-1), output))
}
