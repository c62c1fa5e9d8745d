//! Core data types for the privileged shell layer

use std::fmt;
use std::sync::Arc;

/// Lifecycle state of an elevated channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelState {
    /// The open handshake has not resolved yet
    Opening,
    /// The handshake confirmed a live, reusable shell
    Alive,
    /// The channel failed to establish or has terminated
    Dead,
}

/// Outcome of the asynchronous open handshake, reported exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStatus {
    /// The shell answered the liveness probe and accepts commands
    ChannelAlive,
    /// The shell failed to elevate or closed before becoming usable
    ChannelDead,
}

/// Per-command completion callbacks.
///
/// Every submitted command receives exactly one callback: either
/// `on_command_result` with the captured output, or `on_failed` if the
/// channel died before the command could finish.
pub trait CommandListener: Send + Sync {
    /// The command ran to completion. `code` is the caller-supplied
    /// correlation id, returned unchanged.
    fn on_command_result(&self, code: i32, exit_code: i32, output: Vec<String>);

    /// The channel died while this command was queued or executing.
    fn on_failed(&self);
}

/// Channel lifecycle callbacks, used by the session layer to keep its
/// single channel slot in sync with reality.
pub trait ChannelObserver: Send + Sync {
    /// Fires exactly once per channel when the open handshake resolves.
    fn on_open_result(&self, channel_id: u64, status: OpenStatus);

    /// Fires when a previously live channel dies (process exit, watchdog).
    fn on_terminated(&self, channel_id: u64);
}

/// One command submission: shell lines, a correlation id, and the listener
/// that receives the outcome. Immutable once built; ownership moves into
/// the channel queue.
pub struct ShellCommand {
    pub argv: Vec<String>,
    pub code: i32,
    pub listener: Arc<dyn CommandListener>,
}

impl ShellCommand {
    /// Create a new command submission
    pub fn new(argv: Vec<String>, code: i32, listener: Arc<dyn CommandListener>) -> Self {
        Self {
            argv,
            code,
            listener,
        }
    }
}

impl fmt::Debug for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellCommand")
            .field("argv", &self.argv)
            .field("code", &self.code)
            .finish_non_exhaustive()
    }
}

/// Options fixed at channel-open time
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Capture stderr lines into the command output
    pub want_stderr: bool,

    /// Seconds of inactivity during a handshake or command before the
    /// channel is force-killed
    pub watchdog_timeout_seconds: u64,

    /// Suppress per-line debug logging of shell output
    pub minimal_logging: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            want_stderr: true,
            watchdog_timeout_seconds: 10,
            minimal_logging: true,
        }
    }
}

/// Error types for elevated channel operations
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("failed to spawn privileged shell: {0}")]
    SpawnError(String),
    #[error("privileged shell closed its stream")]
    ChannelClosed,
    #[error("watchdog timeout after {0}s of inactivity")]
    WatchdogTimeout(u64),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullListener;

    impl CommandListener for NullListener {
        fn on_command_result(&self, _code: i32, _exit_code: i32, _output: Vec<String>) {}
        fn on_failed(&self) {}
    }

    #[test]
    fn test_default_open_options() {
        let options = OpenOptions::default();
        assert!(options.want_stderr);
        assert_eq!(options.watchdog_timeout_seconds, 10);
        assert!(options.minimal_logging);
    }

    #[test]
    fn test_command_debug_omits_listener() {
        let command = ShellCommand::new(vec!["id".to_string()], 7, Arc::new(NullListener));
        let rendered = format!("{:?}", command);
        assert!(rendered.contains("argv"));
        assert!(rendered.contains("7"));
    }

    #[test]
    fn test_shell_error_display() {
        let err = ShellError::WatchdogTimeout(10);
        assert!(err.to_string().contains("10s"));
    }
}
