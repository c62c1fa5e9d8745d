//! Session manager for the privileged shell lifecycle
//!
//! Holds at most one elevated channel at a time and mediates its
//! replacement on failure. `run` never blocks the caller past enqueueing;
//! every outcome arrives through the per-command listener. A dead channel
//! is an expected condition: the next `run` transparently opens a fresh one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::Config;
use crate::metrics::{MetricsSnapshot, SessionMetrics};
use crate::shell::opener::{ShellOpener, SuOpener};
use crate::shell::types::{CommandListener, OpenOptions, ShellCommand};

use super::dispatcher::Dispatcher;

/// Session state tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No channel; the next submission opens one
    Absent,
    /// A channel open is in flight; submissions queue behind it
    Opening,
    /// A live channel accepts submissions directly
    Ready,
}

/// Session statistics for monitoring
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub started_at: DateTime<Utc>,
    pub state: SessionState,
    pub metrics: MetricsSnapshot,
}

/// Main session manager for privileged command execution
pub struct SessionManager {
    /// Submission routing and the single channel slot
    dispatcher: Dispatcher,
    /// Session counters
    metrics: Arc<SessionMetrics>,
    /// When this session instance was created
    started_at: DateTime<Utc>,
}

impl SessionManager {
    /// Create a session manager that escalates via the configured program
    pub fn new(config: &Config) -> Self {
        let opener = Arc::new(SuOpener::from_config(&config.shell));
        Self::with_opener(opener, config.shell.open_options())
    }

    /// Create a session manager with an explicit opener (tests, demo)
    pub fn with_opener(opener: Arc<dyn ShellOpener>, options: OpenOptions) -> Self {
        info!("creating session manager");
        let metrics = Arc::new(SessionMetrics::new());
        let dispatcher = Dispatcher::new(opener, options, metrics.clone());
        Self {
            dispatcher,
            metrics,
            started_at: Utc::now(),
        }
    }

    /// Submit a command for privileged execution.
    ///
    /// Fire-and-forget: the call returns once the command is enqueued, and
    /// `listener` receives exactly one of `on_command_result` / `on_failed`.
    pub fn run(&self, argv: Vec<String>, code: i32, listener: Arc<dyn CommandListener>) {
        self.metrics.record_submitted();
        let listener: Arc<dyn CommandListener> = Arc::new(MeteredListener {
            inner: listener,
            metrics: self.metrics.clone(),
        });
        self.dispatcher.submit(ShellCommand::new(argv, code, listener));
    }

    /// Kill any live channel, best-effort.
    ///
    /// Commands still pending receive no further callback. A later `run`
    /// opens a fresh channel rather than reusing the killed one.
    pub fn shutdown(&self) {
        info!("session shutdown requested");
        self.dispatcher.teardown();
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.dispatcher.state()
    }

    /// Snapshot of session statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            started_at: self.started_at,
            state: self.state(),
            metrics: self.metrics.snapshot(),
        }
    }
}

/// Wraps a caller listener to keep completion counters accurate
struct MeteredListener {
    inner: Arc<dyn CommandListener>,
    metrics: Arc<SessionMetrics>,
}

impl CommandListener for MeteredListener {
    fn on_command_result(&self, code: i32, exit_code: i32, output: Vec<String>) {
        self.metrics.record_completed();
        self.inner.on_command_result(code, exit_code, output);
    }

    fn on_failed(&self) {
        self.metrics.record_failed();
        self.inner.on_failed();
    }
}
