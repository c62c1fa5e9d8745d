//! Action channel for asynchronous result delivery
//!
//! Callers that prefer channel-based delivery over implementing
//! [`CommandListener`](crate::shell::CommandListener) directly attach an
//! [`EventListener`] per command and read [`SessionEvent`]s from one place.
//! The CLI driver and the demo both consume results this way.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::error;

use crate::shell::types::CommandListener;

/// Session events emitted as commands resolve
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A command ran to completion on the privileged shell
    CommandCompleted {
        code: i32,
        exit_code: i32,
        output: Vec<String>,
    },
    /// The channel died before the command could finish
    CommandFailed { code: i32 },
    /// Error event
    Error { message: String },
}

/// Unbounded event plumbing between the session and its driver
pub struct ActionChannel {
    /// Event sender
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    /// Event receiver
    event_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl Clone for ActionChannel {
    fn clone(&self) -> Self {
        Self {
            event_tx: self.event_tx.clone(),
            event_rx: None, // Receivers cannot be cloned
        }
    }
}

impl ActionChannel {
    /// Create a new ActionChannel
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Send event to channel
    pub fn send_event(&self, event: SessionEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .map_err(|e| anyhow::anyhow!("Failed to send event: {}", e))
    }

    /// Get next event from channel
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        if let Some(event_rx) = &mut self.event_rx {
            event_rx.recv().await
        } else {
            None
        }
    }

    /// Get event sender for external use
    pub fn event_tx(&self) -> mpsc::UnboundedSender<SessionEvent> {
        self.event_tx.clone()
    }

    /// Check if channel is closed
    pub fn is_closed(&self) -> bool {
        self.event_tx.is_closed()
    }
}

impl Default for ActionChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener that forwards per-command outcomes as [`SessionEvent`]s.
///
/// Stores the correlation id so a failure, which carries no id of its own,
/// can still be matched to its command.
pub struct EventListener {
    code: i32,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl EventListener {
    /// Create a listener for the command with the given correlation id
    pub fn new(code: i32, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { code, events }
    }

    /// Convenience constructor for the shared form `run()` expects
    pub fn shared(code: i32, events: mpsc::UnboundedSender<SessionEvent>) -> Arc<Self> {
        Arc::new(Self::new(code, events))
    }
}

impl CommandListener for EventListener {
    fn on_command_result(&self, code: i32, exit_code: i32, output: Vec<String>) {
        let event = SessionEvent::CommandCompleted {
            code,
            exit_code,
            output,
        };
        if let Err(e) = self.events.send(event) {
            error!("Failed to deliver command result: {}", e);
        }
    }

    fn on_failed(&self) {
        if let Err(e) = self.events.send(SessionEvent::CommandFailed { code: self.code }) {
            error!("Failed to deliver command failure: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_listener_forwards_completion() {
        let mut channel = ActionChannel::new();
        let listener = EventListener::new(9, channel.event_tx());

        listener.on_command_result(9, 0, vec!["done".to_string()]);

        assert_eq!(
            channel.next_event().await,
            Some(SessionEvent::CommandCompleted {
                code: 9,
                exit_code: 0,
                output: vec!["done".to_string()],
            })
        );
    }

    #[tokio::test]
    async fn test_event_listener_tags_failures_with_code() {
        let mut channel = ActionChannel::new();
        let listener = EventListener::new(42, channel.event_tx());

        listener.on_failed();

        assert_eq!(
            channel.next_event().await,
            Some(SessionEvent::CommandFailed { code: 42 })
        );
    }

    #[test]
    fn test_clone_drops_receiver_side() {
        let channel = ActionChannel::new();
        let cloned = channel.clone();
        assert!(cloned.event_rx.is_none());
        assert!(!cloned.is_closed());
    }
}
