//! Submission routing against the single channel slot
//!
//! The dispatcher owns the session's one shared mutable resource: the
//! channel slot. A submission either reuses the channel already in the slot
//! or opens a fresh one, and the triggering command is queued on the new
//! channel before the slot lock is released, so a concurrent submitter can
//! never race in a second open. Listener callbacks always fire outside the
//! lock.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::metrics::SessionMetrics;
use crate::shell::channel::ElevatedChannel;
use crate::shell::opener::ShellOpener;
use crate::shell::types::{ChannelObserver, ChannelState, OpenOptions, OpenStatus, ShellCommand};

use super::session_manager::SessionState;

type ChannelSlot = Arc<Mutex<Option<Arc<ElevatedChannel>>>>;

fn lock(slot: &ChannelSlot) -> MutexGuard<'_, Option<Arc<ElevatedChannel>>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Routes command submissions onto at most one live channel
pub struct Dispatcher {
    opener: Arc<dyn ShellOpener>,
    options: OpenOptions,
    slot: ChannelSlot,
    observer: Arc<SlotObserver>,
}

impl Dispatcher {
    /// Create a dispatcher with an empty channel slot
    pub fn new(
        opener: Arc<dyn ShellOpener>,
        options: OpenOptions,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        let slot: ChannelSlot = Arc::new(Mutex::new(None));
        let observer = Arc::new(SlotObserver {
            slot: slot.clone(),
            metrics,
        });
        Self {
            opener,
            options,
            slot,
            observer,
        }
    }

    /// Submit one command: forward to the live channel, or open a new one
    /// with this command as the first queued entry.
    pub fn submit(&self, command: ShellCommand) {
        let rejected = {
            let mut slot = lock(&self.slot);
            match slot.as_ref() {
                Some(channel) => {
                    debug!(
                        "forwarding command {} to channel {}",
                        command.code,
                        channel.id()
                    );
                    channel.add_command(command).err()
                }
                None => {
                    let observer: Arc<dyn ChannelObserver> = self.observer.clone();
                    let channel =
                        ElevatedChannel::open(self.opener.clone(), self.options.clone(), observer);
                    debug!(
                        "queued command {} as first entry of channel {}",
                        command.code,
                        channel.id()
                    );
                    let rejected = channel.add_command(command).err();
                    *slot = Some(channel);
                    rejected
                }
            }
        };

        // a dead channel can linger in the slot for the instant between its
        // death and the observer clearing it; the submission still gets its
        // one failure callback
        if let Some(command) = rejected {
            warn!("command {} hit a dead channel, failing it", command.code);
            command.listener.on_failed();
        }
    }

    /// Session state as derived from the slot
    pub fn state(&self) -> SessionState {
        match lock(&self.slot).as_ref() {
            None => SessionState::Absent,
            Some(channel) => match channel.state() {
                ChannelState::Opening => SessionState::Opening,
                ChannelState::Alive => SessionState::Ready,
                ChannelState::Dead => SessionState::Absent,
            },
        }
    }

    /// Take any channel out of the slot and kill it, best-effort
    pub fn teardown(&self) {
        let channel = lock(&self.slot).take();
        if let Some(channel) = channel {
            info!("tearing down channel {}", channel.id());
            channel.kill();
        }
    }
}

/// Keeps the slot in sync with channel lifecycle transitions
struct SlotObserver {
    slot: ChannelSlot,
    metrics: Arc<SessionMetrics>,
}

impl SlotObserver {
    fn clear_if_current(&self, channel_id: u64) {
        let mut slot = lock(&self.slot);
        if slot
            .as_ref()
            .is_some_and(|channel| channel.id() == channel_id)
        {
            *slot = None;
            debug!("channel {} removed from the session slot", channel_id);
        }
    }
}

impl ChannelObserver for SlotObserver {
    fn on_open_result(&self, channel_id: u64, status: OpenStatus) {
        match status {
            OpenStatus::ChannelAlive => {
                self.metrics.record_channel_opened();
            }
            OpenStatus::ChannelDead => {
                warn!("channel {} failed to open", channel_id);
                self.metrics.record_open_failure();
                self.clear_if_current(channel_id);
            }
        }
    }

    fn on_terminated(&self, channel_id: u64) {
        self.metrics.record_channel_died();
        self.clear_if_current(channel_id);
    }
}
