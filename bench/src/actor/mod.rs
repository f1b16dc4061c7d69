//! Simulated publisher and subscriber clients

mod publisher;
mod subscriber;

pub use publisher::{PublisherSpec, run_publisher};
pub use subscriber::{SubscriberSpec, run_subscriber};

use indicatif::ProgressBar;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::benchmark::Benchmark;
use crate::coordinator::ReadySignal;
use crate::protocol::Channel;
use crate::transport::Transport;

/// Lifecycle of an actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    Connecting,
    Ready,
    WaitingForTrigger,
    Sending,
    Draining,
    Receiving,
    Done,
}

impl ActorState {
    /// Fixed-width label shown in front of progress bars
    pub fn label(&self) -> &'static str {
        match self {
            ActorState::Connecting => "Setup     ",
            ActorState::Ready => "Ready     ",
            ActorState::WaitingForTrigger => "Waiting   ",
            ActorState::Sending => "Sending   ",
            ActorState::Draining => "Draining  ",
            ActorState::Receiving => "Receiving ",
            ActorState::Done => "Finished  ",
        }
    }
}

/// Live counters owned by one actor.
///
/// Only the owning actor writes them; the progress ticker reads them.
#[derive(Debug, Default)]
pub struct ActorCounters {
    sent: AtomicU64,
    acked: AtomicU64,
    received: AtomicU64,
    payload_bytes: AtomicU64,
}

impl ActorCounters {
    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acked(&self, bytes: usize) {
        self.acked.fetch_add(1, Ordering::Relaxed);
        self.payload_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.payload_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn payload_bytes(&self) -> u64 {
        self.payload_bytes.load(Ordering::Relaxed)
    }
}

/// Everything an actor task needs from the orchestrator
pub struct ActorContext {
    pub transport: Arc<dyn Transport>,
    pub benchmark: Arc<Benchmark>,
    pub ready: ReadySignal,
    pub progress: ProgressBar,
    pub counters: Arc<ActorCounters>,
}

/// Tracks and reports state transitions of one actor
pub(crate) struct StateTracker {
    identity: String,
    state: ActorState,
    progress: ProgressBar,
}

impl StateTracker {
    pub(crate) fn new(identity: &str, progress: ProgressBar) -> Self {
        progress.set_prefix(ActorState::Connecting.label());
        Self {
            identity: identity.to_string(),
            state: ActorState::Connecting,
            progress,
        }
    }

    pub(crate) fn enter(&mut self, next: ActorState) {
        debug!(identity = %self.identity, from = ?self.state, to = ?next, "Actor state change");
        self.state = next;
        self.progress.set_prefix(next.label());
    }

    pub(crate) fn progress(&self) -> &ProgressBar {
        &self.progress
    }
}

/// How a publisher picks the destination of each send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelPolicy {
    /// Every send goes to one channel
    Fixed(Channel),
    /// Cycle through the channels in order
    RoundRobin(Vec<Channel>),
    /// Reply to whoever was heard from last, else cycle through `fallback`
    ReplyToLastSender { fallback: Vec<Channel> },
}

impl ChannelPolicy {
    pub fn listens(&self) -> bool {
        matches!(self, ChannelPolicy::ReplyToLastSender { .. })
    }
}

/// Stateful destination picker for one publisher
#[derive(Debug, Clone)]
pub struct ChannelSelector {
    policy: ChannelPolicy,
    cursor: usize,
    last_sender: Option<String>,
}

impl ChannelSelector {
    /// `offset` staggers the round-robin start between publishers
    pub fn new(policy: ChannelPolicy, offset: usize) -> Self {
        Self {
            policy,
            cursor: offset,
            last_sender: None,
        }
    }

    pub fn observe_sender(&mut self, uid: String) {
        self.last_sender = Some(uid);
    }

    pub fn next_channel(&mut self) -> Option<Channel> {
        match &self.policy {
            ChannelPolicy::Fixed(channel) => Some(channel.clone()),
            ChannelPolicy::RoundRobin(channels) => {
                let channel = channels.get(self.cursor % channels.len().max(1)).cloned();
                self.cursor = self.cursor.wrapping_add(1);
                channel
            }
            ChannelPolicy::ReplyToLastSender { fallback } => {
                if let Some(uid) = &self.last_sender {
                    return Some(Channel::person(uid.clone()));
                }
                let channel = fallback.get(self.cursor % fallback.len().max(1)).cloned();
                self.cursor = self.cursor.wrapping_add(1);
                channel
            }
        }
    }
}
