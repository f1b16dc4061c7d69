//! Transport capability consumed by actors
//!
//! A [`Transport`] opens one [`Connection`] per actor identity. Receive and
//! send-acknowledgment callbacks are delivered as messages on channels the
//! actor registers, so the actor's own task loop is the only consumer of
//! its events.

pub mod loopback;
pub mod websocket;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::{Channel, RecvPacket, SendAck, SendOptions};

pub use loopback::{LoopbackBroker, LoopbackTransport};
pub use websocket::WebSocketTransport;

/// Errors reported by a transport implementation
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connection rejected: {0}")]
    Rejected(String),

    #[error("not connected")]
    NotConnected,

    #[error("send failed: {0}")]
    Send(String),

    #[error("flush failed: {0}")]
    Flush(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Opens connections for actor identities
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect `identity` to the server at `addr`
    async fn connect(&self, identity: &str, addr: &str)
    -> Result<Box<dyn Connection>, TransportError>;
}

/// One live client connection
#[async_trait]
pub trait Connection: Send + Sync {
    fn identity(&self) -> &str;

    /// Route delivered messages to `handler`
    fn set_on_recv(&self, handler: mpsc::UnboundedSender<RecvPacket>);

    /// Route send acknowledgments to `handler`
    fn set_on_send_ack(&self, handler: mpsc::UnboundedSender<SendAck>);

    /// Issue a send and return its client sequence number.
    ///
    /// Completion is signalled later through the send-ack handler.
    async fn send(
        &self,
        channel: &Channel,
        payload: Bytes,
        options: SendOptions,
    ) -> Result<u64, TransportError>;

    /// Ensure buffered sends are dispatched
    async fn flush(&self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Byte counters maintained by the transport
    fn traffic(&self) -> Arc<TrafficCounters>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Transport-level traffic counters for one connection
#[derive(Debug, Default)]
pub struct TrafficCounters {
    bytes_out: AtomicU64,
    bytes_in: AtomicU64,
}

impl TrafficCounters {
    pub fn record_out(&self, bytes: usize) {
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_in(&self, bytes: usize) {
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }
}

/// Registered callback target, replaceable at any time
pub(crate) struct HandlerSlot<T> {
    tx: Mutex<Option<mpsc::UnboundedSender<T>>>,
}

impl<T> HandlerSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            tx: Mutex::new(None),
        }
    }

    pub(crate) fn set(&self, handler: mpsc::UnboundedSender<T>) {
        if let Ok(mut slot) = self.tx.lock() {
            *slot = Some(handler);
        }
    }

    /// Drop the registered handler so its receiver sees the channel close
    pub(crate) fn clear(&self) {
        if let Ok(mut slot) = self.tx.lock() {
            slot.take();
        }
    }

    pub(crate) fn is_set(&self) -> bool {
        self.tx.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Deliver `event`; returns false when nobody is listening
    pub(crate) fn dispatch(&self, event: T) -> bool {
        match self.tx.lock() {
            Ok(slot) => match slot.as_ref() {
                Some(tx) => tx.send(event).is_ok(),
                None => false,
            },
            Err(_) => false,
        }
    }
}
