//! In-process broker implementing the transport contract
//!
//! Person channels deliver to the connection whose identity equals the
//! channel id. Group channels deliver to every other connected identity that
//! registered a receive handler. Every send is acknowledged after delivery.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

use super::{Connection, HandlerSlot, TrafficCounters, Transport, TransportError};
use crate::protocol::{Channel, ChannelType, ReasonCode, RecvPacket, SendAck, SendOptions};

struct Peer {
    identity: String,
    on_recv: HandlerSlot<RecvPacket>,
    on_ack: HandlerSlot<SendAck>,
    traffic: Arc<TrafficCounters>,
    connected: AtomicBool,
    next_seq: AtomicU64,
}

#[derive(Default)]
struct BrokerInner {
    peers: DashMap<String, Arc<Peer>>,
    refused: DashSet<String>,
    failing_senders: DashSet<String>,
    next_message_id: AtomicU64,
}

/// Shared in-memory message router
#[derive(Clone, Default)]
pub struct LoopbackBroker {
    inner: Arc<BrokerInner>,
}

impl LoopbackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make future connects for `identity` fail
    pub fn refuse_connect(&self, identity: impl Into<String>) {
        self.inner.refused.insert(identity.into());
    }

    /// Make every send from `identity` fail
    pub fn fail_sends_from(&self, identity: impl Into<String>) {
        self.inner.failing_senders.insert(identity.into());
    }

    pub fn connected_count(&self) -> usize {
        self.inner
            .peers
            .iter()
            .filter(|p| p.connected.load(Ordering::SeqCst))
            .count()
    }

    pub fn transport(&self) -> LoopbackTransport {
        LoopbackTransport {
            broker: self.clone(),
        }
    }

    fn deliver(&self, from: &Peer, channel: &Channel, payload: &Bytes) -> u64 {
        let message_id = self.inner.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;

        let targets: Vec<Arc<Peer>> = match channel.channel_type() {
            ChannelType::Person => self
                .inner
                .peers
                .get(channel.id())
                .map(|p| vec![p.value().clone()])
                .unwrap_or_default(),
            ChannelType::Group => self
                .inner
                .peers
                .iter()
                .filter(|p| p.identity != from.identity && p.on_recv.is_set())
                .map(|p| p.value().clone())
                .collect(),
        };

        for target in targets {
            if !target.connected.load(Ordering::SeqCst) {
                continue;
            }
            target.traffic.record_in(payload.len());
            target.on_recv.dispatch(RecvPacket {
                message_id,
                from_uid: from.identity.clone(),
                channel: channel.clone(),
                payload: payload.clone(),
            });
        }

        message_id
    }
}

/// [`Transport`] backed by a [`LoopbackBroker`]
#[derive(Clone)]
pub struct LoopbackTransport {
    broker: LoopbackBroker,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(
        &self,
        identity: &str,
        addr: &str,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let inner = &self.broker.inner;
        if inner.refused.contains(identity) {
            return Err(TransportError::Connect(format!("{} refused by broker", addr)));
        }

        let peer = Arc::new(Peer {
            identity: identity.to_string(),
            on_recv: HandlerSlot::new(),
            on_ack: HandlerSlot::new(),
            traffic: Arc::new(TrafficCounters::default()),
            connected: AtomicBool::new(true),
            next_seq: AtomicU64::new(1),
        });

        match inner.peers.entry(identity.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().connected.load(Ordering::SeqCst) {
                    return Err(TransportError::Rejected(format!(
                        "identity {} already connected",
                        identity
                    )));
                }
                entry.insert(peer.clone());
            }
            Entry::Vacant(entry) => {
                entry.insert(peer.clone());
            }
        }

        debug!(identity, addr, "Loopback connection established");
        Ok(Box::new(LoopbackConnection {
            peer,
            broker: self.broker.clone(),
        }))
    }
}

struct LoopbackConnection {
    peer: Arc<Peer>,
    broker: LoopbackBroker,
}

impl LoopbackConnection {
    fn disconnect(&self) {
        self.peer.connected.store(false, Ordering::SeqCst);
        self.broker
            .inner
            .peers
            .remove_if(&self.peer.identity, |_, p| Arc::ptr_eq(p, &self.peer));
    }
}

impl Drop for LoopbackConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[async_trait]
impl Connection for LoopbackConnection {
    fn identity(&self) -> &str {
        &self.peer.identity
    }

    fn set_on_recv(&self, handler: mpsc::UnboundedSender<RecvPacket>) {
        self.peer.on_recv.set(handler);
    }

    fn set_on_send_ack(&self, handler: mpsc::UnboundedSender<SendAck>) {
        self.peer.on_ack.set(handler);
    }

    async fn send(
        &self,
        channel: &Channel,
        payload: Bytes,
        _options: SendOptions,
    ) -> Result<u64, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.broker.inner.failing_senders.contains(&self.peer.identity) {
            return Err(TransportError::Send("injected send failure".to_string()));
        }

        let client_seq = self.peer.next_seq.fetch_add(1, Ordering::SeqCst);
        self.peer.traffic.record_out(payload.len());
        let message_id = self.broker.deliver(&self.peer, channel, &payload);

        self.peer.on_ack.dispatch(SendAck {
            client_seq,
            message_id,
            reason: ReasonCode::Success,
        });
        Ok(client_seq)
    }

    async fn flush(&self) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Flush("connection closed".to_string()));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.peer.connected.load(Ordering::SeqCst)
    }

    fn traffic(&self) -> Arc<TrafficCounters> {
        self.peer.traffic.clone()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.disconnect();
        Ok(())
    }
}
