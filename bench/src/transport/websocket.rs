//! WebSocket transport speaking JSON frames
//!
//! Sends are fed into the sink without flushing; `flush` pushes everything
//! buffered onto the socket. A reader task per connection turns server
//! frames into receive and send-ack events. When the reader stops, both
//! handlers are dropped so waiting actors observe the lost connection.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, warn};

use super::{Connection, HandlerSlot, TrafficCounters, Transport, TransportError};
use crate::protocol::{
    Channel, ChannelType, ClientFrame, ReasonCode, RecvPacket, SendAck, SendOptions, ServerFrame,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Connects actors over `ws://` / `wss://`
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    token: String,
}

impl WebSocketTransport {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

struct Shared {
    identity: String,
    on_recv: HandlerSlot<RecvPacket>,
    on_ack: HandlerSlot<SendAck>,
    traffic: Arc<TrafficCounters>,
    connected: AtomicBool,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(
        &self,
        identity: &str,
        addr: &str,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let (ws, _) = connect_async(addr)
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {}", addr, e)))?;
        let (mut sink, mut stream) = ws.split();

        let hello = ClientFrame::Connect {
            uid: identity.to_string(),
            token: self.token.clone(),
        };
        let json = serde_json::to_string(&hello)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        sink.send(Message::Text(json.into()))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        wait_for_connack(&mut stream).await?;

        let shared = Arc::new(Shared {
            identity: identity.to_string(),
            on_recv: HandlerSlot::new(),
            on_ack: HandlerSlot::new(),
            traffic: Arc::new(TrafficCounters::default()),
            connected: AtomicBool::new(true),
        });
        let sink = Arc::new(Mutex::new(sink));

        let reader = tokio::spawn(read_frames(stream, shared.clone(), sink.clone()));

        debug!(identity, addr, "WebSocket connection established");
        Ok(Box::new(WebSocketConnection {
            shared,
            sink,
            next_seq: AtomicU64::new(1),
            reader,
        }))
    }
}

async fn wait_for_connack(stream: &mut SplitStream<WsStream>) -> Result<(), TransportError> {
    while let Some(result) = stream.next().await {
        let msg = result.map_err(|e| TransportError::Connect(e.to_string()))?;
        if let Message::Text(text) = msg {
            match serde_json::from_str::<ServerFrame>(&text) {
                Ok(ServerFrame::Connack {
                    status: ReasonCode::Success,
                    ..
                }) => return Ok(()),
                Ok(ServerFrame::Connack { reason, .. }) => {
                    return Err(TransportError::Rejected(
                        reason.unwrap_or_else(|| "connack rejected".to_string()),
                    ));
                }
                Ok(other) => {
                    debug!("Ignoring {} before connack", other.frame_type());
                }
                Err(e) => return Err(TransportError::Protocol(e.to_string())),
            }
        }
    }
    Err(TransportError::Connect(
        "connection closed before connack".to_string(),
    ))
}

async fn read_frames(
    mut stream: SplitStream<WsStream>,
    shared: Arc<Shared>,
    sink: Arc<Mutex<WsSink>>,
) {
    while let Some(result) = stream.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(identity = %shared.identity, "WebSocket read error: {}", e);
                break;
            }
        };
        shared.traffic.record_in(text.len());

        match serde_json::from_str::<ServerFrame>(&text) {
            Ok(ServerFrame::Sendack {
                client_seq,
                message_id,
                status,
            }) => {
                shared.on_ack.dispatch(SendAck {
                    client_seq,
                    message_id,
                    reason: status,
                });
            }
            Ok(ServerFrame::Recv {
                message_id,
                from_uid,
                channel_id,
                channel_type,
                payload,
            }) => {
                let channel_type =
                    ChannelType::from_code(channel_type).unwrap_or(ChannelType::Group);
                shared.on_recv.dispatch(RecvPacket {
                    message_id,
                    from_uid,
                    channel: Channel::new(channel_id, channel_type),
                    payload: Bytes::from(payload.into_bytes()),
                });

                if let Ok(ack) = serde_json::to_string(&ClientFrame::RecvAck { message_id }) {
                    let mut sink = sink.lock().await;
                    if sink.send(Message::Text(ack.into())).await.is_err() {
                        break;
                    }
                }
            }
            Ok(ServerFrame::Connack { .. }) => {}
            Err(e) => {
                warn!(identity = %shared.identity, "Failed to parse server frame: {}", e);
            }
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    shared.on_recv.clear();
    shared.on_ack.clear();
    debug!(identity = %shared.identity, "WebSocket reader finished");
}

struct WebSocketConnection {
    shared: Arc<Shared>,
    sink: Arc<Mutex<WsSink>>,
    next_seq: AtomicU64,
    reader: JoinHandle<()>,
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn identity(&self) -> &str {
        &self.shared.identity
    }

    fn set_on_recv(&self, handler: mpsc::UnboundedSender<RecvPacket>) {
        self.shared.on_recv.set(handler);
        if !self.is_connected() {
            self.shared.on_recv.clear();
        }
    }

    fn set_on_send_ack(&self, handler: mpsc::UnboundedSender<SendAck>) {
        self.shared.on_ack.set(handler);
        if !self.is_connected() {
            self.shared.on_ack.clear();
        }
    }

    async fn send(
        &self,
        channel: &Channel,
        payload: Bytes,
        options: SendOptions,
    ) -> Result<u64, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let client_seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let frame = ClientFrame::Send {
            client_seq,
            channel_id: channel.id().to_string(),
            channel_type: channel.channel_type().code(),
            no_encrypt: options.no_encrypt,
            no_persist: options.no_persist,
            payload: String::from_utf8_lossy(&payload).into_owned(),
        };
        let json =
            serde_json::to_string(&frame).map_err(|e| TransportError::Protocol(e.to_string()))?;
        let len = json.len();

        self.sink
            .lock()
            .await
            .feed(Message::Text(json.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        self.shared.traffic.record_out(len);
        Ok(client_seq)
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.sink
            .lock()
            .await
            .flush()
            .await
            .map_err(|e| TransportError::Flush(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn traffic(&self) -> Arc<TrafficCounters> {
        self.shared.traffic.clone()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shared.connected.store(false, Ordering::SeqCst);
        let result = self.sink.lock().await.close().await;
        self.reader.abort();
        result.map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
