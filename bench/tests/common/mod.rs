//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules.

#![allow(dead_code)]

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use pubsub_bench::actor::ChannelPolicy;
use pubsub_bench::protocol::{
    Channel, ChannelType, ClientFrame, ReasonCode, SendOptions, ServerFrame,
};
use pubsub_bench::workload::RunPrefix;
use pubsub_bench::{BenchConfig, Identities};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Run configuration with generated identities and a single shared channel
pub fn shared_channel_config(pubs: usize, subs: usize, msgs: u64, size: usize) -> BenchConfig {
    BenchConfig {
        name: "test".to_string(),
        pubs,
        subs,
        msgs,
        message_size: size,
        pacing: Duration::ZERO,
        policy: ChannelPolicy::Fixed(Channel::group("shared")),
        options: SendOptions::default(),
        identities: Identities::Generated(RunPrefix::new(format!(
            "t{}",
            &uuid::Uuid::new_v4().simple().to_string()[..6]
        ))),
        progress: false,
    }
}

#[derive(Default)]
struct MockState {
    ws_url: String,
    peers: Mutex<HashMap<String, mpsc::UnboundedSender<ServerFrame>>>,
    rejected: HashSet<String>,
    unroutable: HashSet<String>,
    next_message_id: AtomicU64,
    route_requests: Mutex<Vec<Vec<String>>>,
    /// Drop a connection once it sends more than this many messages
    close_after_sends: Option<u64>,
}

/// Minimal pub/sub server speaking the benchmark's JSON frames
pub struct MockBroker {
    pub addr: SocketAddr,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockBroker {
    pub async fn start() -> Self {
        Self::start_with(HashSet::new(), HashSet::new()).await
    }

    /// `rejected` identities get a failing connack; `unroutable` ones are
    /// left out of route responses
    pub async fn start_with(rejected: HashSet<String>, unroutable: HashSet<String>) -> Self {
        Self::serve(MockState {
            rejected,
            unroutable,
            ..Default::default()
        })
        .await
    }

    /// Every connection is dropped without an ack when it sends message
    /// number `sends + 1`
    pub async fn start_closing_after(sends: u64) -> Self {
        Self::serve(MockState {
            close_after_sends: Some(sends),
            ..Default::default()
        })
        .await
    }

    async fn serve(mut state: MockState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        state.ws_url = format!("ws://{}/ws", addr);
        let state = Arc::new(state);

        let app = Router::new()
            .route("/route/batch", post(route_batch))
            .route("/ws", get(ws_handler))
            .with_state(state.clone());

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn connected(&self) -> usize {
        self.state.peers.lock().unwrap().len()
    }

    pub fn route_requests(&self) -> Vec<Vec<String>> {
        self.state.route_requests.lock().unwrap().clone()
    }
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn route_batch(
    State(state): State<Arc<MockState>>,
    Json(uids): Json<Vec<String>>,
) -> Json<Value> {
    state.route_requests.lock().unwrap().push(uids.clone());
    let routed: Vec<String> = uids
        .into_iter()
        .filter(|uid| !state.unroutable.contains(uid))
        .collect();
    Json(json!([{
        "uids": routed,
        "tcp_addr": "",
        "ws_addr": state.ws_url,
        "wss_addr": "",
    }]))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<MockState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<MockState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let uid = match ws_receiver.next().await {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Connect { uid, .. }) => uid,
            _ => return,
        },
        _ => return,
    };

    if state.rejected.contains(&uid) {
        let frame = ServerFrame::Connack {
            status: ReasonCode::Rejected,
            reason: Some(format!("{} is banned", uid)),
        };
        let _ = ws_sender
            .send(Message::Text(serde_json::to_string(&frame).unwrap()))
            .await;
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
    state.peers.lock().unwrap().insert(uid.clone(), tx.clone());
    let _ = tx.send(ServerFrame::Connack {
        status: ReasonCode::Success,
        reason: None,
    });

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = serde_json::to_string(&frame).unwrap();
            if ws_sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut sends = 0u64;
    while let Some(Ok(msg)) = ws_receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else {
            continue;
        };
        match frame {
            ClientFrame::Send {
                client_seq,
                channel_id,
                channel_type,
                payload,
                ..
            } => {
                sends += 1;
                if state.close_after_sends.is_some_and(|limit| sends > limit) {
                    break;
                }
                let message_id = state.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
                let targets: Vec<mpsc::UnboundedSender<ServerFrame>> = {
                    let peers = state.peers.lock().unwrap();
                    match ChannelType::from_code(channel_type) {
                        Some(ChannelType::Person) => {
                            peers.get(&channel_id).cloned().into_iter().collect()
                        }
                        _ => peers
                            .iter()
                            .filter(|(id, _)| **id != uid)
                            .map(|(_, tx)| tx.clone())
                            .collect(),
                    }
                };
                for target in targets {
                    let _ = target.send(ServerFrame::Recv {
                        message_id,
                        from_uid: uid.clone(),
                        channel_id: channel_id.clone(),
                        channel_type,
                        payload: payload.clone(),
                    });
                }
                let _ = tx.send(ServerFrame::Sendack {
                    client_seq,
                    message_id,
                    status: ReasonCode::Success,
                });
            }
            ClientFrame::RecvAck { .. } | ClientFrame::Connect { .. } => {}
        }
    }

    state.peers.lock().unwrap().remove(&uid);
    send_task.abort();
}
