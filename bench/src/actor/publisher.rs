use bytes::Bytes;
use indicatif::ProgressBar;
use metrics::{counter, histogram};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{ActorContext, ActorCounters, ActorState, ChannelPolicy, ChannelSelector, StateTracker};
use crate::coordinator::TriggerWaiter;
use crate::error::{BenchError, Result};
use crate::protocol::{ReasonCode, SendAck, SendOptions};
use crate::sample::Sample;
use crate::transport::Connection;
use crate::workload::Role;

/// What one publisher sends, and where
#[derive(Debug, Clone)]
pub struct PublisherSpec {
    pub identity: String,
    pub addr: String,
    pub quota: u64,
    pub message_size: usize,
    /// Pause after each send; zero sends back to back
    pub pacing: Duration,
    pub policy: ChannelPolicy,
    pub options: SendOptions,
    /// Round-robin starting offset
    pub offset: usize,
}

/// Connect, wait for the trigger, send `quota` messages and wait for every ack.
///
/// The connection is handed back open so the orchestrator can close all
/// connections together at the end of the run.
pub async fn run_publisher(
    spec: PublisherSpec,
    ctx: ActorContext,
    trigger: TriggerWaiter,
) -> Result<Box<dyn Connection>> {
    let ActorContext {
        transport,
        benchmark,
        ready,
        progress,
        counters,
    } = ctx;
    let mut tracker = StateTracker::new(&spec.identity, progress);

    let conn = transport
        .connect(&spec.identity, &spec.addr)
        .await
        .map_err(|e| BenchError::Connection {
            identity: spec.identity.clone(),
            reason: e.to_string(),
        })?;

    let (ack_tx, mut acks) = mpsc::unbounded_channel();
    conn.set_on_send_ack(ack_tx);
    let mut inbound = if spec.policy.listens() {
        let (tx, rx) = mpsc::unbounded_channel();
        conn.set_on_recv(tx);
        Some(rx)
    } else {
        None
    };

    tracker.enter(ActorState::Ready);
    ready.signal();

    tracker.enter(ActorState::WaitingForTrigger);
    trigger
        .wait()
        .await
        .map_err(|e| BenchError::Aborted(e.to_string()))?;

    tracker.enter(ActorState::Sending);
    let payload = Bytes::from(vec![b'x'; spec.message_size]);
    let mut selector = ChannelSelector::new(spec.policy.clone(), spec.offset);
    let mut acked = 0u64;
    let start = Instant::now();

    for _ in 0..spec.quota {
        if let Some(rx) = inbound.as_mut() {
            while let Ok(packet) = rx.try_recv() {
                selector.observe_sender(packet.from_uid);
            }
        }

        let channel = selector.next_channel().ok_or_else(|| {
            BenchError::Usage(format!("publisher {} has no channel to send to", spec.identity))
        })?;

        conn.send(&channel, payload.clone(), spec.options)
            .await
            .map_err(|e| BenchError::Send {
                identity: spec.identity.clone(),
                reason: e.to_string(),
            })?;
        counters.record_sent();
        counter!("pubsub_bench_messages_sent_total").increment(1);

        while let Ok(ack) = acks.try_recv() {
            record_ack(&spec, &ack, &counters, tracker.progress());
            acked += 1;
        }

        if !spec.pacing.is_zero() {
            // Paced sends must hit the wire before the pause
            flush(conn.as_ref(), &spec.identity).await?;
            tokio::time::sleep(spec.pacing).await;
        }
    }

    flush(conn.as_ref(), &spec.identity).await?;

    tracker.enter(ActorState::Draining);
    while acked < spec.quota {
        match acks.recv().await {
            Some(ack) => {
                record_ack(&spec, &ack, &counters, tracker.progress());
                acked += 1;
            }
            None => {
                return Err(BenchError::Aborted(format!(
                    "{} lost its connection with {} acks outstanding",
                    spec.identity,
                    spec.quota - acked
                )));
            }
        }
    }
    let end = if spec.quota == 0 { start } else { Instant::now() };

    tracker.enter(ActorState::Done);
    let sample = Sample::new(
        Role::Publisher,
        spec.identity.clone(),
        spec.quota,
        spec.message_size,
        start,
        end,
        conn.traffic(),
    );
    histogram!("pubsub_bench_actor_elapsed_seconds", "role" => "publisher")
        .record(sample.elapsed());
    benchmark.add_publisher_sample(sample)?;
    tracker.progress().finish();
    debug!(identity = %spec.identity, acked, "Publisher finished");

    Ok(conn)
}

async fn flush(conn: &dyn Connection, identity: &str) -> Result<()> {
    conn.flush().await.map_err(|e| BenchError::Flush {
        identity: identity.to_string(),
        reason: e.to_string(),
    })
}

fn record_ack(
    spec: &PublisherSpec,
    ack: &SendAck,
    counters: &ActorCounters,
    progress: &ProgressBar,
) {
    if ack.reason != ReasonCode::Success {
        warn!(
            identity = %spec.identity,
            client_seq = ack.client_seq,
            reason = ?ack.reason,
            "Send not accepted by server"
        );
    }
    counters.record_acked(spec.message_size);
    counter!("pubsub_bench_acks_total").increment(1);
    progress.inc(1);
}
