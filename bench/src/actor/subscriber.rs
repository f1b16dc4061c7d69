use metrics::{counter, histogram};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;

use super::{ActorContext, ActorState, StateTracker};
use crate::error::{BenchError, Result};
use crate::sample::Sample;
use crate::transport::Connection;
use crate::workload::Role;

#[derive(Debug, Clone)]
pub struct SubscriberSpec {
    pub identity: String,
    pub addr: String,
    /// Messages to receive before the subscriber is done
    pub expected: u64,
    pub message_size: usize,
}

/// Connect, register for deliveries, then count messages until `expected`
/// have arrived.
///
/// The receive handler is registered before readiness is signalled, so no
/// message sent after the trigger can be missed.
pub async fn run_subscriber(
    spec: SubscriberSpec,
    ctx: ActorContext,
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

    let (tx, mut inbound) = mpsc::unbounded_channel();
    conn.set_on_recv(tx);

    tracker.enter(ActorState::Receiving);
    ready.signal();

    let (start, end) = if spec.expected == 0 {
        let now = Instant::now();
        (now, now)
    } else {
        let mut received = 0u64;
        let mut first = None;
        while received < spec.expected {
            let Some(packet) = inbound.recv().await else {
                return Err(BenchError::Aborted(format!(
                    "{} stopped receiving after {} of {} messages",
                    spec.identity, received, spec.expected
                )));
            };
            let at = Instant::now();
            first.get_or_insert(at);
            received += 1;
            counters.record_received(packet.payload.len());
            counter!("pubsub_bench_messages_received_total").increment(1);
            tracker.progress().inc(1);
        }
        (first.unwrap_or_else(Instant::now), Instant::now())
    };

    tracker.enter(ActorState::Done);
    let sample = Sample::new(
        Role::Subscriber,
        spec.identity.clone(),
        spec.expected,
        spec.message_size,
        start,
        end,
        conn.traffic(),
    );
    histogram!("pubsub_bench_actor_elapsed_seconds", "role" => "subscriber")
        .record(sample.elapsed());
    benchmark.add_subscriber_sample(sample)?;
    tracker.progress().finish();
    debug!(identity = %spec.identity, received = spec.expected, "Subscriber finished");

    Ok(conn)
}
