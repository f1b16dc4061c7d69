//! One benchmark run from workload to report

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::actor::{
    ActorContext, ActorCounters, ChannelPolicy, PublisherSpec, SubscriberSpec, run_publisher,
    run_subscriber,
};
use crate::benchmark::{BenchReport, Benchmark};
use crate::coordinator::{ReadinessJoin, Trigger, readiness_join, trigger};
use crate::error::{BenchError, Result};
use crate::progress::{LiveCounters, ProgressBoard, spawn_ticker};
use crate::protocol::SendOptions;
use crate::route::{RouteResolver, resolve_all};
use crate::transport::{Connection, Transport};
use crate::workload::{Role, RunPrefix, partition};

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// How actor identities are chosen
#[derive(Debug, Clone)]
pub enum Identities {
    /// `{prefix}-pub-{i}` / `{prefix}-sub-{i}`
    Generated(RunPrefix),
    /// Point-to-point: exactly one publisher and one subscriber
    Bound { publisher: String, subscriber: String },
}

/// Fully validated parameters of one run
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub name: String,
    pub pubs: usize,
    pub subs: usize,
    pub msgs: u64,
    pub message_size: usize,
    pub pacing: Duration,
    pub policy: ChannelPolicy,
    pub options: SendOptions,
    pub identities: Identities,
    pub progress: bool,
}

impl BenchConfig {
    /// Checks that hold for every run, whichever front end built the config
    pub fn validate(&self) -> Result<()> {
        if self.pubs == 0 && self.subs == 0 {
            return Err(BenchError::Usage(
                "at least one publisher or subscriber is required".to_string(),
            ));
        }
        if let Identities::Bound { .. } = self.identities
            && (self.pubs != 1 || self.subs != 1)
        {
            return Err(BenchError::Usage(
                "point-to-point runs use exactly one publisher and one subscriber".to_string(),
            ));
        }
        if self.pubs == 0 && self.msgs > 0 {
            return Err(BenchError::Usage(
                "subscribers cannot receive messages without publishers".to_string(),
            ));
        }
        Ok(())
    }

    /// Publisher and subscriber identities, in index order
    pub fn actor_identities(&self) -> (Vec<String>, Vec<String>) {
        match &self.identities {
            Identities::Generated(prefix) => (
                (0..self.pubs)
                    .map(|i| prefix.identity(Role::Publisher, i))
                    .collect(),
                (0..self.subs)
                    .map(|i| prefix.identity(Role::Subscriber, i))
                    .collect(),
            ),
            Identities::Bound {
                publisher,
                subscriber,
            } => (vec![publisher.clone()], vec![subscriber.clone()]),
        }
    }
}

/// Result of a completed run
#[derive(Debug)]
pub struct RunOutcome {
    pub report: BenchReport,
    pub benchmark: Arc<Benchmark>,
    /// Readiness join completion
    pub ready_at: Instant,
    /// Trigger release
    pub fired_at: Instant,
}

type ActorResult = Result<Box<dyn Connection>>;

/// Execute one run.
///
/// Setup failures (usage, routing, connecting) return before the trigger
/// fires. A failure after the trigger aborts every other actor and is
/// returned as is; no report is produced for a failed run.
pub async fn run(
    config: &BenchConfig,
    resolver: &dyn RouteResolver,
    transport: Arc<dyn Transport>,
) -> Result<RunOutcome> {
    config.validate()?;

    let quotas = if config.pubs > 0 {
        partition(config.msgs, config.pubs)?
    } else {
        Vec::new()
    };
    let (pub_ids, sub_ids) = config.actor_identities();
    let all_ids: Vec<String> = pub_ids.iter().chain(sub_ids.iter()).cloned().collect();

    let routes = resolve_all(resolver, &all_ids).await?;

    let benchmark = Arc::new(Benchmark::new(config.name.clone()));
    let board = ProgressBoard::new(config.progress);
    let (join, signals) = readiness_join(all_ids.len());
    let mut signals = signals.into_iter();
    let (fire, waiter) = trigger();
    let mut tasks: JoinSet<ActorResult> = JoinSet::new();
    let mut live = LiveCounters::default();

    // Subscribers are spawned first so they are listening as early as possible
    for (identity, ready) in sub_ids.into_iter().zip(signals.by_ref()) {
        let counters = Arc::new(ActorCounters::default());
        live.subscribers.push(counters.clone());
        let ctx = ActorContext {
            transport: transport.clone(),
            benchmark: benchmark.clone(),
            ready,
            progress: board.bar(&identity, config.msgs),
            counters,
        };
        let spec = SubscriberSpec {
            addr: routes.get(&identity).cloned().unwrap_or_default(),
            identity,
            expected: config.msgs,
            message_size: config.message_size,
        };
        tasks.spawn(run_subscriber(spec, ctx));
    }

    for (offset, ((identity, quota), ready)) in pub_ids
        .into_iter()
        .zip(quotas)
        .zip(signals.by_ref())
        .enumerate()
    {
        let counters = Arc::new(ActorCounters::default());
        live.publishers.push(counters.clone());
        let ctx = ActorContext {
            transport: transport.clone(),
            benchmark: benchmark.clone(),
            ready,
            progress: board.bar(&identity, quota),
            counters,
        };
        let spec = PublisherSpec {
            addr: routes.get(&identity).cloned().unwrap_or_default(),
            identity,
            quota,
            message_size: config.message_size,
            pacing: config.pacing,
            policy: config.policy.clone(),
            options: config.options,
            offset,
        };
        tasks.spawn(run_publisher(spec, ctx, waiter.clone()));
    }
    drop(waiter);

    info!(
        publishers = config.pubs,
        subscribers = config.subs,
        msgs = config.msgs,
        size = config.message_size,
        "Actors spawned"
    );

    let ticker = config.progress.then(|| spawn_ticker(live, TICK_PERIOD));
    let mut connections = Vec::with_capacity(all_ids.len());

    let outcome = drive(&mut tasks, join, fire, &mut connections).await;
    if let Some(ticker) = ticker {
        ticker.abort();
    }
    if outcome.is_err() {
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }
    close_all(connections).await;
    board.clear();

    let (ready_at, fired_at) = outcome?;
    benchmark.close();
    let report = benchmark.report()?;
    Ok(RunOutcome {
        report,
        benchmark,
        ready_at,
        fired_at,
    })
}

/// Readiness join, trigger release and completion join
async fn drive(
    tasks: &mut JoinSet<ActorResult>,
    join: ReadinessJoin,
    fire: Trigger,
    connections: &mut Vec<Box<dyn Connection>>,
) -> Result<(Instant, Instant)> {
    let setup_started = Instant::now();
    let ready = join.wait();
    tokio::pin!(ready);

    let ready_at = loop {
        tokio::select! {
            ready = &mut ready => match ready {
                Ok(at) => break at,
                Err(e) => {
                    // The actor that dropped its signal has the real cause
                    tasks.abort_all();
                    while let Some(res) = tasks.join_next().await {
                        if let Some(Err(err)) = actor_result(res) {
                            error!(error = %err, "Actor failed during setup");
                            return Err(err);
                        }
                    }
                    return Err(BenchError::Aborted(e.to_string()));
                }
            },
            Some(res) = tasks.join_next() => match actor_result(res) {
                Some(Ok(conn)) => connections.push(conn),
                Some(Err(err)) => {
                    error!(error = %err, "Actor failed during setup");
                    return Err(err);
                }
                None => {}
            },
        }
    };

    let fired_at = fire.fire();
    info!(
        setup_ms = ready_at.duration_since(setup_started).as_millis() as u64,
        "All actors ready, trigger fired"
    );

    while let Some(res) = tasks.join_next().await {
        match actor_result(res) {
            Some(Ok(conn)) => connections.push(conn),
            Some(Err(err)) => {
                error!(error = %err, "Actor failed, aborting run");
                return Err(err);
            }
            None => {}
        }
    }

    info!(
        elapsed_ms = fired_at.elapsed().as_millis() as u64,
        "All actors finished"
    );
    Ok((ready_at, fired_at))
}

/// Flatten a join result; `None` for tasks cancelled by an abort
fn actor_result(res: std::result::Result<ActorResult, JoinError>) -> Option<ActorResult> {
    match res {
        Ok(result) => Some(result),
        Err(e) if e.is_cancelled() => None,
        Err(e) => Some(Err(BenchError::ActorPanicked(e.to_string()))),
    }
}

async fn close_all(connections: Vec<Box<dyn Connection>>) {
    for conn in connections {
        if let Err(e) = conn.close().await {
            warn!(identity = conn.identity(), error = %e, "Failed to close connection");
        }
    }
}
