//! Per-actor progress bars and the live throughput ticker
//!
//! Bars are purely cosmetic. When progress is suppressed every bar is
//! `ProgressBar::hidden()`, so actors update them unconditionally.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::info;

use crate::actor::ActorCounters;
use crate::humanize::{comma, ibytes};
use crate::sample::{Rate, TrafficSnapshot, rate_delta};
use crate::workload::Role;

const BAR_TEMPLATE: &str =
    "{prefix} {msg:>24} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}";

/// Owner of all bars of one run
pub struct ProgressBoard {
    multi: Option<MultiProgress>,
}

impl ProgressBoard {
    pub fn new(enabled: bool) -> Self {
        Self {
            multi: enabled.then(MultiProgress::new),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.multi.is_some()
    }

    /// Bar for one actor, sized to the messages it will complete
    pub fn bar(&self, identity: &str, total: u64) -> ProgressBar {
        let Some(multi) = &self.multi else {
            return ProgressBar::hidden();
        };
        let pb = multi.add(ProgressBar::new(total));
        if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
            pb.set_style(style.progress_chars("█░-"));
        }
        pb.set_message(identity.to_string());
        pb
    }

    pub fn clear(&self) {
        if let Some(multi) = &self.multi {
            let _ = multi.clear();
        }
    }
}

/// Live counters of every actor, grouped by role
#[derive(Default, Clone)]
pub struct LiveCounters {
    pub publishers: Vec<Arc<ActorCounters>>,
    pub subscribers: Vec<Arc<ActorCounters>>,
}

impl LiveCounters {
    pub fn snapshot(&self, role: Role, at: Instant) -> TrafficSnapshot {
        let (group, messages) = match role {
            Role::Publisher => (
                &self.publishers,
                self.publishers.iter().map(|c| c.acked()).sum::<u64>(),
            ),
            Role::Subscriber => (
                &self.subscribers,
                self.subscribers.iter().map(|c| c.received()).sum::<u64>(),
            ),
        };
        TrafficSnapshot {
            at,
            messages,
            bytes: group.iter().map(|c| c.payload_bytes()).sum(),
        }
    }
}

fn format_rate(rate: &Rate) -> String {
    format!(
        "{:.0} msgs/sec ~ {}/sec",
        rate.messages_per_sec,
        ibytes(rate.bytes_per_sec)
    )
}

/// Log aggregate throughput every `period` until the handle is aborted
pub fn spawn_ticker(counters: LiveCounters, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;

        let now = Instant::now();
        let mut prev_pub = counters.snapshot(Role::Publisher, now);
        let mut prev_sub = counters.snapshot(Role::Subscriber, now);

        loop {
            interval.tick().await;
            let now = Instant::now();
            let cur_pub = counters.snapshot(Role::Publisher, now);
            let cur_sub = counters.snapshot(Role::Subscriber, now);

            if let (Some(pub_rate), Some(sub_rate)) =
                (rate_delta(&prev_pub, &cur_pub), rate_delta(&prev_sub, &cur_sub))
            {
                info!(
                    published = %comma(cur_pub.messages),
                    received = %comma(cur_sub.messages),
                    pub_rate = %format_rate(&pub_rate),
                    sub_rate = %format_rate(&sub_rate),
                    "Throughput"
                );
            }

            prev_pub = cur_pub;
            prev_sub = cur_sub;
        }
    })
}
