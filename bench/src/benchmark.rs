//! Benchmark aggregator and report
//!
//! Samples are appended under one lock while the benchmark is open. After
//! `close()` the sample lists are frozen, so every `report()` sees the same
//! data and renders the same text.

use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

use crate::humanize::{comma, ibytes};
use crate::sample::{Sample, per_second};
use crate::workload::Role;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BenchmarkError {
    #[error("benchmark is closed, sample rejected")]
    Closed,

    #[error("benchmark is still open")]
    NotClosed,
}

#[derive(Debug, Default)]
struct BenchmarkState {
    publishers: Vec<Sample>,
    subscribers: Vec<Sample>,
    closed: bool,
}

/// Collects samples from every actor of a run
#[derive(Debug)]
pub struct Benchmark {
    name: String,
    state: Mutex<BenchmarkState>,
}

impl Benchmark {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(BenchmarkState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BenchmarkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_publisher_sample(&self, sample: Sample) -> Result<(), BenchmarkError> {
        self.add(Role::Publisher, sample)
    }

    pub fn add_subscriber_sample(&self, sample: Sample) -> Result<(), BenchmarkError> {
        self.add(Role::Subscriber, sample)
    }

    fn add(&self, role: Role, sample: Sample) -> Result<(), BenchmarkError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BenchmarkError::Closed);
        }
        debug!(identity = sample.identity(), ?role, count = sample.count(), "Sample recorded");
        match role {
            Role::Publisher => state.publishers.push(sample),
            Role::Subscriber => state.subscribers.push(sample),
        }
        Ok(())
    }

    /// Stop accepting samples; further calls have no effect
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn publisher_samples(&self) -> Vec<Sample> {
        self.lock().publishers.clone()
    }

    pub fn subscriber_samples(&self) -> Vec<Sample> {
        self.lock().subscribers.clone()
    }

    /// Summary statistics; only available once closed
    pub fn report(&self) -> Result<BenchReport, BenchmarkError> {
        let state = self.lock();
        if !state.closed {
            return Err(BenchmarkError::NotClosed);
        }

        let all: Vec<&Sample> = state
            .publishers
            .iter()
            .chain(state.subscribers.iter())
            .collect();

        Ok(BenchReport {
            name: self.name.clone(),
            overall: GroupRate::over(&all),
            publishers: GroupStats::from_samples(Role::Publisher, &state.publishers),
            subscribers: GroupStats::from_samples(Role::Subscriber, &state.subscribers),
        })
    }
}

/// Aggregate rate over a group's whole active window
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GroupRate {
    pub messages: u64,
    pub elapsed_secs: f64,
    pub msgs_per_sec: Option<f64>,
    pub bytes_per_sec: Option<f64>,
}

impl GroupRate {
    /// `Σcount / (max end - min start)`, not the sum of per-actor rates
    fn over(samples: &[&Sample]) -> Option<Self> {
        let start = samples.iter().map(|s| s.start()).min()?;
        let end: Instant = samples.iter().map(|s| s.end()).max()?;
        let elapsed = end.duration_since(start);

        let messages: u64 = samples.iter().map(|s| s.count()).sum();
        let bytes: f64 = samples
            .iter()
            .map(|s| s.count() as f64 * s.message_size() as f64)
            .sum();

        Some(Self {
            messages,
            elapsed_secs: elapsed.as_secs_f64(),
            msgs_per_sec: per_second(messages as f64, elapsed),
            bytes_per_sec: per_second(bytes, elapsed),
        })
    }
}

/// Min / mean / max / stddev of per-actor message rates
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricStats {
    pub min: f64,
    pub mean: f64,
    pub max: f64,
    pub stddev: f64,
}

impl MetricStats {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;

        let variance = if samples.len() > 1 {
            samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)
        } else {
            0.0
        };

        Some(Self {
            min: samples.iter().copied().fold(f64::INFINITY, f64::min),
            mean,
            max: samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            stddev: variance.sqrt(),
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActorStats {
    pub identity: String,
    pub messages: u64,
    pub elapsed_secs: f64,
    pub msgs_per_sec: Option<f64>,
    pub bytes_per_sec: Option<f64>,
    pub io_bytes: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GroupStats {
    pub role: Role,
    pub combined: GroupRate,
    pub io_bytes: u64,
    pub rates: Option<MetricStats>,
    pub actors: Vec<ActorStats>,
}

impl GroupStats {
    fn from_samples(role: Role, samples: &[Sample]) -> Option<Self> {
        let refs: Vec<&Sample> = samples.iter().collect();
        let combined = GroupRate::over(&refs)?;

        let actors: Vec<ActorStats> = samples
            .iter()
            .map(|s| ActorStats {
                identity: s.identity().to_string(),
                messages: s.count(),
                elapsed_secs: s.elapsed().as_secs_f64(),
                msgs_per_sec: s.message_rate(),
                bytes_per_sec: s.byte_rate(),
                io_bytes: s.io_bytes(),
            })
            .collect();

        let defined: Vec<f64> = actors.iter().filter_map(|a| a.msgs_per_sec).collect();

        Some(Self {
            role,
            combined,
            io_bytes: actors.iter().map(|a| a.io_bytes).sum(),
            rates: MetricStats::from_samples(&defined),
            actors,
        })
    }
}

/// Rendered summary of a closed benchmark
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BenchReport {
    pub name: String,
    pub overall: Option<GroupRate>,
    pub publishers: Option<GroupStats>,
    pub subscribers: Option<GroupStats>,
}

impl BenchReport {
    pub fn render(&self) -> String {
        self.to_string()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(r) => comma(r.round() as u64),
        None => "undefined".to_string(),
    }
}

fn format_byte_rate(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{}/sec", ibytes(r)),
        None => "undefined".to_string(),
    }
}

impl fmt::Display for GroupRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} msgs/sec ~ {}",
            format_rate(self.msgs_per_sec),
            format_byte_rate(self.bytes_per_sec)
        )
    }
}

impl fmt::Display for GroupStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.role {
            Role::Publisher => "Pub",
            Role::Subscriber => "Sub",
        };
        writeln!(
            f,
            " {} stats: {} ({} msgs in {:.3}s, {} io)",
            label,
            self.combined,
            comma(self.combined.messages),
            self.combined.elapsed_secs,
            ibytes(self.io_bytes as f64)
        )?;

        for (i, actor) in self.actors.iter().enumerate() {
            writeln!(
                f,
                "  [{}] {} msgs/sec ~ {} ({} msgs)",
                i + 1,
                format_rate(actor.msgs_per_sec),
                format_byte_rate(actor.bytes_per_sec),
                comma(actor.messages)
            )?;
        }

        match &self.rates {
            Some(stats) => writeln!(
                f,
                "  min {} | avg {} | max {} | stddev {} msgs",
                format_rate(Some(stats.min)),
                format_rate(Some(stats.mean)),
                format_rate(Some(stats.max)),
                format_rate(Some(stats.stddev))
            ),
            None => writeln!(f, "  min undefined | avg undefined | max undefined"),
        }
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.overall, &self.publishers, &self.subscribers) {
            (None, _, _) => writeln!(f, "{}: no samples recorded", self.name),
            (Some(overall), pubs, subs) => {
                if pubs.is_some() && subs.is_some() {
                    writeln!(f, "{} Pub/Sub stats: {}", self.name, overall)?;
                } else {
                    writeln!(f, "{} stats: {}", self.name, overall)?;
                }
                if let Some(pubs) = pubs {
                    write!(f, "{}", pubs)?;
                }
                if let Some(subs) = subs {
                    write!(f, "{}", subs)?;
                }
                Ok(())
            }
        }
    }
}
