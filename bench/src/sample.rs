//! Per-actor samples and derived throughput

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::transport::TrafficCounters;
use crate::workload::Role;

/// Timing and volume recorded once by an actor at completion
#[derive(Debug, Clone)]
pub struct Sample {
    role: Role,
    identity: String,
    count: u64,
    message_size: usize,
    start: Instant,
    end: Instant,
    traffic: Arc<TrafficCounters>,
}

impl Sample {
    pub fn new(
        role: Role,
        identity: impl Into<String>,
        count: u64,
        message_size: usize,
        start: Instant,
        end: Instant,
        traffic: Arc<TrafficCounters>,
    ) -> Self {
        Self {
            role,
            identity: identity.into(),
            count,
            message_size,
            start,
            end: end.max(start),
            traffic,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn message_size(&self) -> usize {
        self.message_size
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn end(&self) -> Instant {
        self.end
    }

    pub fn elapsed(&self) -> Duration {
        self.end.duration_since(self.start)
    }

    /// Messages per second, `None` when no time elapsed
    pub fn message_rate(&self) -> Option<f64> {
        per_second(self.count as f64, self.elapsed())
    }

    /// Payload bytes per second, `None` when no time elapsed
    pub fn byte_rate(&self) -> Option<f64> {
        per_second(self.count as f64 * self.message_size as f64, self.elapsed())
    }

    /// Bytes the transport actually moved for this actor's direction
    pub fn io_bytes(&self) -> u64 {
        match self.role {
            Role::Publisher => self.traffic.bytes_out(),
            Role::Subscriber => self.traffic.bytes_in(),
        }
    }
}

/// `amount / elapsed`, undefined for a zero interval
pub fn per_second(amount: f64, elapsed: Duration) -> Option<f64> {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { Some(amount / secs) } else { None }
}

/// Cumulative counters observed at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrafficSnapshot {
    pub at: Instant,
    pub messages: u64,
    pub bytes: u64,
}

/// Throughput over an interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate {
    pub messages_per_sec: f64,
    pub bytes_per_sec: f64,
}

/// Throughput between two snapshots of the same counters.
///
/// `None` when no time passed or the counters went backwards.
pub fn rate_delta(prev: &TrafficSnapshot, cur: &TrafficSnapshot) -> Option<Rate> {
    let elapsed = cur.at.checked_duration_since(prev.at)?;
    let messages = cur.messages.checked_sub(prev.messages)?;
    let bytes = cur.bytes.checked_sub(prev.bytes)?;
    Some(Rate {
        messages_per_sec: per_second(messages as f64, elapsed)?,
        bytes_per_sec: per_second(bytes as f64, elapsed)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(count: u64, size: usize, elapsed: Duration) -> Sample {
        let start = Instant::now();
        Sample::new(
            Role::Publisher,
            "pub-0",
            count,
            size,
            start,
            start + elapsed,
            Arc::new(TrafficCounters::default()),
        )
    }

    #[test]
    fn test_rates_for_one_second() {
        let s = sample(1000, 128, Duration::from_secs(1));
        assert_eq!(s.message_rate(), Some(1000.0));
        assert_eq!(s.byte_rate(), Some(128_000.0));
    }

    #[test]
    fn test_zero_elapsed_rates_are_undefined() {
        let s = sample(1000, 128, Duration::ZERO);
        assert_eq!(s.elapsed(), Duration::ZERO);
        assert_eq!(s.message_rate(), None);
        assert_eq!(s.byte_rate(), None);
    }

    #[test]
    fn test_end_before_start_is_clamped() {
        let end = Instant::now();
        let start = end + Duration::from_millis(5);
        let s = Sample::new(
            Role::Subscriber,
            "sub-0",
            1,
            1,
            start,
            end,
            Arc::new(TrafficCounters::default()),
        );
        assert_eq!(s.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_io_bytes_follow_role_direction() {
        let traffic = Arc::new(TrafficCounters::default());
        traffic.record_out(40);
        traffic.record_in(7);
        let now = Instant::now();
        let publisher = Sample::new(Role::Publisher, "p", 1, 1, now, now, traffic.clone());
        let subscriber = Sample::new(Role::Subscriber, "s", 1, 1, now, now, traffic);
        assert_eq!(publisher.io_bytes(), 40);
        assert_eq!(subscriber.io_bytes(), 7);
    }

    #[test]
    fn test_rate_delta_between_snapshots() {
        let at = Instant::now();
        let prev = TrafficSnapshot {
            at,
            messages: 100,
            bytes: 1000,
        };
        let cur = TrafficSnapshot {
            at: at + Duration::from_millis(500),
            messages: 600,
            bytes: 6000,
        };
        let rate = rate_delta(&prev, &cur).unwrap();
        assert_eq!(rate.messages_per_sec, 1000.0);
        assert_eq!(rate.bytes_per_sec, 10_000.0);
    }

    #[test]
    fn test_rate_delta_rejects_empty_or_backwards_intervals() {
        let at = Instant::now();
        let snap = TrafficSnapshot {
            at,
            messages: 10,
            bytes: 10,
        };
        assert_eq!(rate_delta(&snap, &snap), None);

        let earlier = TrafficSnapshot {
            at: at + Duration::from_secs(1),
            messages: 5,
            bytes: 5,
        };
        assert_eq!(rate_delta(&snap, &earlier), None);
    }
}
