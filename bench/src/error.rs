//! Error types shared by the benchmark engine

use thiserror::Error;

use crate::benchmark::BenchmarkError;

/// Errors that abort a benchmark run
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("Invalid workload: actor count must be greater than zero")]
    InvalidWorkload,

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("No route for identities: {}", missing.join(", "))]
    Routing { missing: Vec<String> },

    #[error("Route request failed: {0}")]
    RouteRequest(String),

    #[error("Connection for {identity} failed: {reason}")]
    Connection { identity: String, reason: String },

    #[error("Send from {identity} failed: {reason}")]
    Send { identity: String, reason: String },

    #[error("Flush for {identity} failed: {reason}")]
    Flush { identity: String, reason: String },

    #[error(transparent)]
    Benchmark(#[from] BenchmarkError),

    #[error("Actor task panicked: {0}")]
    ActorPanicked(String),

    #[error("Run aborted: {0}")]
    Aborted(String),
}

impl BenchError {
    /// True for failures raised before the measured window starts
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            BenchError::InvalidWorkload
                | BenchError::Usage(_)
                | BenchError::Routing { .. }
                | BenchError::RouteRequest(_)
                | BenchError::Connection { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
