//! Pub/Sub benchmark engine
//!
//! Spins up simulated publisher and subscriber connections against a
//! messaging server, releases all publishers together once every actor is
//! connected, and aggregates per-actor samples into a throughput report.

pub mod actor;
pub mod benchmark;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod humanize;
pub mod orchestrator;
pub mod progress;
pub mod protocol;
pub mod route;
pub mod sample;
pub mod transport;
pub mod workload;

// Re-export commonly used types
pub use benchmark::{BenchReport, Benchmark};
pub use error::{BenchError, Result};
pub use orchestrator::{BenchConfig, Identities, RunOutcome, run};
pub use route::{HttpRouteResolver, RouteResolver, StaticRouteResolver};
pub use transport::{Connection, LoopbackBroker, Transport, WebSocketTransport};
