//! Environment configuration
//!
//! Values loaded here are defaults for the command line; any flag given on
//! the command line wins.

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::warn;

use crate::route::AddrKind;

/// Which transport the actors connect with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    WebSocket,
    /// In-process broker, no server required
    Loopback,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            "loopback" => Ok(TransportKind::Loopback),
            other => Err(format!("unknown transport '{}'", other)),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::WebSocket => f.write_str("websocket"),
            TransportKind::Loopback => f.write_str("loopback"),
        }
    }
}

/// Benchmark client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API base URL used for route resolution
    pub server_addr: String,
    /// Token presented when connecting
    pub token: String,
    pub transport: TransportKind,
    /// Which address of a route record to dial
    pub addr_kind: AddrKind,
    /// Prometheus listener, disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: "http://127.0.0.1:5001".to_string(),
            token: String::new(),
            transport: TransportKind::default(),
            addr_kind: AddrKind::default(),
            metrics_addr: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("BENCH_SERVER_ADDR")
            && !addr.is_empty()
        {
            config.server_addr = addr;
        }

        if let Some(token) = lookup("BENCH_TOKEN") {
            config.token = token;
        }

        if let Some(val) = lookup("BENCH_TRANSPORT") {
            match val.parse() {
                Ok(kind) => config.transport = kind,
                Err(e) => warn!("Ignoring BENCH_TRANSPORT: {}", e),
            }
        }

        if let Some(val) = lookup("BENCH_SECURE")
            && (val.to_lowercase() == "true" || val == "1")
        {
            config.addr_kind = AddrKind::Wss;
        }

        if let Some(val) = lookup("BENCH_METRICS_ADDR") {
            match val.parse() {
                Ok(addr) => config.metrics_addr = Some(addr),
                Err(e) => warn!("Ignoring BENCH_METRICS_ADDR '{}': {}", val, e),
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server_addr, "http://127.0.0.1:5001");
        assert!(config.token.is_empty());
        assert_eq!(config.transport, TransportKind::WebSocket);
        assert_eq!(config.addr_kind, AddrKind::Ws);
        assert!(config.metrics_addr.is_none());
    }

    #[test]
    fn test_config_from_lookup() {
        let config = Config::from_lookup(lookup_from(&[
            ("BENCH_SERVER_ADDR", "http://bench:9000"),
            ("BENCH_TOKEN", "secret"),
            ("BENCH_TRANSPORT", "loopback"),
            ("BENCH_SECURE", "true"),
            ("BENCH_METRICS_ADDR", "127.0.0.1:9100"),
        ]));
        assert_eq!(config.server_addr, "http://bench:9000");
        assert_eq!(config.token, "secret");
        assert_eq!(config.transport, TransportKind::Loopback);
        assert_eq!(config.addr_kind, AddrKind::Wss);
        assert_eq!(config.metrics_addr, Some("127.0.0.1:9100".parse().unwrap()));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = Config::from_lookup(lookup_from(&[
            ("BENCH_SERVER_ADDR", ""),
            ("BENCH_TRANSPORT", "carrier-pigeon"),
            ("BENCH_METRICS_ADDR", "not-an-addr"),
        ]));
        assert_eq!(config.server_addr, "http://127.0.0.1:5001");
        assert_eq!(config.transport, TransportKind::WebSocket);
        assert!(config.metrics_addr.is_none());
    }

    #[test]
    fn test_transport_kind_parse() {
        assert_eq!("WS".parse::<TransportKind>(), Ok(TransportKind::WebSocket));
        assert!("tcp".parse::<TransportKind>().is_err());
        assert_eq!(TransportKind::Loopback.to_string(), "loopback");
    }
}
