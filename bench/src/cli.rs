//! Command line surface of the `pubsub-bench` binary

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

use crate::actor::ChannelPolicy;
use crate::config::{Config, TransportKind};
use crate::error::{BenchError, Result};
use crate::orchestrator::{BenchConfig, Identities};
use crate::protocol::{Channel, ChannelType, SendOptions};
use crate::workload::RunPrefix;

#[derive(Parser, Debug, Clone)]
#[command(name = "pubsub-bench")]
#[command(about = "Benchmark a publish/subscribe messaging server", version)]
pub struct Args {
    /// Channel id, or `fromUID@toUID` for a point-to-point run
    pub target: Option<String>,

    /// Number of concurrent publishers
    #[arg(short = 'p', long, default_value_t = 1)]
    pub pubs: usize,

    /// Number of concurrent subscribers
    #[arg(short = 's', long, default_value_t = 0)]
    pub subs: usize,

    /// Total number of messages published across all publishers
    #[arg(long, default_value_t = 100_000)]
    pub msgs: u64,

    /// Message payload size in bytes
    #[arg(long, default_value_t = 128)]
    pub size: usize,

    /// Pause after every publish, e.g. `500us`, `2ms`, `1s` (bare number = ms)
    #[arg(long, value_parser = parse_duration, default_value = "0")]
    pub pub_sleep: Duration,

    /// Do not display progress bars or the live ticker
    #[arg(long)]
    pub no_progress: bool,

    /// Explicit comma-separated channel list
    #[arg(long, value_delimiter = ',')]
    pub channels: Vec<String>,

    /// Generate this many channels named `{channel-prefix}{i}`
    #[arg(long)]
    pub channel_count: Option<usize>,

    #[arg(long, default_value = "bench-channel-")]
    pub channel_prefix: String,

    /// Channel type of the target channels
    #[arg(long, default_value = "group")]
    pub channel_type: ChannelType,

    /// Destination policy; defaults to fixed for one channel, round-robin otherwise
    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,

    /// API base URL for route resolution
    #[arg(long)]
    pub server: Option<String>,

    /// Token presented on connect
    #[arg(long)]
    pub token: Option<String>,

    #[arg(long)]
    pub transport: Option<TransportKind>,

    /// Also print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Serve Prometheus metrics on this address while running
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,

    /// Ask the server not to encrypt payloads
    #[arg(long)]
    pub no_encrypt: bool,

    /// Ask the server not to persist payloads
    #[arg(long)]
    pub no_persist: bool,

    /// Report title; defaults to the target
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    Fixed,
    RoundRobin,
    /// Reply to the last sender heard from (chat simulation)
    Reply,
}

/// Parsed positional target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Channel(String),
    PointToPoint { from: String, to: String },
}

pub fn parse_target(raw: &str) -> Result<Target> {
    if !raw.contains('@') {
        if raw.is_empty() {
            return Err(BenchError::Usage("empty target".to_string()));
        }
        return Ok(Target::Channel(raw.to_string()));
    }

    let parts: Vec<&str> = raw.split('@').collect();
    match parts.as_slice() {
        [from, to] if !from.is_empty() && !to.is_empty() => Ok(Target::PointToPoint {
            from: from.to_string(),
            to: to.to_string(),
        }),
        _ => Err(BenchError::Usage(format!(
            "point-to-point target must look like fromUID@toUID, got '{}'",
            raw
        ))),
    }
}

/// Parse `500us`, `2ms`, `1s`, `1m`; a bare number is milliseconds
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{}'", raw))?;

    match unit.trim() {
        "" | "ms" => Ok(Duration::from_millis(value)),
        "ns" => Ok(Duration::from_nanos(value)),
        "us" | "µs" => Ok(Duration::from_micros(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{}' is too large", raw)),
        other => Err(format!("unknown duration unit '{}'", other)),
    }
}

impl Args {
    /// Apply command line overrides on top of the environment
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(server) = &self.server {
            config.server_addr = server.clone();
        }
        if let Some(token) = &self.token {
            config.token = token.clone();
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if self.metrics_addr.is_some() {
            config.metrics_addr = self.metrics_addr;
        }
        config
    }

    /// Validate arguments into a run configuration
    pub fn bench_config(&self) -> Result<BenchConfig> {
        let target = self.target.as_deref().map(parse_target).transpose()?;

        let (pubs, subs, policy, identities) = match &target {
            Some(Target::PointToPoint { from, to }) => {
                if !self.channels.is_empty() || self.channel_count.is_some() {
                    return Err(BenchError::Usage(
                        "a point-to-point target cannot be combined with channel options"
                            .to_string(),
                    ));
                }
                (
                    1,
                    1,
                    ChannelPolicy::Fixed(Channel::person(to.clone())),
                    Identities::Bound {
                        publisher: from.clone(),
                        subscriber: to.clone(),
                    },
                )
            }
            Some(Target::Channel(id)) => {
                let mut ids = vec![id.clone()];
                ids.extend(self.extra_channel_ids());
                let policy = self.policy_for(&ids)?;
                (
                    self.pubs,
                    self.subs,
                    policy,
                    Identities::Generated(RunPrefix::generate()),
                )
            }
            None => {
                let ids = self.extra_channel_ids();
                let policy = self.policy_for(&ids)?;
                (
                    self.pubs,
                    self.subs,
                    policy,
                    Identities::Generated(RunPrefix::generate()),
                )
            }
        };

        let name = self
            .name
            .clone()
            .or_else(|| self.target.clone())
            .unwrap_or_else(|| "pubsub-bench".to_string());

        let config = BenchConfig {
            name,
            pubs,
            subs,
            msgs: self.msgs,
            message_size: self.size,
            pacing: self.pub_sleep,
            policy,
            options: SendOptions {
                no_encrypt: self.no_encrypt,
                no_persist: self.no_persist,
            },
            identities,
            progress: !self.no_progress,
        };
        config.validate()?;
        Ok(config)
    }

    fn extra_channel_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .channels
            .iter()
            .filter(|c| !c.is_empty())
            .cloned()
            .collect();
        if let Some(count) = self.channel_count {
            ids.extend((0..count).map(|i| format!("{}{}", self.channel_prefix, i)));
        }
        ids
    }

    fn policy_for(&self, ids: &[String]) -> Result<ChannelPolicy> {
        if ids.is_empty() {
            return Err(BenchError::Usage(
                "no channel given: pass a target, --channels or --channel-count".to_string(),
            ));
        }
        let mut channels: Vec<Channel> = ids
            .iter()
            .map(|id| Channel::new(id.clone(), self.channel_type))
            .collect();

        match self.policy {
            Some(PolicyArg::Fixed) if channels.len() > 1 => Err(BenchError::Usage(
                "fixed policy takes exactly one channel".to_string(),
            )),
            Some(PolicyArg::Reply) if self.subs > 0 => Err(BenchError::Usage(
                "reply policy cannot be combined with subscribers".to_string(),
            )),
            Some(PolicyArg::Reply) => Ok(ChannelPolicy::ReplyToLastSender { fallback: channels }),
            Some(PolicyArg::RoundRobin) => Ok(ChannelPolicy::RoundRobin(channels)),
            Some(PolicyArg::Fixed) | None if channels.len() == 1 => {
                Ok(ChannelPolicy::Fixed(channels.remove(0)))
            }
            _ => Ok(ChannelPolicy::RoundRobin(channels)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["pubsub-bench"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["room"]);
        assert_eq!(args.pubs, 1);
        assert_eq!(args.subs, 0);
        assert_eq!(args.msgs, 100_000);
        assert_eq!(args.size, 128);
        assert_eq!(args.pub_sleep, Duration::ZERO);
        assert_eq!(args.channel_type, ChannelType::Group);
    }

    #[test]
    fn test_point_to_point_binds_identities() {
        let config = parse(&["alice@bob", "-p", "5", "-s", "7", "--msgs", "10"])
            .bench_config()
            .unwrap();
        assert_eq!((config.pubs, config.subs), (1, 1));
        assert_eq!(config.policy, ChannelPolicy::Fixed(Channel::person("bob")));

        let (pubs, subs) = config.actor_identities();
        assert_eq!(pubs, vec!["alice"]);
        assert_eq!(subs, vec!["bob"]);
    }

    #[test]
    fn test_malformed_point_to_point_is_rejected() {
        assert!(parse_target("a@b@c").is_err());
        assert!(parse_target("@bob").is_err());
        assert!(parse_target("alice@").is_err());
        assert_eq!(
            parse_target("lobby").unwrap(),
            Target::Channel("lobby".to_string())
        );
    }

    #[test]
    fn test_zero_actors_is_usage_error() {
        let err = parse(&["room", "-p", "0", "-s", "0"])
            .bench_config()
            .unwrap_err();
        assert!(matches!(err, BenchError::Usage(_)));
    }

    #[test]
    fn test_missing_channel_is_usage_error() {
        let err = parse(&["-s", "2"]).bench_config().unwrap_err();
        assert!(matches!(err, BenchError::Usage(_)));
    }

    #[test]
    fn test_generated_channels_default_to_round_robin() {
        let config = parse(&["--channel-count", "3", "--channel-type", "person"])
            .bench_config()
            .unwrap();
        assert_eq!(
            config.policy,
            ChannelPolicy::RoundRobin(vec![
                Channel::person("bench-channel-0"),
                Channel::person("bench-channel-1"),
                Channel::person("bench-channel-2"),
            ])
        );
    }

    #[test]
    fn test_policy_constraints() {
        assert!(
            parse(&["--channels", "a,b", "--policy", "fixed"])
                .bench_config()
                .is_err()
        );
        assert!(
            parse(&["room", "-s", "1", "--policy", "reply"])
                .bench_config()
                .is_err()
        );
        let config = parse(&["room", "-p", "4", "--policy", "reply"])
            .bench_config()
            .unwrap();
        assert!(config.policy.listens());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500us"), Ok(Duration::from_micros(500)));
        assert_eq!(parse_duration("2ms"), Ok(Duration::from_millis(2)));
        assert_eq!(parse_duration("1s"), Ok(Duration::from_secs(1)));
        assert_eq!(parse_duration("3"), Ok(Duration::from_millis(3)));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("1h").is_err());
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert!(parse_duration(&format!("{}m", u64::MAX)).is_err());
    }

    #[test]
    fn test_cli_overrides_environment() {
        let args = parse(&[
            "room",
            "--server",
            "http://other:1",
            "--transport",
            "loopback",
        ]);
        let config = args.apply(Config::default());
        assert_eq!(config.server_addr, "http://other:1");
        assert_eq!(config.transport, TransportKind::Loopback);
        assert!(config.token.is_empty());
    }
}
