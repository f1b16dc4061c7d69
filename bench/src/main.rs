use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use pubsub_bench::cli::Args;
use pubsub_bench::config::{Config, TransportKind};
use pubsub_bench::{
    HttpRouteResolver, LoopbackBroker, RouteResolver, StaticRouteResolver, Transport,
    WebSocketTransport,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so the report on stdout stays clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pubsub_bench=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = args.apply(Config::from_env());
    let bench = args.bench_config()?;
    info!(
        server = %config.server_addr,
        transport = %config.transport,
        publishers = bench.pubs,
        subscribers = bench.subs,
        msgs = bench.msgs,
        size = bench.message_size,
        "Starting benchmark"
    );

    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus metrics listener started");
    }

    let (transport, resolver): (Arc<dyn Transport>, Box<dyn RouteResolver>) =
        match config.transport {
            TransportKind::WebSocket => (
                Arc::new(WebSocketTransport::new(config.token.clone())),
                Box::new(HttpRouteResolver::new(
                    config.server_addr.clone(),
                    config.addr_kind,
                )),
            ),
            TransportKind::Loopback => (
                Arc::new(LoopbackBroker::new().transport()),
                Box::new(StaticRouteResolver::new("loopback")),
            ),
        };

    let outcome = match pubsub_bench::run(&bench, resolver.as_ref(), transport).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, setup = e.is_setup_failure(), "Benchmark failed");
            return Err(e.into());
        }
    };

    print!("{}", outcome.report);
    if args.json {
        println!("{}", outcome.report.to_json()?);
    }

    Ok(())
}
