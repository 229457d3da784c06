//! Gateway smoke harness.
//!
//! Boots the in-process host against a live origin, registers the offline
//! gateway (which pre-warms the static partition over the network), then
//! replays a list of requests through it and prints one JSON line per
//! response plus a timing summary.
//!
//! ## Usage
//!
//! ```bash
//! # Dump the default configuration as a starting point
//! gateway-smoke print-config > gateway.json
//!
//! # Replay a page load twice: the second round should come from cache
//! gateway-smoke run --config gateway.json \
//!     --request document:/ --request script:/static/js/main.js \
//!     --request image:/og-image.jpg --repeat 2
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use shingle_common::{init_logging, LogConfig};
use shingle_net::{Destination, Fetcher, HttpFetcher, Request};
use shingle_sw::{
    CacheStore, GatewayConfig, HostNotice, MemoryCacheStorage, OfflineGateway, ServiceWorkerHost,
};
use tracing::{error, info};
use url::Url;

#[derive(Parser)]
#[command(name = "gateway-smoke")]
#[command(about = "Smoke harness for the offline cache gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the default gateway configuration as JSON
    PrintConfig,

    /// Register the gateway and replay requests through it
    Run {
        /// Gateway configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the configured scope
        #[arg(short, long)]
        scope: Option<Url>,
        /// Request as `destination:path` or `destination:url`
        #[arg(short, long = "request", required = true)]
        requests: Vec<String>,
        /// Number of times to replay the request list
        #[arg(long, default_value = "2")]
        repeat: usize,
        /// Debug-level logs with source locations, overriding the config
        #[arg(short, long)]
        verbose: bool,
    },
}

/// Per-source timing collector.
#[derive(Default)]
struct Timings {
    by_source: HashMap<String, Vec<Duration>>,
}

impl Timings {
    fn record(&mut self, source: &str, duration: Duration) {
        self.by_source
            .entry(source.to_string())
            .or_default()
            .push(duration);
    }

    fn summary(&self) -> serde_json::Value {
        let mut summary = serde_json::Map::new();
        for (source, durations) in &self.by_source {
            let total_ms: f64 = durations.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
            let max_ms = durations
                .iter()
                .map(|d| d.as_secs_f64() * 1000.0)
                .fold(0.0, f64::max);
            summary.insert(
                source.clone(),
                json!({
                    "count": durations.len(),
                    "avg_ms": (total_ms / durations.len() as f64 * 100.0).round() / 100.0,
                    "max_ms": (max_ms * 100.0).round() / 100.0,
                }),
            );
        }
        serde_json::Value::Object(summary)
    }
}

/// Split `destination:target`. A target without a recognized destination
/// prefix is sent with an empty destination.
fn parse_request(config: &GatewayConfig, spec: &str) -> anyhow::Result<Request> {
    let (destination, target) = match spec.split_once(':') {
        Some((prefix, rest)) => match prefix.parse::<Destination>() {
            Ok(destination) => (destination, rest),
            Err(_) => (Destination::Empty, spec),
        },
        None => (Destination::Empty, spec),
    };

    let url = if target.contains("://") {
        Url::parse(target).with_context(|| format!("invalid URL in '{spec}'"))?
    } else {
        config.resolve(target)?
    };
    Ok(Request::get(url).destination(destination))
}

async fn run(
    config_path: Option<PathBuf>,
    scope: Option<Url>,
    requests: Vec<String>,
    repeat: usize,
    verbose: bool,
) -> anyhow::Result<bool> {
    let mut config = match config_path {
        Some(path) => GatewayConfig::from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    if let Some(scope) = scope {
        config.scope = scope;
        config.validate()?;
    }
    if verbose {
        config.logging = LogConfig::debug();
    }
    init_logging(&config.logging)?;

    let requests = requests
        .iter()
        .map(|spec| parse_request(&config, spec))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let network: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(config.network.clone())?);
    let storage = Arc::new(MemoryCacheStorage::new());
    let (host, mut notices) = ServiceWorkerHost::new(network.clone());

    let gateway = OfflineGateway::builder(config.clone())
        .store(storage.clone())
        .network(network)
        .build()?;
    info!(generation = %gateway.generation(), scope = %config.scope, "Registering gateway");

    let worker = match host.register(Arc::new(gateway)).await {
        Ok(worker) => worker,
        Err(e) => {
            error!(error = %e, "Gateway failed to install");
            println!("{}", json!({ "event": "install_failed", "error": e.to_string() }));
            return Ok(false);
        }
    };
    println!(
        "{}",
        json!({
            "event": "activated",
            "worker": worker.to_string(),
            "pinned": storage.entry_count(&config.static_partition()).await,
        })
    );

    let mut timings = Timings::default();
    let mut failures = 0usize;
    for round in 1..=repeat {
        for request in &requests {
            let started = Instant::now();
            let result = host.fetch(request).await;
            let elapsed = started.elapsed();

            let line = match result {
                Ok(delivered) => {
                    let source = delivered
                        .source
                        .map_or_else(|| "passthrough".to_string(), |s| s.to_string());
                    timings.record(&source, elapsed);
                    json!({
                        "round": round,
                        "url": request.url.as_str(),
                        "destination": request.destination.as_str(),
                        "status": delivered.response.status.as_u16(),
                        "source": source,
                        "bytes": delivered.response.body.len(),
                        "elapsed_ms": (elapsed.as_secs_f64() * 100_000.0).round() / 100.0,
                    })
                }
                Err(e) => {
                    failures += 1;
                    json!({
                        "round": round,
                        "url": request.url.as_str(),
                        "destination": request.destination.as_str(),
                        "error": e.to_string(),
                    })
                }
            };
            println!("{line}");
        }
    }

    let mut transitions = 0usize;
    while let Ok(notice) = notices.try_recv() {
        if matches!(notice, HostNotice::StateChange { .. }) {
            transitions += 1;
        }
    }

    let partitions = storage.keys().await?;
    println!(
        "{}",
        json!({
            "event": "summary",
            "requests": requests.len() * repeat,
            "failures": failures,
            "state_changes": transitions,
            "partitions": partitions,
            "timings": timings.summary(),
        })
    );
    Ok(failures == 0)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::PrintConfig => {
            println!("{}", serde_json::to_string_pretty(&GatewayConfig::default())?);
        }

        Commands::Run {
            config,
            scope,
            requests,
            repeat,
            verbose,
        } => {
            if repeat == 0 {
                bail!("--repeat must be at least 1");
            }
            if !run(config, scope, requests, repeat, verbose).await? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GatewayConfig {
        GatewayConfig::for_scope(Url::parse("https://roofing.example/").unwrap())
    }

    #[test]
    fn test_parse_request() {
        let script = parse_request(&config(), "script:/js/utils.js").unwrap();
        assert_eq!(script.destination, Destination::Script);
        assert_eq!(script.url.as_str(), "https://roofing.example/js/utils.js");

        let font = parse_request(&config(), "font:https://fonts.gstatic.com/s/inter.woff2").unwrap();
        assert_eq!(font.destination, Destination::Font);
        assert_eq!(font.url.host_str(), Some("fonts.gstatic.com"));

        let bare = parse_request(&config(), "https://roofing.example/api/jobs.json").unwrap();
        assert_eq!(bare.destination, Destination::Empty);
        assert_eq!(bare.url.path(), "/api/jobs.json");
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "gateway-smoke",
            "run",
            "--request",
            "document:/",
            "-r",
            "image:/og-image.jpg",
            "--repeat",
            "3",
            "--verbose",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                requests,
                repeat,
                verbose,
                ..
            } => {
                assert_eq!(requests.len(), 2);
                assert_eq!(repeat, 3);
                assert!(verbose);
            }
            Commands::PrintConfig => panic!("expected run"),
        }
    }
}
