//! skjold: probe an upstream through the resilience gateway.
//!
//! Fetches a URL through cache, circuit breaker and retry the same way a
//! library caller would, and prints each outcome plus the final cache and
//! breaker state as JSON. Useful for diagnosing a flaky dependency.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use skjold::{CircuitBreakerConfig, Config, Gateway, Skjold, cache_key};

/// Retry, circuit breaking and caching for unreliable upstreams.
#[derive(Parser)]
#[command(name = "skjold")]
#[command(version)]
#[command(about = "Probe upstreams through skjold's retry, breaker and cache")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, global = true, env = "SKJOLD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a URL through the gateway, one or more times.
    Probe {
        /// URL to fetch.
        url: String,
        /// Dependency name (selects the circuit breaker).
        #[arg(short, long, default_value = "probe")]
        dependency: String,
        /// Number of sequential calls.
        #[arg(short = 'n', long, default_value_t = 1)]
        repeat: u32,
        /// Cache TTL for a successful response, in milliseconds.
        #[arg(long)]
        ttl_ms: Option<u64>,
        /// Failure threshold when the dependency has no configured breaker.
        #[arg(long, default_value_t = 3)]
        failure_threshold: u32,
        /// Success threshold when the dependency has no configured breaker.
        #[arg(long, default_value_t = 1)]
        success_threshold: u32,
        /// Open-state duration (ms) when the dependency has no configured breaker.
        #[arg(long, default_value_t = 30_000)]
        open_ms: u64,
    },
    /// Print the effective configuration.
    Config,
}

/// What a probe keeps from a response.
#[derive(Debug, Clone, Serialize)]
struct ProbeResponse {
    status: u16,
    bytes: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("skjold=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Probe {
            url,
            dependency,
            repeat,
            ttl_ms,
            failure_threshold,
            success_threshold,
            open_ms,
        } => {
            let mut builder = Skjold::builder().with_config(&config);
            if !config.breakers.contains_key(&dependency) {
                builder = builder.dependency(
                    dependency.clone(),
                    CircuitBreakerConfig::new(
                        failure_threshold,
                        success_threshold,
                        Duration::from_millis(open_ms),
                    ),
                );
            }
            let gateway = builder.build()?;
            let client = reqwest::Client::builder()
                .timeout(Duration::from_millis(config.http.timeout_ms))
                .build()?;

            info!(%url, %dependency, repeat, "probing");
            probe(
                &gateway,
                &client,
                &url,
                &dependency,
                repeat,
                ttl_ms.map(Duration::from_millis),
            )
            .await?;
        }
    }

    Ok(())
}

async fn probe(
    gateway: &Gateway,
    client: &reqwest::Client,
    url: &str,
    dependency: &str,
    repeat: u32,
    ttl: Option<Duration>,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = cache_key("probe", dependency, url);

    for call in 1..=repeat {
        let started = Instant::now();
        let result = gateway
            .call(dependency, &key, ttl, || fetch(client, url))
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let line = match result {
            Ok(response) => json!({
                "call": call,
                "ok": true,
                "status": response.status,
                "bytes": response.bytes,
                "elapsed_ms": elapsed_ms,
            }),
            Err(e) => json!({
                "call": call,
                "ok": false,
                "circuit_open": e.is_circuit_open(),
                "error": e.user_message(),
                "elapsed_ms": elapsed_ms,
            }),
        };
        println!("{line}");
    }

    let breakers: Vec<_> = gateway
        .breaker_stats()
        .into_iter()
        .map(|s| {
            json!({
                "dependency": s.dependency,
                "state": s.state,
                "failure_count": s.failure_count,
                "success_count": s.success_count,
            })
        })
        .collect();
    let summary = json!({
        "cache": gateway.cache().stats(),
        "breakers": breakers,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn fetch(client: &reqwest::Client, url: &str) -> skjold::Result<ProbeResponse> {
    let response = client.get(url).send().await?;
    let response = skjold::http::error_for_status(response).await?;
    let status = response.status().as_u16();
    let body = response.bytes().await?;
    Ok(ProbeResponse {
        status,
        bytes: body.len(),
    })
}
