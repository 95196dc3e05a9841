//! Offkit Smoke Harness
//!
//! Drives the worker and page components end to end, either against a live
//! origin or against a scripted in-process network, and prints a JSON
//! summary with per-step timings.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use offkit_common::{init_logging, LogConfig, OfflineConfig};
use offkit_net::{
    FetchOptions, Fetcher, HttpFetcher, LoaderConfig, Request, RequestDestination,
    ScriptedFetcher, Url,
};
use offkit_page::{ConnectivityState, PageContext};
use offkit_sw::{CacheRouter, CacheStorage, FetchOutcome, WorkerLifecycle};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "offkit-smoke")]
#[command(about = "Exercise the offline cache router, store and worker lifecycle")]
struct Cli {
    /// Configuration file (JSON). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config,

    /// Install and activate the worker against a live origin
    Register {
        /// Origin the worker is scoped to
        #[arg(short, long)]
        origin: String,

        /// Worker script, relative to the origin
        #[arg(short, long, default_value = "/sw.js")]
        script: String,

        /// Where to write the cache snapshot
        #[arg(long, default_value = "offkit-caches.json")]
        snapshot: PathBuf,
    },

    /// Route one request through the cache router
    Route {
        /// Absolute URL to request
        url: String,

        /// Request kind
        #[arg(short, long, value_enum, default_value = "fetch")]
        kind: RouteKind,

        /// Cache snapshot to load and update
        #[arg(long, default_value = "offkit-caches.json")]
        snapshot: PathBuf,

        /// Treat every network request as failed
        #[arg(long)]
        offline: bool,
    },

    /// Page fetch with offline capture and fallback
    Fetch {
        /// Origin the page is served from
        #[arg(short, long)]
        origin: String,

        /// Path or URL to fetch
        path: String,

        /// Offline store key for capture and fallback
        #[arg(short, long)]
        key: Option<String>,

        /// Start with connectivity reported as offline
        #[arg(long)]
        offline: bool,
    },

    /// Run a scripted online/offline walk-through without touching the network
    Scenario {
        /// Write the JSON summary to this file as well as stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RouteKind {
    /// Top-level navigation
    Navigate,
    /// Stylesheet
    Style,
    /// Script
    Script,
    /// Image
    Image,
    /// Plain fetch()
    Fetch,
}

/// Per-step timing collector.
struct PerfTiming {
    timings: Mutex<HashMap<&'static str, Vec<Duration>>>,
}

impl PerfTiming {
    fn new() -> Self {
        Self {
            timings: Mutex::new(HashMap::new()),
        }
    }

    fn record(&self, operation: &'static str, duration: Duration) {
        self.timings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(operation)
            .or_default()
            .push(duration);
    }

    fn summary(&self) -> serde_json::Value {
        let timings = self.timings.lock().unwrap_or_else(|e| e.into_inner());
        let mut summary = serde_json::Map::new();

        for (op, durations) in timings.iter() {
            if durations.is_empty() {
                continue;
            }
            let count = durations.len();
            let total_ms: f64 = durations.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
            let max_ms = durations
                .iter()
                .map(|d| d.as_secs_f64() * 1000.0)
                .fold(f64::NEG_INFINITY, f64::max);

            summary.insert(
                op.to_string(),
                json!({
                    "count": count,
                    "total_ms": (total_ms * 100.0).round() / 100.0,
                    "avg_ms": (total_ms / count as f64 * 100.0).round() / 100.0,
                    "max_ms": (max_ms * 100.0).round() / 100.0,
                }),
            );
        }

        serde_json::Value::Object(summary)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(LogConfig::from_env())?;

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => OfflineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => OfflineConfig::default(),
    };
    config.validate()?;

    let result = match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Register {
            origin,
            script,
            snapshot,
        } => register(config, &origin, &script, &snapshot).await,
        Commands::Route {
            url,
            kind,
            snapshot,
            offline,
        } => route(config, &url, kind, &snapshot, offline).await,
        Commands::Fetch {
            origin,
            path,
            key,
            offline,
        } => fetch(config, &origin, &path, key.as_deref(), offline).await,
        Commands::Scenario { output } => scenario(config, output.as_deref()).await,
    };

    if let Err(e) = &result {
        error!(error = %e, "Smoke run failed");
    }
    result
}

fn live_fetcher() -> Result<Arc<dyn Fetcher>> {
    Ok(Arc::new(HttpFetcher::new(LoaderConfig::default())?))
}

fn offline_fetcher() -> Arc<dyn Fetcher> {
    let fetcher = ScriptedFetcher::new();
    fetcher.set_offline(true);
    Arc::new(fetcher)
}

fn load_caches(path: &Path) -> Result<Arc<RwLock<CacheStorage>>> {
    let caches = CacheStorage::load(path)
        .with_context(|| format!("loading cache snapshot {}", path.display()))?;
    Ok(Arc::new(RwLock::new(caches)))
}

async fn register(config: OfflineConfig, origin: &str, script: &str, snapshot: &Path) -> Result<()> {
    let perf = PerfTiming::new();
    let scope = Url::parse(origin).with_context(|| format!("invalid origin {origin}"))?;
    let caches = load_caches(snapshot)?;

    let (lifecycle, _events) =
        WorkerLifecycle::new(config.worker, scope, caches.clone(), live_fetcher()?);

    let start = Instant::now();
    let worker = lifecycle.register(script).await?;
    perf.record("register", start.elapsed());

    let caches = caches.read().await;
    caches.save(snapshot)?;

    let buckets: Vec<_> = caches
        .keys()
        .into_iter()
        .map(|name| {
            let entries = caches.get(&name).map(|c| c.len()).unwrap_or(0);
            json!({ "name": name, "entries": entries })
        })
        .collect();

    info!(worker = ?worker, "Worker registered");
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "worker": format!("{worker:?}"),
            "buckets": buckets,
            "snapshot": snapshot.display().to_string(),
            "perf": perf.summary(),
        }))?
    );
    Ok(())
}

async fn route(
    config: OfflineConfig,
    url: &str,
    kind: RouteKind,
    snapshot: &Path,
    offline: bool,
) -> Result<()> {
    let url = Url::parse(url).with_context(|| format!("invalid url {url}"))?;
    let caches = load_caches(snapshot)?;
    let fetcher = if offline {
        offline_fetcher()
    } else {
        live_fetcher()?
    };
    let router = CacheRouter::new(&config.worker, caches.clone(), fetcher)?;

    let request = match kind {
        RouteKind::Navigate => Request::navigate(url),
        RouteKind::Style => Request::get(url).destination(RequestDestination::Style),
        RouteKind::Script => Request::get(url).destination(RequestDestination::Script),
        RouteKind::Image => Request::get(url).destination(RequestDestination::Image),
        RouteKind::Fetch => Request::get(url),
    };
    let class = router.classify(&request);

    let start = Instant::now();
    let outcome = router.handle(request).await;
    let elapsed = start.elapsed();
    router.settle().await;
    caches.read().await.save(snapshot)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "class": class.map(|c| format!("{c:?}")),
            "outcome": describe(&outcome),
            "elapsed_ms": (elapsed.as_secs_f64() * 100_000.0).round() / 100.0,
        }))?
    );
    Ok(())
}

async fn fetch(
    config: OfflineConfig,
    origin: &str,
    path: &str,
    key: Option<&str>,
    offline: bool,
) -> Result<()> {
    let origin = Url::parse(origin).with_context(|| format!("invalid origin {origin}"))?;
    let page = PageContext::new(config, origin, live_fetcher()?)?;
    if offline {
        page.monitor().handle_signal(ConnectivityState::Offline);
    }

    let response = page
        .gateway()
        .fetch_with_fallback(path, FetchOptions::default(), key)
        .await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "status": response.status.as_u16(),
            "source": format!("{:?}", response.source),
            "bytes": response.bytes().len(),
            "indicator": page.indicator().current().label(),
        }))?
    );
    Ok(())
}

fn describe(outcome: &FetchOutcome) -> serde_json::Value {
    match outcome {
        FetchOutcome::Passthrough => json!({ "kind": "passthrough" }),
        FetchOutcome::Empty => json!({ "kind": "empty" }),
        FetchOutcome::Failed(e) => json!({ "kind": "failed", "error": e.to_string() }),
        FetchOutcome::Respond(response) => json!({
            "kind": "respond",
            "status": response.status.as_u16(),
            "source": format!("{:?}", response.source),
            "bytes": response.bytes().len(),
        }),
    }
}

/// One step of the scripted walk-through.
fn step(
    perf: &PerfTiming,
    name: &'static str,
    start: Instant,
    detail: serde_json::Value,
) -> serde_json::Value {
    perf.record(name, start.elapsed());
    info!(step = name, "Scenario step done");
    json!({ "step": name, "detail": detail })
}

async fn scenario(config: OfflineConfig, output: Option<&Path>) -> Result<()> {
    let perf = PerfTiming::new();
    let origin = Url::parse("https://app.test/")?;
    let fetcher = Arc::new(ScriptedFetcher::new());

    for path in &config.worker.precache {
        let url = origin.join(path)?;
        fetcher.respond(url.as_str(), 200, &format!("<html>{path}</html>"));
    }
    let api = origin.join("/v1/account")?;
    fetcher.respond_json(api.as_str(), 200, &json!({ "name": "Ada" }));

    let caches = Arc::new(RwLock::new(CacheStorage::new()));
    let (lifecycle, events) = WorkerLifecycle::new(
        config.worker.clone(),
        origin.clone(),
        caches.clone(),
        fetcher.clone(),
    );
    let lifecycle = Arc::new(lifecycle);
    let router = CacheRouter::new(&config.worker, caches.clone(), fetcher.clone())?;

    let mut page = PageContext::new(config.clone(), origin.clone(), fetcher.clone())?;
    let prompt = page.watch_updates(events, || info!("Reload requested"));
    {
        let lifecycle = lifecycle.clone();
        page.monitor().on_online(move || {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move {
                let report = lifecycle.dispatch_sync().await;
                info!(?report, "Sync dispatched after reconnect");
            });
        });
    }

    let mut steps = Vec::new();

    let start = Instant::now();
    let worker = lifecycle.register("/sw.js").await?;
    let client = lifecycle.open_client(origin.clone()).await;
    steps.push(step(
        &perf,
        "register",
        start,
        json!({ "worker": format!("{worker:?}"), "client": client, "buckets": caches.read().await.keys() }),
    ));

    let start = Instant::now();
    let online = router.handle(Request::navigate(origin.join("/dashboard")?)).await;
    router.settle().await;
    steps.push(step(&perf, "navigate_online", start, describe(&online)));

    let start = Instant::now();
    let api_online = router.handle(Request::get(api.clone())).await;
    let captured = page
        .gateway()
        .fetch_with_fallback(api.as_str(), FetchOptions::default(), Some("account"))
        .await?;
    steps.push(step(
        &perf,
        "api_online",
        start,
        json!({ "router": describe(&api_online), "gateway_source": format!("{:?}", captured.source) }),
    ));

    fetcher.set_offline(true);
    page.monitor().handle_signal(ConnectivityState::Offline);
    lifecycle.register_sync(&config.worker.sync_tag);

    let start = Instant::now();
    let offline_nav = router.handle(Request::navigate(origin.join("/matrix")?)).await;
    let offline_api = router.handle(Request::get(api.clone())).await;
    let fallback = page
        .gateway()
        .fetch_with_fallback(api.as_str(), FetchOptions::default(), Some("account"))
        .await?;
    let missing = page
        .gateway()
        .fetch_with_fallback("/api/grades", FetchOptions::default(), Some("grades"))
        .await;
    steps.push(step(
        &perf,
        "offline",
        start,
        json!({
            "navigate": describe(&offline_nav),
            "api": describe(&offline_api),
            "gateway_fallback": fallback.json::<serde_json::Value>()?,
            "gateway_missing": missing.err().map(|e| e.category()),
            "indicator": page.indicator().current().label(),
        }),
    ));

    fetcher.set_offline(false);
    let start = Instant::now();
    page.monitor().handle_signal(ConnectivityState::Online);
    let second = lifecycle.install("/sw.js?v=2").await?;
    lifecycle.activate().await?;
    for _ in 0..100 {
        if prompt.current().is_some() {
            break;
        }
        tokio::task::yield_now().await;
    }
    steps.push(step(
        &perf,
        "reconnect_and_update",
        start,
        json!({
            "worker": format!("{second:?}"),
            "controller": lifecycle.client_controller(&client).await.map(|id| format!("{id:?}")),
            "update_prompt": prompt.current().map(|n| n.title),
            "indicator": page.indicator().current().label(),
        }),
    ));

    let summary = json!({
        "steps": steps,
        "perf": perf.summary(),
    });
    let rendered = serde_json::to_string_pretty(&summary)?;
    if let Some(path) = output {
        std::fs::write(path, &rendered)
            .with_context(|| format!("writing summary to {}", path.display()))?;
    }
    println!("{rendered}");

    if matches!(offline_nav, FetchOutcome::Failed(_) | FetchOutcome::Empty) {
        bail!("offline navigation was not served from cache");
    }
    Ok(())
}
