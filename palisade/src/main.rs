// palisade/src/main.rs
//
// Palisade — WAF inspection data plane daemon.
//
// Two operational modes:
//   tail    — follow a JSONL HTTP-event feed written by the proxy shim
//   replay  — process a captured feed once (testing/research)
//
// Usage:
//   palisade --mode tail --path /var/log/proxy/events.jsonl \
//            --signatures signatures.json --policy policy.json
//   palisade --mode replay --path captured.jsonl

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use palisade::engine::dispatcher::{Dispatcher, DispatcherConfig, EventOutcome};
use palisade::engine::matcher::{ExceptionRulebase, FirstTierAggregator, SignatureMatcher};
use palisade::events::{EventVerdict, FeedRecord};
use palisade::signatures::{RuleSelector, SignatureStore};
use palisade::state::AssetState;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "palisade",
    about   = "Web application firewall inspection data plane",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "tail")]
    mode: Mode,

    #[arg(long, default_value = "/var/log/palisade/events.jsonl",
          help = "JSONL HTTP-event feed path")]
    path: PathBuf,

    #[arg(long, help = "Signature pack (JSON)")]
    signatures: Option<PathBuf>,

    #[arg(long, help = "Policy file (JSON)")]
    policy: Option<PathBuf>,

    #[arg(long, default_value = "/var/log/palisade/output",
          help = "Decision log output directory")]
    output: PathBuf,

    #[arg(long, help = "Detect-only (never block)")]
    detect_only: bool,

    #[arg(long, default_value = "4", help = "Worker shards")]
    workers: usize,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Tail,   // follow a live feed
    Replay, // process a captured feed once
}

// ── Output sink ───────────────────────────────────────────────────────────────

struct OutputSink {
    out: PathBuf,
}

impl OutputSink {
    fn new(output_dir: &PathBuf) -> Result<Self> {
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("creating output dir {}", output_dir.display()))?;
        Ok(Self { out: output_dir.clone() })
    }

    async fn write(&self, file: &str, line: &str) -> Result<()> {
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.out.join(file))
            .await?;
        f.write_all(line.as_bytes()).await?;
        f.write_all(b"\n").await?;
        Ok(())
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

struct Pipeline {
    dispatcher: Dispatcher,
    sink:       OutputSink,
    events:     AtomicU64,
    drops:      AtomicU64,
}

impl Pipeline {
    async fn process(&self, rec: FeedRecord) {
        self.events.fetch_add(1, Ordering::Relaxed);
        let EventOutcome { verdict, log_record, match_events } = self.dispatcher.handle(&rec);

        if verdict == EventVerdict::Drop {
            self.drops.fetch_add(1, Ordering::Relaxed);
            println!(
                "\x1b[91;1mDROP\x1b[0m txn={} host={}",
                rec.txn,
                rec.host.as_deref().unwrap_or("-")
            );
        }

        for ev in &match_events {
            if let Ok(line) = serde_json::to_string(ev) {
                if let Err(e) = self.sink.write("match_events.jsonl", &line).await {
                    warn!("match event write failed: {}", e);
                }
            }
        }

        if let Some(record) = log_record {
            if let Ok(line) = serde_json::to_string(&record) {
                if let Err(e) = self.sink.write("decisions.jsonl", &line).await {
                    warn!("decision log write failed: {}", e);
                }
            }
        }
    }
}

async fn print_stats_loop(pipeline: Arc<Pipeline>, start: Instant) {
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
        let elapsed = start.elapsed().as_secs_f64();
        let events = pipeline.events.load(Ordering::Relaxed);
        let drops = pipeline.drops.load(Ordering::Relaxed);
        let fail_open = pipeline.dispatcher.fail_open_count.load(Ordering::Relaxed);
        println!(
            "\x1b[1m── stats  uptime={:.0}s  events={}  eps={:.1}  drops={}  fail_open={} ──\x1b[0m",
            elapsed,
            events,
            events as f64 / elapsed,
            drops,
            fail_open,
        );
    }
}

// ── Event source ──────────────────────────────────────────────────────────────

async fn feed_jsonl(path: PathBuf, tx: mpsc::Sender<FeedRecord>, follow: bool) -> Result<()> {
    let file = tokio::fs::File::open(&path)
        .await
        .with_context(|| format!("opening feed {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();

    info!("Reading {}", path.display());
    loop {
        match lines.next_line().await? {
            Some(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<FeedRecord>(line) {
                    Ok(rec) => {
                        if tx.send(rec).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("feed parse error: {}", e),
                }
            }
            None if follow => {
                tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
            }
            None => break,
        }
    }
    Ok(())
}

// ── Setup ─────────────────────────────────────────────────────────────────────

fn load_matcher(cli: &Cli) -> Result<SignatureMatcher> {
    let Some(sig_path) = &cli.signatures else {
        warn!("no signature pack given; running with an empty signature set");
        return Ok(SignatureMatcher::default());
    };

    let sig_json = std::fs::read_to_string(sig_path)
        .with_context(|| format!("reading signatures {}", sig_path.display()))?;
    let store = SignatureStore::load(&sig_json, "local", "1")?;
    info!("loaded {} signatures", store.signatures.len());

    let selector = match &cli.policy {
        Some(policy_path) => {
            let policy_json = std::fs::read_to_string(policy_path)
                .with_context(|| format!("reading policy {}", policy_path.display()))?;
            RuleSelector::load(&policy_json)?
        }
        None => RuleSelector::load(r#"{ "rules": [], "defaultAction": "Prevent" }"#)?,
    };

    let selected = selector.select_signatures(&store);
    info!("policy selected {} signatures", selected.len());
    Ok(SignatureMatcher::new(selected, &FirstTierAggregator::new()))
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("palisade=info".parse()?))
        .compact()
        .init();

    let cli = Cli::parse();

    let matcher = Arc::new(load_matcher(&cli)?);
    let asset = Arc::new(AssetState::new("default-asset"));
    let config = DispatcherConfig {
        prevent_mode: !cli.detect_only,
        ..DispatcherConfig::default()
    };
    let dispatcher = Dispatcher::new(
        matcher,
        Arc::new(ExceptionRulebase::default()),
        asset,
        config,
    );

    let pipeline = Arc::new(Pipeline {
        dispatcher,
        sink: OutputSink::new(&cli.output)?,
        events: AtomicU64::new(0),
        drops: AtomicU64::new(0),
    });
    let start = Instant::now();

    println!("palisade — web application firewall inspection data plane");
    println!("  feed:   {}", cli.path.display());
    println!("  output: {}\n", cli.output.display());

    tokio::spawn(print_stats_loop(Arc::clone(&pipeline), start));

    // Worker shards keyed by transaction id: events of one transaction
    // stay ordered on one worker, transactions run in parallel.
    let shards = cli.workers.max(1);
    let mut senders = Vec::with_capacity(shards);
    let mut handles = Vec::with_capacity(shards);
    for _ in 0..shards {
        let (wtx, mut wrx) = mpsc::channel::<FeedRecord>(4096);
        let p = Arc::clone(&pipeline);
        handles.push(tokio::spawn(async move {
            while let Some(rec) = wrx.recv().await {
                p.process(rec).await;
            }
        }));
        senders.push(wtx);
    }

    let (tx, mut rx) = mpsc::channel::<FeedRecord>(16384);
    let follow = matches!(cli.mode, Mode::Tail);
    let feed_path = cli.path.clone();
    let feeder = tokio::spawn(async move { feed_jsonl(feed_path, tx, follow).await });

    while let Some(rec) = rx.recv().await {
        let shard = (rec.txn as usize) % shards;
        if senders[shard].send(rec).await.is_err() {
            break;
        }
    }

    drop(senders);
    for handle in handles {
        let _ = handle.await;
    }
    feeder.await??;

    info!("feed drained, shutting down");
    Ok(())
}
