use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quill_core::impls::{BroadcastSink, HandleStats, JournalMode, MemoryStore};
use quill_core::{BoxError, StoreService, WriteError, WriterBuilder, WriterConfig, WriterStats};

/// 複数の producer から MemoryStore に書き込み、writer の直列化とリトライを観察するデモ
#[derive(Debug, Parser)]
#[command(name = "quill", version)]
struct Args {
    /// Writes per producer
    #[arg(long, default_value_t = 20)]
    jobs: usize,

    /// Concurrent producer tasks
    #[arg(long, default_value_t = 4)]
    producers: usize,

    /// Probability that a write hits lock contention
    #[arg(long, default_value_t = 0.2)]
    busy_rate: f64,

    /// Seed for the contention generator
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Writer config (JSON); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    max_attempts: Option<u32>,

    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    written: usize,
    failed: usize,
    rows: usize,
    elapsed_ms: u128,
    writer: WriterStats,
    handles: HandleStats,
}

fn load_config(args: &Args) -> anyhow::Result<WriterConfig> {
    let mut config = match &args.config {
        Some(path) => WriterConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => WriterConfig::default(),
    };
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(delay) = args.retry_delay_ms {
        config.retry_delay_ms = delay;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    // (A) ストアと writer、イベントの購読者を用意
    let store = Arc::new(
        MemoryStore::builder()
            .busy_rate(args.busy_rate)
            .seed(args.seed)
            .build(),
    );
    let writer = WriterBuilder::new()
        .with_config(config)
        .spawn_shared(Arc::clone(&store))?;
    let sink = Arc::new(BroadcastSink::default());
    let mut events = sink.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            warn!(?event, "store event");
        }
    });

    let service = Arc::new(StoreService::new(Arc::clone(&store), writer, sink.clone()));
    service
        .initialize(|h| {
            h.set_journal_mode(JournalMode::Wal)?;
            Ok(())
        })
        .map_err(|err| anyhow::anyhow!(err))
        .context("initializing store")?;

    // (B) producer を起動して書き込みを投入
    let started = Instant::now();
    let producers: Vec<_> = (0..args.producers)
        .map(|p| {
            let service = Arc::clone(&service);
            let jobs = args.jobs;
            tokio::spawn(async move {
                let mut written = 0usize;
                let mut failed = 0usize;
                for i in 0..jobs {
                    let value = format!("producer-{p}/row-{i}");
                    let result = service
                        .write("add_row", move |h| {
                            let value = value.clone();
                            Box::pin(async move { Ok::<_, BoxError>(h.insert(&value)?) })
                        })
                        .await;
                    match result {
                        Ok(Some(_)) => written += 1,
                        Ok(None) => failed += 1,
                        Err(err @ WriteError::Failed { .. }) => {
                            warn!(producer = p, row = i, %err, "write rejected");
                            failed += 1;
                        }
                        Err(err) => {
                            warn!(producer = p, %err, "writer stopped");
                            failed += 1;
                            break;
                        }
                    }
                }
                (written, failed)
            })
        })
        .collect();

    let mut written = 0;
    let mut failed = 0;
    for producer in producers {
        let (ok, ng) = producer.await.context("producer task failed")?;
        written += ok;
        failed += ng;
    }

    // (C) 読み込み経路で件数を確認してから shutdown
    let rows = service
        .read("count_rows", |h| {
            Box::pin(async move { Ok::<_, BoxError>(h.count()?) })
        })
        .await?
        .unwrap_or_default();
    service.shutdown_async().await;

    let report = Report {
        written,
        failed,
        rows,
        elapsed_ms: started.elapsed().as_millis(),
        writer: service.stats(),
        handles: store.handle_stats(),
    };
    info!(written, failed, rows, "demo finished");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("written : {}", report.written);
        println!("failed  : {}", report.failed);
        println!("rows    : {}", report.rows);
        println!("elapsed : {}ms", report.elapsed_ms);
        println!(
            "writer  : submitted={} succeeded={} failed={} retried={} rejected={}",
            report.writer.submitted,
            report.writer.succeeded,
            report.writer.failed,
            report.writer.retried,
            report.writer.rejected,
        );
        println!(
            "handles : opened={} max_open={}",
            report.handles.opened_total, report.handles.max_open
        );
    }

    Ok(())
}
