use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use backend::{
    config::{AppConfig, CONFIG_PATH_ENV, OUT_DIR_ENV},
    input::InputRecord,
    metrics::Counters,
    paths::OutputPaths,
    replay::Replayer,
    router::SymbolRouter,
    sink::JsonlSink,
};
use clap::{Parser, Subcommand};
use common::logger::{TraceId, init_logger, root_span};
use tokio::io::{AsyncBufReadExt, BufReader as AsyncBufReader};
use tokio::sync::mpsc;
use tracing::{Instrument, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "gatekeeper", version, about = "Per-symbol trading permission gate")]
struct Cli {
    /// JSON config file; defaults apply when omitted
    #[arg(long, global = true, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Root directory for decision and event logs
    #[arg(long, global = true, env = OUT_DIR_ENV)]
    out_dir: Option<PathBuf>,

    /// Correlation id for this run's logs; generated when omitted
    #[arg(long, global = true, env = "GATE_TRACE_ID")]
    trace_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a recorded JSON-lines input file deterministically
    Replay {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Read JSON-lines input from stdin and gate it live
    Run {
        /// Heartbeat interval; each symbol advances its own stream clock by it
        #[arg(long, default_value_t = 1_000)]
        heartbeat_ms: u64,
    },
    /// Validate the configuration and print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_logger("gatekeeper", is_production);

    let cfg = AppConfig::load(cli.config.as_deref(), cli.out_dir.clone()).context("loading configuration")?;

    let trace_id = cli.trace_id.map(TraceId::new).unwrap_or_default();
    let span = root_span("gatekeeper", &trace_id);

    match cli.command {
        Command::Replay { input } => replay(cfg, input).instrument(span).await,
        Command::Run { heartbeat_ms } => run(cfg, heartbeat_ms).instrument(span).await,
        Command::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&cfg)?);
            Ok(())
        }
    }
}

async fn replay(cfg: AppConfig, input: PathBuf) -> anyhow::Result<()> {
    let file = File::open(&input).with_context(|| format!("opening {}", input.display()))?;
    let sink = JsonlSink::new(OutputPaths::new(cfg.runtime.out_dir.clone()));
    info!(component = "main", input = %input.display(), out_dir = %sink.paths().root().display(), "starting replay");

    let summary = Replayer::new(cfg.engine, cfg.runtime.feedback_inbox_capacity, &sink)?
        .replay_reader(BufReader::new(file))
        .await?;

    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

async fn run(cfg: AppConfig, heartbeat_ms: u64) -> anyhow::Result<()> {
    let sink = Arc::new(JsonlSink::new(OutputPaths::new(cfg.runtime.out_dir.clone())));
    info!(component = "main", out_dir = %sink.paths().root().display(), heartbeat_ms, "starting live gate");
    let counters = Counters::default();
    let router = Arc::new(SymbolRouter::new(cfg.engine, cfg.runtime.clone(), sink, counters.clone())?);

    let (tx, rx) = mpsc::channel::<InputRecord>(cfg.runtime.market_queue_capacity);
    let router_task = tokio::spawn(router.clone().run(rx));

    let mut lines = AsyncBufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_millis(heartbeat_ms.max(1)));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!(component = "main", "input exhausted");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<InputRecord>(&line) {
                    Ok(record) => {
                        if tx.send(record).await.is_err() {
                            error!(component = "main", "router stopped accepting input");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(component = "main", event = "bad_line", error = %e, "skipping unparsable input line");
                    }
                }
            }
            _ = ticker.tick() => router.heartbeat_all().await,
            _ = tokio::signal::ctrl_c() => {
                info!(component = "main", "shutdown signal received");
                break;
            }
        }
    }

    // closing the input lets the router drain and tear every worker down
    drop(tx);
    router_task.await?;

    info!(component = "main", counters = ?counters.snapshot(), "gate stopped");
    Ok(())
}
