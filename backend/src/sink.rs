//! Output sinks for decisions and state events.
//!
//! The gate only produces; what happens to its output is a sink's business.
//! Two implementations ship with the runtime:
//! - [`ChannelSink`] forwards into a tokio channel for in-process consumers
//! - [`JsonlSink`] appends JSON lines to the symbol-partitioned layout of
//!   [`OutputPaths`]

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use engine::{Decision, StateEvent, TickOutput};
use market::Symbol;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::Sender;
use tracing::debug;

use crate::error::AppError;
use crate::paths::OutputPaths;

#[derive(Debug, Clone, PartialEq)]
pub enum GateOutput {
    Decision(Decision),
    Event(StateEvent),
}

#[async_trait]
pub trait OutputSink: Send + Sync + 'static {
    async fn decision(&self, decision: &Decision) -> Result<(), AppError>;

    async fn events(&self, events: &[StateEvent]) -> Result<(), AppError>;

    /// Events first, then the decision they led to.
    async fn publish(&self, tick: &TickOutput) -> Result<(), AppError> {
        if !tick.events.is_empty() {
            self.events(&tick.events).await?;
        }
        self.decision(&tick.decision).await
    }

    async fn flush(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Forwards every output into a bounded channel. A full channel applies
/// backpressure to the producing worker.
pub struct ChannelSink {
    tx: Sender<GateOutput>,
}

impl ChannelSink {
    pub fn new(tx: Sender<GateOutput>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl OutputSink for ChannelSink {
    async fn decision(&self, decision: &Decision) -> Result<(), AppError> {
        self.tx
            .send(GateOutput::Decision(decision.clone()))
            .await
            .map_err(|_| AppError::SinkClosed)
    }

    async fn events(&self, events: &[StateEvent]) -> Result<(), AppError> {
        for ev in events {
            self.tx
                .send(GateOutput::Event(ev.clone()))
                .await
                .map_err(|_| AppError::SinkClosed)?;
        }
        Ok(())
    }
}

struct SymbolFiles {
    decisions: BufWriter<File>,
    events: BufWriter<File>,
}

impl SymbolFiles {
    fn open(paths: &OutputPaths, symbol: &Symbol) -> std::io::Result<Self> {
        std::fs::create_dir_all(paths.symbol_dir(symbol))?;
        let append = |path: PathBuf| OpenOptions::new().create(true).append(true).open(path);

        Ok(Self {
            decisions: BufWriter::new(append(paths.decisions(symbol))?),
            events: BufWriter::new(append(paths.events(symbol))?),
        })
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.decisions.flush()?;
        self.events.flush()
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Decisions,
    Events,
}

type SharedFiles = Arc<Mutex<SymbolFiles>>;

/// Appends one JSON object per line under `<out_dir>/symbol=<symbol>/`.
///
/// Each symbol owns its writers behind its own lock; the shared map is only
/// touched to look a symbol up. Files are opened lazily in append mode, and
/// all disk work runs on the blocking pool.
pub struct JsonlSink {
    paths: OutputPaths,
    files: Mutex<HashMap<Symbol, SharedFiles>>,
}

impl JsonlSink {
    pub fn new(paths: OutputPaths) -> Self {
        Self {
            paths,
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }

    async fn files_for(&self, symbol: &Symbol) -> Result<SharedFiles, AppError> {
        let existing = self.files.lock().get(symbol).cloned();
        if let Some(files) = existing {
            return Ok(files);
        }

        debug!(component = "sink", %symbol, dir = %self.paths.symbol_dir(symbol).display(), "opening output files");
        let (paths, sym) = (self.paths.clone(), symbol.clone());
        let opened = tokio::task::spawn_blocking(move || SymbolFiles::open(&paths, &sym)).await??;

        let files = self
            .files
            .lock()
            .entry(symbol.clone())
            .or_insert_with(|| Arc::new(Mutex::new(opened)))
            .clone();
        Ok(files)
    }

    async fn append(&self, symbol: &Symbol, stream: Stream, lines: String) -> Result<(), AppError> {
        let files = self.files_for(symbol).await?;

        tokio::task::spawn_blocking(move || {
            let mut files = files.lock();
            let w = match stream {
                Stream::Decisions => &mut files.decisions,
                Stream::Events => &mut files.events,
            };
            w.write_all(lines.as_bytes())
        })
        .await??;
        Ok(())
    }
}

fn push_line(buf: &mut String, value: &impl Serialize) -> Result<(), AppError> {
    buf.push_str(&serde_json::to_string(value)?);
    buf.push('\n');
    Ok(())
}

#[async_trait]
impl OutputSink for JsonlSink {
    async fn decision(&self, decision: &Decision) -> Result<(), AppError> {
        let mut line = String::new();
        push_line(&mut line, decision)?;
        self.append(decision.symbol(), Stream::Decisions, line).await
    }

    /// Consecutive events of one symbol go out in a single write.
    async fn events(&self, events: &[StateEvent]) -> Result<(), AppError> {
        for batch in events.chunk_by(|a, b| a.symbol == b.symbol) {
            let mut lines = String::new();
            for ev in batch {
                push_line(&mut lines, ev)?;
            }
            self.append(&batch[0].symbol, Stream::Events, lines).await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), AppError> {
        let all: Vec<SharedFiles> = self.files.lock().values().cloned().collect();

        tokio::task::spawn_blocking(move || all.iter().try_for_each(|f| f.lock().flush())).await??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{EngineConfig, SymbolPipeline};
    use market::{DataIntegrity, MarketObservation};
    use tokio::sync::mpsc;

    fn tick(symbol: &str) -> TickOutput {
        let mut p = SymbolPipeline::new(Symbol::new(symbol), &EngineConfig::default()).unwrap();
        p.kill(0, "test");
        p.on_observation(
            &MarketObservation {
                symbol: Symbol::new(symbol),
                seq: 1,
                ts_ms: 10,
                exchange_ts_ms: None,
                bid_px: 99.0,
                bid_sz: 1.0,
                ask_px: 101.0,
                ask_sz: 1.0,
                last_trade: None,
                integrity: DataIntegrity::Gap,
            },
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn channel_sink_orders_events_before_decision() {
        let (tx, mut rx) = mpsc::channel(16);
        let sink = ChannelSink::new(tx);
        let out = tick("BTCUSDT");
        assert!(!out.events.is_empty());

        sink.publish(&out).await.unwrap();
        drop(sink);

        let mut got = Vec::new();
        while let Some(o) = rx.recv().await {
            got.push(o);
        }
        assert_eq!(got.len(), out.events.len() + 1);
        assert!(matches!(got.last(), Some(GateOutput::Decision(_))));
    }

    #[tokio::test]
    async fn channel_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = ChannelSink::new(tx);

        let err = sink.publish(&tick("BTCUSDT")).await.unwrap_err();
        assert!(matches!(err, AppError::SinkClosed));
    }

    #[tokio::test]
    async fn jsonl_sink_writes_symbol_partitioned_lines() {
        let root = std::env::temp_dir().join(format!("gate-sink-{}", uuid::Uuid::new_v4()));
        let sink = JsonlSink::new(OutputPaths::new(&root));

        let out = tick("ETHUSDT");
        sink.publish(&out).await.unwrap();
        sink.publish(&out).await.unwrap();
        sink.flush().await.unwrap();

        let decisions = std::fs::read_to_string(sink.paths().decisions(&Symbol::new("ETHUSDT"))).unwrap();
        let lines: Vec<&str> = decisions.lines().collect();
        assert_eq!(lines.len(), 2);

        let back: Decision = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(back, out.decision);

        let events = std::fs::read_to_string(root.join("symbol=ethusdt").join("events.jsonl")).unwrap();
        assert_eq!(events.lines().count(), out.events.len() * 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn jsonl_sink_symbols_write_independently() {
        let root = std::env::temp_dir().join(format!("gate-sink-{}", uuid::Uuid::new_v4()));
        let sink = Arc::new(JsonlSink::new(OutputPaths::new(&root)));
        let symbols = ["BTCUSDT", "ETHUSDT", "SOLUSDT", "XRPUSDT"];

        let tasks: Vec<_> = symbols
            .iter()
            .map(|s| {
                let (sink, out) = (sink.clone(), tick(s));
                tokio::spawn(async move {
                    for _ in 0..25 {
                        sink.publish(&out).await.unwrap();
                    }
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }
        sink.flush().await.unwrap();

        for s in symbols {
            let symbol = Symbol::new(s);
            let lines: Vec<Decision> = std::fs::read_to_string(sink.paths().decisions(&symbol))
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect();
            assert_eq!(lines.len(), 25);
            assert!(lines.iter().all(|d| d.symbol() == &symbol));
        }
    }
}
