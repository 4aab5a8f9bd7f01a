//! Deterministic replay of recorded gate input.
//!
//! Records are applied strictly in file order on synchronous pipelines, so
//! the same input always yields byte-identical output logs.

use std::collections::HashMap;
use std::io::BufRead;

use engine::{EngineConfig, SymbolPipeline, TickOutput};
use market::Symbol;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::input::InputRecord;
use crate::sink::OutputSink;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub records: u64,
    pub decisions: u64,
    pub events: u64,
    pub rejected: u64,
    pub skipped_lines: u64,
    pub symbols: Vec<Symbol>,
}

pub struct Replayer<'a, S: OutputSink> {
    cfg: EngineConfig,
    inbox_capacity: usize,
    sink: &'a S,
    pipelines: HashMap<Symbol, SymbolPipeline>,
    summary: ReplaySummary,
}

impl<'a, S: OutputSink> Replayer<'a, S> {
    pub fn new(cfg: EngineConfig, inbox_capacity: usize, sink: &'a S) -> Result<Self, AppError> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            inbox_capacity,
            sink,
            pipelines: HashMap::new(),
            summary: ReplaySummary::default(),
        })
    }

    pub fn pipeline(&self, symbol: &Symbol) -> Option<&SymbolPipeline> {
        self.pipelines.get(symbol)
    }

    /// Apply one record and publish whatever it produced.
    pub async fn apply(&mut self, record: InputRecord) -> Result<(), AppError> {
        self.summary.records += 1;

        let symbol = record.symbol().clone();
        if !self.pipelines.contains_key(&symbol) {
            let p = SymbolPipeline::with_inbox_capacity(symbol.clone(), &self.cfg, self.inbox_capacity)?;
            self.pipelines.insert(symbol.clone(), p);
        }
        let Some(pipeline) = self.pipelines.get_mut(&symbol) else {
            return Ok(());
        };

        let output = match record {
            InputRecord::Observation(obs) => match pipeline.on_observation(&obs, None) {
                Ok(out) => Some(out),
                Err(e) => {
                    self.summary.rejected += 1;
                    if let Some(ev) = pipeline.rejection_event(&e) {
                        self.summary.events += 1;
                        self.sink.events(std::slice::from_ref(&ev)).await?;
                    }
                    None
                }
            },
            InputRecord::Feedback(fb) => {
                pipeline.enqueue_feedback(fb);
                None
            }
            InputRecord::Heartbeat { ts_ms, .. } => pipeline.on_heartbeat(ts_ms, None),
            InputRecord::Kill { ts_ms, reason, .. } => {
                Some(pipeline.kill(ts_ms, reason.as_deref().unwrap_or("operator")))
            }
            InputRecord::Reset { ts_ms, .. } => Some(pipeline.operator_reset(ts_ms)),
        };

        if let Some(out) = output {
            self.publish(&out).await?;
        }
        Ok(())
    }

    /// Replay a JSON-lines stream. Lines that do not parse are logged,
    /// counted and skipped; sink failures abort the replay.
    pub async fn replay_reader(mut self, reader: impl BufRead) -> Result<ReplaySummary, AppError> {
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<InputRecord>(trimmed) {
                Ok(record) => self.apply(record).await?,
                Err(e) => {
                    self.summary.skipped_lines += 1;
                    warn!(
                        component = "replay",
                        event = "bad_line",
                        line = idx + 1,
                        error = %e,
                        "skipping unparsable input line"
                    );
                }
            }
        }

        self.finish().await
    }

    pub async fn finish(mut self) -> Result<ReplaySummary, AppError> {
        self.sink.flush().await?;

        let mut symbols: Vec<Symbol> = self.pipelines.keys().cloned().collect();
        symbols.sort();
        self.summary.symbols = symbols;

        info!(
            component = "replay",
            event = "complete",
            records = self.summary.records,
            decisions = self.summary.decisions,
            events = self.summary.events,
            rejected = self.summary.rejected,
            skipped = self.summary.skipped_lines,
            "replay finished"
        );
        Ok(self.summary)
    }

    async fn publish(&mut self, out: &TickOutput) -> Result<(), AppError> {
        self.summary.decisions += 1;
        self.summary.events += out.events.len() as u64;
        debug!(
            component = "replay",
            symbol = %out.decision.symbol(),
            seq = out.decision.seq(),
            eligible = out.decision.eligible(),
        );
        self.sink.publish(out).await
    }
}
