//! Per-symbol worker runtime.
//!
//! Design principles:
//! - **Isolation by symbol**: each symbol runs its pipeline sequentially in
//!   its own worker task. Symbols share no mutable state.
//! - **Never drop market data**: observations travel over a bounded queue and
//!   the router awaits room in it (backpressure).
//! - **Feedback never blocks**: execution feedback lands in the symbol's
//!   mailbox and is merged at the worker's next tick.
//! - **Idempotent teardown**: tearing down a symbol twice is harmless, and a
//!   tick already in progress always completes.
//! - **Stream time only**: live heartbeats advance each symbol's own stream
//!   clock by the wall time elapsed since its last output, so gate timers never
//!   see wall-clock timestamps.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::logger::{annotate_span, symbol_span, warn_if_slow};
use engine::{EngineConfig, ExecutionFeedback, SymbolPipeline, TickOutput};
use market::{MarketObservation, Symbol};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, warn};

use crate::config::RuntimeConfig;
use crate::error::AppError;
use crate::input::InputRecord;
use crate::mailbox::FeedbackMailbox;
use crate::metrics::Counters;
use crate::sink::OutputSink;

/// Sink writes slower than this are logged.
const SLOW_SINK: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub enum WorkerMessage {
    Observation(MarketObservation),
    /// Re-evaluate at an explicit stream time.
    Heartbeat { ts_ms: u64 },
    /// Re-evaluate at the symbol's stream clock extrapolated by elapsed time.
    ClockTick,
    Kill { ts_ms: u64, reason: String },
    Reset { ts_ms: u64 },
    Shutdown,
}

struct WorkerHandle {
    tx: Sender<WorkerMessage>,
    mailbox: FeedbackMailbox,
    task: JoinHandle<()>,
}

/// Routes gate input into per-symbol worker queues, spawning workers on
/// first sight of a symbol.
pub struct SymbolRouter<S: OutputSink> {
    engine: EngineConfig,
    runtime: RuntimeConfig,
    sink: Arc<S>,
    counters: Counters,

    /// Active workers keyed by symbol.
    workers: Mutex<HashMap<Symbol, WorkerHandle>>,
}

impl<S: OutputSink> SymbolRouter<S> {
    pub fn new(
        engine: EngineConfig,
        runtime: RuntimeConfig,
        sink: Arc<S>,
        counters: Counters,
    ) -> Result<Self, AppError> {
        engine.validate()?;
        runtime.validate()?;

        Ok(Self {
            engine,
            runtime,
            sink,
            counters,
            workers: Mutex::new(HashMap::new()),
        })
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Main router loop: deliver every record until the input closes, then
    /// tear all workers down.
    pub async fn run(self: Arc<Self>, mut rx: Receiver<InputRecord>) {
        info!(component = "router", event = "startup", "symbol router started");

        while let Some(record) = rx.recv().await {
            let symbol = record.symbol().clone();
            if let Err(e) = self.route(record).await {
                error!(component = "router", event = "route_failure", %symbol, error = %e, "record not delivered");
            }
        }

        warn!(component = "router", event = "input_closed", "router input closed");
        self.shutdown().await;
    }

    pub async fn route(&self, record: InputRecord) -> Result<(), AppError> {
        match record {
            InputRecord::Observation(obs) => self.route_observation(obs).await,
            InputRecord::Feedback(fb) => self.route_feedback(fb).await,
            InputRecord::Heartbeat { symbol, ts_ms } => {
                self.send(&symbol, WorkerMessage::Heartbeat { ts_ms }).await
            }
            InputRecord::Kill { symbol, ts_ms, reason } => self.kill(&symbol, ts_ms, reason).await,
            InputRecord::Reset { symbol, ts_ms } => self.reset(&symbol, ts_ms).await,
        }
    }

    /// Awaits queue room: a slow symbol slows its producer, nothing is dropped.
    pub async fn route_observation(&self, obs: MarketObservation) -> Result<(), AppError> {
        let symbol = obs.symbol.clone();
        self.send(&symbol, WorkerMessage::Observation(obs)).await
    }

    pub async fn route_feedback(&self, fb: ExecutionFeedback) -> Result<(), AppError> {
        let mailbox = self.mailbox(&fb.symbol).await?;
        Counters::incr(&self.counters.feedback);

        let symbol = fb.symbol.clone();
        if mailbox.push(fb) {
            Counters::incr(&self.counters.feedback_dropped);
            warn!(component = "router", event = "feedback_dropped", %symbol, "mailbox full, dropped oldest feedback");
        }
        Ok(())
    }

    pub async fn kill(&self, symbol: &Symbol, ts_ms: u64, reason: Option<String>) -> Result<(), AppError> {
        let reason = reason.unwrap_or_else(|| "operator".to_string());
        self.send(symbol, WorkerMessage::Kill { ts_ms, reason }).await
    }

    pub async fn reset(&self, symbol: &Symbol, ts_ms: u64) -> Result<(), AppError> {
        self.send(symbol, WorkerMessage::Reset { ts_ms }).await
    }

    /// Heartbeat every live symbol on its own stream clock.
    pub async fn heartbeat_all(&self) {
        let txs: Vec<(Symbol, Sender<WorkerMessage>)> = self
            .workers
            .lock()
            .await
            .iter()
            .map(|(s, h)| (s.clone(), h.tx.clone()))
            .collect();

        for (symbol, tx) in txs {
            if tx.send(WorkerMessage::ClockTick).await.is_err() {
                warn!(component = "router", event = "worker_send_error", %symbol, "heartbeat not delivered");
            }
        }
    }

    pub async fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.workers.lock().await.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Stop one symbol's worker and wait for it to finish what it started.
    ///
    /// Returns `false` when there was nothing to tear down.
    pub async fn teardown(&self, symbol: &Symbol) -> bool {
        let Some(handle) = self.workers.lock().await.remove(symbol) else {
            return false;
        };

        // Queued messages ahead of Shutdown still get processed.
        let _ = handle.tx.send(WorkerMessage::Shutdown).await;
        if let Err(e) = handle.task.await {
            error!(component = "router", event = "worker_join_error", %symbol, error = %e);
        }

        info!(component = "router", event = "teardown", %symbol, "worker stopped");
        true
    }

    pub async fn shutdown(&self) {
        for symbol in self.symbols().await {
            self.teardown(&symbol).await;
        }
        if let Err(e) = self.sink.flush().await {
            error!(component = "router", event = "flush_failure", error = %e);
        }
    }

    async fn send(&self, symbol: &Symbol, msg: WorkerMessage) -> Result<(), AppError> {
        let tx = self.get_or_spawn_worker(symbol).await?.0;

        if tx.send(msg).await.is_err() {
            // Worker died; remove it so the next record can recreate it.
            warn!(component = "router", event = "worker_send_error", %symbol, "worker channel closed; purging handle");
            self.workers.lock().await.remove(symbol);
            return Err(AppError::WorkerClosed(symbol.clone()));
        }
        Ok(())
    }

    async fn mailbox(&self, symbol: &Symbol) -> Result<FeedbackMailbox, AppError> {
        Ok(self.get_or_spawn_worker(symbol).await?.1)
    }

    /// Returns an existing worker's queue and mailbox or spawns a new worker.
    async fn get_or_spawn_worker(&self, symbol: &Symbol) -> Result<(Sender<WorkerMessage>, FeedbackMailbox), AppError> {
        let mut workers = self.workers.lock().await;
        if let Some(h) = workers.get(symbol) {
            return Ok((h.tx.clone(), h.mailbox.clone()));
        }

        let pipeline =
            SymbolPipeline::with_inbox_capacity(symbol.clone(), &self.engine, self.runtime.feedback_inbox_capacity)?;
        let (tx, rx) = mpsc::channel(self.runtime.market_queue_capacity);
        let mailbox = FeedbackMailbox::new(self.runtime.feedback_inbox_capacity);

        let worker = SymbolWorker::new(pipeline, mailbox.clone(), self.sink.clone(), self.counters.clone());
        let span = symbol_span(symbol.as_str());
        let task = tokio::spawn(worker.run(rx).instrument(span));

        workers.insert(
            symbol.clone(),
            WorkerHandle {
                tx: tx.clone(),
                mailbox: mailbox.clone(),
                task,
            },
        );

        Counters::incr(&self.counters.workers_spawned);
        info!(component = "router", %symbol, "spawned new symbol worker");
        Ok((tx, mailbox))
    }
}

/// Runs one symbol's pipeline sequentially.
///
/// This is the only place a pipeline is mutated.
pub struct SymbolWorker<S: OutputSink> {
    pipeline: SymbolPipeline,
    mailbox: FeedbackMailbox,
    sink: Arc<S>,
    counters: Counters,

    /// Stream time of the last output and when it was produced.
    clock: Option<(u64, Instant)>,
}

impl<S: OutputSink> SymbolWorker<S> {
    pub fn new(pipeline: SymbolPipeline, mailbox: FeedbackMailbox, sink: Arc<S>, counters: Counters) -> Self {
        Self {
            pipeline,
            mailbox,
            sink,
            counters,
            clock: None,
        }
    }

    /// Stream time now: last output time plus the wall time since.
    fn stream_now(&self) -> Option<u64> {
        self.clock
            .map(|(ts_ms, at)| ts_ms.saturating_add(at.elapsed().as_millis() as u64))
    }

    /// Worker loop. Never panics; exits on `Shutdown` or a closed queue.
    pub async fn run(mut self, mut rx: Receiver<WorkerMessage>) {
        let symbol = self.pipeline.symbol().clone();
        info!(component = "worker", %symbol, event = "startup");

        while let Some(msg) = rx.recv().await {
            if matches!(msg, WorkerMessage::Shutdown) {
                break;
            }
            self.handle(msg).await;
        }

        info!(
            component = "worker",
            %symbol,
            event = "exit",
            feedback_dropped = self.pipeline.feedback_dropped() + self.mailbox.dropped(),
            "worker exiting"
        );
    }

    async fn handle(&mut self, msg: WorkerMessage) {
        let output = match msg {
            WorkerMessage::Observation(obs) => {
                Counters::incr(&self.counters.observations);
                annotate_span(obs.seq);

                match self.pipeline.on_observation(&obs, self.mailbox.drain()) {
                    Ok(out) => Some(out),
                    Err(e) => {
                        Counters::incr(&self.counters.rejected);
                        if let Some(ev) = self.pipeline.rejection_event(&e) {
                            self.emit_events(std::slice::from_ref(&ev)).await;
                        }
                        None
                    }
                }
            }
            WorkerMessage::Heartbeat { ts_ms } => {
                Counters::incr(&self.counters.heartbeats);
                let out = self.pipeline.on_heartbeat(ts_ms, self.mailbox.drain());
                if out.is_none() {
                    let symbol = self.pipeline.symbol();
                    debug!(component = "worker", %symbol, "heartbeat before first observation");
                }
                out
            }
            WorkerMessage::ClockTick => match self.stream_now() {
                Some(ts_ms) => {
                    Counters::incr(&self.counters.heartbeats);
                    self.pipeline.on_heartbeat(ts_ms, self.mailbox.drain())
                }
                None => None,
            },
            WorkerMessage::Kill { ts_ms, reason } => Some(self.pipeline.kill(ts_ms, &reason)),
            WorkerMessage::Reset { ts_ms } => Some(self.pipeline.operator_reset(ts_ms)),
            WorkerMessage::Shutdown => None,
        };

        if let Some(out) = output {
            self.clock = Some((out.decision.ts_ms(), Instant::now()));
            self.publish(&out).await;
        }
    }

    async fn publish(&self, out: &TickOutput) {
        Counters::incr(&self.counters.decisions);
        Counters::add(&self.counters.events, out.events.len() as u64);
        if out.decision.eligible() {
            Counters::incr(&self.counters.eligible);
        }

        if let Err(e) = warn_if_slow("sink_publish", SLOW_SINK, self.sink.publish(out)).await {
            Counters::incr(&self.counters.sink_errors);
            error!(component = "worker", symbol = %self.pipeline.symbol(), error = %e, "publish failed");
        }
    }

    async fn emit_events(&self, events: &[engine::StateEvent]) {
        Counters::add(&self.counters.events, events.len() as u64);
        if let Err(e) = self.sink.events(events).await {
            Counters::incr(&self.counters.sink_errors);
            error!(component = "worker", symbol = %self.pipeline.symbol(), error = %e, "event publish failed");
        }
    }
}
