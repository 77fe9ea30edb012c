//! Executes a compiled [`Pipeline`].
//!
//! The source and every map stage run on their own scoped thread, joined by
//! bounded channels. The calling thread drives the sink: it writes the header
//! and rows it receives and keeps draining until every worker has reported
//! EOF, so no worker is ever left blocked on a full channel.
//!
//! The first error delivered to the sink becomes the result of the run.
//! A cancelled token ends the run early without error. A circuit break
//! travels in-band behind the rows that preceded it: every later stage treats
//! it as end of input, flushes its buffers and forwards it, and the sink stops
//! writing only once it arrives.

use super::context::{Context, Database, Param, Record, Signal};
use super::parser::{MapStage, Pipeline};
use super::sink::{Sink, SinkEnv};
use super::source::SourceEnv;
use crate::cancel::CancelToken;
use crate::client::{Column, Columns, DataType};
use crate::error::{Error, Result};
use crate::metrics::{RunSummary, StageStats};
use crate::value::Value;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::any::Any;
use std::io::{Read, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Execution settings.
#[derive(Debug, Clone)]
pub struct Runner {
    /// Capacity of every stage input and of the sink channel.
    pub channel_capacity: usize,
    /// Wall-clock limit for the whole run.
    pub deadline: Option<Duration>,
    /// Log every param as it leaves a map stage.
    pub debug: bool,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            channel_capacity: 32,
            deadline: None,
            debug: false,
        }
    }
}

/// Where a run reads from and writes to.
pub struct RunEnv {
    /// Destination of the sink's encoded output.
    pub output: Box<dyn Write + Send>,
    /// Session for SQL, QUERY, INSERT and APPEND stages and for SCRIPT
    /// database helpers. Those stages fail when it is absent.
    pub database: Option<Database>,
    /// Cancelling it stops every stage; the run then ends without error.
    pub cancel: CancelToken,
    /// Payload read by `payload()` in sources.
    pub input: Option<Box<dyn Read + Send>>,
}

impl RunEnv {
    /// Write to `output`, with no database, payload or external cancellation.
    pub fn new(output: Box<dyn Write + Send>) -> Self {
        Self {
            output,
            database: None,
            cancel: CancelToken::new(),
            input: None,
        }
    }

    /// Attach a database session; its connection is released when the run ends.
    #[must_use]
    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    /// Follow `cancel` instead of a private token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Supply the request payload.
    #[must_use]
    pub fn with_input(mut self, input: Box<dyn Read + Send>) -> Self {
        self.input = Some(input);
        self
    }
}

fn panic_error(stage: &str, payload: Box<dyn Any + Send>) -> Error {
    let msg = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    Error::pipeline(stage, format!("panic: {msg}"))
}

/// `[K, V...]` to a param.
fn row_param(mut row: Vec<Value>) -> Param {
    if row.is_empty() {
        return Param::new(Value::Null, Value::List(Vec::new()));
    }
    let rest = row.split_off(1);
    let k = row.pop().unwrap_or_default();
    Param::new(k, Value::List(rest))
}

/// Outbound side of a worker: the next stage, or the sink when last.
struct Outlet {
    next: Option<Sender<Record>>,
    sink: Sender<Record>,
}

impl Outlet {
    fn send(&self, rec: Record) -> bool {
        self.next.as_ref().unwrap_or(&self.sink).send(rec).is_ok()
    }

    fn report(&self, err: Error) {
        let _ = self.sink.send(Record::Error(err));
    }

    fn finish(&self) {
        if let Some(next) = &self.next {
            let _ = next.send(Record::Eof);
        }
        let _ = self.sink.send(Record::Eof);
    }
}

fn run_source(
    pipeline: &Pipeline,
    mut env: SourceEnv,
    stats: &StageStats,
    out: &Outlet,
) {
    let stage = pipeline.source.name.as_str();
    let cancel = env.cancel.clone();
    debug!(stage, "source started");
    let result = catch_unwind(AssertUnwindSafe(|| -> Result<()> {
        let stream = pipeline.source.source.0.open(&mut env)?;
        let _ = out.sink.send(Record::Header(stream.columns));
        for row in stream.rows {
            if cancel.is_cancelled() {
                break;
            }
            stats.record_in();
            if !out.send(Record::Data(row_param(row?))) {
                break;
            }
            stats.record_out(1);
        }
        Ok(())
    }));
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            stats.record_error();
            out.report(err);
        }
        Err(panic) => {
            stats.record_error();
            out.report(panic_error(stage, panic));
        }
    }
    out.finish();
    debug!(stage, "source stopped");
}

fn run_map(stage: &MapStage, ctx: Arc<Context>, input: Receiver<Record>, out: &Outlet) {
    let stats = Arc::clone(ctx.stats());
    let mut stopped = false;
    let mut flush = true;
    let mut broken = false;
    debug!(stage = %stage.name, line = stage.line, "stage started");

    let emit = |p: Param| -> bool {
        if ctx.debug() {
            trace!(stage = %stage.name, k = %p.k, v = %p.v, "yield");
        }
        stats.record_out(1);
        out.send(Record::Data(Param { ctx: None, ..p }))
    };

    for rec in input.iter() {
        let mut param = match rec {
            Record::Data(p) => p,
            Record::Eof => break,
            Record::CircuitBreak => {
                debug!(stage = %stage.name, "upstream circuit break");
                broken = true;
                break;
            }
            other => {
                out.send(other);
                continue;
            }
        };
        if stopped || ctx.is_cancelled() {
            continue;
        }
        ctx.incr_nrow();
        stats.record_in();
        param.ctx = Some(Arc::clone(&ctx));
        let value = match catch_unwind(AssertUnwindSafe(|| stage.expr.eval(&param))) {
            Ok(Ok(v)) => v,
            Ok(Err(err)) => {
                stats.record_error();
                out.report(err.at_line(&stage.name, stage.line));
                (stopped, flush) = (true, false);
                continue;
            }
            Err(panic) => {
                stats.record_error();
                out.report(panic_error(&stage.name, panic).at_line(&stage.name, stage.line));
                (stopped, flush) = (true, false);
                continue;
            }
        };
        if value.is_null() {
            stats.record_dropped();
        } else if let Some(p) = value.downcast_ref::<Param>() {
            stopped = !emit(p.clone());
        } else if let Some(ps) = value.downcast_ref::<Vec<Param>>() {
            stopped = !ps.iter().cloned().all(&emit);
        } else if let Some(signal) = value.downcast_ref::<Signal>() {
            if *signal == Signal::CircuitBreak {
                broken = true;
                break;
            }
            stopped = true;
        } else {
            stats.record_error();
            out.report(Error::Type(format!(
                "{} returns unexpected type {}",
                stage.name,
                value.kind()
            )));
            (stopped, flush) = (true, false);
        }
    }

    // Upstream sends fail from here on, so it winds down without `stop`.
    drop(input);

    if flush && !ctx.is_cancelled() {
        for (k, values) in ctx.drain_buffers() {
            if !emit(Param::new(k, Value::List(values))) {
                break;
            }
        }
    }
    if broken {
        out.send(Record::CircuitBreak);
    }
    ctx.run_closers();
    out.finish();
    debug!(stage = %stage.name, nrow = ctx.nrow(), "stage stopped");
}

/// State of the sink side while a run is in progress.
struct SinkLoop {
    sink: Box<dyn Sink>,
    name: String,
    header: bool,
    writing: bool,
    rows: u64,
    first_error: Option<Error>,
    broken: bool,
    expired: bool,
}

impl SinkLoop {
    fn fail(&mut self, err: Error) {
        self.writing = false;
        if self.first_error.is_none() {
            self.first_error = Some(err);
        } else {
            debug!(%err, "discarding later error");
        }
    }

    fn guarded(&mut self, f: impl FnOnce(&mut dyn Sink) -> Result<()>) {
        let name = self.name.clone();
        match catch_unwind(AssertUnwindSafe(|| f(self.sink.as_mut()))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.fail(err),
            Err(panic) => self.fail(panic_error(&name, panic)),
        }
    }

    /// Stop writing once the deadline has passed; workers see `stop` cancelled.
    fn expire(&mut self, stop: &CancelToken) {
        warn!("pipeline deadline exceeded");
        self.expired = true;
        self.writing = false;
        stop.cancel();
    }

    fn header(&mut self, columns: Columns) {
        if self.header {
            return;
        }
        self.header = true;
        self.guarded(|sink| sink.set_header(&columns));
    }

    fn data(&mut self, p: Param) {
        for row in p.into_rows() {
            if !self.writing {
                return;
            }
            if !self.header {
                let synthesized = (0..row.len())
                    .map(|i| Column::new(format!("C{i:02}"), DataType::default()))
                    .collect();
                self.header(Columns(synthesized));
            }
            self.rows += 1;
            self.guarded(|sink| sink.add_row(row));
        }
    }
}

impl Runner {
    /// Bound of each inter-stage channel; zero is treated as one.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Fail the run with "deadline exceeded" once `deadline` has elapsed,
    /// unless a circuit break ended it first.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Trace every param a map stage yields.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Run `pipeline` to completion.
    ///
    /// # Errors
    ///
    /// - the first error any stage reports, carrying that stage's name and line;
    /// - [`Error::Pipeline`] with stage `runner` when the deadline passes;
    /// - building or closing the sink, e.g. INSERT or APPEND without a database.
    pub fn run(&self, pipeline: &Pipeline, env: RunEnv) -> Result<RunSummary> {
        let started = Instant::now();
        let RunEnv {
            output,
            database,
            cancel,
            input,
        } = env;
        let stop = match self.deadline {
            Some(d) => cancel.child().with_timeout(d),
            None => cancel.child(),
        };

        let sink = pipeline.sink.sink.0.build(SinkEnv {
            output,
            database: database.clone(),
        });
        let sink = match sink {
            Ok(sink) => sink,
            Err(err) => {
                release(database.as_ref());
                return Err(err);
            }
        };

        let contexts: Vec<Arc<Context>> = pipeline
            .maps
            .iter()
            .map(|m| {
                Arc::new(
                    Context::new(&m.name)
                        .with_line(m.line)
                        .with_params(Arc::clone(&pipeline.params))
                        .with_cancel(stop.clone())
                        .with_debug(self.debug)
                        .with_database(database.clone()),
                )
            })
            .collect();
        let source_stats = StageStats::new(&pipeline.source.name);
        let sink_stats = StageStats::new(&pipeline.sink.name);

        let capacity = self.channel_capacity.max(1);
        let (sink_tx, sink_rx) = bounded::<Record>(capacity);
        let (map_txs, map_rxs): (Vec<_>, Vec<_>) =
            pipeline.maps.iter().map(|_| bounded::<Record>(capacity)).unzip();

        let mut state = SinkLoop {
            sink,
            name: pipeline.sink.name.clone(),
            header: false,
            writing: true,
            rows: 0,
            first_error: None,
            broken: false,
            expired: false,
        };

        std::thread::scope(|s| {
            let source_out = Outlet {
                next: map_txs.first().cloned(),
                sink: sink_tx.clone(),
            };
            let source_env = SourceEnv {
                database: database.clone(),
                input,
                cancel: stop.clone(),
            };
            let stats = &source_stats;
            s.spawn(move || run_source(pipeline, source_env, stats, &source_out));

            for (i, rx) in map_rxs.into_iter().enumerate() {
                let out = Outlet {
                    next: map_txs.get(i + 1).cloned(),
                    sink: sink_tx.clone(),
                };
                let stage = &pipeline.maps[i];
                let ctx = Arc::clone(&contexts[i]);
                s.spawn(move || run_map(stage, ctx, rx, &out));
            }
            drop(map_txs);
            drop(sink_tx);

            let expected = pipeline.maps.len() + 1;
            let mut eofs = 0;
            while eofs < expected {
                if !state.expired && !state.broken && stop.is_expired() {
                    state.expire(&stop);
                }
                let received = match stop.remaining() {
                    Some(left) if !state.expired => match sink_rx.recv_timeout(left) {
                        Ok(rec) => Some(rec),
                        Err(RecvTimeoutError::Timeout) => {
                            state.expire(&stop);
                            continue;
                        }
                        Err(RecvTimeoutError::Disconnected) => None,
                    },
                    _ => sink_rx.recv().ok(),
                };
                let Some(rec) = received else {
                    break;
                };
                match rec {
                    Record::Header(columns) if state.writing => state.header(columns),
                    Record::Data(p) if state.writing => state.data(p),
                    Record::Header(_) | Record::Data(_) => sink_stats.record_dropped(),
                    Record::CircuitBreak => {
                        debug!("circuit break");
                        state.broken = true;
                        state.writing = false;
                        stop.cancel();
                    }
                    Record::Error(err) => {
                        state.fail(err);
                        stop.cancel();
                    }
                    Record::Eof => eofs += 1,
                }
            }
        });

        let SinkLoop {
            sink,
            rows,
            first_error,
            broken,
            expired,
            ..
        } = state;
        sink_stats.record_out(rows);
        let closed = sink.close();
        release(database.as_ref());

        if let Some(err) = first_error {
            warn!(%err, "pipeline failed");
            return Err(err);
        }
        if expired && !broken {
            return Err(Error::pipeline("runner", "deadline exceeded"));
        }
        let message = closed?;

        let summary = RunSummary {
            rows,
            elapsed: started.elapsed(),
            message,
            stages: stage_snapshots(&source_stats, &contexts, &sink_stats),
        };
        info!(
            rows = summary.rows,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "pipeline finished"
        );
        Ok(summary)
    }
}

fn release(database: Option<&Database>) {
    if let Some(db) = database
        && let Err(err) = db.release()
    {
        warn!(%err, "releasing pipeline connection");
    }
}

#[cfg(feature = "metrics")]
fn stage_snapshots(
    source: &StageStats,
    contexts: &[Arc<Context>],
    sink: &StageStats,
) -> Vec<crate::metrics::StageSnapshot> {
    let mut stages = vec![source.snapshot()];
    stages.extend(contexts.iter().map(|c| c.stats().snapshot()));
    stages.push(sink.snapshot());
    stages
}

#[cfg(not(feature = "metrics"))]
fn stage_snapshots(
    _source: &StageStats,
    _contexts: &[Arc<Context>],
    _sink: &StageStats,
) -> Vec<crate::metrics::StageSnapshot> {
    Vec::new()
}
