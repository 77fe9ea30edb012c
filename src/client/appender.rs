use super::transport::{AppendData, AppendStream, AppenderHandle, check_call};
use super::{Column, Columns, ConnInner, TableType};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::wire::{self, Datum, Native};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Sender, bounded, select, tick};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Buffering policy of an [`Appender`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppenderOptions {
    /// Records buffered before a flush is forced.
    pub buffer_threshold: usize,
    /// Period of the background flush.
    pub flush_interval: Duration,
}

impl Default for AppenderOptions {
    fn default() -> Self {
        Self {
            buffer_threshold: 400,
            flush_interval: Duration::from_secs(1),
        }
    }
}

impl AppenderOptions {
    #[must_use]
    pub fn with_buffer_threshold(mut self, n: usize) -> Self {
        self.buffer_threshold = n.max(1);
        self
    }

    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }
}

struct AppendState {
    buffer: Vec<Vec<Datum>>,
    stream: Option<Box<dyn AppendStream>>,
    /// Set when cancellation tore the stream down; reported once by close.
    aborted: Option<String>,
}

struct Shared {
    handle: AppenderHandle,
    table_name: String,
    threshold: usize,
    ctx: CancelToken,
    state: Mutex<AppendState>,
}

impl Shared {
    /// With `rec`, buffer it and send only once the threshold is reached.
    /// Without, send whatever is buffered.
    fn flush(&self, rec: Option<Vec<Datum>>) -> Result<()> {
        let mut state = self.state.lock();
        if state.stream.is_none() {
            return Err(Error::TxDone);
        }
        if self.ctx.is_cancelled() {
            let lost = state.buffer.len() + usize::from(rec.is_some());
            let reason = format!(
                "append to {} cancelled, {lost} buffered records dropped",
                self.table_name
            );
            state.stream = None;
            state.buffer.clear();
            state.aborted = Some(reason.clone());
            return Err(Error::Transport(reason));
        }
        let forced = rec.is_none();
        if let Some(rec) = rec {
            state.buffer.push(rec);
        }
        if state.buffer.is_empty() || (!forced && state.buffer.len() < self.threshold) {
            return Ok(());
        }
        let records = std::mem::take(&mut state.buffer);
        let count = records.len();
        let data = AppendData {
            handle: self.handle.clone(),
            records,
        };
        let Some(stream) = state.stream.as_mut() else {
            return Err(Error::TxDone);
        };
        // The batch leaves the buffer before sending; a failed batch is not resent.
        stream.send(data)?;
        debug!(table = %self.table_name, count, "append batch sent");
        Ok(())
    }
}

/// Streaming bulk writer for one table.
///
/// Records are buffered and sent as one batch when the threshold is reached,
/// on every flush tick and on [`Appender::close`].
pub struct Appender {
    shared: Arc<Shared>,
    table_type: TableType,
    columns: Columns,
    flusher: Option<(Sender<()>, JoinHandle<()>)>,
    // The connection must outlive the stream.
    _conn: Arc<ConnInner>,
}

impl Appender {
    pub(crate) fn open(
        conn: Arc<ConnInner>,
        ctx: &CancelToken,
        table: &str,
        options: AppenderOptions,
    ) -> Result<Appender> {
        let call = conn.client.unary(ctx);
        check_call(&call)?;
        let rsp = conn.client.transport.appender(&call, &conn.handle, table)?;
        if !rsp.success {
            return Err(Error::server(&rsp.reason));
        }
        let body = rsp.data;
        let handle = body
            .handle
            .ok_or_else(|| Error::Server("server returned no appender handle".into()))?;
        let table_name = if body.table_name.is_empty() {
            table.to_uppercase()
        } else {
            body.table_name.to_uppercase()
        };

        let stream_ctx = match (ctx.deadline(), conn.client.config.append_timeout.is_zero()) {
            (None, false) => ctx.with_timeout(conn.client.config.append_timeout),
            _ => ctx.clone(),
        };
        let stream = conn.client.transport.append(&stream_ctx)?;

        let shared = Arc::new(Shared {
            handle,
            table_name,
            threshold: options.buffer_threshold.max(1),
            ctx: stream_ctx,
            state: Mutex::new(AppendState {
                buffer: Vec::with_capacity(options.buffer_threshold),
                stream: Some(stream),
                aborted: None,
            }),
        });

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let ticker = tick(options.flush_interval);
        let worker = Arc::clone(&shared);
        let flusher = std::thread::Builder::new()
            .name(format!("appender-{}", worker.table_name.to_lowercase()))
            .spawn(move || {
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            if let Err(err) = worker.flush(None) {
                                warn!(table = %worker.table_name, %err, "periodic flush failed");
                            }
                        }
                    }
                }
            })?;

        debug!(table = %shared.table_name, "appender opened");
        Ok(Appender {
            shared,
            table_type: body.table_type,
            columns: Columns(body.columns),
            flusher: Some((stop_tx, flusher)),
            _conn: conn,
        })
    }

    /// Table name as reported by the server, upper case.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.shared.table_name
    }

    #[must_use]
    pub fn table_type(&self) -> TableType {
        self.table_type
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns.0
    }

    /// Buffer one record.
    pub fn append(&self, values: &[Native]) -> Result<()> {
        let tuple = wire::encode_tuple(values)?;
        self.shared.flush(Some(tuple))
    }

    /// Append to a log table with an explicit arrival time.
    pub fn append_log_time(&self, ts: DateTime<Utc>, values: &[Native]) -> Result<()> {
        if self.table_type != TableType::Log {
            return Err(Error::Unsupported(format!(
                "{} is not a log table, use append() instead",
                self.shared.table_name
            )));
        }
        let mut row = Vec::with_capacity(values.len() + 1);
        row.push(Native::Time(ts));
        row.extend_from_slice(values);
        self.append(&row)
    }

    /// Flush buffered records now.
    pub fn flush(&self) -> Result<()> {
        self.shared.flush(None)
    }

    fn stop_flusher(&mut self) {
        if let Some((stop, handle)) = self.flusher.take() {
            drop(stop);
            if handle.join().is_err() {
                warn!(table = %self.shared.table_name, "appender flusher panicked");
            }
        }
    }

    /// Flush, end the stream and return `(success_count, fail_count)`.
    ///
    /// Closing twice returns `(0, 0)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the stream's context was cancelled
    /// before close; records still buffered at that point are dropped and
    /// counted in the message. Otherwise, any error of the final flush or of
    /// the server's summary.
    pub fn close(&mut self) -> Result<(i64, i64)> {
        self.stop_flusher();
        let flushed = self.shared.flush(None);
        let (stream, aborted) = {
            let mut state = self.shared.state.lock();
            (state.stream.take(), state.aborted.take())
        };
        if let Some(reason) = aborted {
            return Err(Error::Transport(reason));
        }
        let Some(stream) = stream else {
            return Ok((0, 0));
        };
        let done = stream.close_and_recv()?;
        flushed?;
        debug!(
            table = %self.shared.table_name,
            success = done.success_count,
            fail = done.fail_count,
            "appender closed"
        );
        Ok((done.success_count, done.fail_count))
    }
}

impl Drop for Appender {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(table = %self.shared.table_name, %err, "closing dropped appender");
        }
    }
}
