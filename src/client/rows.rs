use super::scan::{ScanTarget, scan_values};
use super::transport::RowsHandle;
use super::{Columns, ConnInner};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::wire::{self, Native};
use std::sync::Arc;
use tracing::warn;

/// Result of [`super::Conn::query_row`].
#[derive(Debug, Clone)]
pub struct Row {
    success: bool,
    err: Option<Error>,
    values: Vec<Native>,
    rows_affected: i64,
    message: String,
}

impl Row {
    pub(crate) fn new(success: bool, values: Vec<Native>, rows_affected: i64, message: String) -> Self {
        Self {
            success,
            err: None,
            values,
            rows_affected,
            message,
        }
    }

    pub(crate) fn failed(err: Error) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            err: Some(err),
            values: Vec::new(),
            rows_affected: 0,
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.success
    }

    #[must_use]
    pub fn err(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    #[must_use]
    pub fn values(&self) -> &[Native] {
        &self.values
    }

    #[must_use]
    pub fn rows_affected(&self) -> i64 {
        self.rows_affected
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Fill destinations from the row. A row that was not found yields
    /// [`Error::NoRows`].
    pub fn scan(&self, dst: &mut [&mut dyn ScanTarget]) -> Result<()> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        if !self.success {
            return Err(Error::NoRows);
        }
        scan_values(&self.values, dst)
    }
}

/// A server-side cursor.
///
/// `next` advances, `scan` reads the current row. Errors met while fetching
/// are sticky. The cursor is released on `close` or drop, at most once.
pub struct Rows {
    conn: Arc<ConnInner>,
    ctx: CancelToken,
    handle: Option<RowsHandle>,
    columns: Option<Columns>,
    current: Option<Vec<Native>>,
    err: Option<Error>,
    exhausted: bool,
    closed: bool,
    rows_affected: i64,
    message: String,
}

impl Rows {
    pub(crate) fn new(
        conn: Arc<ConnInner>,
        ctx: CancelToken,
        handle: Option<RowsHandle>,
        rows_affected: i64,
        message: String,
    ) -> Self {
        Self {
            conn,
            ctx,
            handle,
            columns: None,
            current: None,
            err: None,
            exhausted: false,
            closed: false,
            rows_affected,
            message,
        }
    }

    /// `false` for statements that produced no result set (DDL, DML).
    #[must_use]
    pub fn is_fetchable(&self) -> bool {
        self.handle.is_some()
    }

    #[must_use]
    pub fn rows_affected(&self) -> i64 {
        self.rows_affected
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Column schema, fetched once and cached.
    pub fn columns(&mut self) -> Result<Columns> {
        if let Some(cols) = &self.columns {
            return Ok(cols.clone());
        }
        let Some(handle) = &self.handle else {
            return Ok(Columns::default());
        };
        self.conn.ensure_open()?;
        let call = self.conn.client.unary(&self.ctx);
        let rsp = self.conn.client.transport.columns(&call, handle)?;
        if !rsp.success {
            return Err(Error::server(&rsp.reason));
        }
        let cols = Columns(rsp.data);
        self.columns = Some(cols.clone());
        Ok(cols)
    }

    /// Advance to the next row. `false` at the end, after `close`, or once an
    /// error has been recorded.
    pub fn next(&mut self) -> bool {
        if self.closed || self.exhausted || self.err.is_some() {
            self.current = None;
            return false;
        }
        let Some(handle) = self.handle.clone() else {
            self.exhausted = true;
            return false;
        };
        match self.fetch(&handle) {
            Ok(Some(values)) => {
                self.current = Some(values);
                true
            }
            Ok(None) => {
                self.exhausted = true;
                self.current = None;
                false
            }
            Err(err) => {
                self.err = Some(err);
                self.current = None;
                false
            }
        }
    }

    fn fetch(&self, handle: &RowsHandle) -> Result<Option<Vec<Native>>> {
        self.conn.ensure_open()?;
        if self.ctx.is_cancelled() {
            return Err(Error::Transport("call cancelled".into()));
        }
        let call = self.conn.client.unary(&self.ctx);
        let rsp = self.conn.client.transport.rows_fetch(&call, handle)?;
        if !rsp.success {
            return Err(Error::server(&rsp.reason));
        }
        if rsp.data.has_no_rows {
            return Ok(None);
        }
        let values = rsp
            .data
            .values
            .into_iter()
            .map(wire::decode)
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(values))
    }

    /// The sticky error, if any.
    #[must_use]
    pub fn err(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    /// Values of the current row.
    #[must_use]
    pub fn values(&self) -> Option<&[Native]> {
        self.current.as_deref()
    }

    /// Fill destinations from the current row.
    pub fn scan(&self, dst: &mut [&mut dyn ScanTarget]) -> Result<()> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        let Some(values) = &self.current else {
            return Err(Error::NoRows);
        };
        if let Some(cols) = &self.columns {
            if cols.len() != values.len() {
                return Err(Error::Decode(format!(
                    "column count mismatch {} != {}",
                    values.len(),
                    cols.len()
                )));
            }
        }
        scan_values(values, dst)
    }

    /// Release the server-side cursor. Later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.current = None;
        let Some(handle) = &self.handle else {
            return Ok(());
        };
        let call = self.conn.client.unary(&CancelToken::new());
        self.conn
            .client
            .transport
            .rows_close(&call, handle)?
            .into_result()
    }

    /// Consume the cursor as an iterator of rows.
    #[must_use]
    pub fn into_records(self) -> RecordIter {
        RecordIter { rows: self }
    }
}

impl Drop for Rows {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(%err, "closing dropped rows");
        }
    }
}

/// Iterator form of [`Rows`]; yields the sticky error once, then ends.
pub struct RecordIter {
    rows: Rows,
}

impl RecordIter {
    pub fn columns(&mut self) -> Result<Columns> {
        self.rows.columns()
    }
}

impl Iterator for RecordIter {
    type Item = Result<Vec<Native>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rows.next() {
            return self.rows.current.take().map(Ok);
        }
        if let Some(err) = self.rows.err.take() {
            // A taken error must not be reported twice.
            self.rows.exhausted = true;
            return Some(Err(err));
        }
        if let Err(err) = self.rows.close() {
            return Some(Err(err));
        }
        None
    }
}
