//! The RPC contract between a [`super::Client`] and the database server.
//!
//! Concrete encodings live outside this crate; anything that can answer these
//! calls can back a session. [`crate::testing::MockServer`] answers them in
//! process.

use super::{Column, TableType};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::wire::{Datum, Envelope};

/// Server-assigned connection handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnHandle(pub String);

/// Server-side cursor handle and the connection that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowsHandle {
    pub id: String,
    pub conn: ConnHandle,
}

/// Server-side appender handle and the connection that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppenderHandle {
    pub id: String,
    pub conn: ConnHandle,
}

/// Framing carried by every response.
#[derive(Debug, Clone, Default)]
pub struct Reply<T> {
    pub success: bool,
    pub reason: String,
    pub elapse: String,
    pub data: T,
}

impl<T> Reply<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            reason: "success".to_string(),
            elapse: String::new(),
            data,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self
    where
        T: Default,
    {
        Self {
            success: false,
            reason: reason.into(),
            elapse: String::new(),
            data: T::default(),
        }
    }

    #[must_use]
    pub fn elapsed(mut self, elapse: impl Into<String>) -> Self {
        self.elapse = elapse.into();
        self
    }

    /// Payload of a successful reply, otherwise [`Error::Server`].
    pub fn into_result(self) -> Result<T> {
        if self.success {
            Ok(self.data)
        } else {
            Err(Error::server(&self.reason))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecBody {
    pub rows_affected: i64,
}

#[derive(Debug, Clone, Default)]
pub struct QueryRowBody {
    pub values: Vec<Envelope>,
    pub rows_affected: i64,
}

#[derive(Debug, Clone, Default)]
pub struct QueryBody {
    /// `None` when the statement produced no result set.
    pub rows: Option<RowsHandle>,
    pub rows_affected: i64,
}

#[derive(Debug, Clone, Default)]
pub struct FetchBody {
    pub has_no_rows: bool,
    pub values: Vec<Envelope>,
}

#[derive(Debug, Clone, Default)]
pub struct AppenderBody {
    pub handle: Option<AppenderHandle>,
    pub table_name: String,
    pub table_type: TableType,
    pub columns: Vec<Column>,
}

/// One batch on the append stream.
#[derive(Debug, Clone)]
pub struct AppendData {
    pub handle: AppenderHandle,
    pub records: Vec<Vec<Datum>>,
}

/// Final answer of an append stream.
#[derive(Debug, Clone, Default)]
pub struct AppendDone {
    pub success_count: i64,
    pub fail_count: i64,
    pub elapse: String,
    pub reason: String,
}

/// Client side of the client-streaming `Append` RPC.
pub trait AppendStream: Send {
    fn send(&mut self, data: AppendData) -> Result<()>;

    /// Signal end of stream and wait for the counts.
    fn close_and_recv(self: Box<Self>) -> Result<AppendDone>;
}

/// Unary RPCs plus the append stream. Transport failures are reported as
/// [`Error::Transport`]; server-side failures travel in [`Reply`].
pub trait Transport: Send + Sync {
    fn user_auth(&self, call: &CancelToken, user: &str, password: &str) -> Result<Reply<()>>;

    /// The server echoes `token` back.
    fn ping(&self, call: &CancelToken, token: i64) -> Result<Reply<i64>>;

    fn conn(&self, call: &CancelToken, user: &str, password: &str) -> Result<Reply<Option<ConnHandle>>>;

    fn conn_close(&self, call: &CancelToken, conn: &ConnHandle) -> Result<Reply<()>>;

    fn explain(&self, call: &CancelToken, conn: &ConnHandle, sql: &str, full: bool) -> Result<Reply<String>>;

    fn exec(&self, call: &CancelToken, conn: &ConnHandle, sql: &str, params: Vec<Envelope>) -> Result<Reply<ExecBody>>;

    fn query_row(
        &self,
        call: &CancelToken,
        conn: &ConnHandle,
        sql: &str,
        params: Vec<Envelope>,
    ) -> Result<Reply<QueryRowBody>>;

    fn query(&self, call: &CancelToken, conn: &ConnHandle, sql: &str, params: Vec<Envelope>) -> Result<Reply<QueryBody>>;

    fn columns(&self, call: &CancelToken, rows: &RowsHandle) -> Result<Reply<Vec<Column>>>;

    fn rows_fetch(&self, call: &CancelToken, rows: &RowsHandle) -> Result<Reply<FetchBody>>;

    fn rows_close(&self, call: &CancelToken, rows: &RowsHandle) -> Result<Reply<()>>;

    fn appender(&self, call: &CancelToken, conn: &ConnHandle, table: &str) -> Result<Reply<AppenderBody>>;

    fn append(&self, call: &CancelToken) -> Result<Box<dyn AppendStream>>;
}

/// Fail fast when the caller already gave up.
pub(crate) fn check_call(call: &CancelToken) -> Result<()> {
    if call.is_expired() {
        Err(Error::Transport("deadline exceeded".into()))
    } else if call.is_cancelled() {
        Err(Error::Transport("call cancelled".into()))
    } else {
        Ok(())
    }
}
