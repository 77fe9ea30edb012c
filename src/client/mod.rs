//! Remote database client session.
//!
//! A [`Client`] wraps a [`Transport`] and hands out [`Conn`]ections, each
//! addressed on the server by an opaque handle. A connection runs unary RPCs
//! ([`Conn::exec`], [`Conn::query_row`], [`Conn::explain`]), opens server-side
//! cursors ([`Conn::query`] → [`Rows`]) and streaming bulk appenders
//! ([`Conn::appender`] → [`Appender`]).
//!
//! ```no_run
//! use tagflow::cancel::CancelToken;
//! use tagflow::client::{Client, Config};
//! use tagflow::testing::MockServer;
//!
//! # fn main() -> tagflow::Result<()> {
//! let server = MockServer::start();
//! let client = Client::new(Config::default().with_transport(server.transport()))?;
//! let conn = client.connect("sys", "manager")?;
//! let ctx = CancelToken::new();
//! let row = conn.query_row(&ctx, "select count(*) from example where name = ?", &tagflow::params!["query1"]);
//! let mut count = 0i64;
//! row.scan(&mut [&mut count])?;
//! conn.close()?;
//! client.close();
//! # Ok(())
//! # }
//! ```

mod appender;
mod columns;
mod rows;
mod scan;
pub mod transport;

pub use appender::{Appender, AppenderOptions};
pub use columns::{Column, Columns, DataType, TableType};
pub use rows::{RecordIter, Row, Rows};
pub use scan::{ScanTarget, scan_values};
pub use transport::{AppendStream, Transport};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::wire::{self, Native};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use transport::{ConnHandle, check_call};

/// Paths of TLS material handed to the transport as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    pub server_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

/// Session configuration.
#[derive(Clone, Default)]
pub struct Config {
    /// `tcp://host:port`, `unix:///path` or plain `host:port`.
    pub server_addr: String,
    pub tls: Option<TlsConfig>,
    /// Deadline applied to every unary RPC; zero disables it.
    pub query_timeout: Duration,
    /// Upper bound for appender streams when the caller gave none; zero disables it.
    pub append_timeout: Duration,
    /// Use this transport instead of resolving one from `server_addr`.
    pub transport: Option<Arc<dyn Transport>>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server_addr", &self.server_addr)
            .field("tls", &self.tls)
            .field("query_timeout", &self.query_timeout)
            .field("append_timeout", &self.append_timeout)
            .field("transport", &self.transport.as_ref().map(|_| "<transport>"))
            .finish()
    }
}

impl Config {
    #[must_use]
    pub fn with_server_addr(mut self, addr: impl Into<String>) -> Self {
        self.server_addr = addr.into();
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    #[must_use]
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_append_timeout(mut self, timeout: Duration) -> Self {
        self.append_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// URL scheme of `server_addr`; addresses without one are `tcp`.
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.server_addr
            .split_once("://")
            .map_or("tcp", |(scheme, _)| scheme)
    }
}

/// Builds a transport for a configuration.
pub type TransportFactory = Arc<dyn Fn(&Config) -> Result<Arc<dyn Transport>> + Send + Sync>;

static TRANSPORTS: LazyLock<RwLock<HashMap<String, TransportFactory>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Register the transport used for `scheme://` server addresses.
pub fn register_transport(scheme: &str, factory: TransportFactory) {
    TRANSPORTS.write().insert(scheme.to_string(), factory);
}

pub(crate) struct ClientInner {
    transport: Arc<dyn Transport>,
    config: Config,
    closed: AtomicBool,
}

impl ClientInner {
    /// Deadline for a unary call derived from the session's query timeout.
    fn unary(&self, ctx: &CancelToken) -> CancelToken {
        if self.config.query_timeout.is_zero() {
            ctx.clone()
        } else {
            ctx.with_timeout(self.config.query_timeout)
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::BadConn("client is closed".into()))
        } else {
            Ok(())
        }
    }
}

/// A database client. Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Client {
    pub fn new(config: Config) -> Result<Client> {
        let transport = match &config.transport {
            Some(t) => Arc::clone(t),
            None => {
                if config.server_addr.is_empty() {
                    return Err(Error::Config("server address is not specified".into()));
                }
                let scheme = config.scheme().to_string();
                let factory = TRANSPORTS.read().get(&scheme).cloned();
                match factory {
                    Some(factory) => factory(&config)?,
                    None => {
                        return Err(Error::Config(format!(
                            "no transport registered for scheme '{scheme}'"
                        )));
                    }
                }
            }
        };
        Ok(Client {
            inner: Arc::new(ClientInner {
                transport,
                config,
                closed: AtomicBool::new(false),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Check credentials without opening a connection.
    ///
    /// Rejected credentials are [`Error::Auth`] carrying the server's reason.
    pub fn user_auth(&self, user: &str, password: &str) -> Result<()> {
        self.user_auth_with(&CancelToken::new(), user, password)
    }

    /// [`Client::user_auth`] bounded by `ctx` as well as the query timeout.
    pub fn user_auth_with(&self, ctx: &CancelToken, user: &str, password: &str) -> Result<()> {
        self.inner.ensure_open()?;
        let call = self.inner.unary(ctx);
        check_call(&call)?;
        let rsp = self.inner.transport.user_auth(&call, user, password)?;
        if rsp.success {
            Ok(())
        } else {
            Err(Error::Auth(rsp.reason))
        }
    }

    /// Round-trip time of a token echoed by the server.
    pub fn ping(&self) -> Result<Duration> {
        self.inner.ensure_open()?;
        let call = self.inner.unary(&CancelToken::new());
        check_call(&call)?;
        let started = Instant::now();
        let sent = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let rsp = self.inner.transport.ping(&call, sent)?;
        if rsp.data != sent {
            return Err(Error::Transport(format!("invalid token {sent} != {}", rsp.data)));
        }
        Ok(started.elapsed())
    }

    /// Open an authenticated connection.
    pub fn connect(&self, user: &str, password: &str) -> Result<Conn> {
        self.connect_with(&CancelToken::new(), user, password)
    }

    /// [`Client::connect`] with the call bounded by `ctx`.
    ///
    /// Only the connect call sees `ctx`; the returned connection keeps the
    /// session's query timeout.
    pub fn connect_with(&self, ctx: &CancelToken, user: &str, password: &str) -> Result<Conn> {
        self.inner.ensure_open()?;
        if user.is_empty() {
            return Err(Error::Auth("no user specified".into()));
        }
        let call = self.inner.unary(ctx);
        check_call(&call)?;
        let rsp = self.inner.transport.conn(&call, user, password)?;
        if !rsp.success {
            return Err(Error::Auth(rsp.reason));
        }
        let handle = rsp
            .data
            .ok_or_else(|| Error::Server("server returned no connection handle".into()))?;
        debug!(user, handle = %handle.0, "connected");
        Ok(Conn {
            inner: Arc::new(ConnInner {
                client: Arc::clone(&self.inner),
                handle,
                user: user.to_string(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Idempotent. Connections still open afterwards fail with [`Error::BadConn`].
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!("client closed");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

pub(crate) struct ConnInner {
    client: Arc<ClientInner>,
    handle: ConnHandle,
    user: String,
    closed: AtomicBool,
}

impl ConnInner {
    fn ensure_open(&self) -> Result<()> {
        self.client.ensure_open()?;
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::BadConn("connection is closed".into()))
        } else {
            Ok(())
        }
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let call = self.client.unary(&CancelToken::new());
        let rsp = self.client.transport.conn_close(&call, &self.handle)?;
        debug!(handle = %self.handle.0, "connection closed");
        rsp.into_result()
    }
}

impl Drop for ConnInner {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(handle = %self.handle.0, %err, "closing dropped connection");
        }
    }
}

/// Outcome of [`Conn::exec`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecResult {
    pub rows_affected: i64,
    pub message: String,
}

/// An authenticated connection. Cursors and appenders opened from it keep it
/// alive until they are closed.
pub struct Conn {
    inner: Arc<ConnInner>,
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("handle", &self.inner.handle.0)
            .field("user", &self.inner.user)
            .finish()
    }
}

impl Conn {
    #[must_use]
    pub fn handle(&self) -> &str {
        &self.inner.handle.0
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.inner.user
    }

    /// Close the server-side handle. Only the first call reaches the server.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }

    pub fn explain(&self, ctx: &CancelToken, sql: &str, full: bool) -> Result<String> {
        self.inner.ensure_open()?;
        let call = self.inner.client.unary(ctx);
        check_call(&call)?;
        self.inner
            .client
            .transport
            .explain(&call, &self.inner.handle, sql, full)?
            .into_result()
    }

    pub fn exec(&self, ctx: &CancelToken, sql: &str, params: &[Native]) -> Result<ExecResult> {
        self.inner.ensure_open()?;
        let call = self.inner.client.unary(ctx);
        check_call(&call)?;
        let rsp = self
            .inner
            .client
            .transport
            .exec(&call, &self.inner.handle, sql, wire::encode_all(params)?)?;
        if !rsp.success {
            return Err(Error::server(&rsp.reason));
        }
        Ok(ExecResult {
            rows_affected: rsp.data.rows_affected,
            message: rsp.reason,
        })
    }

    /// Run a statement expected to return at most one row.
    ///
    /// Failures are carried inside the returned [`Row`].
    pub fn query_row(&self, ctx: &CancelToken, sql: &str, params: &[Native]) -> Row {
        let run = || -> Result<Row> {
            self.inner.ensure_open()?;
            let call = self.inner.client.unary(ctx);
            check_call(&call)?;
            let rsp = self.inner.client.transport.query_row(
                &call,
                &self.inner.handle,
                sql,
                wire::encode_all(params)?,
            )?;
            if !rsp.success && !rsp.reason.is_empty() {
                return Ok(Row::failed(Error::Server(rsp.reason)));
            }
            let values = rsp
                .data
                .values
                .into_iter()
                .map(wire::decode)
                .collect::<Result<Vec<_>>>()?;
            Ok(Row::new(rsp.success, values, rsp.data.rows_affected, rsp.reason))
        };
        run().unwrap_or_else(Row::failed)
    }

    /// Open a server-side cursor.
    pub fn query(&self, ctx: &CancelToken, sql: &str, params: &[Native]) -> Result<Rows> {
        self.inner.ensure_open()?;
        let call = self.inner.client.unary(ctx);
        check_call(&call)?;
        let rsp = self
            .inner
            .client
            .transport
            .query(&call, &self.inner.handle, sql, wire::encode_all(params)?)?;
        if !rsp.success {
            return Err(Error::server(&rsp.reason));
        }
        Ok(Rows::new(
            Arc::clone(&self.inner),
            ctx.clone(),
            rsp.data.rows,
            rsp.data.rows_affected,
            rsp.reason,
        ))
    }

    /// Open a streaming appender for `table`.
    pub fn appender(&self, ctx: &CancelToken, table: &str, options: AppenderOptions) -> Result<Appender> {
        self.inner.ensure_open()?;
        Appender::open(Arc::clone(&self.inner), ctx, table, options)
    }
}
