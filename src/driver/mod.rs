//! Generic SQL driver shape and its adapter over the client session.
//!
//! The traits mirror the usual `open → connect → prepare/query/exec` driver
//! contract so higher layers can stay backend-agnostic. [`NeoDriver`] is the
//! implementation over [`crate::client`]. Transactions are accepted as no-ops:
//! `commit` succeeds and `rollback` is [`Error::Unsupported`].
//!
//! ```no_run
//! use tagflow::driver::{Driver, DriverConfig, NeoDriver, register_alias};
//! use tagflow::testing::MockServer;
//!
//! # fn main() -> tagflow::Result<()> {
//! let server = MockServer::start();
//! register_alias("mock", DriverConfig::with_transport(server.transport(), "sys", "manager"));
//! let db = NeoDriver::default().open("mock")?;
//! let mut rows = db.query("select * from tag_data where name = ?", &tagflow::params!["query1"])?;
//! while let Some(row) = rows.next()? {
//!     println!("{row:?}");
//! }
//! rows.close()?;
//! # Ok(())
//! # }
//! ```

mod dsn;

pub use dsn::Dsn;

use crate::cancel::CancelToken;
use crate::client::{Client, Config, Conn, Rows, TlsConfig, Transport};
use crate::error::{Error, Result};
use crate::wire::Native;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::debug;

/// Entry point of a driver.
pub trait Driver {
    fn open(&self, dsn: &str) -> Result<Box<dyn Connection>>;

    /// Validate the DSN and credentials once; connections come from the connector.
    fn open_connector(&self, dsn: &str) -> Result<Box<dyn Connector>>;
}

pub trait Connector: Send + Sync {
    fn connect(&self, ctx: &CancelToken) -> Result<Box<dyn Connection>>;
}

pub trait Connection: Send {
    fn prepare(&self, sql: &str) -> Result<Box<dyn Statement + '_>>;
    fn query(&self, sql: &str, args: &[Native]) -> Result<Box<dyn DriverRows>>;
    fn exec(&self, sql: &str, args: &[Native]) -> Result<Box<dyn ExecOutcome>>;
    fn begin(&self) -> Result<Box<dyn Transaction>>;
    fn ping(&self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

pub trait Statement {
    /// Number of placeholders, `-1` when unknown.
    fn num_input(&self) -> i32;
    fn query(&self, args: &[Native]) -> Result<Box<dyn DriverRows>>;
    fn exec(&self, args: &[Native]) -> Result<Box<dyn ExecOutcome>>;
    fn close(&mut self) -> Result<()>;
}

pub trait Transaction {
    fn commit(self: Box<Self>) -> Result<()>;
    fn rollback(self: Box<Self>) -> Result<()>;
}

pub trait DriverRows: Send {
    fn columns(&mut self) -> Result<Vec<String>>;
    /// `None` at the end of the result set.
    fn next(&mut self) -> Result<Option<Vec<Native>>>;
    fn close(&mut self) -> Result<()>;
}

pub trait ExecOutcome {
    fn last_insert_id(&self) -> Result<i64>;
    fn rows_affected(&self) -> Result<i64>;
}

/// Pre-built configuration registered under an alias.
#[derive(Clone, Debug, Default)]
pub struct DriverConfig {
    pub config: Config,
    pub user: String,
    pub password: String,
}

impl DriverConfig {
    #[must_use]
    pub fn with_transport(transport: Arc<dyn Transport>, user: &str, password: &str) -> Self {
        Self {
            config: Config::default().with_transport(transport),
            user: user.to_string(),
            password: password.to_string(),
        }
    }
}

static ALIASES: LazyLock<RwLock<HashMap<String, DriverConfig>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Register `name` so that opening it bypasses DSN parsing.
pub fn register_alias(name: &str, config: DriverConfig) {
    ALIASES.write().insert(name.to_string(), config);
}

pub fn unregister_alias(name: &str) {
    ALIASES.write().remove(name);
}

/// Driver defaults; values in the DSN override them.
#[derive(Clone, Debug, Default)]
pub struct NeoDriver {
    pub server_addr: String,
    pub tls: Option<TlsConfig>,
    pub user: String,
    pub password: String,
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

impl NeoDriver {
    fn resolve(&self, dsn: &str) -> Result<DriverConfig> {
        if let Some(found) = ALIASES.read().get(dsn) {
            return Ok(found.clone());
        }
        let mut resolved = DriverConfig {
            config: Config::default().with_server_addr(self.server_addr.clone()),
            user: self.user.clone(),
            password: self.password.clone(),
        };
        resolved.config.tls = self.tls.clone();
        if !dsn.trim().is_empty() {
            let parsed = Dsn::parse(dsn)?;
            resolved.config = parsed.config();
            if parsed.tls.is_none() {
                resolved.config.tls = self.tls.clone();
            }
            if let Some(user) = parsed.user {
                resolved.user = user;
            }
            if let Some(password) = parsed.password {
                resolved.password = password;
            }
        }
        Ok(resolved)
    }
}

impl Driver for NeoDriver {
    fn open(&self, dsn: &str) -> Result<Box<dyn Connection>> {
        let resolved = self.resolve(dsn)?;
        let client = Client::new(resolved.config)?;
        let ctx = CancelToken::new().with_timeout(CONNECT_TIMEOUT);
        let conn = client.connect_with(&ctx, &resolved.user, &resolved.password)?;
        Ok(Box::new(NeoConnection::new(Some(client), conn)))
    }

    fn open_connector(&self, dsn: &str) -> Result<Box<dyn Connector>> {
        let resolved = self.resolve(dsn)?;
        let client = Client::new(resolved.config)?;
        let ctx = CancelToken::new().with_timeout(CONNECT_TIMEOUT);
        client.user_auth_with(&ctx, &resolved.user, &resolved.password)?;
        Ok(Box::new(NeoConnector {
            client,
            user: resolved.user,
            password: resolved.password,
        }))
    }
}

pub struct NeoConnector {
    client: Client,
    user: String,
    password: String,
}

impl Connector for NeoConnector {
    fn connect(&self, ctx: &CancelToken) -> Result<Box<dyn Connection>> {
        let conn = self.client.connect_with(ctx, &self.user, &self.password)?;
        Ok(Box::new(NeoConnection::new(None, conn)))
    }
}

pub struct NeoConnection {
    /// Set when the connection was opened directly and owns its client.
    client: Option<Client>,
    conn: Option<Conn>,
}

impl NeoConnection {
    fn new(client: Option<Client>, conn: Conn) -> Self {
        debug!(handle = conn.handle(), "driver connection opened");
        Self {
            client,
            conn: Some(conn),
        }
    }

    fn conn(&self) -> Result<&Conn> {
        self.conn
            .as_ref()
            .ok_or_else(|| Error::BadConn("connection is closed".into()))
    }
}

impl Connection for NeoConnection {
    fn prepare(&self, sql: &str) -> Result<Box<dyn Statement + '_>> {
        self.conn()?;
        Ok(Box::new(NeoStatement { conn: self, sql: sql.to_string() }))
    }

    fn query(&self, sql: &str, args: &[Native]) -> Result<Box<dyn DriverRows>> {
        let rows = self.conn()?.query(&CancelToken::new(), sql, args)?;
        Ok(Box::new(NeoRows { rows }))
    }

    fn exec(&self, sql: &str, args: &[Native]) -> Result<Box<dyn ExecOutcome>> {
        let result = self.conn()?.exec(&CancelToken::new(), sql, args)?;
        Ok(Box::new(NeoResult {
            rows_affected: result.rows_affected,
        }))
    }

    fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.conn()?;
        Ok(Box::new(NeoTx))
    }

    /// Always succeeds; the session keeps its own connection state.
    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        let closed = conn.close();
        if let Some(client) = &self.client {
            client.close();
        }
        closed
    }
}

impl Drop for NeoConnection {
    fn drop(&mut self) {
        // Conn closes itself on drop; only the client is left.
        if let Some(client) = &self.client {
            client.close();
        }
    }
}

pub struct NeoStatement<'c> {
    conn: &'c NeoConnection,
    sql: String,
}

impl Statement for NeoStatement<'_> {
    fn num_input(&self) -> i32 {
        -1
    }

    fn query(&self, args: &[Native]) -> Result<Box<dyn DriverRows>> {
        self.conn.query(&self.sql, args)
    }

    fn exec(&self, args: &[Native]) -> Result<Box<dyn ExecOutcome>> {
        self.conn.exec(&self.sql, args)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct NeoTx;

impl Transaction for NeoTx {
    fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        Err(Error::Unsupported("rollback is not supported".into()))
    }
}

pub struct NeoRows {
    rows: Rows,
}

impl DriverRows for NeoRows {
    fn columns(&mut self) -> Result<Vec<String>> {
        Ok(self.rows.columns()?.names())
    }

    fn next(&mut self) -> Result<Option<Vec<Native>>> {
        if self.rows.next() {
            return Ok(self.rows.values().map(<[Native]>::to_vec));
        }
        match self.rows.err() {
            Some(err) => Err(err.clone()),
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.rows.close()
    }
}

pub struct NeoResult {
    rows_affected: i64,
}

impl ExecOutcome for NeoResult {
    fn last_insert_id(&self) -> Result<i64> {
        Err(Error::Unsupported("LastInsertId is not supported".into()))
    }

    fn rows_affected(&self) -> Result<i64> {
        Ok(self.rows_affected)
    }
}
