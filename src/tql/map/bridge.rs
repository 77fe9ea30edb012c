//! Named external connectors reachable from `SCRIPT` through `bridge(name)`.

use crate::cancel::CancelToken;
use crate::client::{Client, Conn};
use crate::error::{Error, Result};
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// An external system scripts can talk to.
pub trait Bridge: Send + Sync {
    fn connect(&self) -> Result<Box<dyn BridgeConn>>;
}

/// One open session of a [`Bridge`].
pub trait BridgeConn: Send {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>>;
    fn exec(&mut self, sql: &str, params: &[Value]) -> Result<i64>;
    fn close(self: Box<Self>) -> Result<()>;
}

static BRIDGES: LazyLock<RwLock<HashMap<String, Arc<dyn Bridge>>>> = LazyLock::new(Default::default);

/// Make `bridge` available to scripts as `bridge(name)`. Replaces an earlier
/// registration of the same name.
pub fn register_bridge(name: &str, bridge: Arc<dyn Bridge>) {
    BRIDGES.write().insert(name.to_string(), bridge);
}

pub fn unregister_bridge(name: &str) -> bool {
    BRIDGES.write().remove(name).is_some()
}

pub(crate) fn lookup(name: &str) -> Result<Arc<dyn Bridge>> {
    BRIDGES
        .read()
        .get(name)
        .cloned()
        .ok_or_else(|| Error::pipeline("f(bridge)", format!("bridge '{name}' not found")))
}

/// A connected bridge as seen by a script.
#[derive(Clone)]
pub struct BridgeHandle {
    name: String,
    conn: Arc<Mutex<Option<Box<dyn BridgeConn>>>>,
}

impl fmt::Debug for BridgeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bridge:{}", self.name)
    }
}

impl BridgeHandle {
    pub(crate) fn new(name: &str, conn: Box<dyn BridgeConn>) -> Self {
        Self {
            name: name.to_string(),
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut dyn BridgeConn) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::pipeline("bridge", format!("'{}' is closed", self.name)))?;
        f(conn.as_mut())
    }

    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        self.with_conn(|c| c.query(sql, params))
    }

    pub fn exec(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.with_conn(|c| c.exec(sql, params))
    }

    /// Close the session. Later calls are no-ops.
    pub fn close(&self) -> Result<()> {
        let conn = self.conn.lock().take();
        match conn {
            Some(conn) => {
                debug!(bridge = %self.name, "bridge closed");
                conn.close()
            }
            None => Ok(()),
        }
    }
}

/// A bridge to a second database reached through its own [`Client`].
pub struct SqlBridge {
    client: Client,
    user: String,
    password: String,
}

impl SqlBridge {
    pub fn new(client: Client, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client,
            user: user.into(),
            password: password.into(),
        }
    }
}

impl Bridge for SqlBridge {
    fn connect(&self) -> Result<Box<dyn BridgeConn>> {
        let conn = self.client.connect(&self.user, &self.password)?;
        Ok(Box::new(SqlBridgeConn { conn }))
    }
}

struct SqlBridgeConn {
    conn: Conn,
}

fn natives(params: &[Value]) -> Result<Vec<crate::wire::Native>> {
    params.iter().map(Value::to_native).collect()
}

impl BridgeConn for SqlBridgeConn {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        let rows = self.conn.query(&CancelToken::new(), sql, &natives(params)?)?;
        rows.into_records()
            .map(|r| r.map(|values| values.into_iter().map(Value::from).collect()))
            .collect()
    }

    fn exec(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        let result = self.conn.exec(&CancelToken::new(), sql, &natives(params)?)?;
        Ok(result.rows_affected)
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.conn.close()
    }
}
