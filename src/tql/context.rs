//! Per-stage state and the records that flow between stages.

use crate::cancel::CancelToken;
use crate::client::{Client, Columns, Conn};
use crate::error::{Error, Result};
use crate::expr::Parameters;
use crate::metrics::StageStats;
use crate::value::{Object, Value};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Named pipeline parameters; `$name` resolves to the last element.
pub type Params = HashMap<String, Vec<String>>;

type Closer = Box<dyn FnOnce() -> Result<()> + Send>;

/// Execution environment of one map stage.
pub struct Context {
    name: String,
    line: usize,
    params: Arc<Params>,
    cancel: CancelToken,
    debug: bool,
    database: Option<Database>,
    nrow: AtomicUsize,
    current_key: Mutex<Option<Value>>,
    buffer: Mutex<Vec<(Value, Vec<Value>)>>,
    values: Mutex<HashMap<String, Value>>,
    closers: Mutex<Vec<(u64, Closer)>>,
    closer_seq: AtomicU64,
    cache: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
    stats: Arc<StageStats>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("line", &self.line)
            .field("nrow", &self.nrow())
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            stats: Arc::new(StageStats::new(&name)),
            name,
            line: 0,
            params: Arc::default(),
            cancel: CancelToken::new(),
            debug: false,
            database: None,
            nrow: AtomicUsize::new(0),
            current_key: Mutex::new(None),
            buffer: Mutex::new(Vec::new()),
            values: Mutex::new(HashMap::new()),
            closers: Mutex::new(Vec::new()),
            closer_seq: AtomicU64::new(0),
            cache: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: Arc<Params>) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_database(mut self, database: Option<Database>) -> Self {
        self.database = database;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn line(&self) -> usize {
        self.line
    }

    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Number of inputs received so far, counting the current one.
    #[must_use]
    pub fn nrow(&self) -> usize {
        self.nrow.load(Ordering::SeqCst)
    }

    pub(crate) fn incr_nrow(&self) -> usize {
        self.nrow.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(|v| v.last()).map(String::as_str)
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn database(&self) -> Result<&Database> {
        self.database
            .as_ref()
            .ok_or_else(|| Error::pipeline(self.name.as_str(), "no database is configured"))
    }

    pub(crate) fn stats(&self) -> &Arc<StageStats> {
        &self.stats
    }

    /// Replace the current group key, returning the previous one.
    pub fn swap_current_key(&self, key: Value) -> Option<Value> {
        self.current_key.lock().replace(key)
    }

    /// Append `value` to the buffer of `key`, keeping keys in first-seen order.
    pub fn buffer(&self, key: Value, value: Value) {
        let mut buffer = self.buffer.lock();
        match buffer.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => buffer.push((key, vec![value])),
        }
    }

    /// Remove and return the buffered values of `key`.
    pub fn take_buffer(&self, key: &Value) -> Option<Vec<Value>> {
        let mut buffer = self.buffer.lock();
        let idx = buffer.iter().position(|(k, _)| k == key)?;
        Some(buffer.remove(idx).1)
    }

    /// Remove every buffer in insertion order.
    pub(crate) fn drain_buffers(&self) -> Vec<(Value, Vec<Value>)> {
        std::mem::take(&mut *self.buffer.lock())
    }

    /// User-level value set by scripts.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.lock().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.values.lock().insert(name.to_string(), value);
    }

    /// Register a release action run when the stage stops; returns its id.
    pub fn lazy_close<F>(&self, closer: F) -> u64
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let id = self.closer_seq.fetch_add(1, Ordering::SeqCst);
        self.closers.lock().push((id, Box::new(closer)));
        id
    }

    /// Forget a registered closer without running it.
    pub fn cancel_close(&self, id: u64) -> bool {
        let mut closers = self.closers.lock();
        match closers.iter().position(|(i, _)| *i == id) {
            Some(idx) => {
                drop(closers.remove(idx));
                true
            }
            None => false,
        }
    }

    /// Run closers last-registered first. The list is detached before any runs.
    pub(crate) fn run_closers(&self) {
        let closers = std::mem::take(&mut *self.closers.lock());
        for (id, closer) in closers.into_iter().rev() {
            if let Err(err) = closer() {
                warn!(stage = %self.name, id, %err, "closer failed");
            }
        }
    }

    /// Value built once per stage and reused for every input.
    pub fn cached<T, F>(&self, init: F) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T>,
    {
        let mut slot = self.cache.lock();
        if let Some(found) = slot.as_ref().and_then(|a| Arc::clone(a).downcast::<T>().ok()) {
            return Ok(found);
        }
        let built = Arc::new(init()?);
        *slot = Some(Arc::clone(&built) as Arc<dyn Any + Send + Sync>);
        Ok(built)
    }
}

/// The pipeline's datum: a key, a value and the stage it is flowing through.
#[derive(Clone)]
pub struct Param {
    pub ctx: Option<Arc<Context>>,
    pub k: Value,
    pub v: Value,
}

impl Param {
    pub fn new(k: impl Into<Value>, v: impl Into<Value>) -> Self {
        Self {
            ctx: None,
            k: k.into(),
            v: v.into(),
        }
    }

    #[must_use]
    pub fn with_ctx(mut self, ctx: Arc<Context>) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// `[K, V...]` rows as a sink receives them. A matrix value gives one
    /// row per inner sequence.
    #[must_use]
    pub fn into_rows(self) -> Vec<Vec<Value>> {
        let Param { k, v, .. } = self;
        match v {
            Value::List(items) => {
                let mut row = Vec::with_capacity(items.len() + 1);
                row.push(k);
                row.extend(items);
                vec![row]
            }
            Value::Matrix(rows) => rows
                .into_iter()
                .map(|inner| {
                    let mut row = Vec::with_capacity(inner.len() + 1);
                    row.push(k.clone());
                    row.extend(inner);
                    row
                })
                .collect(),
            other => vec![vec![k, other]],
        }
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Param").field("k", &self.k).field("v", &self.v).finish()
    }
}

impl PartialEq for Param {
    fn eq(&self, other: &Self) -> bool {
        self.k == other.k && self.v.to_string() == other.v.to_string()
    }
}

impl Parameters for Param {
    fn get(&self, name: &str) -> Result<Value> {
        match name {
            "K" => Ok(self.k.clone()),
            "V" => Ok(self.v.clone()),
            "P" => Ok(Value::object(self.clone())),
            "CTX" => self
                .ctx
                .as_ref()
                .map(|ctx| Value::Object(Object::from_arc(Arc::clone(ctx))))
                .ok_or_else(|| Error::UndefinedVariable(name.to_string())),
            _ => {
                if let Some(key) = name.strip_prefix('$')
                    && let Some(found) = self.ctx.as_ref().and_then(|c| c.param(key))
                {
                    return Ok(Value::Str(found.to_string()));
                }
                Err(Error::UndefinedVariable(name.to_string()))
            }
        }
    }
}

/// Parameters available while compiling sources and sinks: only `$name`.
pub(crate) struct CompileParams<'a>(pub &'a Params);

impl Parameters for CompileParams<'_> {
    fn get(&self, name: &str) -> Result<Value> {
        name.strip_prefix('$')
            .and_then(|key| self.0.get(key))
            .and_then(|v| v.last())
            .map(|s| Value::Str(s.clone()))
            .ok_or_else(|| Error::UndefinedVariable(name.to_string()))
    }
}

/// Control results a map function may return instead of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stop this stage.
    Eof,
    /// End the whole pipeline early, without error.
    CircuitBreak,
}

/// A message on a stage input or on the sink channel.
#[derive(Debug)]
pub enum Record {
    Header(Columns),
    Data(Param),
    CircuitBreak,
    Error(Error),
    Eof,
}

/// Shared database access for one pipeline: a single connection opened on
/// first use and released when the run ends.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    client: Client,
    user: String,
    password: String,
    conn: Mutex<Option<Arc<Conn>>>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database").field("user", &self.inner.user).finish_non_exhaustive()
    }
}

impl Database {
    pub fn new(client: Client, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                client,
                user: user.into(),
                password: password.into(),
                conn: Mutex::new(None),
            }),
        }
    }

    /// The pipeline's connection, opened on first call.
    pub fn conn(&self) -> Result<Arc<Conn>> {
        let mut slot = self.inner.conn.lock();
        if let Some(conn) = slot.as_ref() {
            return Ok(Arc::clone(conn));
        }
        let conn = Arc::new(self.inner.client.connect(&self.inner.user, &self.inner.password)?);
        debug!(handle = conn.handle(), "pipeline connection opened");
        *slot = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Close the shared connection if one was opened.
    pub fn release(&self) -> Result<()> {
        let conn = self.inner.conn.lock().take();
        match conn {
            Some(conn) => conn.close(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn closers_run_last_in_first_out() {
        let ctx = Context::new("TEST");
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            ctx.lazy_close(move || {
                order.lock().push(i);
                Ok(())
            });
        }
        ctx.run_closers();
        assert_eq!(*order.lock(), vec![2, 1, 0]);
        ctx.run_closers();
        assert_eq!(order.lock().len(), 3);
    }

    #[test]
    fn cancelled_closer_does_not_run() {
        let ctx = Context::new("TEST");
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let id = ctx.lazy_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(ctx.cancel_close(id));
        assert!(!ctx.cancel_close(id));
        ctx.run_closers();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn buffers_keep_insertion_order() {
        let ctx = Context::new("GROUPBYKEY");
        ctx.buffer("b".into(), 1.into());
        ctx.buffer("a".into(), 2.into());
        ctx.buffer("b".into(), 3.into());
        assert_eq!(ctx.take_buffer(&"b".into()), Some(vec![1.into(), 3.into()]));
        let rest = ctx.drain_buffers();
        assert_eq!(rest, vec![(Value::from("a"), vec![Value::from(2)])]);
    }

    #[test]
    fn param_lookup() {
        let mut params = Params::new();
        params.insert("limit".into(), vec!["1".into(), "5".into()]);
        let ctx = Arc::new(Context::new("FILTER").with_params(Arc::new(params)));
        let p = Param::new("k", 1.5).with_ctx(ctx);
        assert_eq!(p.get("K").unwrap(), Value::from("k"));
        assert_eq!(p.get("V").unwrap(), Value::Float(1.5));
        assert_eq!(p.get("$limit").unwrap(), Value::from("5"));
        assert!(p.get("CTX").unwrap().downcast_ref::<Context>().is_some());
        assert!(matches!(p.get("$missing"), Err(Error::UndefinedVariable(_))));
        assert!(matches!(p.get("X"), Err(Error::UndefinedVariable(_))));
    }

    #[test]
    fn param_equality_uses_value_text() {
        assert_eq!(Param::new(1, 2), Param::new(1.0, "2"));
        assert_ne!(Param::new(1, 2), Param::new(2, 2));
    }

    #[test]
    fn matrix_values_become_rows() {
        let p = Param::new(
            "k",
            Value::Matrix(vec![vec![1.into(), 2.into()], vec![3.into(), 4.into()]]),
        );
        let rows = p.into_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec![Value::from("k"), 3.into(), 4.into()]);
    }

    #[test]
    fn cached_value_is_built_once() {
        let ctx = Context::new("SCRIPT");
        let built = AtomicUsize::new(0);
        for _ in 0..3 {
            let v = ctx
                .cached(|| {
                    built.fetch_add(1, Ordering::SeqCst);
                    Ok(String::from("compiled"))
                })
                .unwrap();
            assert_eq!(v.as_str(), "compiled");
        }
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }
}
