//! An in-process database server answering the client RPC contract.
//!
//! The server knows a handful of canned statements and keeps track of every
//! handle it gives out. [`MockServer::stop`] panics when connection or rows
//! handles are still open, which makes handle leaks fail the test that
//! caused them.

use crate::cancel::CancelToken;
use crate::client::transport::{
    AppendData, AppendDone, AppendStream, AppenderBody, AppenderHandle, ConnHandle, ExecBody,
    FetchBody, QueryBody, QueryRowBody, Reply, RowsHandle, check_call,
};
use crate::client::{Column, DataType, TableType, Transport};
use crate::error::Result;
use crate::wire::{self, Envelope, Native};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const ELAPSE: &str = "1ms.";

/// A canned result set.
#[derive(Debug, Clone)]
pub struct MockResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Native>>,
    /// When set, the first bound parameter must equal this value.
    pub expect_param: Option<Native>,
}

struct MockRows {
    result: Arc<MockResult>,
    pos: usize,
}

struct MockAppender {
    table: String,
}

#[derive(Default)]
struct MockState {
    counter: u64,
    conns: HashMap<String, ()>,
    rows: HashMap<String, MockRows>,
    appenders: HashMap<String, MockAppender>,
    appended: HashMap<String, Vec<Vec<Native>>>,
    batches: HashMap<String, Vec<usize>>,
    calls: Vec<(&'static str, Option<Duration>)>,
    executed: Vec<(String, Vec<Native>)>,
}

impl MockState {
    fn next_id(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }
}

/// In-process server. Create with [`MockServer::start`].
pub struct MockServer {
    state: Arc<Mutex<MockState>>,
    queries: Mutex<HashMap<String, Arc<MockResult>>>,
    query_rows: Mutex<HashMap<String, Option<Vec<Native>>>>,
    execs: Mutex<HashMap<String, (i64, String)>>,
    table_types: Mutex<HashMap<String, TableType>>,
}

impl MockServer {
    /// A server with the stock test cases:
    ///
    /// - user `sys` / password `manager`
    /// - `select count(*) from example where name = ?` → one row `[123i64]`
    /// - `select * from example where name = ?` and `select * from tag_data where name = ?`
    ///   with parameter `query1` → columns `name varchar, time datetime, value double`,
    ///   one row `["tag", unix(0, 1), 3.14]`
    /// - `insert into example (name, time, value) values(?, ?, ?)` → one row affected
    /// - `select * from dummy` explains as `explain dummy result`
    #[must_use]
    pub fn start() -> Arc<MockServer> {
        let server = MockServer {
            state: Arc::new(Mutex::new(MockState::default())),
            queries: Mutex::new(HashMap::new()),
            query_rows: Mutex::new(HashMap::new()),
            execs: Mutex::new(HashMap::new()),
            table_types: Mutex::new(HashMap::new()),
        };
        let tag_rows = MockResult {
            columns: vec![
                Column { name: "name".into(), data_type: DataType::Varchar, length: 40 },
                Column { name: "time".into(), data_type: DataType::Datetime, length: 8 },
                Column { name: "value".into(), data_type: DataType::Double, length: 8 },
            ],
            rows: vec![vec![
                Native::Str("tag".into()),
                Native::Time(Native::time_from_nanos(1)),
                Native::F64(3.14),
            ]],
            expect_param: Some(Native::Str("query1".into())),
        };
        server.register_query("select * from example where name = ?", tag_rows.clone());
        server.register_query("select * from tag_data where name = ?", tag_rows);
        server.register_query_row(
            "select count(*) from example where name = ?",
            Some(vec![Native::I64(123)]),
        );
        server.register_exec(
            "insert into example (name, time, value) values(?, ?, ?)",
            1,
            "a row inserted.",
        );
        Arc::new(server)
    }

    /// This server as a client transport.
    #[must_use]
    pub fn transport(self: &Arc<Self>) -> Arc<dyn Transport> {
        Arc::clone(self) as Arc<dyn Transport>
    }

    pub fn register_query(&self, sql: &str, result: MockResult) {
        self.queries.lock().insert(sql.to_string(), Arc::new(result));
    }

    /// `None` answers `success=false` with an empty reason: no row.
    pub fn register_query_row(&self, sql: &str, values: Option<Vec<Native>>) {
        self.query_rows.lock().insert(sql.to_string(), values);
    }

    pub fn register_exec(&self, sql: &str, rows_affected: i64, message: &str) {
        self.execs
            .lock()
            .insert(sql.to_string(), (rows_affected, message.to_string()));
    }

    /// Kind reported when an appender opens `table`; default is a log table.
    pub fn register_table_type(&self, table: &str, table_type: TableType) {
        self.table_types.lock().insert(table.to_uppercase(), table_type);
    }

    /// Records received by append streams, per upper-case table name.
    #[must_use]
    pub fn appended(&self, table: &str) -> Vec<Vec<Native>> {
        self.state
            .lock()
            .appended
            .get(&table.to_uppercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Time left on each `method` call's deadline when it arrived; `None` when unbounded.
    ///
    /// Recorded for `user_auth`, `conn` and `exec`.
    #[must_use]
    pub fn call_deadlines(&self, method: &str) -> Vec<Option<Duration>> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(m, _)| *m == method)
            .map(|(_, left)| *left)
            .collect()
    }

    fn observe(&self, method: &'static str, call: &CancelToken) {
        self.state.lock().calls.push((method, call.remaining()));
    }

    /// Size of every batch an append stream sent for `table`, in arrival order.
    #[must_use]
    pub fn append_batches(&self, table: &str) -> Vec<usize> {
        self.state
            .lock()
            .batches
            .get(&table.to_uppercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Every statement run through `exec`, with its parameters.
    #[must_use]
    pub fn executed(&self) -> Vec<(String, Vec<Native>)> {
        self.state.lock().executed.clone()
    }

    #[must_use]
    pub fn open_conns(&self) -> usize {
        self.state.lock().conns.len()
    }

    #[must_use]
    pub fn open_rows(&self) -> usize {
        self.state.lock().rows.len()
    }

    /// Shut down.
    ///
    /// # Panics
    ///
    /// Panics when connections or rows handles were leaked.
    pub fn stop(&self) {
        let state = self.state.lock();
        assert!(
            state.conns.is_empty(),
            "WARN!!!! connection leak!!! There are {} sessions remained",
            state.conns.len()
        );
        assert!(
            state.rows.is_empty(),
            "WARN!!!! rows leak!!! There are {} rows remained",
            state.rows.len()
        );
    }

    fn has_conn(&self, conn: &ConnHandle) -> bool {
        self.state.lock().conns.contains_key(&conn.0)
    }
}

fn decode_params(params: Vec<Envelope>) -> Vec<Native> {
    params
        .into_iter()
        .map(|p| wire::decode(p).unwrap_or(Native::Null))
        .collect()
}

impl Transport for MockServer {
    fn user_auth(&self, call: &CancelToken, user: &str, password: &str) -> Result<Reply<()>> {
        check_call(call)?;
        self.observe("user_auth", call);
        if user != "sys" || password != "manager" {
            return Ok(Reply::fail("invalid username or password").elapsed(ELAPSE));
        }
        Ok(Reply::ok(()).elapsed(ELAPSE))
    }

    fn ping(&self, call: &CancelToken, token: i64) -> Result<Reply<i64>> {
        check_call(call)?;
        Ok(Reply::ok(token).elapsed(ELAPSE))
    }

    fn conn(&self, call: &CancelToken, user: &str, password: &str) -> Result<Reply<Option<ConnHandle>>> {
        check_call(call)?;
        self.observe("conn", call);
        if user != "sys" || password != "manager" {
            return Ok(Reply::fail("invalid username or password").elapsed(ELAPSE));
        }
        let mut state = self.state.lock();
        let handle = format!("conn#{}", state.next_id());
        state.conns.insert(handle.clone(), ());
        Ok(Reply::ok(Some(ConnHandle(handle))).elapsed(ELAPSE))
    }

    fn conn_close(&self, call: &CancelToken, conn: &ConnHandle) -> Result<Reply<()>> {
        check_call(call)?;
        self.state.lock().conns.remove(&conn.0);
        Ok(Reply::ok(()).elapsed(ELAPSE))
    }

    fn explain(&self, call: &CancelToken, conn: &ConnHandle, sql: &str, _full: bool) -> Result<Reply<String>> {
        check_call(call)?;
        if !self.has_conn(conn) {
            return Ok(Reply::fail("invalid connection").elapsed(ELAPSE));
        }
        match sql {
            "select * from dummy" => Ok(Reply::ok("explain dummy result".to_string()).elapsed(ELAPSE)),
            _ => Ok(Reply::fail("unknown test case").elapsed(ELAPSE)),
        }
    }

    fn exec(&self, call: &CancelToken, conn: &ConnHandle, sql: &str, params: Vec<Envelope>) -> Result<Reply<ExecBody>> {
        check_call(call)?;
        self.observe("exec", call);
        if !self.has_conn(conn) {
            return Ok(Reply::fail("invalid connection").elapsed(ELAPSE));
        }
        let known = self.execs.lock().get(sql).cloned();
        let (rows_affected, message) = match known {
            Some(found) => found,
            None if sql.to_ascii_lowercase().starts_with("insert into") => {
                (1, "a row inserted.".to_string())
            }
            None => return Ok(Reply::fail("unknown test case").elapsed(ELAPSE)),
        };
        self.state
            .lock()
            .executed
            .push((sql.to_string(), decode_params(params)));
        let mut reply = Reply::ok(ExecBody { rows_affected }).elapsed(ELAPSE);
        reply.reason = message;
        Ok(reply)
    }

    fn query_row(
        &self,
        call: &CancelToken,
        conn: &ConnHandle,
        sql: &str,
        _params: Vec<Envelope>,
    ) -> Result<Reply<QueryRowBody>> {
        check_call(call)?;
        if !self.has_conn(conn) {
            return Ok(Reply::fail("invalid connection").elapsed(ELAPSE));
        }
        let canned = self.query_rows.lock().get(sql).cloned();
        match canned {
            Some(Some(values)) => {
                let mut reply = Reply::ok(QueryRowBody {
                    values: wire::encode_all(&values)?,
                    rows_affected: 1,
                })
                .elapsed(ELAPSE);
                reply.reason = "a row selected.".into();
                Ok(reply)
            }
            Some(None) => Ok(Reply::fail("").elapsed(ELAPSE)),
            None => Ok(Reply::fail("unknown test case").elapsed(ELAPSE)),
        }
    }

    fn query(&self, call: &CancelToken, conn: &ConnHandle, sql: &str, params: Vec<Envelope>) -> Result<Reply<QueryBody>> {
        check_call(call)?;
        if !self.has_conn(conn) {
            return Ok(Reply::fail("invalid connection").elapsed(ELAPSE));
        }
        if let Some((rows_affected, message)) = self.execs.lock().get(sql).cloned() {
            let mut reply = Reply::ok(QueryBody { rows: None, rows_affected }).elapsed(ELAPSE);
            reply.reason = message;
            return Ok(reply);
        }
        let Some(result) = self.queries.lock().get(sql).cloned() else {
            return Ok(Reply::fail("unknown test case").elapsed(ELAPSE));
        };
        let params = decode_params(params);
        if let Some(expected) = &result.expect_param {
            if params.first() != Some(expected) {
                return Ok(Reply::fail(format!("not implemented {params:?}")).elapsed(ELAPSE));
            }
        }
        let mut state = self.state.lock();
        let id = format!("{}/rows#{}", conn.0, state.next_id());
        state.rows.insert(id.clone(), MockRows { result, pos: 0 });
        Ok(Reply::ok(QueryBody {
            rows: Some(RowsHandle { id, conn: conn.clone() }),
            rows_affected: 0,
        })
        .elapsed(ELAPSE))
    }

    fn columns(&self, call: &CancelToken, rows: &RowsHandle) -> Result<Reply<Vec<Column>>> {
        check_call(call)?;
        match self.state.lock().rows.get(&rows.id) {
            Some(r) => Ok(Reply::ok(r.result.columns.clone()).elapsed(ELAPSE)),
            None => Ok(Reply::fail("invalid rows handle").elapsed(ELAPSE)),
        }
    }

    fn rows_fetch(&self, call: &CancelToken, rows: &RowsHandle) -> Result<Reply<FetchBody>> {
        check_call(call)?;
        let mut state = self.state.lock();
        let Some(r) = state.rows.get_mut(&rows.id) else {
            return Ok(Reply::fail("invalid rows handle").elapsed(ELAPSE));
        };
        let body = match r.result.rows.get(r.pos) {
            Some(values) => {
                r.pos += 1;
                FetchBody { has_no_rows: false, values: wire::encode_all(values)? }
            }
            None => FetchBody { has_no_rows: true, values: Vec::new() },
        };
        Ok(Reply::ok(body).elapsed(ELAPSE))
    }

    fn rows_close(&self, call: &CancelToken, rows: &RowsHandle) -> Result<Reply<()>> {
        check_call(call)?;
        match self.state.lock().rows.remove(&rows.id) {
            Some(_) => Ok(Reply::ok(()).elapsed(ELAPSE)),
            None => Ok(Reply::fail("invalid rows handle").elapsed(ELAPSE)),
        }
    }

    fn appender(&self, call: &CancelToken, conn: &ConnHandle, table: &str) -> Result<Reply<AppenderBody>> {
        check_call(call)?;
        if !self.has_conn(conn) {
            return Ok(Reply::fail("invalid connection").elapsed(ELAPSE));
        }
        let table_name = table.to_uppercase();
        let table_type = self
            .table_types
            .lock()
            .get(&table_name)
            .copied()
            .unwrap_or_default();
        let mut state = self.state.lock();
        let id = format!("appender#{}", state.next_id());
        state
            .appenders
            .insert(id.clone(), MockAppender { table: table_name.clone() });
        Ok(Reply::ok(AppenderBody {
            handle: Some(AppenderHandle { id, conn: conn.clone() }),
            table_name,
            table_type,
            columns: Vec::new(),
        })
        .elapsed(ELAPSE))
    }

    fn append(&self, call: &CancelToken) -> Result<Box<dyn AppendStream>> {
        check_call(call)?;
        Ok(Box::new(MockAppendStream {
            state: Arc::clone(&self.state),
            call: call.clone(),
            started: Instant::now(),
            success_count: 0,
            fail_count: 0,
        }))
    }
}

struct MockAppendStream {
    state: Arc<Mutex<MockState>>,
    call: CancelToken,
    started: Instant,
    success_count: i64,
    fail_count: i64,
}

impl AppendStream for MockAppendStream {
    fn send(&mut self, data: AppendData) -> Result<()> {
        check_call(&self.call)?;
        let mut state = self.state.lock();
        let Some(table) = state.appenders.get(&data.handle.id).map(|a| a.table.clone()) else {
            self.fail_count += data.records.len() as i64;
            return Ok(());
        };
        state.batches.entry(table.clone()).or_default().push(data.records.len());
        for record in &data.records {
            match wire::decode_tuple(record) {
                Ok(values) => {
                    state.appended.entry(table.clone()).or_default().push(values);
                    self.success_count += 1;
                }
                Err(_) => self.fail_count += 1,
            }
        }
        Ok(())
    }

    fn close_and_recv(self: Box<Self>) -> Result<AppendDone> {
        Ok(AppendDone {
            success_count: self.success_count,
            fail_count: self.fail_count,
            elapse: format!("{:?}", self.started.elapsed()),
            reason: "success".into(),
        })
    }
}

