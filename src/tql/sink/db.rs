//! Sinks writing back to the database: `INSERT` and `APPEND`.

use super::{Sink, SinkEnv, SinkFactory, SinkOption, SinkRef, options, unexpected};
use crate::cancel::CancelToken;
use crate::client::{Appender, AppenderOptions, Columns, Conn};
use crate::error::{Error, Result};
use crate::value::Value;
use crate::wire::Native;
use std::sync::Arc;
use tracing::debug;

fn no_database(func: &str) -> Error {
    Error::pipeline(format!("f({func})"), "no database is configured")
}

#[derive(Debug, Clone)]
struct InsertFactory {
    columns: Vec<String>,
    table: String,
    tag: Option<String>,
}

impl InsertFactory {
    fn sql(&self) -> String {
        let mut cols: Vec<&str> = Vec::with_capacity(self.columns.len() + 1);
        if self.tag.is_some() {
            cols.push("name");
        }
        cols.extend(self.columns.iter().map(String::as_str));
        let holders = vec!["?"; cols.len()].join(",");
        format!("INSERT INTO {}({}) VALUES({holders})", self.table, cols.join(","))
    }
}

struct InsertSink {
    conn: Arc<Conn>,
    sql: String,
    tag: Option<String>,
    width: usize,
    inserted: i64,
}

impl SinkFactory for InsertFactory {
    fn name(&self) -> &str {
        "INSERT"
    }

    fn build(&self, env: SinkEnv) -> Result<Box<dyn Sink>> {
        let db = env.database.ok_or_else(|| no_database("INSERT"))?;
        Ok(Box::new(InsertSink {
            conn: db.conn()?,
            sql: self.sql(),
            tag: self.tag.clone(),
            width: self.columns.len(),
            inserted: 0,
        }))
    }
}

impl Sink for InsertSink {
    fn set_header(&mut self, _columns: &Columns) -> Result<()> {
        Ok(())
    }

    fn add_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.width {
            return Err(Error::pipeline(
                "f(INSERT)",
                format!("row has {} values, but {} columns", row.len(), self.width),
            ));
        }
        let mut params: Vec<Native> = Vec::with_capacity(row.len() + 1);
        if let Some(tag) = &self.tag {
            params.push(Native::Str(tag.clone()));
        }
        for v in &row {
            params.push(v.to_native()?);
        }
        let result = self.conn.exec(&CancelToken::new(), &self.sql, &params)?;
        self.inserted += result.rows_affected;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<String> {
        debug!(sql = %self.sql, rows = self.inserted, "insert done");
        Ok(format!("{} rows inserted.", self.inserted))
    }
}

/// `INSERT(col..., table(name), tag(name)?)`
pub(crate) fn fn_insert(args: &[Value]) -> Result<Value> {
    let (columns, opts) = options("INSERT", args)?;
    let mut table = None;
    let mut tag = None;
    for opt in opts {
        match opt {
            SinkOption::Table(t) => table = Some(t),
            SinkOption::Tag(t) => tag = Some(t),
            other => return Err(unexpected("INSERT", &other)),
        }
    }
    let table = table.ok_or_else(|| Error::pipeline("f(INSERT)", "table() is required"))?;
    if columns.is_empty() {
        return Err(Error::pipeline("f(INSERT)", "no columns are specified"));
    }
    Ok(SinkRef::new(InsertFactory { columns, table, tag }))
}

#[derive(Debug, Clone)]
struct AppendFactory {
    table: String,
}

struct AppendSink {
    appender: Appender,
}

impl SinkFactory for AppendFactory {
    fn name(&self) -> &str {
        "APPEND"
    }

    fn build(&self, env: SinkEnv) -> Result<Box<dyn Sink>> {
        let db = env.database.ok_or_else(|| no_database("APPEND"))?;
        let conn = db.conn()?;
        let appender = conn.appender(&CancelToken::new(), &self.table, AppenderOptions::default())?;
        Ok(Box::new(AppendSink { appender }))
    }
}

impl Sink for AppendSink {
    fn set_header(&mut self, _columns: &Columns) -> Result<()> {
        Ok(())
    }

    fn add_row(&mut self, row: Vec<Value>) -> Result<()> {
        let values = row.iter().map(Value::to_native).collect::<Result<Vec<_>>>()?;
        self.appender.append(&values)
    }

    fn close(mut self: Box<Self>) -> Result<String> {
        let (success, fail) = self.appender.close()?;
        Ok(format!(
            "append {} rows (success {success}, fail {fail}).",
            success + fail
        ))
    }
}

/// `APPEND(table(name))`
pub(crate) fn fn_append(args: &[Value]) -> Result<Value> {
    let (names, opts) = options("APPEND", args)?;
    if let Some(name) = names.first() {
        return Err(Error::pipeline("f(APPEND)", format!("unexpected argument '{name}'")));
    }
    let mut table = None;
    for opt in opts {
        match opt {
            SinkOption::Table(t) => table = Some(t),
            other => return Err(unexpected("APPEND", &other)),
        }
    }
    let table = table.ok_or_else(|| Error::pipeline("f(APPEND)", "table() is required"))?;
    Ok(SinkRef::new(AppendFactory { table }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tql::sink::{fn_table, fn_tag};

    #[test]
    fn insert_statement() {
        let v = fn_insert(&[
            "time".into(),
            "value".into(),
            fn_table(&["example".into()]).unwrap(),
            fn_tag(&["sig.1".into()]).unwrap(),
        ])
        .unwrap();
        let factory = v.downcast_ref::<SinkRef>().unwrap();
        assert_eq!(factory.0.name(), "INSERT");
        let f = InsertFactory {
            columns: vec!["time".into(), "value".into()],
            table: "example".into(),
            tag: Some("sig.1".into()),
        };
        assert_eq!(f.sql(), "INSERT INTO example(name,time,value) VALUES(?,?,?)");
    }

    #[test]
    fn required_options() {
        assert!(fn_insert(&["time".into()]).unwrap_err().to_string().contains("table() is required"));
        assert!(fn_append(&[]).unwrap_err().to_string().contains("table() is required"));
        let built = fn_append(&[fn_table(&["example".into()]).unwrap()]).unwrap();
        let err = built
            .downcast_ref::<SinkRef>()
            .unwrap()
            .0
            .build(SinkEnv {
                output: Box::new(std::io::sink()),
                database: None,
            })
            .err()
            .unwrap();
        assert!(err.to_string().contains("no database is configured"));
    }
}
