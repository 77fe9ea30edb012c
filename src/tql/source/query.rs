//! `SQL(text, params...)` and the `QUERY(...)` builder.

use super::{Rows, RowStream, Source, SourceEnv, SourceRef, cancellable};
use crate::client::{Column, Columns, DataType};
use crate::error::{Error, Result};
use crate::expr::args::{bool_arg, check_arity, i64_arg, str_arg, wrong_type};
use crate::tql::time::{nanos, parse_duration};
use crate::value::Value;
use crate::wire::Native;
use tracing::info;

#[derive(Debug)]
struct SqlSource {
    name: &'static str,
    sql: String,
    params: Vec<Native>,
}

impl Source for SqlSource {
    fn name(&self) -> &str {
        self.name
    }

    fn open(&self, env: &mut SourceEnv) -> Result<RowStream> {
        let conn = env.database(self.name)?.conn()?;
        let mut rows = conn.query(&env.cancel, &self.sql, &self.params)?;
        if !rows.is_fetchable() {
            let message = rows.message().to_string();
            rows.close()?;
            return Ok(RowStream {
                columns: Columns(vec![Column::new("MESSAGE", DataType::String)]),
                rows: Box::new(std::iter::once(Ok(vec![Value::Str(message)]))),
            });
        }
        let mut records = rows.into_records();
        let columns = records.columns()?;
        let rows: Rows = Box::new(
            records.map(|r| r.map(|values| values.into_iter().map(Value::from).collect())),
        );
        Ok(RowStream {
            columns,
            rows: cancellable(rows, env.cancel.clone()),
        })
    }
}

pub(crate) fn fn_sql(args: &[Value]) -> Result<Value> {
    check_arity("SQL", args, 1, usize::MAX)?;
    let sql = str_arg("SQL", args, 0)?;
    let params = args[1..]
        .iter()
        .map(Value::to_native)
        .collect::<Result<Vec<_>>>()?;
    Ok(SourceRef::new(SqlSource {
        name: "SQL",
        sql,
        params,
    }))
}

/// `from(table, tag, basetime='time')`
#[derive(Debug, Clone)]
pub struct QueryFrom {
    table: String,
    tag: String,
    base_time: String,
}

pub(crate) fn fn_from(args: &[Value]) -> Result<Value> {
    check_arity("from", args, 2, 3)?;
    Ok(Value::object(QueryFrom {
        table: str_arg("from", args, 0)?,
        tag: str_arg("from", args, 1)?,
        base_time: match args.get(2) {
            Some(_) => str_arg("from", args, 2)?,
            None => "time".to_string(),
        },
    }))
}

/// `limit([offset,] limit)`
#[derive(Debug, Clone, Copy)]
pub struct QueryLimit {
    offset: i64,
    limit: i64,
}

pub(crate) fn fn_limit(args: &[Value]) -> Result<Value> {
    check_arity("limit", args, 1, 2)?;
    let limit = if args.len() == 2 {
        QueryLimit {
            offset: i64_arg("limit", args, 0)?,
            limit: i64_arg("limit", args, 1)?,
        }
    } else {
        QueryLimit {
            offset: 0,
            limit: i64_arg("limit", args, 0)?,
        }
    };
    Ok(Value::object(limit))
}

/// `dump(flag=true, escape=false)`
#[derive(Debug, Clone, Copy)]
pub struct QueryDump {
    flag: bool,
    escape: bool,
}

pub(crate) fn fn_dump(args: &[Value]) -> Result<Value> {
    check_arity("dump", args, 0, 2)?;
    Ok(Value::object(QueryDump {
        flag: if args.is_empty() { true } else { bool_arg("dump", args, 0)? },
        escape: if args.len() > 1 { bool_arg("dump", args, 1)? } else { false },
    }))
}

#[derive(Debug, Clone, PartialEq)]
enum Bound {
    Last(i64),
    Now(i64),
    Nanos(i64),
}

impl Bound {
    fn parse(index: usize, v: &Value) -> Result<Bound> {
        match v {
            Value::Str(s) => {
                let text = s.trim().to_lowercase();
                let (anchor, rest) = if let Some(rest) = text.strip_prefix("now") {
                    (Bound::Now as fn(i64) -> Bound, rest)
                } else if let Some(rest) = text.strip_prefix("last") {
                    (Bound::Last as fn(i64) -> Bound, rest)
                } else {
                    return Err(Error::pipeline(
                        "f(between)",
                        format!("arg({index}) invalid between expression {s:?}"),
                    ));
                };
                let rest = rest.trim();
                let dur = if rest.is_empty() { 0 } else { parse_duration(rest)? };
                Ok(anchor(dur))
            }
            Value::Int(_) | Value::Float(_) => Ok(Bound::Nanos(v.as_f64().unwrap_or_default() as i64)),
            Value::Time(t) => Ok(Bound::Nanos(nanos(t)?)),
            other => Err(wrong_type("between", index, "time, 'now' or 'last'", other)),
        }
    }

    fn render(&self, table: &str, tag: &str) -> String {
        match self {
            Bound::Last(dur) => format!(
                "(SELECT MAX_TIME{} FROM V${table}_STAT WHERE name = '{tag}')",
                signed(*dur)
            ),
            Bound::Now(0) => "now".to_string(),
            Bound::Now(dur) => format!("(now{})", signed(*dur)),
            Bound::Nanos(ns) => ns.to_string(),
        }
    }
}

fn signed(dur: i64) -> String {
    match dur {
        0 => String::new(),
        d if d < 0 => d.to_string(),
        d => format!("+{d}"),
    }
}

/// `between(begin, end, period?)`
#[derive(Debug, Clone)]
pub struct QueryBetween {
    begin: Bound,
    end: Bound,
    period: i64,
}

pub(crate) fn fn_between(args: &[Value]) -> Result<Value> {
    check_arity("between", args, 2, 3)?;
    let period = match args.get(2) {
        None => 0,
        Some(Value::Str(s)) => parse_duration(s)?,
        Some(v @ (Value::Int(_) | Value::Float(_))) => v.as_f64().unwrap_or_default() as i64,
        Some(other) => return Err(wrong_type("between", 2, "duration", other)),
    };
    Ok(Value::object(QueryBetween {
        begin: Bound::parse(0, &args[0])?,
        end: Bound::parse(1, &args[1])?,
        period,
    }))
}

/// A table/tag query assembled from option values.
#[derive(Debug, Clone)]
pub struct Query {
    columns: Vec<String>,
    from: QueryFrom,
    between: QueryBetween,
    limit: QueryLimit,
    dump: Option<QueryDump>,
}

impl Query {
    pub(crate) fn from_args(args: &[Value]) -> Result<Query> {
        let mut columns = Vec::new();
        let mut from = None;
        let mut between = QueryBetween {
            begin: Bound::Last(-1_000_000_000),
            end: Bound::Last(0),
            period: 0,
        };
        let mut limit = QueryLimit {
            offset: 0,
            limit: 1_000_000,
        };
        let mut dump = None;
        for (i, arg) in args.iter().enumerate() {
            match arg {
                Value::Str(s) => columns.push(s.clone()),
                Value::Object(o) => {
                    if let Some(f) = o.downcast_ref::<QueryFrom>() {
                        from = Some(f.clone());
                    } else if let Some(b) = o.downcast_ref::<QueryBetween>() {
                        between = b.clone();
                    } else if let Some(l) = o.downcast_ref::<QueryLimit>() {
                        limit = *l;
                    } else if let Some(d) = o.downcast_ref::<QueryDump>() {
                        dump = Some(*d);
                    } else {
                        return Err(unsupported(i, arg));
                    }
                }
                other => return Err(unsupported(i, other)),
            }
        }
        let from = from.ok_or_else(|| Error::pipeline("f(QUERY)", "'from' should be specified"))?;
        Ok(Query {
            columns,
            from,
            between,
            limit,
            dump,
        })
    }

    /// The SQL text this query runs.
    #[must_use]
    pub fn to_sql(&self) -> String {
        let table = self.from.table.to_uppercase();
        let tag = &self.from.tag.replace('\'', "''");
        let bt = &self.from.base_time;
        let columns = if self.columns.is_empty() {
            "value".to_string()
        } else {
            self.columns.join(", ")
        };
        let a = self.between.begin.render(&table, tag);
        let b = self.between.end.render(&table, tag);
        let QueryLimit { offset, limit } = self.limit;
        let p = self.between.period;
        if p > 0 {
            format!(
                "SELECT from_timestamp(round(to_timestamp({bt})/{p})*{p}) {bt}, {columns} FROM {table} \
                 WHERE name = '{tag}' AND {bt} BETWEEN {a} AND {b} \
                 GROUP BY {bt} ORDER BY {bt} LIMIT {offset}, {limit}"
            )
        } else {
            format!(
                "SELECT {bt}, {columns} FROM {table} WHERE name = '{tag}' \
                 AND {bt} BETWEEN {a} AND {b} LIMIT {offset}, {limit}"
            )
        }
    }
}

fn unsupported(index: usize, v: &Value) -> Error {
    Error::pipeline("f(QUERY)", format!("arg({index}) unsupported {}", v.kind()))
}

pub(crate) fn fn_query(args: &[Value]) -> Result<Value> {
    let query = Query::from_args(args)?;
    let sql = query.to_sql();
    if let Some(dump) = query.dump.filter(|d| d.flag) {
        if dump.escape {
            let escaped: String = url::form_urlencoded::byte_serialize(sql.as_bytes()).collect();
            info!(target: "tagflow::dump", "{escaped}");
        } else {
            info!(target: "tagflow::dump", "{sql}");
        }
    }
    Ok(SourceRef::new(SqlSource {
        name: "QUERY",
        sql,
        params: Vec::new(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Expression, NoParameters};
    use crate::tql::registry::source_functions;

    /// Render the SQL for QUERY arguments written in TQL syntax.
    fn sql(args: &str) -> String {
        let list = Expression::parse(&format!("[{args}]"), source_functions())
            .and_then(|e| e.eval(&NoParameters))
            .unwrap();
        Query::from_args(list.as_list().unwrap()).unwrap().to_sql()
    }

    #[test]
    fn default_window() {
        assert_eq!(
            sql("'value', from('example', 'sig.1')"),
            "SELECT time, value FROM EXAMPLE WHERE name = 'sig.1' AND time BETWEEN \
             (SELECT MAX_TIME-1000000000 FROM V$EXAMPLE_STAT WHERE name = 'sig.1') AND \
             (SELECT MAX_TIME FROM V$EXAMPLE_STAT WHERE name = 'sig.1') LIMIT 0, 1000000"
        );
    }

    #[test]
    fn quotes_in_tag_are_doubled() {
        let text = sql(r#"from('example', "it's"), between(1, 2)"#);
        assert_eq!(
            text,
            "SELECT time, value FROM EXAMPLE WHERE name = 'it''s' AND time BETWEEN 1 AND 2 LIMIT 0, 1000000"
        );
        let text = sql(r#"from('example', "o'clock")"#);
        assert!(text.contains("V$EXAMPLE_STAT WHERE name = 'o''clock')"), "{text}");
    }

    #[test]
    fn last_with_period() {
        assert_eq!(
            sql("'STDDEV(value)', from('example', 'barn'), between('last -1h23m45s', 'last', '10m')"),
            "SELECT from_timestamp(round(to_timestamp(time)/600000000000)*600000000000) time, \
             STDDEV(value) FROM EXAMPLE WHERE name = 'barn' AND time BETWEEN \
             (SELECT MAX_TIME-5025000000000 FROM V$EXAMPLE_STAT WHERE name = 'barn') AND \
             (SELECT MAX_TIME FROM V$EXAMPLE_STAT WHERE name = 'barn') \
             GROUP BY time ORDER BY time LIMIT 0, 1000000"
        );
        let text = sql("from('example', 'barn'), between(1677646906*1000000000, 'last', '1s')");
        assert!(
            text.contains(
                "BETWEEN 1677646906000000000 AND (SELECT MAX_TIME FROM V$EXAMPLE_STAT WHERE name = 'barn')"
            ),
            "{text}"
        );
    }

    #[test]
    fn now_and_numbers() {
        let text = sql("from('example', 'barn', 'ts'), between('now -2.34s', 'now'), limit(5, 100)");
        assert_eq!(
            text,
            "SELECT ts, value FROM EXAMPLE WHERE name = 'barn' AND ts BETWEEN (now-2340000000) AND now LIMIT 5, 100"
        );
        let text = sql(
            "from('example', 'barn'), between(123456789000 - 3.45*1000000000, 123456789000, '1ms'), limit(1, 100)",
        );
        assert!(
            text.ends_with(
                "BETWEEN 120006789000 AND 123456789000 GROUP BY time ORDER BY time LIMIT 1, 100"
            ),
            "{text}"
        );
    }

    #[test]
    fn from_is_required() {
        let err = Query::from_args(&[Value::from("value")]).unwrap_err();
        assert!(err.to_string().contains("'from' should be specified"), "{err}");
        assert!(Query::from_args(&[Value::Bool(true)]).is_err());
        assert!(fn_between(&["yesterday".into(), "now".into()]).is_err());
    }
}
