//! Sink stages: the tail of every pipeline.
//!
//! A sink constructor evaluates to a [`SinkRef`]. At run time the factory
//! builds a [`Sink`] bound to the output stream (encoders) or the database
//! (`INSERT`, `APPEND`). The sink receives the column header once, then the
//! rows, and is closed exactly once.

pub(crate) mod db;
pub(crate) mod encoder;

use super::context::Database;
use crate::client::Columns;
use crate::error::{Error, Result};
use crate::expr::args::{arg_error, bool_arg, check_arity, str_arg, usize_arg};
use crate::value::Value;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Local, SecondsFormat, Utc};
use std::fmt;
use std::io::Write;
use std::sync::Arc;

pub trait Sink: Send {
    fn set_header(&mut self, columns: &Columns) -> Result<()>;
    fn add_row(&mut self, row: Vec<Value>) -> Result<()>;
    /// Flush and release; returns the result message of the run.
    fn close(self: Box<Self>) -> Result<String>;
}

/// What a sink is built against.
pub struct SinkEnv {
    pub output: Box<dyn Write + Send>,
    pub database: Option<Database>,
}

pub trait SinkFactory: Send + Sync {
    fn name(&self) -> &str;
    fn build(&self, env: SinkEnv) -> Result<Box<dyn Sink>>;
}

/// A compiled sink, as returned by a sink constructor.
#[derive(Clone)]
pub struct SinkRef(pub Arc<dyn SinkFactory>);

impl SinkRef {
    pub fn new<F: SinkFactory + 'static>(factory: F) -> Value {
        Value::object(SinkRef(Arc::new(factory)))
    }
}

impl fmt::Debug for SinkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sink({})", self.0.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeZone {
    Utc,
    Local,
    Fixed(FixedOffset),
}

impl TimeZone {
    /// `UTC`, `Local`, or a fixed offset such as `+09:00`.
    pub fn parse(name: &str) -> Option<TimeZone> {
        match name {
            "UTC" | "utc" | "GMT" => Some(TimeZone::Utc),
            "Local" | "local" => Some(TimeZone::Local),
            other => other.parse::<FixedOffset>().ok().map(TimeZone::Fixed),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimeFormat {
    Nanos,
    Micros,
    Millis,
    Secs,
    Rfc3339,
    /// A strftime layout.
    Layout(String),
}

impl TimeFormat {
    pub fn parse(spec: &str) -> Option<TimeFormat> {
        Some(match spec {
            "ns" => TimeFormat::Nanos,
            "us" => TimeFormat::Micros,
            "ms" => TimeFormat::Millis,
            "s" => TimeFormat::Secs,
            "rfc3339" | "RFC3339" => TimeFormat::Rfc3339,
            layout => {
                if layout.is_empty() || StrftimeItems::new(layout).any(|i| matches!(i, Item::Error)) {
                    return None;
                }
                TimeFormat::Layout(layout.to_string())
            }
        })
    }
}

/// Options shared by the sink constructors.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkOption {
    Tz(TimeZone),
    Sep(u8),
    Heading(bool),
    Rownum(bool),
    TimeFormat(TimeFormat),
    Precision(usize),
    Title(String),
    Subtitle(String),
    Series(Vec<String>),
    Brief(usize),
    Table(String),
    Tag(String),
}

pub(crate) fn fn_tz(args: &[Value]) -> Result<Value> {
    check_arity("tz", args, 1, 1)?;
    let name = str_arg("tz", args, 0)?;
    let tz = TimeZone::parse(&name).ok_or_else(|| arg_error("tz", 0, format!("unknown time zone '{name}'")))?;
    Ok(Value::object(SinkOption::Tz(tz)))
}

pub(crate) fn fn_sep(args: &[Value]) -> Result<Value> {
    check_arity("sep", args, 1, 1)?;
    let sep = str_arg("sep", args, 0)?;
    let sep = match sep.as_str() {
        "\\t" => "\t",
        s => s,
    };
    match sep.as_bytes() {
        [b] => Ok(Value::object(SinkOption::Sep(*b))),
        _ => Err(arg_error("sep", 0, "separator should be a single byte")),
    }
}

pub(crate) fn fn_heading(args: &[Value]) -> Result<Value> {
    check_arity("heading", args, 1, 1)?;
    Ok(Value::object(SinkOption::Heading(bool_arg("heading", args, 0)?)))
}

pub(crate) fn fn_rownum(args: &[Value]) -> Result<Value> {
    check_arity("rownum", args, 1, 1)?;
    Ok(Value::object(SinkOption::Rownum(bool_arg("rownum", args, 0)?)))
}

pub(crate) fn fn_timeformat(args: &[Value]) -> Result<Value> {
    check_arity("timeformat", args, 1, 1)?;
    let spec = str_arg("timeformat", args, 0)?;
    let format = TimeFormat::parse(&spec)
        .ok_or_else(|| arg_error("timeformat", 0, format!("invalid time format '{spec}'")))?;
    Ok(Value::object(SinkOption::TimeFormat(format)))
}

pub(crate) fn fn_precision(args: &[Value]) -> Result<Value> {
    check_arity("precision", args, 1, 1)?;
    Ok(Value::object(SinkOption::Precision(usize_arg("precision", args, 0)?)))
}

pub(crate) fn fn_title(args: &[Value]) -> Result<Value> {
    check_arity("title", args, 1, 1)?;
    Ok(Value::object(SinkOption::Title(str_arg("title", args, 0)?)))
}

pub(crate) fn fn_subtitle(args: &[Value]) -> Result<Value> {
    check_arity("subtitle", args, 1, 1)?;
    Ok(Value::object(SinkOption::Subtitle(str_arg("subtitle", args, 0)?)))
}

pub(crate) fn fn_series(args: &[Value]) -> Result<Value> {
    check_arity("series", args, 1, usize::MAX)?;
    let labels = (0..args.len())
        .map(|i| str_arg("series", args, i))
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::object(SinkOption::Series(labels)))
}

pub(crate) fn fn_brief(args: &[Value]) -> Result<Value> {
    check_arity("brief", args, 1, 1)?;
    Ok(Value::object(SinkOption::Brief(usize_arg("brief", args, 0)?)))
}

pub(crate) fn fn_table(args: &[Value]) -> Result<Value> {
    check_arity("table", args, 1, 1)?;
    Ok(Value::object(SinkOption::Table(str_arg("table", args, 0)?)))
}

pub(crate) fn fn_tag(args: &[Value]) -> Result<Value> {
    check_arity("tag", args, 1, 1)?;
    Ok(Value::object(SinkOption::Tag(str_arg("tag", args, 0)?)))
}

/// Split sink constructor arguments into plain strings and options.
pub(crate) fn options(func: &str, args: &[Value]) -> Result<(Vec<String>, Vec<SinkOption>)> {
    let mut names = Vec::new();
    let mut opts = Vec::new();
    for (i, arg) in args.iter().enumerate() {
        match arg {
            Value::Str(s) => names.push(s.clone()),
            other => match other.downcast_ref::<SinkOption>() {
                Some(opt) => opts.push(opt.clone()),
                None => return Err(crate::expr::args::wrong_type(func, i, "sink option", other)),
            },
        }
    }
    Ok((names, opts))
}

/// How values are rendered by the encoders.
#[derive(Debug, Clone, PartialEq)]
pub struct Formatter {
    pub tz: TimeZone,
    pub time_format: TimeFormat,
    pub precision: Option<usize>,
}

impl Default for Formatter {
    fn default() -> Self {
        Self {
            tz: TimeZone::Utc,
            time_format: TimeFormat::Nanos,
            precision: None,
        }
    }
}

impl Formatter {
    pub(crate) fn apply(&mut self, opt: &SinkOption) -> bool {
        match opt {
            SinkOption::Tz(tz) => self.tz = *tz,
            SinkOption::TimeFormat(f) => self.time_format = f.clone(),
            SinkOption::Precision(p) => self.precision = Some(*p),
            _ => return false,
        }
        true
    }

    fn format_time_in<Tz: chrono::TimeZone>(&self, t: DateTime<Tz>) -> String
    where
        Tz::Offset: fmt::Display,
    {
        match &self.time_format {
            TimeFormat::Rfc3339 => t.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            TimeFormat::Layout(layout) => t.format(layout).to_string(),
            _ => {
                let utc = t.with_timezone(&Utc);
                match self.epoch(&utc) {
                    Some(n) => n.to_string(),
                    None => utc.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                }
            }
        }
    }

    /// Epoch count in the configured unit; `None` when nanoseconds overflow,
    /// in which case callers fall back to RFC 3339.
    fn epoch(&self, t: &DateTime<Utc>) -> Option<i64> {
        match self.time_format {
            TimeFormat::Micros => Some(t.timestamp_micros()),
            TimeFormat::Millis => Some(t.timestamp_millis()),
            TimeFormat::Secs => Some(t.timestamp()),
            _ => t.timestamp_nanos_opt(),
        }
    }

    pub fn format_time(&self, t: &DateTime<Utc>) -> String {
        match self.tz {
            TimeZone::Utc => self.format_time_in(*t),
            TimeZone::Local => self.format_time_in(t.with_timezone(&Local)),
            TimeZone::Fixed(off) => self.format_time_in(t.with_timezone(&off)),
        }
    }

    fn is_epoch(&self) -> bool {
        matches!(
            self.time_format,
            TimeFormat::Nanos | TimeFormat::Micros | TimeFormat::Millis | TimeFormat::Secs
        )
    }

    /// Text form used by CSV and Markdown.
    pub fn text(&self, v: &Value) -> String {
        match v {
            Value::Float(f) => match self.precision {
                Some(p) => format!("{f:.p$}"),
                None => f.to_string(),
            },
            Value::Time(t) => self.format_time(t),
            other => other.to_string(),
        }
    }

    /// JSON form used by the JSON and chart encoders.
    pub fn json(&self, v: &Value) -> serde_json::Value {
        use serde_json::Value as J;
        match v {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Float(f) => {
                let f = match self.precision {
                    Some(p) => {
                        let scale = 10f64.powi(p.min(15) as i32);
                        (f * scale).round() / scale
                    }
                    None => *f,
                };
                serde_json::Number::from_f64(f).map_or(J::Null, J::Number)
            }
            Value::Time(t) if self.is_epoch() => match self.epoch(t) {
                Some(n) => J::from(n),
                None => J::String(self.format_time(t)),
            },
            Value::Time(t) => J::String(self.format_time(t)),
            Value::List(items) => J::Array(items.iter().map(|i| self.json(i)).collect()),
            Value::Matrix(rows) => J::Array(
                rows.iter()
                    .map(|r| J::Array(r.iter().map(|i| self.json(i)).collect()))
                    .collect(),
            ),
            other => J::String(other.to_string()),
        }
    }
}

pub(crate) fn unexpected(func: &str, opt: &SinkOption) -> Error {
    Error::pipeline(format!("f({func})"), format!("unsupported option {opt:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_formats() {
        let t = DateTime::from_timestamp_nanos(1_700_000_000_123_456_789);
        let mut f = Formatter::default();
        assert_eq!(f.text(&Value::Time(t)), "1700000000123456789");
        f.time_format = TimeFormat::Millis;
        assert_eq!(f.json(&Value::Time(t)), serde_json::json!(1_700_000_000_123i64));
        f.time_format = TimeFormat::parse("%Y-%m-%d %H:%M").unwrap();
        f.tz = TimeZone::parse("+09:00").unwrap();
        assert_eq!(f.text(&Value::Time(t)), "2023-11-15 07:13");
        assert!(TimeFormat::parse("%Q").is_none());
    }

    #[test]
    fn far_times_keep_their_value() {
        let t = DateTime::parse_from_rfc3339("2300-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let mut f = Formatter::default();
        assert_eq!(f.text(&Value::Time(t)), "2300-01-01T00:00:00Z");
        f.time_format = TimeFormat::Secs;
        assert_eq!(f.json(&Value::Time(t)), serde_json::json!(t.timestamp()));
    }

    #[test]
    fn precision_applies_to_floats() {
        let f = Formatter {
            precision: Some(2),
            ..Formatter::default()
        };
        assert_eq!(f.text(&Value::Float(1.0 / 3.0)), "0.33");
        assert_eq!(f.json(&Value::Float(2.0 / 3.0)), serde_json::json!(0.67));
        assert_eq!(f.text(&Value::Int(7)), "7");
    }

    #[test]
    fn option_parsing() {
        assert_eq!(fn_sep(&["\\t".into()]).unwrap().downcast_ref::<SinkOption>(), Some(&SinkOption::Sep(b'\t')));
        assert!(fn_sep(&["::".into()]).is_err());
        assert!(fn_tz(&["Mars/Base".into()]).is_err());
        let (names, opts) = options("INSERT", &["time".into(), fn_table(&["example".into()]).unwrap()]).unwrap();
        assert_eq!(names, vec!["time"]);
        assert_eq!(opts, vec![SinkOption::Table("example".into())]);
        assert!(options("CSV", &[Value::Int(1)]).is_err());
    }
}
