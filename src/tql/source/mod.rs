//! Source stages: the head of every pipeline.
//!
//! A source constructor evaluates to a [`SourceRef`]. When the pipeline runs,
//! [`Source::open`] yields the column schema and a lazy sequence of rows.
//! Each row is `[K, V...]`: the first column becomes the key and the rest
//! becomes the value sequence.

#[cfg(feature = "io-csv")]
pub(crate) mod csv;
pub(crate) mod fake;
pub(crate) mod query;
pub(crate) mod reader;

use super::context::Database;
use crate::cancel::CancelToken;
use crate::client::Columns;
use crate::error::{Error, Result};
use crate::value::Value;
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;

/// Lazy rows of a source.
pub type Rows = Box<dyn Iterator<Item = Result<Vec<Value>>> + Send>;

/// What an opened source produces.
pub struct RowStream {
    pub columns: Columns,
    pub rows: Rows,
}

/// Resources a source may draw on when opened.
pub struct SourceEnv {
    pub database: Option<Database>,
    /// Request body, read by `payload()`.
    pub input: Option<Box<dyn Read + Send>>,
    pub cancel: CancelToken,
}

impl SourceEnv {
    pub fn database(&self, stage: &str) -> Result<&Database> {
        self.database
            .as_ref()
            .ok_or_else(|| Error::pipeline(stage, "no database is configured"))
    }
}

pub trait Source: Send + Sync {
    fn name(&self) -> &str;
    fn open(&self, env: &mut SourceEnv) -> Result<RowStream>;
}

/// A compiled source, as returned by a source constructor.
#[derive(Clone)]
pub struct SourceRef(pub Arc<dyn Source>);

impl SourceRef {
    pub fn new<S: Source + 'static>(source: S) -> Value {
        Value::object(SourceRef(Arc::new(source)))
    }
}

impl fmt::Debug for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Source({})", self.0.name())
    }
}

/// Where a reader source takes its bytes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Text(String),
    File(PathBuf),
    Payload,
}

impl Input {
    pub(crate) fn from_arg(func: &str, args: &[Value], index: usize) -> Result<Input> {
        let v = &args[index];
        if let Some(input) = v.downcast_ref::<Input>() {
            return Ok(input.clone());
        }
        match v {
            Value::Str(s) => Ok(Input::Text(s.clone())),
            other => Err(crate::expr::args::wrong_type(func, index, "string, file() or payload()", other)),
        }
    }

    pub(crate) fn open(&self, env: &mut SourceEnv) -> Result<Box<dyn Read + Send>> {
        match self {
            Input::Text(s) => Ok(Box::new(Cursor::new(s.clone().into_bytes()))),
            Input::File(path) => File::open(path)
                .map(|f| Box::new(f) as Box<dyn Read + Send>)
                .map_err(|e| Error::Io(format!("{}: {e}", path.display()))),
            Input::Payload => env
                .input
                .take()
                .ok_or_else(|| Error::pipeline("payload", "no input payload is available")),
        }
    }
}

/// Rows that stop yielding once `cancel` fires.
pub(crate) fn cancellable(rows: Rows, cancel: CancelToken) -> Rows {
    Box::new(rows.take_while(move |_| !cancel.is_cancelled()))
}
