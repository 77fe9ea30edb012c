//! `STRING(input, delimiter?)` and `BYTES(input, delimiter?)`.
//!
//! The input is a literal string, `file(path)` or `payload()`. Without a
//! delimiter the whole input is one chunk.

use super::{Input, RowStream, Source, SourceEnv, SourceRef, cancellable};
use crate::client::{Column, Columns, DataType};
use crate::error::{Error, Result};
use crate::expr::args::{check_arity, str_arg};
use crate::value::Value;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;

/// `delimiter(text)`
#[derive(Debug, Clone)]
pub struct Delimiter(pub String);

pub(crate) fn fn_delimiter(args: &[Value]) -> Result<Value> {
    check_arity("delimiter", args, 1, 1)?;
    let d = str_arg("delimiter", args, 0)?;
    if d.is_empty() {
        return Err(crate::expr::args::arg_error("delimiter", 0, "empty delimiter"));
    }
    Ok(Value::object(Delimiter(d)))
}

pub(crate) fn fn_file(args: &[Value]) -> Result<Value> {
    check_arity("file", args, 1, 1)?;
    Ok(Value::object(Input::File(PathBuf::from(str_arg("file", args, 0)?))))
}

pub(crate) fn fn_payload(args: &[Value]) -> Result<Value> {
    check_arity("payload", args, 0, 0)?;
    Ok(Value::object(Input::Payload))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Text,
    Binary,
}

#[derive(Debug)]
struct ReaderSource {
    kind: Kind,
    input: Input,
    delimiter: Option<Vec<u8>>,
}

impl Source for ReaderSource {
    fn name(&self) -> &str {
        match self.kind {
            Kind::Text => "STRING",
            Kind::Binary => "BYTES",
        }
    }

    fn open(&self, env: &mut SourceEnv) -> Result<RowStream> {
        let reader = BufReader::new(self.input.open(env)?);
        let (label, data_type) = match self.kind {
            Kind::Text => ("string", DataType::String),
            Kind::Binary => ("bytes", DataType::Binary),
        };
        let chunks = Chunks {
            reader,
            delimiter: self.delimiter.clone(),
            done: false,
        };
        let kind = self.kind;
        let rows = chunks.enumerate().map(move |(i, chunk)| {
            let chunk = chunk?;
            let value = match kind {
                Kind::Text => Value::Str(
                    String::from_utf8(chunk).map_err(|e| Error::Decode(e.to_string()))?,
                ),
                Kind::Binary => Value::Bytes(chunk),
            };
            Ok(vec![Value::from(i + 1), value])
        });
        Ok(RowStream {
            columns: Columns(vec![
                Column::new("id", DataType::Int64),
                Column::new(label, data_type),
            ]),
            rows: cancellable(Box::new(rows), env.cancel.clone()),
        })
    }
}

struct Chunks {
    reader: BufReader<Box<dyn Read + Send>>,
    delimiter: Option<Vec<u8>>,
    done: bool,
}

impl Chunks {
    fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        let Some(delim) = &self.delimiter else {
            self.done = true;
            self.reader.read_to_end(&mut buf)?;
            return Ok(Some(buf));
        };
        let last = delim[delim.len() - 1];
        loop {
            let n = self.reader.read_until(last, &mut buf)?;
            if n == 0 {
                self.done = true;
                return Ok((!buf.is_empty()).then_some(buf));
            }
            if buf.ends_with(delim) {
                buf.truncate(buf.len() - delim.len());
                return Ok(Some(buf));
            }
        }
    }
}

impl Iterator for Chunks {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_chunk() {
            Ok(chunk) => chunk.map(Ok),
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

fn reader(kind: Kind, func: &str, args: &[Value]) -> Result<Value> {
    check_arity(func, args, 1, 2)?;
    let input = Input::from_arg(func, args, 0)?;
    let delimiter = match args.get(1) {
        None => None,
        Some(v) => match v.downcast_ref::<Delimiter>() {
            Some(d) => Some(d.0.clone().into_bytes()),
            None => Some(str_arg(func, args, 1)?.into_bytes()).filter(|d| !d.is_empty()),
        },
    };
    Ok(SourceRef::new(ReaderSource {
        kind,
        input,
        delimiter,
    }))
}

pub(crate) fn fn_string(args: &[Value]) -> Result<Value> {
    reader(Kind::Text, "STRING", args)
}

pub(crate) fn fn_bytes(args: &[Value]) -> Result<Value> {
    reader(Kind::Binary, "BYTES", args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::tql::source::SourceRef;

    fn env() -> SourceEnv {
        SourceEnv {
            database: None,
            input: Some(Box::new(std::io::Cursor::new(b"a||b||".to_vec()))),
            cancel: CancelToken::new(),
        }
    }

    fn rows(source: Value, env: &mut SourceEnv) -> Vec<Vec<Value>> {
        let source = source.downcast_ref::<SourceRef>().unwrap().clone();
        let stream = source.0.open(env).unwrap();
        stream.rows.collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn splits_text_by_delimiter() {
        let src = fn_string(&["x\ny\n\nz".into(), fn_delimiter(&["\n".into()]).unwrap()]).unwrap();
        let got = rows(src, &mut env());
        assert_eq!(got.len(), 4);
        assert_eq!(got[0], vec![Value::Int(1), "x".into()]);
        assert_eq!(got[2], vec![Value::Int(3), "".into()]);
        assert_eq!(got[3], vec![Value::Int(4), "z".into()]);
    }

    #[test]
    fn payload_with_multibyte_delimiter() {
        let src = fn_bytes(&[fn_payload(&[]).unwrap(), "||".into()]).unwrap();
        let mut env = env();
        let got = rows(src, &mut env);
        assert_eq!(got, vec![
            vec![Value::Int(1), Value::Bytes(b"a".to_vec())],
            vec![Value::Int(2), Value::Bytes(b"b".to_vec())],
        ]);
        assert!(env.input.is_none());
    }

    #[test]
    fn whole_input_without_delimiter() {
        let got = rows(fn_string(&["one\ntwo".into()]).unwrap(), &mut env());
        assert_eq!(got, vec![vec![Value::Int(1), "one\ntwo".into()]]);
    }
}
