//! `CSV(input, col(...)..., header(bool)?)`

use super::{Input, RowStream, Source, SourceEnv, SourceRef, cancellable};
use crate::client::{Column, Columns, DataType};
use crate::error::{Error, Result};
use crate::expr::args::{bool_arg, check_arity, str_arg, usize_arg};
use crate::value::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldType {
    Double,
    Int,
    Bool,
    Text,
}

impl FieldType {
    fn parse(name: &str) -> FieldType {
        match name.to_ascii_lowercase().as_str() {
            "float" | "float32" | "float64" | "double" => FieldType::Double,
            "int" | "int64" | "long" => FieldType::Int,
            "bool" | "boolean" => FieldType::Bool,
            _ => FieldType::Text,
        }
    }

    fn data_type(self) -> DataType {
        match self {
            FieldType::Double => DataType::Double,
            FieldType::Int => DataType::Int64,
            FieldType::Bool => DataType::Bool,
            FieldType::Text => DataType::String,
        }
    }

    fn convert(self, field: &str) -> std::result::Result<Value, String> {
        let f = field.trim();
        match self {
            FieldType::Double => f.parse().map(Value::Float).map_err(|e| format!("{field:?} {e}")),
            FieldType::Int => f.parse().map(Value::Int).map_err(|e| format!("{field:?} {e}")),
            FieldType::Bool => match f.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Value::Bool(true)),
                "false" | "f" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("{field:?} is not a boolean")),
            },
            FieldType::Text => Ok(Value::Str(field.to_string())),
        }
    }
}

/// `col(index, type, label?)`
#[derive(Debug, Clone)]
pub struct ColumnOpt {
    index: usize,
    field_type: FieldType,
    label: Option<String>,
}

pub(crate) fn fn_col(args: &[Value]) -> Result<Value> {
    check_arity("col", args, 2, 3)?;
    Ok(Value::object(ColumnOpt {
        index: usize_arg("col", args, 0)?,
        field_type: FieldType::parse(&str_arg("col", args, 1)?),
        label: match args.get(2) {
            Some(_) => Some(str_arg("col", args, 2)?),
            None => None,
        },
    }))
}

/// `header(bool)`
#[derive(Debug, Clone, Copy)]
pub struct HeaderOpt(pub bool);

pub(crate) fn fn_header(args: &[Value]) -> Result<Value> {
    check_arity("header", args, 1, 1)?;
    Ok(Value::object(HeaderOpt(bool_arg("header", args, 0)?)))
}

#[derive(Debug)]
struct CsvSource {
    input: Input,
    columns: BTreeMap<usize, ColumnOpt>,
    has_header: bool,
}

impl CsvSource {
    fn schema(&self, names: Option<&csv::StringRecord>) -> Columns {
        let width = names.map_or(0, csv::StringRecord::len).max(
            self.columns.keys().next_back().map_or(0, |max| max + 1),
        );
        if width == 0 {
            return Columns::default();
        }
        let mut cols = vec![Column::new("id", DataType::Int64)];
        for i in 0..width {
            let opt = self.columns.get(&i);
            let label = opt
                .and_then(|o| o.label.clone())
                .or_else(|| names.and_then(|n| n.get(i)).map(str::to_string))
                .unwrap_or_else(|| format!("column{i}"));
            let data_type = opt.map_or(DataType::String, |o| o.field_type.data_type());
            cols.push(Column::new(label, data_type));
        }
        Columns(cols)
    }
}

impl Source for CsvSource {
    fn name(&self) -> &str {
        "CSV"
    }

    fn open(&self, env: &mut SourceEnv) -> Result<RowStream> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(self.has_header)
            .flexible(true)
            .from_reader(self.input.open(env)?);
        let names = if self.has_header {
            Some(reader.headers()?.clone())
        } else {
            None
        };
        let columns = self.schema(names.as_ref());
        let types: Vec<(usize, FieldType)> = self
            .columns
            .values()
            .map(|c| (c.index, c.field_type))
            .collect();
        let rows = reader.into_records().enumerate().map(move |(n, record)| {
            let record = record?;
            let mut row = Vec::with_capacity(record.len() + 1);
            row.push(Value::from(n + 1));
            for (i, field) in record.iter().enumerate() {
                let ft = types
                    .iter()
                    .find(|(idx, _)| *idx == i)
                    .map_or(FieldType::Text, |(_, t)| *t);
                let v = ft.convert(field).map_err(|reason| {
                    Error::pipeline("CSV", format!("row {} column {i}: {reason}", n + 1))
                })?;
                row.push(v);
            }
            Ok(row)
        });
        Ok(RowStream {
            columns,
            rows: cancellable(Box::new(rows), env.cancel.clone()),
        })
    }
}

pub(crate) fn fn_csv(args: &[Value]) -> Result<Value> {
    check_arity("CSV", args, 1, usize::MAX)?;
    let mut input = None;
    let mut columns = BTreeMap::new();
    let mut has_header = false;
    for (i, arg) in args.iter().enumerate() {
        if let Some(c) = arg.downcast_ref::<ColumnOpt>() {
            columns.insert(c.index, c.clone());
        } else if let Some(h) = arg.downcast_ref::<HeaderOpt>() {
            has_header = h.0;
        } else {
            input = Some(Input::from_arg("CSV", args, i)?);
        }
    }
    let input = input.ok_or_else(|| {
        Error::pipeline("f(CSV)", "file path or data reader is not specified")
    })?;
    Ok(SourceRef::new(CsvSource {
        input,
        columns,
        has_header,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;

    fn open(args: &[Value]) -> RowStream {
        let src = fn_csv(args).unwrap();
        let mut env = SourceEnv {
            database: None,
            input: None,
            cancel: CancelToken::new(),
        };
        src.downcast_ref::<SourceRef>().unwrap().0.open(&mut env).unwrap()
    }

    #[test]
    fn typed_columns_and_header() {
        let stream = open(&[
            "name,value,ok\nsig.1,1.5,true\nsig.2,2.5,false\n".into(),
            fn_col(&[1.into(), "double".into(), "VAL".into()]).unwrap(),
            fn_col(&[2.into(), "boolean".into()]).unwrap(),
            fn_header(&[true.into()]).unwrap(),
        ]);
        assert_eq!(stream.columns.names(), vec!["id", "name", "VAL", "ok"]);
        let rows = stream.rows.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[1],
            vec![Value::Int(2), "sig.2".into(), Value::Float(2.5), Value::Bool(false)]
        );
    }

    #[test]
    fn conversion_failure_is_an_error() {
        let stream = open(&["a,x\n".into(), fn_col(&[1.into(), "float".into()]).unwrap()]);
        let first = stream.rows.into_iter().next().unwrap();
        assert!(first.unwrap_err().to_string().contains("row 1 column 1"));
    }

    #[test]
    fn input_is_required() {
        assert!(fn_csv(&[fn_header(&[false.into()]).unwrap()]).is_err());
    }
}
