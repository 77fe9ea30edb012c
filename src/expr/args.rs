//! Argument checks shared by every built-in function.
//!
//! Indices are positions in the argument slice as the function receives it,
//! so for map stages the implicit `CTX, K, V` occupy 0..=2.

use crate::error::{Error, Result};
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::sync::Arc;

pub fn check_arity(func: &str, args: &[Value], min: usize, max: usize) -> Result<()> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    let expected = if min == max {
        min.to_string()
    } else if max == usize::MAX {
        format!("{min}+")
    } else {
        format!("{min}~{max}")
    };
    Err(Error::InvalidNumOfArgs {
        func: func.to_string(),
        expected,
        actual: args.len(),
    })
}

pub fn wrong_type(func: &str, index: usize, expected: &str, actual: &Value) -> Error {
    Error::WrongTypeOfArgs {
        func: func.to_string(),
        index,
        expected: expected.to_string(),
        actual: actual.kind().to_string(),
    }
}

/// A constraint violation on an otherwise well-typed argument.
pub fn arg_error(func: &str, index: usize, msg: impl std::fmt::Display) -> Error {
    Error::pipeline(format!("f({func})"), format!("arg({index}) {msg}"))
}

fn arg<'a>(func: &str, args: &'a [Value], index: usize) -> Result<&'a Value> {
    args.get(index).ok_or_else(|| Error::InvalidNumOfArgs {
        func: func.to_string(),
        expected: (index + 1).to_string(),
        actual: args.len(),
    })
}

pub fn f64_arg(func: &str, args: &[Value], index: usize) -> Result<f64> {
    let v = arg(func, args, index)?;
    match v {
        Value::Str(s) => s.trim().parse().map_err(|_| wrong_type(func, index, "float64", v)),
        _ => v.as_f64().ok_or_else(|| wrong_type(func, index, "float64", v)),
    }
}

pub fn i64_arg(func: &str, args: &[Value], index: usize) -> Result<i64> {
    let v = arg(func, args, index)?;
    match v {
        Value::Int(n) => Ok(*n),
        Value::Float(f) => Ok(*f as i64),
        Value::Str(s) => s.trim().parse().map_err(|_| wrong_type(func, index, "int", v)),
        _ => Err(wrong_type(func, index, "int", v)),
    }
}

pub fn usize_arg(func: &str, args: &[Value], index: usize) -> Result<usize> {
    let n = i64_arg(func, args, index)?;
    usize::try_from(n).map_err(|_| wrong_type(func, index, "non-negative int", &args[index]))
}

/// Strings pass through; numbers and booleans are formatted.
pub fn str_arg(func: &str, args: &[Value], index: usize) -> Result<String> {
    let v = arg(func, args, index)?;
    match v {
        Value::Str(s) => Ok(s.clone()),
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => Ok(v.to_string()),
        _ => Err(wrong_type(func, index, "string", v)),
    }
}

pub fn bool_arg(func: &str, args: &[Value], index: usize) -> Result<bool> {
    let v = arg(func, args, index)?;
    match v {
        Value::Bool(b) => Ok(*b),
        Value::Str(s) => s.parse().map_err(|_| wrong_type(func, index, "boolean", v)),
        _ => Err(wrong_type(func, index, "boolean", v)),
    }
}

/// Timestamps pass through; numbers are epoch nanoseconds.
pub fn time_arg(func: &str, args: &[Value], index: usize) -> Result<DateTime<Utc>> {
    let v = arg(func, args, index)?;
    match v {
        Value::Time(t) => Ok(*t),
        Value::Int(_) | Value::Float(_) => {
            let ns = v.as_f64().unwrap_or_default() as i64;
            Ok(DateTime::from_timestamp_nanos(ns))
        }
        _ => Err(wrong_type(func, index, "time", v)),
    }
}

pub fn list_arg<'a>(func: &str, args: &'a [Value], index: usize) -> Result<&'a [Value]> {
    let v = arg(func, args, index)?;
    v.as_list().ok_or_else(|| wrong_type(func, index, "list", v))
}

pub fn object_arg<T: Any + Send + Sync>(
    func: &str,
    args: &[Value],
    index: usize,
    expected: &str,
) -> Result<Arc<T>> {
    let v = arg(func, args, index)?;
    v.as_object()
        .and_then(|o| o.downcast_arc::<T>())
        .ok_or_else(|| wrong_type(func, index, expected, v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_messages() {
        let err = check_arity("TAKE", &vec![Value::Null; 2], 4, 4).unwrap_err();
        assert_eq!(err.to_string(), "f(TAKE) invalid number of args; expect:4, actual:2");
        let err = check_arity("POPKEY", &[], 3, 4).unwrap_err();
        assert_eq!(err.to_string(), "f(POPKEY) invalid number of args; expect:3~4, actual:0");
    }

    #[test]
    fn type_messages() {
        let args = [Value::Str("x".into()), Value::Bool(true)];
        let err = f64_arg("sin", &args, 0).unwrap_err();
        assert_eq!(err.to_string(), "f(sin) arg(0) should be float64, but string");
        assert_eq!(str_arg("tag", &args, 1).unwrap(), "true");
        assert!(object_arg::<String>("f", &args, 0, "context").is_err());
    }

    #[test]
    fn numbers_as_times() {
        let t = time_arg("time", &[Value::Float(1e9)], 0).unwrap();
        assert_eq!(t.timestamp(), 1);
    }
}
