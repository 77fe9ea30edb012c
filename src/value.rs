//! Dynamic values flowing through expressions and pipeline stages.
//!
//! A stage value is a scalar, an ordered sequence ([`Value::List`]) or a
//! sequence of sequences ([`Value::Matrix`]). Stages that need a particular
//! shape check it at their boundary and reject others with
//! [`crate::Error::Type`]. Anything that is not data (stage options, the stage
//! context, sources, sinks) travels as an [`Object`].

use crate::error::{Error, Result};
use crate::wire::Native;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// A shared, type-erased handle.
#[derive(Clone)]
pub struct Object {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Object {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            inner: value,
            type_name: short_type_name(std::any::type_name::<T>()),
        }
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    #[must_use]
    pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.inner).downcast::<T>().ok()
    }

    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.type_name)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Time(DateTime<Utc>),
    Ip(IpAddr),
    List(Vec<Value>),
    Matrix(Vec<Vec<Value>>),
    Object(Object),
}

impl Value {
    pub fn object<T: Any + Send + Sync>(value: T) -> Value {
        Value::Object(Object::new(value))
    }

    /// Kind name used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int64",
            Value::Float(_) => "float64",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Time(_) => "time",
            Value::Ip(_) => "ip",
            Value::List(_) => "list",
            Value::Matrix(_) => "matrix",
            Value::Object(o) => o.type_name(),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Downcast an object value.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_object().and_then(Object::downcast_ref::<T>)
    }

    /// Number of elements of a sequence; scalars count as one.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::List(l) => l.len(),
            Value::Matrix(m) => m.len(),
            Value::Str(s) => s.chars().count(),
            Value::Bytes(b) => b.len(),
            _ => 1,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert to a wire value for binding or appending.
    pub fn to_native(&self) -> Result<Native> {
        Ok(match self {
            Value::Null => Native::Null,
            Value::Bool(v) => Native::Bool(*v),
            Value::Int(v) => Native::I64(*v),
            Value::Float(v) => Native::F64(*v),
            Value::Str(v) => Native::Str(v.clone()),
            Value::Bytes(v) => Native::Bytes(v.clone()),
            Value::Time(v) => Native::Time(*v),
            Value::Ip(v) => Native::Ip(*v),
            other => {
                return Err(Error::Encode(format!(
                    "{} can not be sent to the database",
                    other.kind()
                )));
            }
        })
    }
}

impl From<Native> for Value {
    fn from(n: Native) -> Self {
        match n {
            Native::Null => Value::Null,
            Native::Bool(v) => Value::Bool(v),
            Native::I8(v) => Value::Int(i64::from(v)),
            Native::I16(v) => Value::Int(i64::from(v)),
            Native::I32(v) => Value::Int(i64::from(v)),
            Native::I64(v) => Value::Int(v),
            Native::U8(v) => Value::Int(i64::from(v)),
            Native::U16(v) => Value::Int(i64::from(v)),
            Native::U32(v) => Value::Int(i64::from(v)),
            Native::U64(v) => i64::try_from(v).map_or(Value::Float(v as f64), Value::Int),
            Native::F32(v) => Value::Float(f64::from(v)),
            Native::F64(v) => Value::Float(v),
            Native::Str(v) => Value::Str(v),
            Native::Bytes(v) => Value::Bytes(v),
            Native::Ip(v) => Value::Ip(v),
            Native::Time(v) => Value::Time(v),
        }
    }
}

macro_rules! value_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

value_from!(
    bool => Bool,
    i32 => Int,
    i64 => Int,
    f64 => Float,
    String => Str,
    &str => Str,
    DateTime<Utc> => Time,
    Vec<Value> => List,
);

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Ip(a), Value::Ip(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Matrix(a), Value::Matrix(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => f.write_str(v),
            Value::Bytes(v) => {
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Value::Time(v) => write!(f, "{}", v.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)),
            Value::Ip(v) => write!(f, "{v}"),
            Value::List(items) => write_seq(f, items),
            Value::Matrix(rows) => {
                f.write_str("[")?;
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write_seq(f, row)?;
                }
                f.write_str("]")
            }
            Value::Object(o) => write!(f, "{o:?}"),
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str("]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_equality_crosses_int_and_float() {
        assert_eq!(Value::Int(3), Value::Float(3.0));
        assert_ne!(Value::Int(3), Value::Str("3".into()));
    }

    #[test]
    fn objects_compare_by_identity() {
        let a = Object::new(5u8);
        let b = a.clone();
        assert_eq!(Value::Object(a), Value::Object(b));
        assert_ne!(Value::object(5u8), Value::object(5u8));
    }

    #[test]
    fn object_type_name_is_short() {
        let o = Object::new(String::from("x"));
        assert_eq!(o.type_name(), "String");
        assert_eq!(o.downcast_ref::<String>().map(String::as_str), Some("x"));
    }

    #[test]
    fn display_lists() {
        let v = Value::List(vec![Value::Int(1), Value::Float(2.5), "a".into()]);
        assert_eq!(v.to_string(), "[1 2.5 a]");
    }
}
