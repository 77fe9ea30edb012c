//! Typed value codec used on every RPC.
//!
//! Native values ([`Native`]) are what callers bind as SQL parameters and what
//! scan destinations are filled from. On the wire they travel as an
//! [`Envelope`], a closed set of tagged payloads. The bulk-append path uses a
//! separate, width-preserving tuple form ([`Datum`]).
//!
//! Encoding rules:
//!
//! - signed 8/16/32 bit integers widen to `Int32`, 64 bit stays `Int64`
//! - unsigned 8/16/32 bit integers widen to `Uint32`, 64 bit stays `Uint64`
//! - IP addresses travel as their canonical string
//! - timestamps travel as nanoseconds since the Unix epoch

mod envelope;
mod tuple;

pub use envelope::{Envelope, Tag, decode, decode_envelope, encode, encode_all};
pub use tuple::{Datum, decode_tuple, encode_tuple};

use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use std::any::Any;
use std::fmt;
use std::net::IpAddr;

/// A native scalar as seen by client code.
#[derive(Debug, Clone, PartialEq)]
pub enum Native {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    Ip(IpAddr),
    Time(DateTime<Utc>),
}

impl Native {
    /// Short kind name used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Native::Null => "null",
            Native::Bool(_) => "bool",
            Native::I8(_) => "int8",
            Native::I16(_) => "int16",
            Native::I32(_) => "int32",
            Native::I64(_) => "int64",
            Native::U8(_) => "uint8",
            Native::U16(_) => "uint16",
            Native::U32(_) => "uint32",
            Native::U64(_) => "uint64",
            Native::F32(_) => "float32",
            Native::F64(_) => "float64",
            Native::Str(_) => "string",
            Native::Bytes(_) => "bytes",
            Native::Ip(_) => "ip",
            Native::Time(_) => "datetime",
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Native::Null)
    }

    /// Encode an arbitrary value by inspecting its concrete type.
    ///
    /// `Option<T>` of a supported type maps to the inner value or `Null`.
    /// Anything else is an [`Error::Encode`].
    pub fn from_any(value: &dyn Any) -> Result<Native> {
        macro_rules! try_types {
            ($($t:ty),*) => {
                $(
                    if let Some(v) = value.downcast_ref::<$t>() {
                        return Ok(Native::from(v.clone()));
                    }
                    if let Some(v) = value.downcast_ref::<Option<$t>>() {
                        return Ok(v.clone().map_or(Native::Null, Native::from));
                    }
                )*
            };
        }
        try_types!(
            bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, String, Vec<u8>,
            IpAddr, DateTime<Utc>
        );
        if let Some(v) = value.downcast_ref::<&str>() {
            return Ok(Native::Str((*v).to_string()));
        }
        if let Some(v) = value.downcast_ref::<Native>() {
            return Ok(v.clone());
        }
        if value.downcast_ref::<()>().is_some() {
            return Ok(Native::Null);
        }
        Err(Error::Encode(format!("unsupported native type {:?}", value.type_id())))
    }

    /// Nanoseconds since the epoch for a timestamp.
    #[must_use]
    pub fn time_from_nanos(ns: i64) -> DateTime<Utc> {
        Utc.timestamp_nanos(ns)
    }
}

impl fmt::Display for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Native::Null => write!(f, "NULL"),
            Native::Bool(v) => write!(f, "{v}"),
            Native::I8(v) => write!(f, "{v}"),
            Native::I16(v) => write!(f, "{v}"),
            Native::I32(v) => write!(f, "{v}"),
            Native::I64(v) => write!(f, "{v}"),
            Native::U8(v) => write!(f, "{v}"),
            Native::U16(v) => write!(f, "{v}"),
            Native::U32(v) => write!(f, "{v}"),
            Native::U64(v) => write!(f, "{v}"),
            Native::F32(v) => write!(f, "{v}"),
            Native::F64(v) => write!(f, "{v}"),
            Native::Str(v) => write!(f, "{v}"),
            Native::Bytes(v) => write!(f, "{v:?}"),
            Native::Ip(v) => write!(f, "{v}"),
            Native::Time(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

macro_rules! native_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Native {
                fn from(v: $t) -> Self {
                    Native::$variant(v)
                }
            }
        )*
    };
}

native_from!(
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => Str,
    Vec<u8> => Bytes,
    IpAddr => Ip,
    DateTime<Utc> => Time,
);

impl From<isize> for Native {
    fn from(v: isize) -> Self {
        Native::I64(v as i64)
    }
}

impl From<usize> for Native {
    fn from(v: usize) -> Self {
        Native::U64(v as u64)
    }
}

impl From<&str> for Native {
    fn from(v: &str) -> Self {
        Native::Str(v.to_string())
    }
}

impl From<&[u8]> for Native {
    fn from(v: &[u8]) -> Self {
        Native::Bytes(v.to_vec())
    }
}

impl<T: Into<Native>> From<Option<T>> for Native {
    fn from(v: Option<T>) -> Self {
        v.map_or(Native::Null, Into::into)
    }
}

/// Build a parameter list from heterogeneous values.
///
/// ```
/// use tagflow::params;
/// let args = params!["query1", 10_i64, 3.14];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! params {
    () => { Vec::<$crate::wire::Native>::new() };
    ($($v:expr),+ $(,)?) => {
        vec![$($crate::wire::Native::from($v)),+]
    };
}
