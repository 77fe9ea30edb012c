use super::Native;
use super::envelope::time_to_nanos;
use crate::error::{Error, Result};

/// One column of an append tuple.
///
/// Unlike [`super::Envelope`], this form keeps 64 bit values apart from the
/// 32 bit family so bulk payloads stay small.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    VInt32(i32),
    VUint32(u32),
    VInt64(i64),
    VUint64(u64),
    VFloat(f32),
    VDouble(f64),
    VString(String),
    VBool(bool),
    VBytes(Vec<u8>),
    VIp(String),
    /// Nanoseconds since the Unix epoch.
    VTime(i64),
    VNull,
}

/// Encode a row for the append stream.
///
/// # Errors
///
/// Returns [`Error::Encode`] for a time outside the nanosecond range.
pub fn encode_tuple(values: &[Native]) -> Result<Vec<Datum>> {
    values
        .iter()
        .map(|v| {
            Ok(match v {
            Native::Null => Datum::VNull,
            Native::Bool(v) => Datum::VBool(*v),
            Native::I8(v) => Datum::VInt32(i32::from(*v)),
            Native::I16(v) => Datum::VInt32(i32::from(*v)),
            Native::I32(v) => Datum::VInt32(*v),
            Native::I64(v) => Datum::VInt64(*v),
            Native::U8(v) => Datum::VUint32(u32::from(*v)),
            Native::U16(v) => Datum::VUint32(u32::from(*v)),
            Native::U32(v) => Datum::VUint32(*v),
            Native::U64(v) => Datum::VUint64(*v),
            Native::F32(v) => Datum::VFloat(*v),
            Native::F64(v) => Datum::VDouble(*v),
            Native::Str(v) => Datum::VString(v.clone()),
            Native::Bytes(v) => Datum::VBytes(v.clone()),
            Native::Ip(v) => Datum::VIp(v.to_string()),
            Native::Time(v) => Datum::VTime(time_to_nanos(v)?),
            })
        })
        .collect()
}

/// Decode an append tuple back into native values.
pub fn decode_tuple(tuple: &[Datum]) -> Result<Vec<Native>> {
    tuple
        .iter()
        .map(|d| {
            Ok(match d {
                Datum::VInt32(v) => Native::I32(*v),
                Datum::VUint32(v) => Native::U32(*v),
                Datum::VInt64(v) => Native::I64(*v),
                Datum::VUint64(v) => Native::U64(*v),
                Datum::VFloat(v) => Native::F32(*v),
                Datum::VDouble(v) => Native::F64(*v),
                Datum::VString(v) => Native::Str(v.clone()),
                Datum::VBool(v) => Native::Bool(*v),
                Datum::VBytes(v) => Native::Bytes(v.clone()),
                Datum::VIp(v) => Native::Ip(
                    v.parse()
                        .map_err(|e| Error::Decode(format!("invalid ip {v:?}: {e}")))?,
                ),
                Datum::VTime(ns) => Native::Time(Native::time_from_nanos(*ns)),
                Datum::VNull => Native::Null,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuple_keeps_width() {
        let t = vec![
            Datum::VInt32(1),
            Datum::VInt64(1 << 40),
            Datum::VFloat(1.5),
            Datum::VDouble(2.5),
            Datum::VIp("10.0.0.1".into()),
            Datum::VTime(99),
            Datum::VNull,
        ];
        let natives = decode_tuple(&t).unwrap();
        assert_eq!(encode_tuple(&natives).unwrap(), t);
    }

    #[test]
    fn bad_ip_is_decode_error() {
        let err = decode_tuple(&[Datum::VIp("nope".into())]).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
