use super::Native;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};

/// Discriminator of an [`Envelope`]. The declaration order is the fixed total
/// order of tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tag {
    Null,
    Bool,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Float,
    Double,
    String,
    Bytes,
    Time,
}

impl Tag {
    const ALL: [Tag; 11] = [
        Tag::Null,
        Tag::Bool,
        Tag::Int32,
        Tag::Int64,
        Tag::Uint32,
        Tag::Uint64,
        Tag::Float,
        Tag::Double,
        Tag::String,
        Tag::Bytes,
        Tag::Time,
    ];

    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Tag> {
        Tag::ALL.get(code as usize).copied()
    }
}

/// A value as it travels on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Uint32(u32),
    Uint64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Nanoseconds since the Unix epoch.
    Time(i64),
    /// A tag this client does not know; kept verbatim for the caller to reject.
    Opaque { code: u8, payload: Vec<u8> },
}

impl Envelope {
    /// `None` for an opaque envelope.
    #[must_use]
    pub fn tag(&self) -> Option<Tag> {
        Some(match self {
            Envelope::Null => Tag::Null,
            Envelope::Bool(_) => Tag::Bool,
            Envelope::Int32(_) => Tag::Int32,
            Envelope::Int64(_) => Tag::Int64,
            Envelope::Uint32(_) => Tag::Uint32,
            Envelope::Uint64(_) => Tag::Uint64,
            Envelope::Float(_) => Tag::Float,
            Envelope::Double(_) => Tag::Double,
            Envelope::String(_) => Tag::String,
            Envelope::Bytes(_) => Tag::Bytes,
            Envelope::Time(_) => Tag::Time,
            Envelope::Opaque { .. } => return None,
        })
    }

    /// Serialize as `[code][payload]`, payloads little-endian, strings and
    /// bytes length-prefixed with a u32.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            Envelope::Opaque { code, payload } => {
                buf.push(*code);
                put_len_prefixed(buf, payload);
                return;
            }
            other => buf.push(other.tag().map_or(u8::MAX, Tag::code)),
        }
        match self {
            Envelope::Null | Envelope::Opaque { .. } => {}
            Envelope::Bool(v) => buf.push(u8::from(*v)),
            Envelope::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Envelope::Int64(v) | Envelope::Time(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Envelope::Uint32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Envelope::Uint64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Envelope::Float(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Envelope::Double(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Envelope::String(v) => put_len_prefixed(buf, v.as_bytes()),
            Envelope::Bytes(v) => put_len_prefixed(buf, v),
        }
    }

    /// Inverse of [`Envelope::write_to`]. Returns the envelope and the number
    /// of bytes consumed. Unknown codes come back as [`Envelope::Opaque`].
    pub fn read_from(buf: &[u8]) -> Result<(Envelope, usize)> {
        let (&code, rest) = buf
            .split_first()
            .ok_or_else(|| Error::Decode("empty buffer".into()))?;
        let Some(tag) = Tag::from_code(code) else {
            let (payload, n) = take_len_prefixed(rest)?;
            return Ok((
                Envelope::Opaque {
                    code,
                    payload: payload.to_vec(),
                },
                1 + n,
            ));
        };
        let (env, n) = match tag {
            Tag::Null => (Envelope::Null, 0),
            Tag::Bool => (Envelope::Bool(take::<1>(rest)?[0] != 0), 1),
            Tag::Int32 => (Envelope::Int32(i32::from_le_bytes(take::<4>(rest)?)), 4),
            Tag::Int64 => (Envelope::Int64(i64::from_le_bytes(take::<8>(rest)?)), 8),
            Tag::Uint32 => (Envelope::Uint32(u32::from_le_bytes(take::<4>(rest)?)), 4),
            Tag::Uint64 => (Envelope::Uint64(u64::from_le_bytes(take::<8>(rest)?)), 8),
            Tag::Float => (Envelope::Float(f32::from_le_bytes(take::<4>(rest)?)), 4),
            Tag::Double => (Envelope::Double(f64::from_le_bytes(take::<8>(rest)?)), 8),
            Tag::Time => (Envelope::Time(i64::from_le_bytes(take::<8>(rest)?)), 8),
            Tag::String => {
                let (bytes, n) = take_len_prefixed(rest)?;
                let s = String::from_utf8(bytes.to_vec())
                    .map_err(|e| Error::Decode(format!("invalid utf-8 string: {e}")))?;
                (Envelope::String(s), n)
            }
            Tag::Bytes => {
                let (bytes, n) = take_len_prefixed(rest)?;
                (Envelope::Bytes(bytes.to_vec()), n)
            }
        };
        Ok((env, 1 + n))
    }
}

fn put_len_prefixed(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
}

fn take<const N: usize>(buf: &[u8]) -> Result<[u8; N]> {
    buf.get(..N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| Error::Decode(format!("short buffer, need {N} bytes")))
}

fn take_len_prefixed(buf: &[u8]) -> Result<(&[u8], usize)> {
    let len = u32::from_le_bytes(take::<4>(buf)?) as usize;
    let data = buf
        .get(4..4 + len)
        .ok_or_else(|| Error::Decode(format!("short buffer, need {len} payload bytes")))?;
    Ok((data, 4 + len))
}

/// Encode one native value.
///
/// # Errors
///
/// Returns [`Error::Encode`] for a time outside the nanosecond range
/// (roughly years 1677 to 2262).
pub fn encode(value: &Native) -> Result<Envelope> {
    Ok(match value {
        Native::Null => Envelope::Null,
        Native::Bool(v) => Envelope::Bool(*v),
        Native::I8(v) => Envelope::Int32(i32::from(*v)),
        Native::I16(v) => Envelope::Int32(i32::from(*v)),
        Native::I32(v) => Envelope::Int32(*v),
        Native::I64(v) => Envelope::Int64(*v),
        Native::U8(v) => Envelope::Uint32(u32::from(*v)),
        Native::U16(v) => Envelope::Uint32(u32::from(*v)),
        Native::U32(v) => Envelope::Uint32(*v),
        Native::U64(v) => Envelope::Uint64(*v),
        Native::F32(v) => Envelope::Float(*v),
        Native::F64(v) => Envelope::Double(*v),
        Native::Str(v) => Envelope::String(v.clone()),
        Native::Bytes(v) => Envelope::Bytes(v.clone()),
        Native::Ip(v) => Envelope::String(v.to_string()),
        Native::Time(v) => Envelope::Time(time_to_nanos(v)?),
    })
}

pub fn encode_all(values: &[Native]) -> Result<Vec<Envelope>> {
    values.iter().map(encode).collect()
}

/// Decode an envelope, handing opaque envelopes back untouched.
pub fn decode_envelope(env: Envelope) -> std::result::Result<Native, Envelope> {
    Ok(match env {
        Envelope::Null => Native::Null,
        Envelope::Bool(v) => Native::Bool(v),
        Envelope::Int32(v) => Native::I32(v),
        Envelope::Int64(v) => Native::I64(v),
        Envelope::Uint32(v) => Native::U32(v),
        Envelope::Uint64(v) => Native::U64(v),
        Envelope::Float(v) => Native::F32(v),
        Envelope::Double(v) => Native::F64(v),
        Envelope::String(v) => Native::Str(v),
        Envelope::Bytes(v) => Native::Bytes(v),
        Envelope::Time(ns) => Native::Time(Native::time_from_nanos(ns)),
        opaque @ Envelope::Opaque { .. } => return Err(opaque),
    })
}

/// Decode an envelope, rejecting unknown tags with [`Error::Decode`].
pub fn decode(env: Envelope) -> Result<Native> {
    decode_envelope(env).map_err(|opaque| match opaque {
        Envelope::Opaque { code, .. } => Error::Decode(format!("unknown wire tag {code}")),
        other => Error::Decode(format!("unexpected envelope {other:?}")),
    })
}

pub(crate) fn time_to_nanos(t: &DateTime<Utc>) -> Result<i64> {
    t.timestamp_nanos_opt()
        .ok_or_else(|| Error::Encode(format!("time {t} is out of the nanosecond range")))
}
