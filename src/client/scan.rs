use crate::error::{Error, Result};
use crate::wire::Native;
use chrono::{DateTime, Utc};
use std::net::IpAddr;

/// A destination that can be filled from a fetched column value.
pub trait ScanTarget {
    /// Store `src` into `self`; `false` when the kinds are incompatible.
    fn assign(&mut self, src: &Native) -> bool;

    /// Name of the destination kind, used in [`Error::Scan`].
    fn expected(&self) -> &'static str;
}

/// Fill `dst` from `src` column by column.
pub fn scan_values(src: &[Native], dst: &mut [&mut dyn ScanTarget]) -> Result<()> {
    if dst.len() > src.len() {
        return Err(Error::Scan {
            column: src.len(),
            expected: format!("{} columns", dst.len()),
            actual: format!("{} columns", src.len()),
        });
    }
    for (column, (value, target)) in src.iter().zip(dst.iter_mut()).enumerate() {
        if !target.assign(value) {
            return Err(Error::Scan {
                column,
                expected: target.expected().to_string(),
                actual: value.kind().to_string(),
            });
        }
    }
    Ok(())
}

fn as_i128(src: &Native) -> Option<i128> {
    Some(match src {
        Native::I8(v) => i128::from(*v),
        Native::I16(v) => i128::from(*v),
        Native::I32(v) => i128::from(*v),
        Native::I64(v) => i128::from(*v),
        Native::U8(v) => i128::from(*v),
        Native::U16(v) => i128::from(*v),
        Native::U32(v) => i128::from(*v),
        Native::U64(v) => i128::from(*v),
        _ => return None,
    })
}

macro_rules! scan_integer {
    ($($t:ty => $name:literal),*) => {
        $(
            impl ScanTarget for $t {
                fn assign(&mut self, src: &Native) -> bool {
                    match as_i128(src).and_then(|v| <$t>::try_from(v).ok()) {
                        Some(v) => {
                            *self = v;
                            true
                        }
                        None => false,
                    }
                }

                fn expected(&self) -> &'static str {
                    $name
                }
            }
        )*
    };
}

scan_integer!(
    i8 => "int8", i16 => "int16", i32 => "int32", i64 => "int64",
    u8 => "uint8", u16 => "uint16", u32 => "uint32", u64 => "uint64"
);

impl ScanTarget for f64 {
    fn assign(&mut self, src: &Native) -> bool {
        *self = match src {
            Native::F64(v) => *v,
            Native::F32(v) => f64::from(*v),
            other => match as_i128(other) {
                Some(v) => v as f64,
                None => return false,
            },
        };
        true
    }

    fn expected(&self) -> &'static str {
        "float64"
    }
}

impl ScanTarget for f32 {
    fn assign(&mut self, src: &Native) -> bool {
        *self = match src {
            Native::F32(v) => *v,
            Native::F64(v) => *v as f32,
            other => match as_i128(other) {
                Some(v) => v as f32,
                None => return false,
            },
        };
        true
    }

    fn expected(&self) -> &'static str {
        "float32"
    }
}

impl ScanTarget for bool {
    fn assign(&mut self, src: &Native) -> bool {
        match src {
            Native::Bool(v) => {
                *self = *v;
                true
            }
            _ => false,
        }
    }

    fn expected(&self) -> &'static str {
        "bool"
    }
}

impl ScanTarget for String {
    fn assign(&mut self, src: &Native) -> bool {
        match src {
            Native::Null | Native::Bytes(_) => false,
            Native::Str(v) => {
                self.clone_from(v);
                true
            }
            other => {
                *self = other.to_string();
                true
            }
        }
    }

    fn expected(&self) -> &'static str {
        "string"
    }
}

impl ScanTarget for Vec<u8> {
    fn assign(&mut self, src: &Native) -> bool {
        match src {
            Native::Bytes(v) => self.clone_from(v),
            Native::Str(v) => *self = v.as_bytes().to_vec(),
            _ => return false,
        }
        true
    }

    fn expected(&self) -> &'static str {
        "bytes"
    }
}

impl ScanTarget for DateTime<Utc> {
    fn assign(&mut self, src: &Native) -> bool {
        match src {
            Native::Time(v) => *self = *v,
            Native::I64(ns) => *self = Native::time_from_nanos(*ns),
            _ => return false,
        }
        true
    }

    fn expected(&self) -> &'static str {
        "datetime"
    }
}

impl ScanTarget for IpAddr {
    fn assign(&mut self, src: &Native) -> bool {
        match src {
            Native::Ip(v) => {
                *self = *v;
                true
            }
            Native::Str(v) => match v.parse() {
                Ok(ip) => {
                    *self = ip;
                    true
                }
                Err(_) => false,
            },
            _ => false,
        }
    }

    fn expected(&self) -> &'static str {
        "ip"
    }
}

impl ScanTarget for Native {
    fn assign(&mut self, src: &Native) -> bool {
        self.clone_from(src);
        true
    }

    fn expected(&self) -> &'static str {
        "any"
    }
}

impl<T: ScanTarget + Default> ScanTarget for Option<T> {
    fn assign(&mut self, src: &Native) -> bool {
        if src.is_null() {
            *self = None;
            return true;
        }
        let mut inner = T::default();
        if inner.assign(src) {
            *self = Some(inner);
            true
        } else {
            false
        }
    }

    fn expected(&self) -> &'static str {
        T::default().expected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_mixed_row() {
        let t = Native::time_from_nanos(1);
        let src = vec![Native::Str("tag".into()), Native::Time(t), Native::F64(3.14)];
        let mut name = String::new();
        let mut ts = DateTime::<Utc>::default();
        let mut value = 0.0f64;
        scan_values(&src, &mut [&mut name, &mut ts, &mut value]).unwrap();
        assert_eq!(name, "tag");
        assert_eq!(ts, t);
        assert!((value - 3.14).abs() < f64::EPSILON);
    }

    #[test]
    fn mismatch_names_column_and_kinds() {
        let src = vec![Native::Str("x".into()), Native::Str("y".into())];
        let mut a = String::new();
        let mut b = 0i64;
        let err = scan_values(&src, &mut [&mut a, &mut b]).unwrap_err();
        assert_eq!(
            err,
            Error::Scan {
                column: 1,
                expected: "int64".into(),
                actual: "string".into()
            }
        );
    }

    #[test]
    fn narrowing_out_of_range_fails() {
        let mut small = 0i8;
        assert!(!small.assign(&Native::I64(1000)));
        assert!(small.assign(&Native::I32(-5)));
        assert_eq!(small, -5);
    }

    #[test]
    fn option_accepts_null() {
        let mut v: Option<f64> = Some(1.0);
        assert!(v.assign(&Native::Null));
        assert_eq!(v, None);
    }
}
