//! `FFT(minHz(..)?, maxHz(..)?)`: amplitude spectrum of `(time, value)` samples.

use super::emit;
use crate::error::{Error, Result};
use crate::expr::args::{check_arity, f64_arg};
use crate::tql::time::nanos;
use crate::value::Value;
use std::f64::consts::PI;

const MIN_SAMPLES: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct MinHz(pub f64);

#[derive(Debug, Clone, Copy)]
pub struct MaxHz(pub f64);

pub(crate) fn fn_min_hz(args: &[Value]) -> Result<Value> {
    check_arity("minHz", args, 1, 1)?;
    Ok(Value::object(MinHz(f64_arg("minHz", args, 0)?)))
}

pub(crate) fn fn_max_hz(args: &[Value]) -> Result<Value> {
    check_arity("maxHz", args, 1, 1)?;
    Ok(Value::object(MaxHz(f64_arg("maxHz", args, 0)?)))
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Complex {
    re: f64,
    im: f64,
}

impl Complex {
    fn abs(self) -> f64 {
        self.re.hypot(self.im)
    }
}

/// In-place iterative radix-2 transform. `buf.len()` must be a power of two.
fn radix2(buf: &mut [Complex]) {
    let n = buf.len();
    let mut j = 0;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            buf.swap(i, j);
        }
    }
    let mut len = 2;
    while len <= n {
        let angle = -2.0 * PI / len as f64;
        for start in (0..n).step_by(len) {
            for k in 0..len / 2 {
                let (s, c) = (angle * k as f64).sin_cos();
                let a = buf[start + k];
                let b = buf[start + k + len / 2];
                let t = Complex {
                    re: b.re * c - b.im * s,
                    im: b.re * s + b.im * c,
                };
                buf[start + k] = Complex {
                    re: a.re + t.re,
                    im: a.im + t.im,
                };
                buf[start + k + len / 2] = Complex {
                    re: a.re - t.re,
                    im: a.im - t.im,
                };
            }
        }
        len <<= 1;
    }
}

/// The first `n/2 + 1` coefficients of the DFT of real `samples`.
fn coefficients(samples: &[f64]) -> Vec<Complex> {
    let n = samples.len();
    let half = n / 2 + 1;
    if n.is_power_of_two() {
        let mut buf: Vec<Complex> = samples.iter().map(|&re| Complex { re, im: 0.0 }).collect();
        radix2(&mut buf);
        buf.truncate(half);
        return buf;
    }
    (0..half)
        .map(|k| {
            let mut acc = Complex { re: 0.0, im: 0.0 };
            for (t, &x) in samples.iter().enumerate() {
                let angle = -2.0 * PI * ((k * t) % n) as f64 / n as f64;
                acc.re += x * angle.cos();
                acc.im += x * angle.sin();
            }
            acc
        })
        .collect()
}

fn sample(i: usize, v: &Value) -> Result<(i64, f64)> {
    let bad = || Error::Type(format!("f(FFT) sample should be a tuple of (time, value), but {}", v.kind()));
    let tuple = v.as_list().ok_or_else(bad)?;
    let [t, x, ..] = tuple else {
        return Err(bad());
    };
    let t = match t {
        Value::Time(t) => nanos(t)?,
        Value::Int(ns) => *ns,
        other => {
            return Err(Error::Type(format!(
                "f(FFT) invalid {i}th sample time, but {}",
                other.kind()
            )));
        }
    };
    let x = x.as_f64().ok_or_else(|| {
        Error::Type(format!("f(FFT) invalid {i}th sample value, but {}", x.kind()))
    })?;
    Ok((t, x))
}

pub(crate) fn fn_fft(args: &[Value]) -> Result<Value> {
    check_arity("FFT", args, 3, 5)?;
    let Value::List(samples) = &args[2] else {
        return Err(Error::Type(format!("f(FFT) V should be []any, but {}", args[2].kind())));
    };
    let mut min_hz = f64::NEG_INFINITY;
    let mut max_hz = f64::INFINITY;
    for opt in &args[3..] {
        if let Some(MinHz(hz)) = opt.downcast_ref::<MinHz>() {
            min_hz = *hz;
        } else if let Some(MaxHz(hz)) = opt.downcast_ref::<MaxHz>() {
            max_hz = *hz;
        } else {
            return Err(crate::expr::args::wrong_type("FFT", 3, "minHz() or maxHz()", opt));
        }
    }
    if samples.len() < MIN_SAMPLES {
        return Ok(Value::Null);
    }

    let n = samples.len();
    let mut times = Vec::with_capacity(n);
    let mut values = Vec::with_capacity(n);
    for (i, s) in samples.iter().enumerate() {
        let (t, x) = sample(i, s)?;
        times.push(t);
        values.push(x);
    }
    let secs = (times[n - 1] - times[0]) as f64 / 1e9;
    if secs <= 0.0 {
        return Err(Error::pipeline("f(FFT)", "samples should span a positive duration"));
    }

    let spectrum: Vec<Vec<Value>> = coefficients(&values)
        .into_iter()
        .enumerate()
        .filter_map(|(i, c)| {
            let hz = i as f64 / secs;
            if hz == 0.0 || hz < min_hz || hz > max_hz {
                return None;
            }
            let amplitude = c.abs() * 2.0 / n as f64;
            Some(vec![Value::Float(hz), Value::Float(amplitude)])
        })
        .collect();
    Ok(emit(args[1].clone(), Value::Matrix(spectrum)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tql::context::Param;
    use chrono::DateTime;

    fn sine(n: usize, hz: f64, rate: f64) -> Value {
        Value::List(
            (0..n)
                .map(|i| {
                    let t = i as f64 / rate;
                    Value::List(vec![
                        Value::Time(DateTime::from_timestamp_nanos((t * 1e9).round() as i64)),
                        Value::Float((2.0 * PI * hz * t).sin()),
                    ])
                })
                .collect(),
        )
    }

    #[test]
    fn radix2_matches_direct_dft() {
        let samples: Vec<f64> = (0..64).map(|i| ((i * 7) % 13) as f64 - 6.0).collect();
        let fast = coefficients(&samples);
        let direct: Vec<Complex> = (0..33)
            .map(|k| {
                let mut acc = Complex { re: 0.0, im: 0.0 };
                for (t, &x) in samples.iter().enumerate() {
                    let a = -2.0 * PI * (k * t) as f64 / 64.0;
                    acc.re += x * a.cos();
                    acc.im += x * a.sin();
                }
                acc
            })
            .collect();
        assert_eq!(fast.len(), direct.len());
        for (a, b) in fast.iter().zip(&direct) {
            assert!((a.re - b.re).abs() < 1e-9 && (a.im - b.im).abs() < 1e-9);
        }
        assert_eq!(coefficients(&samples[..63]).len(), 32);
    }

    #[test]
    fn dominant_bin() {
        let args = [
            Value::Null,
            "sig".into(),
            sine(1000, 50.0, 1000.0),
            fn_min_hz(&[40.0.into()]).unwrap(),
            fn_max_hz(&[60.0.into()]).unwrap(),
        ];
        let out = fn_fft(&args).unwrap();
        let p = out.downcast_ref::<Param>().unwrap();
        let Value::Matrix(bins) = &p.v else { panic!("{:?}", p.v) };
        assert!(bins.iter().all(|b| (40.0..=60.0).contains(&b[0].as_f64().unwrap())));
        let peak = bins
            .iter()
            .max_by(|a, b| a[1].as_f64().unwrap().total_cmp(&b[1].as_f64().unwrap()))
            .unwrap();
        assert!((peak[0].as_f64().unwrap() - 50.0).abs() < 0.5);
        assert!((peak[1].as_f64().unwrap() - 1.0).abs() < 0.05);
    }

    #[test]
    fn short_input_is_dropped() {
        let args = [Value::Null, "sig".into(), sine(15, 50.0, 1000.0)];
        assert!(fn_fft(&args).unwrap().is_null());
        let bad = [Value::Null, "sig".into(), Value::Int(1)];
        assert!(matches!(fn_fft(&bad), Err(Error::Type(_))));
    }
}
