//! Canned signals and rows.

use crate::value::Value;
use chrono::{DateTime, Utc};
use std::f64::consts::PI;

/// `n` samples of a unit sine at `hz`, sampled at `rate` per second from the epoch.
#[must_use]
pub fn sine_samples(n: usize, hz: f64, rate: f64) -> Vec<(DateTime<Utc>, f64)> {
    (0..n)
        .map(|i| {
            let t = i as f64 / rate;
            let ts = DateTime::from_timestamp_nanos((t * 1e9).round() as i64);
            (ts, (2.0 * PI * hz * t).sin())
        })
        .collect()
}

/// [`sine_samples`] as a `V` for `FFT`: a list of `[time, value]` pairs.
#[must_use]
pub fn sine_value(n: usize, hz: f64, rate: f64) -> Value {
    Value::List(
        sine_samples(n, hz, rate)
            .into_iter()
            .map(|(t, v)| Value::List(vec![Value::Time(t), Value::Float(v)]))
            .collect(),
    )
}

/// Tag rows `(name, time, value)` for database sink tests.
#[must_use]
pub fn tag_rows(tag: &str, n: usize) -> Vec<Vec<Value>> {
    (0..n)
        .map(|i| {
            vec![
                Value::from(tag),
                Value::Time(DateTime::from_timestamp_nanos(i as i64 * 1_000_000_000)),
                Value::Float(i as f64 * 0.5),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_starts_at_zero_and_peaks() {
        let s = sine_samples(1000, 1.0, 1000.0);
        assert_eq!(s[0].1, 0.0);
        assert!((s[250].1 - 1.0).abs() < 1e-9);
        assert_eq!(s[1].0, DateTime::from_timestamp_nanos(1_000_000));
        assert_eq!(tag_rows("t", 3)[2][2], Value::Float(1.0));
    }
}
