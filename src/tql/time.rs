//! Time primitives: durations, `now` arithmetic, rounding and ranges.

use crate::error::{Error, Result};
use crate::expr::args::{arg_error, check_arity, wrong_type};
use crate::value::Value;
use chrono::{DateTime, Duration, Utc};

const NANOS_PER_DAY: i64 = 24 * 3_600_000_000_000;

/// Parse a duration such as `1h23m45s`, `-2.5ms`, `500us` or `-1d2h3m4s`
/// into nanoseconds. A leading `Nd` counts whole days.
pub fn parse_duration(text: &str) -> Result<i64> {
    let text = text.trim();
    let invalid = || Error::Type(format!("invalid duration {text:?}"));
    let (negative, body) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    if body == "0" {
        return Ok(0);
    }
    if body.is_empty() {
        return Err(invalid());
    }

    let mut total: f64 = 0.0;
    let mut rest = body;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if num_len == 0 {
            return Err(invalid());
        }
        let n: f64 = rest[..num_len].parse().map_err(|_| invalid())?;
        rest = &rest[num_len..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "d" => NANOS_PER_DAY as f64,
            _ => return Err(invalid()),
        };
        total += n * scale;
        rest = &rest[unit_len..];
    }
    if total > i64::MAX as f64 {
        return Err(invalid());
    }
    let ns = total.round() as i64;
    Ok(if negative { -ns } else { ns })
}

/// Strings are parsed as durations, numbers are nanoseconds.
pub fn to_duration(v: &Value) -> Result<i64> {
    match v {
        Value::Str(s) => parse_duration(s),
        Value::Int(n) => Ok(*n),
        Value::Float(f) => Ok(*f as i64),
        other => Err(Error::Type(format!("{} is not a duration", other.kind()))),
    }
}

/// `now`, `now+dur`, `now - dur` or an RFC 3339 timestamp.
pub fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix("now") {
        let now = Utc::now();
        let rest = rest.trim();
        if rest.is_empty() {
            return Ok(now);
        }
        let (sign, dur) = if let Some(d) = rest.strip_prefix('+') {
            (1, d)
        } else if let Some(d) = rest.strip_prefix('-') {
            (-1, d)
        } else {
            return Err(Error::Type(format!("invalid time expression {text:?}")));
        };
        let ns = parse_duration(dur)?;
        return Ok(now + Duration::nanoseconds(sign * ns));
    }
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| Error::Type(format!("invalid time expression {text:?}")))
}

/// Timestamps pass through, numbers are epoch nanoseconds, strings go
/// through [`parse_time`].
pub fn to_time(v: &Value) -> Result<DateTime<Utc>> {
    match v {
        Value::Time(t) => Ok(*t),
        Value::Int(n) => Ok(DateTime::from_timestamp_nanos(*n)),
        Value::Float(f) => Ok(DateTime::from_timestamp_nanos(*f as i64)),
        Value::Str(s) => parse_time(s),
        other => Err(Error::Type(format!("{} is not a time", other.kind()))),
    }
}

/// Nanoseconds since the epoch; fails outside roughly 1677..2262.
pub fn nanos(t: &DateTime<Utc>) -> Result<i64> {
    t.timestamp_nanos_opt()
        .ok_or_else(|| Error::Type(format!("time {t} is out of the nanosecond range")))
}

/// Floor `t` to a multiple of `dur` nanoseconds.
pub fn round_time(t: DateTime<Utc>, dur: i64) -> Result<DateTime<Utc>> {
    if dur == 0 {
        return Err(arg_error("roundTime", 1, "zero duration is not allowed"));
    }
    let ns = nanos(&t)?;
    let dur = dur.abs();
    Ok(DateTime::from_timestamp_nanos(ns.div_euclid(dur) * dur))
}

/// A window of `duration` starting (or, when negative, ending) at `time`,
/// optionally sampled every `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub time: DateTime<Utc>,
    pub duration: i64,
    pub period: i64,
}

impl TimeRange {
    /// `[from, to)` in nanoseconds.
    pub fn bounds(&self) -> Result<(i64, i64)> {
        let base = nanos(&self.time)?;
        Ok(if self.duration < 0 {
            (base.saturating_add(self.duration), base)
        } else {
            (base, base.saturating_add(self.duration))
        })
    }
}

pub(crate) fn fn_time(args: &[Value]) -> Result<Value> {
    check_arity("time", args, 1, 1)?;
    to_time(&args[0])
        .map(Value::Time)
        .map_err(|_| wrong_type("time", 0, "time", &args[0]))
}

pub(crate) fn fn_time_add(args: &[Value]) -> Result<Value> {
    check_arity("timeAdd", args, 2, 2)?;
    let t = to_time(&args[0]).map_err(|e| arg_error("timeAdd", 0, e))?;
    let delta = to_duration(&args[1]).map_err(|e| arg_error("timeAdd", 1, e))?;
    Ok(Value::Time(t + Duration::nanoseconds(delta)))
}

pub(crate) fn fn_round_time(args: &[Value]) -> Result<Value> {
    check_arity("roundTime", args, 2, 2)?;
    let dur = to_duration(&args[1]).map_err(|e| arg_error("roundTime", 1, e))?;
    let t = to_time(&args[0]).map_err(|e| arg_error("roundTime", 0, e))?;
    round_time(t, dur).map(Value::Time)
}

pub(crate) fn fn_range(args: &[Value]) -> Result<Value> {
    check_arity("range", args, 2, 3)?;
    let time = to_time(&args[0]).map_err(|_| wrong_type("range", 0, "time", &args[0]))?;
    nanos(&time).map_err(|err| arg_error("range", 0, err.to_string()))?;
    let duration = to_duration(&args[1]).map_err(|_| wrong_type("range", 1, "duration", &args[1]))?;
    let mut period = 0;
    if let Some(p) = args.get(2) {
        period = to_duration(p).map_err(|_| wrong_type("range", 2, "period", p))?;
        if duration.unsigned_abs() <= period.unsigned_abs() {
            return Err(arg_error("range", 2, "period should be smaller than duration"));
        }
    }
    Ok(Value::object(TimeRange {
        time,
        duration,
        period,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("1h23m45s").unwrap(), 5_025_000_000_000);
        assert_eq!(parse_duration("2.34s").unwrap(), 2_340_000_000);
        assert_eq!(parse_duration("0.5ms").unwrap(), 500_000);
        assert_eq!(parse_duration("-1d2h3m4s").unwrap(), -(NANOS_PER_DAY + 7_384_000_000_000));
        assert_eq!(parse_duration("0").unwrap(), 0);
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("s").is_err());
    }

    #[test]
    fn now_arithmetic() {
        let before = Utc::now();
        let t = parse_time("now - 1h").unwrap();
        assert!(t <= before - Duration::minutes(59));
        assert!(parse_time("now * 2").is_err());
    }

    #[test]
    fn round_time_floors() {
        let dur = 1_000_000_000;
        for ns in [-1_500_000_000i64, -1, 0, 1, 1_999_999_999] {
            let t = DateTime::from_timestamp_nanos(ns);
            let r = round_time(t, dur).unwrap();
            assert!(r <= t);
            assert!(nanos(&t).unwrap() - nanos(&r).unwrap() < dur);
        }
        let far = DateTime::parse_from_rfc3339("2300-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        assert!(round_time(far, dur).is_err());
        assert!(fn_range(&[Value::Time(far), Value::from("1s")]).is_err());
        let err = round_time(Utc::now(), 0).unwrap_err();
        assert_eq!(err.to_string(), "f(roundTime): arg(1) zero duration is not allowed");
    }

    #[test]
    fn range_period_must_be_smaller() {
        let ok = fn_range(&["now".into(), "10s".into(), "1s".into()]).unwrap();
        assert_eq!(ok.downcast_ref::<TimeRange>().unwrap().period, 1_000_000_000);
        assert!(fn_range(&["now".into(), "1s".into(), "1s".into()]).is_err());
    }
}
