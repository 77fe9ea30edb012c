//! `FAKE(generator)`: synthetic rows for demos and tests.
//!
//! The generator is `linspace(...)`, `meshgrid(...)`, `oscillator(...)` or
//! `sphere(...)`. Each produces a finite lazy sequence.

use super::{RowStream, Rows, Source, SourceEnv, SourceRef, cancellable};
use crate::client::{Column, Columns, DataType};
use crate::error::{Error, Result};
use crate::expr::args::{check_arity, f64_arg, usize_arg, wrong_type};
use crate::tql::time::TimeRange;
use crate::value::Value;
use chrono::DateTime;
use std::f64::consts::PI;

/// `freq(hz, amplitude, bias?, phase?)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Freq {
    pub hertz: f64,
    pub amplitude: f64,
    pub bias: f64,
    pub phase: f64,
}

impl Freq {
    /// Sample at `t` seconds.
    #[must_use]
    pub fn value(&self, t: f64) -> f64 {
        self.amplitude * (2.0 * PI * self.hertz * t + self.phase).sin() + self.bias
    }
}

pub(crate) fn fn_freq(args: &[Value]) -> Result<Value> {
    check_arity("freq", args, 2, 4)?;
    Ok(Value::object(Freq {
        hertz: f64_arg("freq", args, 0)?,
        amplitude: f64_arg("freq", args, 1)?,
        bias: if args.len() > 2 { f64_arg("freq", args, 2)? } else { 0.0 },
        phase: if args.len() > 3 { f64_arg("freq", args, 3)? } else { 0.0 },
    }))
}

#[derive(Debug, Clone)]
enum Generator {
    Linspace(Vec<Value>),
    Meshgrid(Vec<Vec<Value>>),
    Oscillator { range: TimeRange, freqs: Vec<Freq> },
    Sphere { lat_steps: usize, lon_steps: usize },
}

pub(crate) fn fn_oscillator(args: &[Value]) -> Result<Value> {
    let mut range = None;
    let mut freqs = Vec::new();
    for (i, arg) in args.iter().enumerate() {
        if let Some(f) = arg.downcast_ref::<Freq>() {
            freqs.push(*f);
        } else if let Some(r) = arg.downcast_ref::<TimeRange>() {
            if range.is_some() {
                return Err(Error::pipeline("f(oscillator)", "duplicated time range"));
            }
            range = Some(*r);
        } else {
            return Err(wrong_type("oscillator", i, "freq() or range()", arg));
        }
    }
    let range = range.ok_or_else(|| Error::pipeline("f(oscillator)", "no time range is defined"))?;
    if range.period <= 0 {
        return Err(Error::pipeline("f(oscillator)", "period should be positive"));
    }
    Ok(Value::object(Generator::Oscillator { range, freqs }))
}

/// `sphere(lonSteps=18, latSteps=36)`
pub(crate) fn fn_sphere(args: &[Value]) -> Result<Value> {
    check_arity("sphere", args, 0, 2)?;
    let lon_steps = if args.is_empty() { 18 } else { usize_arg("sphere", args, 0)? };
    let lat_steps = if args.len() > 1 { usize_arg("sphere", args, 1)? } else { 36 };
    if lon_steps == 0 || lat_steps == 0 {
        return Err(Error::pipeline("f(sphere)", "steps should be positive"));
    }
    Ok(Value::object(Generator::Sphere {
        lat_steps,
        lon_steps,
    }))
}

fn double(name: &str) -> Column {
    Column::new(name, DataType::Double)
}

impl Generator {
    fn columns(&self) -> Columns {
        let id = Column::new("id", DataType::Int64);
        Columns(match self {
            Generator::Linspace(_) => vec![id, double("x")],
            Generator::Meshgrid(_) => vec![id, double("x"), double("y")],
            Generator::Oscillator { .. } => {
                vec![Column::new("time", DataType::Datetime), double("value")]
            }
            Generator::Sphere { .. } => vec![id, double("x"), double("y"), double("z")],
        })
    }

    fn rows(&self) -> Rows {
        match self.clone() {
            Generator::Linspace(xs) => Box::new(
                xs.into_iter()
                    .enumerate()
                    .map(|(i, x)| Ok(vec![Value::from(i + 1), x])),
            ),
            Generator::Meshgrid(cells) => Box::new(
                cells
                    .into_iter()
                    .filter(|cell| cell.len() == 2)
                    .enumerate()
                    .map(|(i, cell)| {
                        let mut row = vec![Value::from(i + 1)];
                        row.extend(cell);
                        Ok(row)
                    }),
            ),
            Generator::Oscillator { range, freqs } => {
                let (from, to) = match range.bounds() {
                    Ok(bounds) => bounds,
                    Err(err) => return Box::new(std::iter::once(Err(err))),
                };
                let step = range.period;
                let times = std::iter::successors(Some(from), move |t| t.checked_add(step))
                    .take_while(move |t| *t < to);
                Box::new(times.map(move |ns| {
                    let secs = ns as f64 / 1e9;
                    let value: f64 = freqs.iter().map(|f| f.value(secs)).sum();
                    Ok(vec![Value::Time(DateTime::from_timestamp_nanos(ns)), Value::Float(value)])
                }))
            }
            Generator::Sphere {
                lat_steps,
                lon_steps,
            } => Box::new(
                (0..lat_steps)
                    .flat_map(move |i| (0..lon_steps).map(move |j| (i, j)))
                    .enumerate()
                    .map(move |(n, (i, j))| {
                        let u = 2.0 * PI * i as f64 / lat_steps as f64;
                        let v = PI * j as f64 / lon_steps as f64;
                        Ok(vec![
                            Value::from(n + 1),
                            Value::Float(u.cos() * v.sin()),
                            Value::Float(u.sin() * v.sin()),
                            Value::Float(v.cos()),
                        ])
                    }),
            ),
        }
    }
}

#[derive(Debug)]
struct FakeSource(Generator);

impl Source for FakeSource {
    fn name(&self) -> &str {
        "FAKE"
    }

    fn open(&self, env: &mut SourceEnv) -> Result<RowStream> {
        Ok(RowStream {
            columns: self.0.columns(),
            rows: cancellable(self.0.rows(), env.cancel.clone()),
        })
    }
}

pub(crate) fn fn_fake(args: &[Value]) -> Result<Value> {
    check_arity("FAKE", args, 1, 1)?;
    let generator = match &args[0] {
        Value::List(xs) => Generator::Linspace(xs.clone()),
        Value::Matrix(cells) => Generator::Meshgrid(cells.clone()),
        other => other
            .downcast_ref::<Generator>()
            .cloned()
            .ok_or_else(|| wrong_type("FAKE", 0, "fake generator", other))?,
    };
    Ok(SourceRef::new(FakeSource(generator)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::tql::time::fn_range;

    fn collect(source: Value) -> (Columns, Vec<Vec<Value>>) {
        let mut env = SourceEnv {
            database: None,
            input: None,
            cancel: CancelToken::new(),
        };
        let stream = source.downcast_ref::<SourceRef>().unwrap().0.open(&mut env).unwrap();
        let rows = stream.rows.collect::<Result<Vec<_>>>().unwrap();
        (stream.columns, rows)
    }

    #[test]
    fn oscillator_samples_the_range() {
        let range = fn_range(&[Value::Int(0), "1s".into(), "100ms".into()]).unwrap();
        let freq = fn_freq(&[1.0.into(), 2.0.into(), 0.5.into()]).unwrap();
        let osc = fn_oscillator(&[freq, range]).unwrap();
        let (cols, rows) = collect(fn_fake(&[osc]).unwrap());
        assert_eq!(cols.names(), vec!["time", "value"]);
        assert_eq!(rows.len(), 10);
        let v = rows[2][1].as_f64().unwrap() - 0.5;
        assert!((v - 2.0 * (2.0 * PI * 0.2).sin()).abs() < 1e-9);
        assert_eq!(rows[9][0], Value::Time(DateTime::from_timestamp_nanos(900_000_000)));
    }

    #[test]
    fn oscillator_needs_a_range() {
        let err = fn_oscillator(&[fn_freq(&[1.0.into(), 1.0.into()]).unwrap()]).unwrap_err();
        assert!(err.to_string().contains("no time range is defined"));
        let range = fn_range(&[Value::Int(0), "1s".into()]).unwrap();
        let err = fn_oscillator(&[range]).unwrap_err();
        assert!(err.to_string().contains("period should be positive"));
    }

    #[test]
    fn sphere_points_are_on_the_unit_sphere() {
        let (cols, rows) = collect(fn_fake(&[fn_sphere(&[4.into(), 8.into()]).unwrap()]).unwrap());
        assert_eq!(cols.len(), 4);
        assert_eq!(rows.len(), 32);
        for row in rows {
            let r: f64 = row[1..].iter().map(|v| v.as_f64().unwrap().powi(2)).sum();
            assert!((r - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn linspace_rows_are_numbered() {
        let xs = Value::List(vec![0.0.into(), 0.5.into(), 1.0.into()]);
        let (_, rows) = collect(fn_fake(&[xs]).unwrap());
        assert_eq!(rows[2], vec![Value::Int(3), Value::Float(1.0)]);
        assert!(fn_fake(&["x".into()]).is_err());
    }
}
