//! Helper functions available in every stage expression.

use super::time;
use crate::error::{Error, Result};
use crate::expr::args::{check_arity, f64_arg, list_arg, usize_arg, wrong_type};
use crate::expr::{Functions, function};
use crate::value::Value;

fn unary(name: &'static str, f: fn(f64) -> f64) -> (String, crate::expr::Function) {
    (
        name.to_string(),
        function(move |args| {
            check_arity(name, args, 1, 1)?;
            Ok(Value::Float(f(f64_arg(name, args, 0)?)))
        }),
    )
}

/// Insert the common helpers into `funcs`.
pub(crate) fn register_common(funcs: &mut Functions) {
    funcs.extend([
        unary("sin", f64::sin),
        unary("cos", f64::cos),
        unary("tan", f64::tan),
        unary("exp", f64::exp),
        unary("log", f64::ln),
        unary("log10", f64::log10),
    ]);
    funcs.insert("round".into(), function(fn_round));
    funcs.insert("linspace".into(), function(fn_linspace));
    funcs.insert("meshgrid".into(), function(fn_meshgrid));
    funcs.insert("element".into(), function(fn_element));
    funcs.insert("len".into(), function(fn_len));
    funcs.insert("count".into(), function(fn_count));
    funcs.insert("parseFloat".into(), function(fn_parse_float));
    funcs.insert("time".into(), function(time::fn_time));
    funcs.insert("timeAdd".into(), function(time::fn_time_add));
    funcs.insert("roundTime".into(), function(time::fn_round_time));
    funcs.insert("range".into(), function(time::fn_range));
}

/// `round(x, y)`: `x` truncated to a multiple of `y`.
fn fn_round(args: &[Value]) -> Result<Value> {
    check_arity("round", args, 2, 2)?;
    let x = f64_arg("round", args, 0)?;
    let y = f64_arg("round", args, 1)?;
    if y == 0.0 {
        return Err(crate::expr::args::arg_error("round", 1, "zero is not allowed"));
    }
    Ok(Value::Float((x / y).trunc() * y))
}

pub(crate) fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num).map(|i| start + step * i as f64).collect()
        }
    }
}

fn fn_linspace(args: &[Value]) -> Result<Value> {
    check_arity("linspace", args, 3, 3)?;
    let start = f64_arg("linspace", args, 0)?;
    let stop = f64_arg("linspace", args, 1)?;
    let num = usize_arg("linspace", args, 2)?;
    Ok(Value::List(linspace(start, stop, num).into_iter().map(Value::Float).collect()))
}

fn fn_meshgrid(args: &[Value]) -> Result<Value> {
    check_arity("meshgrid", args, 2, 2)?;
    let xs = list_arg("meshgrid", args, 0)?;
    let ys = list_arg("meshgrid", args, 1)?;
    let mut grid = Vec::with_capacity(xs.len() * ys.len());
    for x in xs {
        for y in ys {
            grid.push(vec![x.clone(), y.clone()]);
        }
    }
    Ok(Value::Matrix(grid))
}

/// `element(list, idx)` or `element(a, b, ..., idx)`.
fn fn_element(args: &[Value]) -> Result<Value> {
    check_arity("element", args, 2, usize::MAX)?;
    let last = args.len() - 1;
    let idx = usize_arg("element", args, last)?;
    let items: Vec<Value> = match &args[0] {
        Value::List(items) if last == 1 => items.clone(),
        Value::Matrix(rows) if last == 1 => rows.iter().cloned().map(Value::List).collect(),
        _ => args[..last].to_vec(),
    };
    items
        .get(idx)
        .cloned()
        .ok_or_else(|| Error::pipeline("f(element)", format!("out of index {idx} / {}", items.len())))
}

fn fn_len(args: &[Value]) -> Result<Value> {
    check_arity("len", args, 1, 1)?;
    Ok(Value::from(args[0].len()))
}

/// Non-null elements of a sequence; a scalar counts as one.
fn fn_count(args: &[Value]) -> Result<Value> {
    check_arity("count", args, 1, 1)?;
    let n = match &args[0] {
        Value::List(items) => items.iter().filter(|v| !v.is_null()).count(),
        Value::Matrix(rows) => rows.len(),
        Value::Null => 0,
        _ => 1,
    };
    Ok(Value::from(n))
}

fn fn_parse_float(args: &[Value]) -> Result<Value> {
    check_arity("parseFloat", args, 1, 1)?;
    match &args[0] {
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| Error::pipeline("f(parseFloat)", format!("{s:?} {e}"))),
        v @ (Value::Int(_) | Value::Float(_)) => Ok(Value::Float(v.as_f64().unwrap_or_default())),
        other => Err(wrong_type("parseFloat", 0, "string", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Expression, NoParameters};

    fn eval(src: &str) -> Result<Value> {
        let mut funcs = Functions::new();
        register_common(&mut funcs);
        Expression::parse(src, &funcs)?.eval(&NoParameters)
    }

    #[test]
    fn math() {
        assert_eq!(eval("round(123.4567, 2)").unwrap(), Value::Float(122.0));
        assert_eq!(eval("sin(0) + cos(0)").unwrap(), Value::Float(1.0));
        assert_eq!(eval("log10(1000)").unwrap(), Value::Float(3.0));
        let err = eval("sin('x')").unwrap_err();
        assert_eq!(err.to_string(), "f(sin) arg(0) should be float64, but string");
    }

    #[test]
    fn sequences() {
        let v = eval("linspace(0, 1, 5)").unwrap();
        assert_eq!(v.to_string(), "[0 0.25 0.5 0.75 1]");
        let grid = eval("meshgrid(linspace(0, 1, 2), linspace(5, 6, 2))").unwrap();
        assert_eq!(grid.to_string(), "[[0 5] [0 6] [1 5] [1 6]]");
        assert_eq!(eval("element(linspace(0, 1, 5), 2)").unwrap(), Value::Float(0.5));
        assert_eq!(eval("element('a', 'b', 'c', 1)").unwrap(), Value::from("b"));
        let err = eval("element(linspace(0, 1, 2), 5)").unwrap_err();
        assert!(err.to_string().contains("out of index 5 / 2"), "{err}");
        assert_eq!(eval("len(linspace(0, 1, 7))").unwrap(), Value::Int(7));
        assert_eq!(eval("count(linspace(0, 1, 3))").unwrap(), Value::Int(3));
    }

    #[test]
    fn parse_float() {
        assert_eq!(eval("parseFloat(' 1.5 ')").unwrap(), Value::Float(1.5));
        assert!(eval("parseFloat('abc')").is_err());
    }
}
