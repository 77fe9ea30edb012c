//! Map stages.
//!
//! Every map function receives the implicit `CTX, K, V` followed by the
//! arguments written in the script. The result tells the stage worker what
//! to do with the input:
//!
//! | result | meaning |
//! |---|---|
//! | `Null` | drop the input |
//! | a [`Param`] object | yield it |
//! | a `Vec<Param>` object | yield each, in order |
//! | a [`Signal`] object | end the stage or break the circuit |
//!
//! Anything else is a type error reported to the sink.

pub(crate) mod bridge;
pub(crate) mod fft;
pub(crate) mod script;

use super::context::{Context, Param, Signal};
use crate::error::{Error, Result};
use crate::expr::args::{bool_arg, check_arity, i64_arg, object_arg};
use crate::value::Value;
use std::sync::Arc;

pub(crate) fn context(func: &str, args: &[Value]) -> Result<Arc<Context>> {
    object_arg::<Context>(func, args, 0, "context")
}

pub(crate) fn emit(k: Value, v: Value) -> Value {
    Value::object(Param::new(k, v))
}

pub(crate) fn emit_all(params: Vec<Param>) -> Value {
    Value::object(params)
}

pub(crate) fn pass(args: &[Value]) -> Value {
    emit(args[1].clone(), args[2].clone())
}

/// `TAKE(n)`: the first `n` inputs, then break the circuit.
pub(crate) fn fn_take(args: &[Value]) -> Result<Value> {
    check_arity("TAKE", args, 4, 4)?;
    let ctx = context("TAKE", args)?;
    let limit = i64_arg("TAKE", args, 3)?;
    if ctx.nrow() as i64 > limit {
        return Ok(Value::object(Signal::CircuitBreak));
    }
    Ok(pass(args))
}

/// `DROP(n)`: skip the first `n` inputs.
pub(crate) fn fn_drop(args: &[Value]) -> Result<Value> {
    check_arity("DROP", args, 4, 4)?;
    let ctx = context("DROP", args)?;
    let limit = i64_arg("DROP", args, 3)?;
    if ctx.nrow() as i64 <= limit {
        return Ok(Value::Null);
    }
    Ok(pass(args))
}

/// `PUSHKEY(k)`: `(K, [v...])` becomes `(k, [K, v...])`.
pub(crate) fn fn_pushkey(args: &[Value]) -> Result<Value> {
    check_arity("PUSHKEY", args, 4, 4)?;
    let Value::List(items) = &args[2] else {
        return Err(Error::Type(format!(
            "f(PUSHKEY) V should be []any, but {}",
            args[2].kind()
        )));
    };
    let mut v = Vec::with_capacity(items.len() + 1);
    v.push(args[1].clone());
    v.extend(items.iter().cloned());
    Ok(emit(args[3].clone(), Value::List(v)))
}

/// `POPKEY(idx=0)`: promote `V[idx]` to the key. A matrix value yields one
/// param per row.
pub(crate) fn fn_popkey(args: &[Value]) -> Result<Value> {
    check_arity("POPKEY", args, 3, 4)?;
    let nth = if args.len() == 4 { i64_arg("POPKEY", args, 3)? } else { 0 };
    match &args[2] {
        Value::List(items) => {
            let idx = usize::try_from(nth).ok().filter(|i| *i < items.len()).ok_or_else(|| {
                Error::pipeline(
                    "f(POPKEY)",
                    format!(
                        "1st arg should be between 0 and {}, but {nth}",
                        items.len() as i64 - 1
                    ),
                )
            })?;
            let mut rest = items.clone();
            let key = rest.remove(idx);
            Ok(emit(key, Value::List(rest)))
        }
        Value::Matrix(rows) => {
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                match row.as_slice() {
                    [k, v] => out.push(Param::new(k.clone(), v.clone())),
                    [k, rest @ ..] if !rest.is_empty() => {
                        out.push(Param::new(k.clone(), Value::List(rest.to_vec())));
                    }
                    _ => {
                        return Err(Error::pipeline(
                            "f(POPKEY)",
                            format!("arg elements should be larger than 2, but {}", row.len()),
                        ));
                    }
                }
            }
            Ok(emit_all(out))
        }
        other => Err(Error::Type(format!(
            "f(POPKEY) V should be []any or [][]any, but {}",
            other.kind()
        ))),
    }
}

/// `lazy(flag)`
#[derive(Debug, Clone, Copy)]
pub struct Lazy(pub bool);

pub(crate) fn fn_lazy(args: &[Value]) -> Result<Value> {
    check_arity("lazy", args, 1, 1)?;
    Ok(Value::object(Lazy(bool_arg("lazy", args, 0)?)))
}

/// `GROUPBYKEY(lazy(false)?)`: collect values of consecutive equal keys.
/// With `lazy(true)` everything is held until the end of input.
pub(crate) fn fn_groupbykey(args: &[Value]) -> Result<Value> {
    check_arity("GROUPBYKEY", args, 3, 4)?;
    let ctx = context("GROUPBYKEY", args)?;
    let lazy = args[3..]
        .iter()
        .find_map(|a| a.downcast_ref::<Lazy>())
        .is_some_and(|l| l.0);
    let (k, v) = (args[1].clone(), args[2].clone());
    ctx.buffer(k.clone(), v);
    if lazy {
        return Ok(Value::Null);
    }
    match ctx.swap_current_key(k.clone()) {
        Some(prev) if prev != k => Ok(ctx
            .take_buffer(&prev)
            .map_or(Value::Null, |values| emit(prev, Value::List(values)))),
        _ => Ok(Value::Null),
    }
}

/// `FLATTEN()`: one param per element of a list value.
pub(crate) fn fn_flatten(args: &[Value]) -> Result<Value> {
    check_arity("FLATTEN", args, 3, 3)?;
    let k = &args[1];
    let Value::List(items) = &args[2] else {
        return Ok(pass(args));
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::List(sub) => out.extend(sub.iter().map(|v| Param::new(k.clone(), v.clone()))),
            Value::Matrix(rows) => out.extend(
                rows.iter()
                    .map(|row| Param::new(k.clone(), Value::List(row.clone()))),
            ),
            other => out.push(Param::new(k.clone(), other.clone())),
        }
    }
    Ok(emit_all(out))
}

/// `FILTER(predicate)`
pub(crate) fn fn_filter(args: &[Value]) -> Result<Value> {
    check_arity("FILTER", args, 4, 4)?;
    match &args[3] {
        Value::Bool(true) => Ok(pass(args)),
        Value::Bool(false) => Ok(Value::Null),
        other => Err(crate::expr::args::wrong_type("FILTER", 3, "boolean", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(f: fn(&[Value]) -> Result<Value>, ctx: &Arc<Context>, k: Value, v: Value, extra: &[Value]) -> Result<Value> {
        let mut args = vec![Value::Object(crate::value::Object::from_arc(Arc::clone(ctx))), k, v];
        args.extend_from_slice(extra);
        f(&args)
    }

    fn params(v: &Value) -> Vec<Param> {
        if let Some(p) = v.downcast_ref::<Param>() {
            return vec![p.clone()];
        }
        v.downcast_ref::<Vec<Param>>().cloned().unwrap_or_default()
    }

    #[test]
    fn take_breaks_after_limit() {
        let ctx = Arc::new(Context::new("TAKE"));
        let mut out = Vec::new();
        for i in 0..4 {
            ctx.incr_nrow();
            out.push(call(fn_take, &ctx, i.into(), Value::Null, &[2.into()]).unwrap());
        }
        assert_eq!(params(&out[1]), vec![Param::new(1, Value::Null)]);
        assert_eq!(out[2].downcast_ref::<Signal>(), Some(&Signal::CircuitBreak));
    }

    #[test]
    fn drop_skips_first() {
        let ctx = Arc::new(Context::new("DROP"));
        ctx.incr_nrow();
        assert!(call(fn_drop, &ctx, 1.into(), 1.into(), &[1.into()]).unwrap().is_null());
        ctx.incr_nrow();
        assert_eq!(params(&call(fn_drop, &ctx, 2.into(), 2.into(), &[1.into()]).unwrap()).len(), 1);
    }

    #[test]
    fn pushkey_then_popkey_is_identity() {
        let ctx = Arc::new(Context::new("X"));
        let v = Value::List(vec![1.5.into(), 2.5.into()]);
        let pushed = call(fn_pushkey, &ctx, "k".into(), v.clone(), &["new".into()]).unwrap();
        let p = &params(&pushed)[0];
        assert_eq!(p.k, Value::from("new"));
        let popped = call(fn_popkey, &ctx, p.k.clone(), p.v.clone(), &[]).unwrap();
        assert_eq!(params(&popped), vec![Param::new("k", v)]);

        let err = call(fn_pushkey, &ctx, "k".into(), 1.into(), &["x".into()]).unwrap_err();
        assert_eq!(err.to_string(), "f(PUSHKEY) V should be []any, but int64");
    }

    #[test]
    fn popkey_index_and_matrix() {
        let ctx = Arc::new(Context::new("POPKEY"));
        let v = Value::List(vec!["a".into(), "b".into(), "c".into()]);
        let got = call(fn_popkey, &ctx, Value::Null, v.clone(), &[1.into()]).unwrap();
        assert_eq!(params(&got), vec![Param::new("b", Value::List(vec!["a".into(), "c".into()]))]);
        let err = call(fn_popkey, &ctx, Value::Null, v, &[3.into()]).unwrap_err();
        assert!(err.to_string().contains("between 0 and 2, but 3"), "{err}");

        let m = Value::Matrix(vec![vec![1.into(), 2.into()], vec![3.into(), 4.into(), 5.into()]]);
        let got = params(&call(fn_popkey, &ctx, Value::Null, m, &[]).unwrap());
        assert_eq!(got[0], Param::new(1, 2));
        assert_eq!(got[1], Param::new(3, Value::List(vec![4.into(), 5.into()])));
    }

    #[test]
    fn groupbykey_flushes_on_key_change() {
        let ctx = Arc::new(Context::new("GROUPBYKEY"));
        let inputs = [("a", 1), ("a", 2), ("b", 3)];
        let out: Vec<Value> = inputs
            .iter()
            .map(|(k, v)| call(fn_groupbykey, &ctx, (*k).into(), (*v).into(), &[]).unwrap())
            .collect();
        assert!(out[0].is_null() && out[1].is_null());
        assert_eq!(params(&out[2]), vec![Param::new("a", Value::List(vec![1.into(), 2.into()]))]);
        assert_eq!(ctx.drain_buffers(), vec![(Value::from("b"), vec![Value::from(3)])]);
    }

    #[test]
    fn flatten_expands_one_level() {
        let ctx = Arc::new(Context::new("FLATTEN"));
        let v = Value::List(vec![
            Value::List(vec![1.into(), 2.into()]),
            3.into(),
            Value::Matrix(vec![vec![4.into(), 5.into()]]),
        ]);
        let got = params(&call(fn_flatten, &ctx, "k".into(), v, &[]).unwrap());
        assert_eq!(got.len(), 4);
        assert_eq!(got[3], Param::new("k", Value::List(vec![4.into(), 5.into()])));
        let scalar = call(fn_flatten, &ctx, "k".into(), 7.into(), &[]).unwrap();
        assert_eq!(params(&scalar), vec![Param::new("k", 7)]);
    }

    #[test]
    fn filter_requires_boolean() {
        let ctx = Arc::new(Context::new("FILTER"));
        assert!(call(fn_filter, &ctx, 1.into(), 1.into(), &[false.into()]).unwrap().is_null());
        assert!(call(fn_filter, &ctx, 1.into(), 1.into(), &[1.into()]).is_err());
    }
}
