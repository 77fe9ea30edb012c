//! `SCRIPT({ statements })`: a small imperative layer over expressions.
//!
//! Statements are separated by `;` or new lines and are either expressions
//! evaluated for their effect or assignments `let x = expr` / `x = expr`.
//! Assigning `K` or `V` changes the current param; other names are kept in
//! the stage context and survive across inputs.
//!
//! Built-ins on top of the common functions: `key()`, `value()`,
//! `yield(v...)`, `yieldKey(k, v...)`, `drop()`, `nil()`, `uuid(ver)`,
//! `bridge(name)`, `bridgeQuery(br, sql, args...)` and
//! `bridgeExec(br, sql, args...)`.
//!
//! One run per input yields, in order of precedence, the collected
//! `yield` params, nothing when `drop()` was called, or the (possibly
//! modified) input param.

use super::bridge::{self, BridgeHandle};
use super::{context, emit, emit_all};
use crate::error::{Error, Result};
use crate::expr::args::{arg_error, check_arity, i64_arg, object_arg, str_arg};
use crate::expr::{Expression, Functions, Parameters, function};
use crate::tql::context::{Context, Param};
use crate::tql::funcs::register_common;
use crate::value::{Object, Value};
use parking_lot::Mutex;
use std::sync::{Arc, LazyLock};
use tracing::warn;
use uuid::Uuid;

#[derive(Default)]
struct RunState {
    k: Value,
    v: Value,
    yields: Vec<Param>,
    dropped: bool,
    ctx: Option<Arc<Context>>,
}

enum Statement {
    Eval(Expression),
    Assign(String, Expression),
}

enum Script {
    Compiled {
        state: Arc<Mutex<RunState>>,
        statements: Vec<Statement>,
    },
    /// Reports the compile error for every input.
    Failed(String),
}

/// Split on `;` and new lines outside quotes and brackets; drop `//` comments.
fn split_statements(src: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = src.chars().peekable();
    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            cur.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    cur.push(next);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                cur.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                cur.push(c);
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                cur.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                while chars.peek().is_some_and(|c| *c != '\n') {
                    chars.next();
                }
            }
            ';' | '\n' if depth == 0 => {
                if !cur.trim().is_empty() {
                    out.push(cur.trim().to_string());
                }
                cur.clear();
            }
            _ => cur.push(c),
        }
    }
    if !cur.trim().is_empty() {
        out.push(cur.trim().to_string());
    }
    out
}

/// `let name = expr` or `name = expr`; `None` for plain expressions.
fn split_assignment(stmt: &str) -> Option<(&str, &str)> {
    let body = stmt.strip_prefix("let ").map_or(stmt, str::trim_start);
    let end = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(body.len());
    let (name, rest) = body.split_at(end);
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let rest = rest.trim_start().strip_prefix('=')?;
    if rest.starts_with(['=', '~']) {
        return None;
    }
    Some((name, rest))
}

static NODE_ID: LazyLock<[u8; 6]> = LazyLock::new(|| {
    let mut node = [0u8; 6];
    node.copy_from_slice(&Uuid::new_v4().as_bytes()[..6]);
    node
});

fn new_uuid(version: i64) -> Result<String> {
    let id = match version {
        1 => Uuid::now_v1(&NODE_ID),
        4 => Uuid::new_v4(),
        6 => Uuid::now_v6(&NODE_ID),
        7 => Uuid::now_v7(),
        other => {
            return Err(arg_error("uuid", 0, format!("version should be 1, 4, 6 or 7, but {other}")));
        }
    };
    Ok(id.to_string())
}

fn bridge_key(name: &str) -> String {
    format!("$bridge:{name}")
}

fn script_functions(state: &Arc<Mutex<RunState>>) -> Functions {
    let mut funcs = Functions::new();
    register_common(&mut funcs);

    let s = Arc::clone(state);
    funcs.insert(
        "key".into(),
        function(move |args| {
            check_arity("key", args, 0, 0)?;
            Ok(s.lock().k.clone())
        }),
    );
    let s = Arc::clone(state);
    funcs.insert(
        "value".into(),
        function(move |args| {
            check_arity("value", args, 0, 0)?;
            Ok(s.lock().v.clone())
        }),
    );
    let s = Arc::clone(state);
    funcs.insert(
        "yield".into(),
        function(move |args| {
            let mut st = s.lock();
            let p = Param::new(st.k.clone(), Value::List(args.to_vec()));
            st.yields.push(p);
            Ok(Value::Null)
        }),
    );
    let s = Arc::clone(state);
    funcs.insert(
        "yieldKey".into(),
        function(move |args| {
            let mut st = s.lock();
            match args {
                [] => {}
                [k] => {
                    let p = Param::new(k.clone(), st.v.clone());
                    st.yields.push(p);
                }
                [k, vs @ ..] => st.yields.push(Param::new(k.clone(), Value::List(vs.to_vec()))),
            }
            Ok(Value::Null)
        }),
    );
    let s = Arc::clone(state);
    funcs.insert(
        "drop".into(),
        function(move |_| {
            s.lock().dropped = true;
            Ok(Value::Null)
        }),
    );
    funcs.insert("nil".into(), function(|_| Ok(Value::Null)));
    funcs.insert(
        "uuid".into(),
        function(|args| {
            check_arity("uuid", args, 0, 1)?;
            let ver = if args.is_empty() { 4 } else { i64_arg("uuid", args, 0)? };
            new_uuid(ver).map(Value::Str)
        }),
    );
    let s = Arc::clone(state);
    funcs.insert(
        "bridge".into(),
        function(move |args| {
            check_arity("bridge", args, 1, 1)?;
            let name = str_arg("bridge", args, 0)?;
            let ctx = s
                .lock()
                .ctx
                .clone()
                .ok_or_else(|| Error::pipeline("f(bridge)", "no context"))?;
            if let Some(found) = ctx.get(&bridge_key(&name)) {
                return Ok(found);
            }
            let handle = BridgeHandle::new(&name, bridge::lookup(&name)?.connect()?);
            let closing = handle.clone();
            ctx.lazy_close(move || closing.close());
            let value = Value::object(handle);
            ctx.set(&bridge_key(&name), value.clone());
            Ok(value)
        }),
    );
    funcs.insert(
        "bridgeQuery".into(),
        function(|args| {
            check_arity("bridgeQuery", args, 2, usize::MAX)?;
            let br = object_arg::<BridgeHandle>("bridgeQuery", args, 0, "bridge")?;
            let sql = str_arg("bridgeQuery", args, 1)?;
            Ok(Value::Matrix(br.query(&sql, &args[2..])?))
        }),
    );
    funcs.insert(
        "bridgeExec".into(),
        function(|args| {
            check_arity("bridgeExec", args, 2, usize::MAX)?;
            let br = object_arg::<BridgeHandle>("bridgeExec", args, 0, "bridge")?;
            let sql = str_arg("bridgeExec", args, 1)?;
            Ok(Value::Int(br.exec(&sql, &args[2..])?))
        }),
    );
    funcs
}

impl Script {
    fn compile(src: &str) -> Script {
        let state = Arc::new(Mutex::new(RunState::default()));
        let funcs = script_functions(&state);
        let statements: Result<Vec<Statement>> = split_statements(src)
            .iter()
            .map(|stmt| match split_assignment(stmt) {
                Some((name, expr)) => {
                    Ok(Statement::Assign(name.to_string(), Expression::parse(expr, &funcs)?))
                }
                None => Ok(Statement::Eval(Expression::parse(stmt, &funcs)?)),
            })
            .collect();
        match statements {
            Ok(statements) => Script::Compiled { state, statements },
            Err(err) => {
                warn!(%err, "SCRIPT compile failed");
                Script::Failed(err.to_string())
            }
        }
    }

    fn run(&self, ctx: &Arc<Context>, k: Value, v: Value) -> Result<Value> {
        let (state, statements) = match self {
            Script::Failed(msg) => return Ok(emit(k, Value::List(vec![Value::Str(msg.clone())]))),
            Script::Compiled { state, statements } => (state, statements),
        };
        *state.lock() = RunState {
            k,
            v,
            yields: Vec::new(),
            dropped: false,
            ctx: Some(Arc::clone(ctx)),
        };
        let scope = Scope { state, ctx };
        let outcome = statements.iter().try_for_each(|stmt| match stmt {
            Statement::Eval(expr) => expr.eval(&scope).map(drop),
            Statement::Assign(name, expr) => {
                let value = expr.eval(&scope)?;
                match name.as_str() {
                    "K" => state.lock().k = value,
                    "V" => state.lock().v = value,
                    _ => ctx.set(name, value),
                }
                Ok(())
            }
        });
        let mut st = state.lock();
        st.ctx = None;
        outcome?;
        if !st.yields.is_empty() {
            return Ok(emit_all(std::mem::take(&mut st.yields)));
        }
        if st.dropped {
            return Ok(Value::Null);
        }
        Ok(emit(std::mem::take(&mut st.k), std::mem::take(&mut st.v)))
    }
}

struct Scope<'a> {
    state: &'a Mutex<RunState>,
    ctx: &'a Arc<Context>,
}

impl Parameters for Scope<'_> {
    fn get(&self, name: &str) -> Result<Value> {
        match name {
            "K" => Ok(self.state.lock().k.clone()),
            "V" => Ok(self.state.lock().v.clone()),
            "P" => {
                let st = self.state.lock();
                Ok(Value::object(Param::new(st.k.clone(), st.v.clone())))
            }
            "CTX" => Ok(Value::Object(Object::from_arc(Arc::clone(self.ctx)))),
            _ => {
                if let Some(key) = name.strip_prefix('$') {
                    return self
                        .ctx
                        .param(key)
                        .map(|v| Value::Str(v.to_string()))
                        .ok_or_else(|| Error::UndefinedVariable(name.to_string()));
                }
                self.ctx
                    .get(name)
                    .ok_or_else(|| Error::UndefinedVariable(name.to_string()))
            }
        }
    }
}

pub(crate) fn fn_script(args: &[Value]) -> Result<Value> {
    check_arity("SCRIPT", args, 4, 4)?;
    let ctx = context("SCRIPT", args)?;
    let src = str_arg("SCRIPT", args, 3)?;
    let script = ctx.cached(|| Ok(Script::compile(&src)))?;
    script.run(&ctx, args[1].clone(), args[2].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(ctx: &Arc<Context>, src: &str, k: Value, v: Value) -> Result<Value> {
        let args = [Value::Object(Object::from_arc(Arc::clone(ctx))), k, v, Value::from(src)];
        fn_script(&args)
    }

    fn params(v: &Value) -> Vec<Param> {
        if let Some(p) = v.downcast_ref::<Param>() {
            return vec![p.clone()];
        }
        v.downcast_ref::<Vec<Param>>().cloned().unwrap_or_default()
    }

    #[test]
    fn statements_split_outside_quotes() {
        let got = split_statements("a = 1; b = 'x;y'\n// note\nyield(a,\n b)");
        assert_eq!(got, vec!["a = 1", "b = 'x;y'", "yield(a,\n b)"]);
        assert_eq!(split_assignment("let x = 1"), Some(("x", " 1")));
        assert_eq!(split_assignment("x == 1"), None);
        assert_eq!(split_assignment("yield(x)"), None);
    }

    #[test]
    fn implicit_param_with_modified_value() {
        let ctx = Arc::new(Context::new("SCRIPT"));
        let out = run(&ctx, "V = V * 10", "k".into(), 1.5.into()).unwrap();
        assert_eq!(params(&out), vec![Param::new("k", 15.0)]);
    }

    #[test]
    fn yields_and_drop() {
        let ctx = Arc::new(Context::new("SCRIPT"));
        let src = "yield(value() + 1); yieldKey('other', 2, 3)";
        let out = params(&run(&ctx, src, "k".into(), 1.into()).unwrap());
        assert_eq!(out[0], Param::new("k", Value::List(vec![2.into()])));
        assert_eq!(out[1], Param::new("other", Value::List(vec![2.into(), 3.into()])));

        let ctx = Arc::new(Context::new("SCRIPT"));
        let out = run(&ctx, "V > 5 ? drop() : nil()", "k".into(), 9.into()).unwrap();
        assert!(out.is_null());
    }

    #[test]
    fn variables_persist_across_inputs() {
        let ctx = Arc::new(Context::new("SCRIPT"));
        let src = "let total = total + V\nyield(total)";
        ctx.set("total", Value::Float(0.0));
        for v in [1, 2, 3] {
            run(&ctx, src, "k".into(), v.into()).unwrap();
        }
        assert_eq!(ctx.get("total"), Some(Value::Float(6.0)));
    }

    #[test]
    fn compile_error_is_yielded() {
        let ctx = Arc::new(Context::new("SCRIPT"));
        let out = params(&run(&ctx, "nope(1)", "k".into(), 1.into()).unwrap());
        let Value::List(msg) = &out[0].v else { panic!() };
        assert!(msg[0].to_string().contains("undefined function nope"), "{:?}", msg);
    }

    #[test]
    fn uuid_versions() {
        assert_eq!(new_uuid(7).unwrap().len(), 36);
        assert!(new_uuid(1).unwrap().starts_with(|c: char| c.is_ascii_hexdigit()));
        assert!(new_uuid(3).is_err());
    }
}
