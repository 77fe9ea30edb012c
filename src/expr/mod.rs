//! The embedded expression language used in every stage argument.
//!
//! An expression is parsed once against a table of [`Function`]s and then
//! evaluated many times against different [`Parameters`]. Names that are not
//! function calls resolve through [`Parameters::get`] at evaluation time.
//!
//! ```
//! use std::collections::HashMap;
//! use tagflow::expr::{Expression, Functions, NoParameters};
//! use tagflow::value::Value;
//!
//! let expr = Expression::parse("1 + 2 * 3 > 6 && 'a' =~ '^a'", &Functions::new()).unwrap();
//! assert_eq!(expr.eval(&NoParameters).unwrap(), Value::Bool(true));
//! ```

pub mod args;
mod eval;
mod lexer;
mod parser;

use crate::error::{Error, Result};
use crate::value::Value;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A callable resolved at parse time.
pub type Function = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Function table consulted by the parser.
pub type Functions = HashMap<String, Function>;

/// Wrap a closure as a [`Function`].
pub fn function<F>(f: F) -> Function
where
    F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Name lookup used while evaluating identifiers.
pub trait Parameters {
    fn get(&self, name: &str) -> Result<Value>;
}

/// Parameters that define nothing.
pub struct NoParameters;

impl Parameters for NoParameters {
    fn get(&self, name: &str) -> Result<Value> {
        Err(Error::UndefinedVariable(name.to_string()))
    }
}

impl Parameters for HashMap<String, Value> {
    fn get(&self, name: &str) -> Result<Value> {
        HashMap::get(self, name)
            .cloned()
            .ok_or_else(|| Error::UndefinedVariable(name.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone)]
pub(crate) enum Node {
    Literal(Value),
    Ident(String),
    List(Vec<Node>),
    Neg(Box<Node>),
    Not(Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Coalesce(Box<Node>, Box<Node>),
    Ternary(Box<Node>, Box<Node>, Box<Node>),
    Match {
        negate: bool,
        lhs: Box<Node>,
        rhs: Box<Node>,
        compiled: Option<Regex>,
    },
    Call {
        name: String,
        func: Function,
        args: Vec<Node>,
    },
}

/// A parsed expression.
#[derive(Clone)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    pub fn parse(source: &str, functions: &Functions) -> Result<Expression> {
        let root = parser::parse(source, functions)?;
        Ok(Expression {
            source: source.to_string(),
            root,
        })
    }

    pub fn eval(&self, params: &dyn Parameters) -> Result<Value> {
        eval::eval(&self.root, params)
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Name of the top-level function call, if the expression is one.
    #[must_use]
    pub fn call_name(&self) -> Option<&str> {
        match &self.root {
            Node::Call { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Insert identifier arguments in front of the top-level call's own.
    pub fn prepend_args(&mut self, names: &[&str]) -> Result<()> {
        let Node::Call { name, args, .. } = &mut self.root else {
            return Err(Error::pipeline(
                "expression",
                format!("{:?} is not a function call", self.source),
            ));
        };
        tracing::trace!(func = %name, implicit = ?names, "prepending implicit args");
        let implicit = names.iter().map(|n| Node::Ident((*n).to_string()));
        let explicit = std::mem::take(args);
        *args = implicit.chain(explicit).collect();
        Ok(())
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Expression").field(&self.source).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funcs() -> Functions {
        let mut f = Functions::new();
        f.insert(
            "len".into(),
            function(|args| {
                args::check_arity("len", args, 1, 1)?;
                Ok(Value::from(args[0].len()))
            }),
        );
        f.insert(
            "first".into(),
            function(|args| Ok(args.first().cloned().unwrap_or_default())),
        );
        f
    }

    fn eval(src: &str, params: &dyn Parameters) -> Result<Value> {
        Expression::parse(src, &funcs())?.eval(params)
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3", &NoParameters).unwrap(), Value::Float(7.0));
        assert_eq!(eval("(1 + 2) * 3", &NoParameters).unwrap(), Value::Float(9.0));
        assert_eq!(eval("2 ** 3 ** 2", &NoParameters).unwrap(), Value::Float(512.0));
        assert_eq!(eval("-2 ** 2", &NoParameters).unwrap(), Value::Float(4.0));
        assert_eq!(eval("7 % 4", &NoParameters).unwrap(), Value::Float(3.0));
    }

    #[test]
    fn parameters_and_functions() {
        let mut params = HashMap::new();
        params.insert("V".to_string(), Value::List(vec![1.into(), 2.into(), 3.into()]));
        params.insert("K".to_string(), Value::Str("tag".into()));
        assert_eq!(eval("len(V) == 3", &params).unwrap(), Value::Bool(true));
        assert_eq!(eval("K + '-x'", &params).unwrap(), Value::Str("tag-x".into()));
        assert!(matches!(eval("Z", &params), Err(Error::UndefinedVariable(n)) if n == "Z"));
    }

    #[test]
    fn unknown_function_fails_at_parse() {
        let err = Expression::parse("nope(1)", &funcs()).unwrap_err();
        assert!(err.to_string().contains("undefined function nope"), "{err}");
    }

    #[test]
    fn logical_operators_short_circuit() {
        // The right side would fail if it were evaluated.
        assert_eq!(eval("false && missing", &NoParameters).unwrap(), Value::Bool(false));
        assert_eq!(eval("true || missing", &NoParameters).unwrap(), Value::Bool(true));
        assert_eq!(eval("true ? 1 : missing", &NoParameters).unwrap(), Value::Float(1.0));
        assert!(eval("1 && true", &NoParameters).is_err());
    }

    #[test]
    fn regex_and_coalesce() {
        assert_eq!(eval("'sig.1' =~ 'sig\\\\.[0-9]'", &NoParameters).unwrap(), Value::Bool(true));
        assert_eq!(eval("'abc' !~ '^b'", &NoParameters).unwrap(), Value::Bool(true));
        assert_eq!(eval("first() ?? 5", &NoParameters).unwrap(), Value::Float(5.0));
    }

    #[test]
    fn prepend_args_on_call() {
        let mut expr = Expression::parse("first(9)", &funcs()).unwrap();
        expr.prepend_args(&["K"]).unwrap();
        let mut params = HashMap::new();
        params.insert("K".to_string(), Value::Int(1));
        assert_eq!(expr.eval(&params).unwrap(), Value::Int(1));
        assert_eq!(expr.call_name(), Some("first"));

        let mut not_call = Expression::parse("1 + 1", &funcs()).unwrap();
        assert!(not_call.prepend_args(&["K"]).is_err());
    }
}
