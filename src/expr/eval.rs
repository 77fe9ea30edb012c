use super::{BinOp, Node, Parameters};
use crate::error::{Error, Result};
use crate::value::Value;
use chrono::Duration;
use regex::Regex;
use std::cmp::Ordering;

pub(crate) fn eval(node: &Node, params: &dyn Parameters) -> Result<Value> {
    match node {
        Node::Literal(v) => Ok(v.clone()),
        Node::Ident(name) => params.get(name),
        Node::List(items) => items
            .iter()
            .map(|n| eval(n, params))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        Node::Neg(inner) => match eval(inner, params)? {
            Value::Int(v) => Ok(v.checked_neg().map_or(Value::Float(-(v as f64)), Value::Int)),
            Value::Float(v) => Ok(Value::Float(-v)),
            other => Err(type_error("-", &other, None)),
        },
        Node::Not(inner) => Ok(Value::Bool(!truth("!", &eval(inner, params)?)?)),
        Node::And(lhs, rhs) => {
            if !truth("&&", &eval(lhs, params)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truth("&&", &eval(rhs, params)?)?))
        }
        Node::Or(lhs, rhs) => {
            if truth("||", &eval(lhs, params)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truth("||", &eval(rhs, params)?)?))
        }
        Node::Coalesce(lhs, rhs) => match eval(lhs, params)? {
            Value::Null => eval(rhs, params),
            v => Ok(v),
        },
        Node::Ternary(cond, then, otherwise) => {
            if truth("?:", &eval(cond, params)?)? {
                eval(then, params)
            } else {
                eval(otherwise, params)
            }
        }
        Node::Match {
            negate,
            lhs,
            rhs,
            compiled,
        } => {
            let subject = eval(lhs, params)?;
            let Value::Str(subject) = subject else {
                return Err(type_error("=~", &subject, None));
            };
            let matched = match compiled {
                Some(re) => re.is_match(&subject),
                None => {
                    let pattern = eval(rhs, params)?;
                    let Value::Str(pattern) = pattern else {
                        return Err(type_error("=~", &pattern, None));
                    };
                    Regex::new(&pattern)
                        .map_err(|e| Error::pipeline("expression", format!("invalid regex: {e}")))?
                        .is_match(&subject)
                }
            };
            Ok(Value::Bool(matched != *negate))
        }
        Node::Binary(op, lhs, rhs) => binary(*op, eval(lhs, params)?, eval(rhs, params)?),
        Node::Call { func, args, .. } => {
            let args = args
                .iter()
                .map(|n| eval(n, params))
                .collect::<Result<Vec<_>>>()?;
            func(&args)
        }
    }
}

fn truth(op: &str, v: &Value) -> Result<bool> {
    v.as_bool().ok_or_else(|| type_error(op, v, None))
}

fn type_error(op: &str, lhs: &Value, rhs: Option<&Value>) -> Error {
    match rhs {
        Some(rhs) => Error::Type(format!(
            "operator {op} is not defined for {} and {}",
            lhs.kind(),
            rhs.kind()
        )),
        None => Error::Type(format!("operator {op} is not defined for {}", lhs.kind())),
    }
}

fn op_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Rem => "%",
        BinOp::Pow => "**",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value> {
    match op {
        BinOp::Eq => return Ok(Value::Bool(lhs == rhs)),
        BinOp::Ne => return Ok(Value::Bool(lhs != rhs)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = compare(&lhs, &rhs).ok_or_else(|| type_error(op_name(op), &lhs, Some(&rhs)))?;
            let ok = match op {
                BinOp::Lt => ord == Ordering::Less,
                BinOp::Le => ord != Ordering::Greater,
                BinOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            return Ok(Value::Bool(ok));
        }
        _ => {}
    }

    match (op, &lhs, &rhs) {
        (BinOp::Add, Value::Str(a), b) => return Ok(Value::Str(format!("{a}{b}"))),
        (BinOp::Add, a, Value::Str(b)) => return Ok(Value::Str(format!("{a}{b}"))),
        (BinOp::Add, Value::Time(t), n) | (BinOp::Add, n, Value::Time(t)) => {
            if let Some(ns) = n.as_f64() {
                return Ok(Value::Time(*t + Duration::nanoseconds(ns as i64)));
            }
        }
        (BinOp::Sub, Value::Time(a), Value::Time(b)) => {
            let ns = (*a - *b).num_nanoseconds().unwrap_or(i64::MAX);
            return Ok(Value::Int(ns));
        }
        (BinOp::Sub, Value::Time(t), n) => {
            if let Some(ns) = n.as_f64() {
                return Ok(Value::Time(*t - Duration::nanoseconds(ns as i64)));
            }
        }
        (_, Value::Int(a), Value::Int(b)) => {
            let exact = match op {
                BinOp::Add => a.checked_add(*b),
                BinOp::Sub => a.checked_sub(*b),
                BinOp::Mul => a.checked_mul(*b),
                BinOp::Rem => a.checked_rem(*b),
                _ => None,
            };
            if let Some(v) = exact {
                return Ok(Value::Int(v));
            }
        }
        _ => {}
    }

    let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
        return Err(type_error(op_name(op), &lhs, Some(&rhs)));
    };
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Rem => a % b,
        _ => a.powf(b),
    };
    Ok(Value::Float(v))
}

fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => lhs.as_f64()?.partial_cmp(&rhs.as_f64()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn integer_arithmetic_stays_integral() {
        assert_eq!(binary(BinOp::Add, Value::Int(2), Value::Int(3)).unwrap(), Value::Int(5));
        assert_eq!(binary(BinOp::Div, Value::Int(3), Value::Int(2)).unwrap(), Value::Float(1.5));
        assert_eq!(
            binary(BinOp::Mul, Value::Int(i64::MAX), Value::Int(2)).unwrap(),
            Value::Float(i64::MAX as f64 * 2.0)
        );
    }

    #[test]
    fn time_arithmetic() {
        let t = Utc.timestamp_opt(10, 0).unwrap();
        let later = binary(BinOp::Add, Value::Time(t), Value::Float(1e9)).unwrap();
        assert_eq!(later, Value::Time(Utc.timestamp_opt(11, 0).unwrap()));
        assert_eq!(binary(BinOp::Sub, later, Value::Time(t)).unwrap(), Value::Int(1_000_000_000));
    }

    #[test]
    fn mismatched_comparison_is_a_type_error() {
        let err = binary(BinOp::Lt, Value::Str("a".into()), Value::Int(1)).unwrap_err();
        assert_eq!(err.to_string(), "operator < is not defined for string and int64");
        assert_eq!(binary(BinOp::Eq, Value::Str("a".into()), Value::Int(1)).unwrap(), Value::Bool(false));
    }
}
