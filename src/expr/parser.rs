use super::lexer::{Tok, Token, syntax_error, tokenize};
use super::{BinOp, Functions, Node};
use crate::error::Result;
use crate::value::Value;
use regex::Regex;

pub(crate) fn parse(src: &str, functions: &Functions) -> Result<Node> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(syntax_error("empty expression", 0));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: src.len(),
        functions,
    };
    let node = parser.ternary()?;
    if let Some(tok) = parser.tokens.get(parser.pos) {
        return Err(syntax_error(format!("unexpected token {:?}", tok.tok), tok.pos));
    }
    Ok(node)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
    functions: &'a Functions,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |t| t.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Tok::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expect(&mut self, want: &Tok, what: &str) -> Result<()> {
        if self.peek() == Some(want) {
            self.pos += 1;
            Ok(())
        } else {
            Err(syntax_error(format!("expected {what}"), self.offset()))
        }
    }

    fn ternary(&mut self) -> Result<Node> {
        let cond = self.coalesce()?;
        if self.peek() != Some(&Tok::Question) {
            return Ok(cond);
        }
        self.pos += 1;
        let then = self.ternary()?;
        self.expect(&Tok::Colon, "':'")?;
        let otherwise = self.ternary()?;
        Ok(Node::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn coalesce(&mut self) -> Result<Node> {
        let mut lhs = self.or()?;
        while self.eat_op(&["??"]).is_some() {
            let rhs = self.or()?;
            lhs = Node::Coalesce(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn or(&mut self) -> Result<Node> {
        let mut lhs = self.and()?;
        while self.eat_op(&["||"]).is_some() {
            let rhs = self.and()?;
            lhs = Node::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Node> {
        let mut lhs = self.comparison()?;
        while self.eat_op(&["&&"]).is_some() {
            let rhs = self.comparison()?;
            lhs = Node::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Node> {
        let mut lhs = self.additive()?;
        loop {
            let at = self.offset();
            let Some(op) = self.eat_op(&["==", "!=", "<", "<=", ">", ">=", "=~", "!~"]) else {
                return Ok(lhs);
            };
            let rhs = self.additive()?;
            lhs = match op {
                "=~" | "!~" => {
                    let compiled = match &rhs {
                        Node::Literal(Value::Str(pattern)) => Some(
                            Regex::new(pattern)
                                .map_err(|e| syntax_error(format!("invalid regex: {e}"), at))?,
                        ),
                        _ => None,
                    };
                    Node::Match {
                        negate: op == "!~",
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        compiled,
                    }
                }
                _ => {
                    let op = match op {
                        "==" => BinOp::Eq,
                        "!=" => BinOp::Ne,
                        "<" => BinOp::Lt,
                        "<=" => BinOp::Le,
                        ">" => BinOp::Gt,
                        _ => BinOp::Ge,
                    };
                    Node::Binary(op, Box::new(lhs), Box::new(rhs))
                }
            };
        }
    }

    fn additive(&mut self) -> Result<Node> {
        let mut lhs = self.multiplicative()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let rhs = self.multiplicative()?;
            let op = if op == "+" { BinOp::Add } else { BinOp::Sub };
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Node> {
        let mut lhs = self.power()?;
        while let Some(op) = self.eat_op(&["*", "/", "%"]) {
            let rhs = self.power()?;
            let op = match op {
                "*" => BinOp::Mul,
                "/" => BinOp::Div,
                _ => BinOp::Rem,
            };
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn power(&mut self) -> Result<Node> {
        let base = self.unary()?;
        if self.eat_op(&["**"]).is_some() {
            let exp = self.power()?;
            return Ok(Node::Binary(BinOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<Node> {
        match self.eat_op(&["-", "!", "+"]) {
            Some("-") => Ok(Node::Neg(Box::new(self.unary()?))),
            Some("!") => Ok(Node::Not(Box::new(self.unary()?))),
            Some(_) => self.unary(),
            None => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Node> {
        let at = self.offset();
        let Some(token) = self.next() else {
            return Err(syntax_error("unexpected end of expression", at));
        };
        match token.tok {
            Tok::Number(n) => Ok(Node::Literal(Value::Float(n))),
            Tok::Str(s) | Tok::Block(s) => Ok(Node::Literal(Value::Str(s))),
            Tok::True => Ok(Node::Literal(Value::Bool(true))),
            Tok::False => Ok(Node::Literal(Value::Bool(false))),
            Tok::LParen => {
                let inner = self.ternary()?;
                self.expect(&Tok::RParen, "')'")?;
                Ok(inner)
            }
            Tok::LBracket => {
                let items = self.list(&Tok::RBracket, "']'")?;
                Ok(Node::List(items))
            }
            Tok::Ident(name) => {
                if self.peek() != Some(&Tok::LParen) {
                    return Ok(Node::Ident(name));
                }
                self.pos += 1;
                let Some(func) = self.functions.get(&name).cloned() else {
                    return Err(syntax_error(format!("undefined function {name}"), token.pos));
                };
                let args = self.list(&Tok::RParen, "')'")?;
                Ok(Node::Call { name, func, args })
            }
            other => Err(syntax_error(format!("unexpected token {other:?}"), token.pos)),
        }
    }

    /// Comma separated items up to `close`, which is consumed.
    fn list(&mut self, close: &Tok, what: &str) -> Result<Vec<Node>> {
        let mut items = Vec::new();
        if self.peek() == Some(close) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.ternary()?);
            match self.peek() {
                Some(Tok::Comma) => self.pos += 1,
                Some(t) if t == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => return Err(syntax_error(format!("expected ',' or {what}"), self.offset())),
            }
        }
    }
}
