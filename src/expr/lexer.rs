use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Number(f64),
    Str(String),
    /// Raw text between balanced braces, used for script blocks.
    Block(String),
    Ident(String),
    True,
    False,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Question,
    Colon,
    Op(&'static str),
}

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub tok: Tok,
    pub pos: usize,
}

const OPERATORS: [&str; 19] = [
    "**", "==", "!=", "<=", ">=", "&&", "||", "=~", "!~", "??", "+", "-", "*", "/", "%", "<", ">",
    "!", "=",
];

pub(crate) fn syntax_error(msg: impl std::fmt::Display, pos: usize) -> Error {
    Error::pipeline("expression", format!("{msg} at offset {pos}"))
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Token>> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        let tok = match c {
            b'(' => {
                i += 1;
                Tok::LParen
            }
            b')' => {
                i += 1;
                Tok::RParen
            }
            b'[' => {
                i += 1;
                Tok::LBracket
            }
            b']' => {
                i += 1;
                Tok::RBracket
            }
            b',' => {
                i += 1;
                Tok::Comma
            }
            b':' => {
                i += 1;
                Tok::Colon
            }
            b'?' if bytes.get(i + 1) != Some(&b'?') => {
                i += 1;
                Tok::Question
            }
            b'\'' | b'"' | b'`' => {
                let (s, next) = lex_string(src, i)?;
                i = next;
                Tok::Str(s)
            }
            b'{' => {
                let (s, next) = lex_block(src, i)?;
                i = next;
                Tok::Block(s)
            }
            b'0'..=b'9' | b'.' => {
                let (n, next) = lex_number(src, i)?;
                i = next;
                Tok::Number(n)
            }
            c if c == b'_' || c == b'$' || c.is_ascii_alphabetic() => {
                i += 1;
                while i < bytes.len() && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric()) {
                    i += 1;
                }
                match &src[start..i] {
                    "true" => Tok::True,
                    "false" => Tok::False,
                    ident => Tok::Ident(ident.to_string()),
                }
            }
            _ => {
                let rest = &src[i..];
                let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
                    let ch = rest.chars().next().unwrap_or('?');
                    return Err(syntax_error(format!("unexpected character {ch:?}"), i));
                };
                i += op.len();
                Tok::Op(op)
            }
        };
        out.push(Token { tok, pos: start });
    }
    Ok(out)
}

fn lex_string(src: &str, start: usize) -> Result<(String, usize)> {
    let quote = src.as_bytes()[start] as char;
    let mut out = String::new();
    let mut chars = src[start + 1..].char_indices();
    while let Some((off, ch)) = chars.next() {
        match ch {
            c if c == quote => return Ok((out, start + 1 + off + c.len_utf8())),
            '\\' if quote != '`' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, '0')) => out.push('\0'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            c => out.push(c),
        }
    }
    Err(syntax_error("unterminated string", start))
}

fn lex_block(src: &str, start: usize) -> Result<(String, usize)> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (off, ch) in src[start..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => quote = Some(ch),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let body = &src[start + 1..start + off];
                    return Ok((body.to_string(), start + off + 1));
                }
            }
            _ => {}
        }
    }
    Err(syntax_error("unterminated block", start))
}

fn lex_number(src: &str, start: usize) -> Result<(f64, usize)> {
    let bytes = src.as_bytes();
    if bytes[start] == b'0' && matches!(bytes.get(start + 1), Some(b'x' | b'X')) {
        let mut end = start + 2;
        while end < bytes.len() && bytes[end].is_ascii_hexdigit() {
            end += 1;
        }
        let n = i64::from_str_radix(&src[start + 2..end], 16)
            .map_err(|e| syntax_error(format!("invalid hex number: {e}"), start))?;
        return Ok((n as f64, end));
    }
    let mut end = start;
    let mut seen_exp = false;
    while end < bytes.len() {
        let b = bytes[end];
        let sign_after_exp = (b == b'+' || b == b'-') && end > start && matches!(bytes[end - 1], b'e' | b'E');
        if b.is_ascii_digit() || b == b'.' || sign_after_exp {
            end += 1;
        } else if (b == b'e' || b == b'E') && !seen_exp {
            seen_exp = true;
            end += 1;
        } else {
            break;
        }
    }
    let text = &src[start..end];
    text.parse::<f64>()
        .map(|n| (n, end))
        .map_err(|_| syntax_error(format!("invalid number {text:?}"), start))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn numbers_and_operators() {
        assert_eq!(
            toks("1.5e3 ** -0x10"),
            vec![Tok::Number(1500.0), Tok::Op("**"), Tok::Op("-"), Tok::Number(16.0)]
        );
    }

    #[test]
    fn strings_and_blocks() {
        assert_eq!(
            toks(r#"SCRIPT({ yield("}") })"#),
            vec![
                Tok::Ident("SCRIPT".into()),
                Tok::LParen,
                Tok::Block(r#" yield("}") "#.into()),
                Tok::RParen
            ]
        );
        assert_eq!(toks(r"'a\'b'"), vec![Tok::Str("a'b".into())]);
    }

    #[test]
    fn coalesce_is_not_ternary() {
        assert_eq!(
            toks("a ?? b ? c : d"),
            vec![
                Tok::Ident("a".into()),
                Tok::Op("??"),
                Tok::Ident("b".into()),
                Tok::Question,
                Tok::Ident("c".into()),
                Tok::Colon,
                Tok::Ident("d".into()),
            ]
        );
    }

    #[test]
    fn unterminated_string_fails() {
        assert!(tokenize("'abc").is_err());
    }
}
