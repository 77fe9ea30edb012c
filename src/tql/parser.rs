//! Compiles TQL text into a [`Pipeline`].
//!
//! One stage per statement: the first is the source, the last is the sink and
//! everything in between is a map. A statement continues over following
//! lines while a parenthesis, bracket, brace or quote is open. Lines starting
//! with `#` outside a statement are comments.
//!
//! ```text
//! # 5 Hz sine sampled for one second
//! FAKE( oscillator(freq(5, 1.0), range('now', '1s', '10ms')) )
//! TAKE(50)
//! CSV( timeformat('rfc3339') )
//! ```

use super::context::{CompileParams, Params};
use super::registry::{map_functions, sink_functions, source_functions};
use super::sink::SinkRef;
use super::source::SourceRef;
use crate::error::{Error, Result};
use crate::expr::{Expression, Functions};
use std::sync::Arc;
use tracing::debug;

/// Settings for [`compile`].
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Values for `$name` references; the last one of a name wins.
    pub params: Params,
}

impl CompileOptions {
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.entry(name.into()).or_default().push(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub(crate) line: usize,
    pub(crate) text: String,
}

pub(crate) struct SourceStage {
    pub(crate) name: String,
    pub(crate) source: SourceRef,
}

pub(crate) struct MapStage {
    pub(crate) name: String,
    pub(crate) line: usize,
    pub(crate) expr: Expression,
}

pub(crate) struct SinkStage {
    pub(crate) name: String,
    pub(crate) sink: SinkRef,
}

/// A compiled pipeline, ready for [`Runner::run`](super::Runner::run).
pub struct Pipeline {
    pub(crate) source: SourceStage,
    pub(crate) maps: Vec<MapStage>,
    pub(crate) sink: SinkStage,
    pub(crate) params: Arc<Params>,
}

impl Pipeline {
    /// Stage names, source first.
    #[must_use]
    pub fn stages(&self) -> Vec<&str> {
        let mut names = vec![self.source.name.as_str()];
        names.extend(self.maps.iter().map(|m| m.name.as_str()));
        names.push(&self.sink.name);
        names
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Pipeline").field(&self.stages()).finish()
    }
}

/// Split `text` into statements, tracking the 1-based line each starts on.
pub(crate) fn statements(text: &str) -> Result<Vec<Statement>> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut start = 0;
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (idx, line) in text.lines().enumerate() {
        let lineno = idx + 1;
        if cur.is_empty() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            start = lineno;
        } else {
            cur.push('\n');
        }
        let mut escaped = false;
        for c in line.chars() {
            match quote {
                Some(_) if escaped => escaped = false,
                Some(_) if c == '\\' => escaped = true,
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None => match c {
                    '\'' | '"' | '`' => quote = Some(c),
                    '(' | '[' | '{' => depth += 1,
                    ')' | ']' | '}' => depth -= 1,
                    _ => {}
                },
            }
        }
        cur.push_str(line);
        if depth < 0 {
            return Err(Error::pipeline("tql", "unbalanced closing bracket").at_line("tql", start));
        }
        if depth == 0 && quote.is_none() {
            out.push(Statement {
                line: start,
                text: cur.trim().to_string(),
            });
            cur.clear();
        }
    }
    if !cur.is_empty() {
        return Err(Error::pipeline("tql", "statement is not closed").at_line("tql", start));
    }
    Ok(out)
}

fn stage_name(stmt: &Statement) -> Result<String> {
    let name: String = stmt
        .text
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if !name.starts_with(|c: char| c.is_ascii_uppercase()) {
        return Err(Error::pipeline(
            "tql",
            format!("a stage should be an upper-case function call, but {:?}", stmt.text),
        )
        .at_line("tql", stmt.line));
    }
    Ok(name)
}

fn lookup<'f>(kind: &str, name: &str, funcs: &'f Functions, line: usize) -> Result<&'f Functions> {
    if funcs.contains_key(name) {
        Ok(funcs)
    } else {
        Err(Error::pipeline(name, format!("'{name}' is not a {kind} function")).at_line(name, line))
    }
}

fn compile_source(stmt: &Statement, params: &Params) -> Result<SourceStage> {
    let name = stage_name(stmt)?;
    let funcs = lookup("source", &name, source_functions(), stmt.line)?;
    let value = Expression::parse(&stmt.text, funcs)
        .and_then(|e| e.eval(&CompileParams(params)))
        .map_err(|e| e.at_line(&name, stmt.line))?;
    let source = value
        .downcast_ref::<SourceRef>()
        .cloned()
        .ok_or_else(|| Error::pipeline(&name, "does not build a source").at_line(&name, stmt.line))?;
    Ok(SourceStage { name, source })
}

fn compile_map(stmt: &Statement) -> Result<MapStage> {
    let name = stage_name(stmt)?;
    let funcs = lookup("map", &name, map_functions(), stmt.line)?;
    let mut expr = Expression::parse(&stmt.text, funcs).map_err(|e| e.at_line(&name, stmt.line))?;
    expr.prepend_args(&["CTX", "K", "V"])
        .map_err(|e| e.at_line(&name, stmt.line))?;
    Ok(MapStage {
        name,
        line: stmt.line,
        expr,
    })
}

fn compile_sink(stmt: &Statement, params: &Params) -> Result<SinkStage> {
    let name = stage_name(stmt)?;
    let funcs = lookup("sink", &name, sink_functions(), stmt.line)?;
    let value = Expression::parse(&stmt.text, funcs)
        .and_then(|e| e.eval(&CompileParams(params)))
        .map_err(|e| e.at_line(&name, stmt.line))?;
    let sink = value
        .downcast_ref::<SinkRef>()
        .cloned()
        .ok_or_else(|| Error::pipeline(&name, "does not build a sink").at_line(&name, stmt.line))?;
    Ok(SinkStage { name, sink })
}

/// Compile TQL text.
///
/// Errors name the failing stage and carry the line it starts on.
pub fn compile(text: &str, options: &CompileOptions) -> Result<Pipeline> {
    let stmts = statements(text)?;
    let [first, middle @ .., last] = stmts.as_slice() else {
        return Err(Error::pipeline("tql", "a pipeline needs at least a source and a sink"));
    };
    let source = compile_source(first, &options.params)?;
    let maps = middle.iter().map(compile_map).collect::<Result<Vec<_>>>()?;
    let sink = compile_sink(last, &options.params)?;
    let pipeline = Pipeline {
        source,
        maps,
        sink,
        params: Arc::new(options.params.clone()),
    };
    debug!(stages = ?pipeline.stages(), "pipeline compiled");
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_span_lines_and_skip_comments() {
        let text = "# header\nFAKE(\n  linspace(0, 1, 3)\n)\n\nSCRIPT({\n# kept\n yield(V) })\nCSV()";
        let got = statements(text).unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].line, 2);
        assert_eq!(got[1].line, 6);
        assert!(got[1].text.contains("# kept"));
        assert_eq!(got[2], Statement { line: 9, text: "CSV()".into() });
    }

    #[test]
    fn unclosed_statement_reports_its_line() {
        let err = statements("FAKE(linspace(0,1,3))\nTAKE(1\nCSV()").unwrap_err();
        assert_eq!(err.to_string(), "line 2: tql: statement is not closed");
    }

    #[test]
    fn stages_by_position() {
        let p = compile("FAKE(linspace(0, 1, 3))\nTAKE(2)\nDROP(1)\nJSON()", &CompileOptions::default()).unwrap();
        assert_eq!(p.stages(), vec!["FAKE", "TAKE", "DROP", "JSON"]);
    }

    #[test]
    fn misplaced_and_unknown_stages() {
        let opts = CompileOptions::default();
        let err = compile("TAKE(1)\nCSV()", &opts).unwrap_err();
        assert_eq!(err.to_string(), "line 1: TAKE: 'TAKE' is not a source function");
        let err = compile("FAKE(linspace(0,1,2))\nNOPE()\nCSV()", &opts).unwrap_err();
        assert_eq!(err.to_string(), "line 2: NOPE: 'NOPE' is not a map function");
        let err = compile("FAKE(linspace(0,1,2))\nlinspace(0,1,2)\nCSV()", &opts).unwrap_err();
        assert!(err.to_string().starts_with("line 2: tql: a stage should be"), "{err}");
        assert!(compile("CSV()", &opts).is_err());
    }

    #[test]
    fn params_resolve_at_compile_time() {
        let opts = CompileOptions::default().with_param("tag", "sig.1");
        let p = compile("QUERY('value', from('example', $tag))\nJSON()", &opts).unwrap();
        assert_eq!(p.source.name, "QUERY");
        let err = compile("QUERY('value', from('example', $missing))\nJSON()", &opts).unwrap_err();
        assert!(err.to_string().contains("undefined variable '$missing'"), "{err}");
    }
}
