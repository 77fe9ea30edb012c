//! Text encoders writing to the pipeline output: `CSV`, `JSON`, `MARKDOWN`
//! and the `CHART_*` family.

use super::{Formatter, Sink, SinkEnv, SinkFactory, SinkOption, SinkRef, TimeFormat, options, unexpected};
use crate::client::Columns;
use crate::error::{Error, Result};
use crate::value::Value;
use serde_json::json;
use std::io::Write;
use std::time::Instant;

fn no_names(func: &str, names: &[String]) -> Result<()> {
    match names.first() {
        Some(name) => Err(Error::pipeline(
            format!("f({func})"),
            format!("unexpected argument '{name}'"),
        )),
        None => Ok(()),
    }
}

#[cfg(feature = "io-csv")]
mod csv_sink {
    use super::*;
    use csv::WriterBuilder;

    #[derive(Debug, Clone)]
    pub(super) struct CsvFactory {
        pub(super) fmt: Formatter,
        pub(super) sep: u8,
        pub(super) heading: bool,
        pub(super) rownum: bool,
    }

    pub(super) struct CsvSink {
        fmt: Formatter,
        heading: bool,
        rownum: bool,
        nrow: usize,
        wtr: csv::Writer<Box<dyn Write + Send>>,
    }

    impl SinkFactory for CsvFactory {
        fn name(&self) -> &str {
            "CSV"
        }

        fn build(&self, env: SinkEnv) -> Result<Box<dyn Sink>> {
            let wtr = WriterBuilder::new()
                .delimiter(self.sep)
                .has_headers(false)
                .flexible(true)
                .from_writer(env.output);
            Ok(Box::new(CsvSink {
                fmt: self.fmt.clone(),
                heading: self.heading,
                rownum: self.rownum,
                nrow: 0,
                wtr,
            }))
        }
    }

    impl Sink for CsvSink {
        fn set_header(&mut self, columns: &Columns) -> Result<()> {
            if !self.heading {
                return Ok(());
            }
            let mut names = columns.names();
            if self.rownum {
                names.insert(0, "ROWNUM".to_string());
            }
            self.wtr.write_record(&names)?;
            Ok(())
        }

        fn add_row(&mut self, row: Vec<Value>) -> Result<()> {
            self.nrow += 1;
            let mut record: Vec<String> = Vec::with_capacity(row.len() + 1);
            if self.rownum {
                record.push(self.nrow.to_string());
            }
            record.extend(row.iter().map(|v| self.fmt.text(v)));
            self.wtr.write_record(&record)?;
            Ok(())
        }

        fn close(mut self: Box<Self>) -> Result<String> {
            self.wtr.flush()?;
            Ok(String::new())
        }
    }
}

/// `CSV(tz()?, sep()?, heading()?, rownum()?, timeformat()?, precision()?)`
#[cfg(feature = "io-csv")]
pub(crate) fn fn_csv(args: &[Value]) -> Result<Value> {
    let (names, opts) = options("CSV", args)?;
    no_names("CSV", &names)?;
    let mut factory = csv_sink::CsvFactory {
        fmt: Formatter::default(),
        sep: b',',
        heading: false,
        rownum: false,
    };
    for opt in &opts {
        if factory.fmt.apply(opt) {
            continue;
        }
        match opt {
            SinkOption::Sep(b) => factory.sep = *b,
            SinkOption::Heading(h) => factory.heading = *h,
            SinkOption::Rownum(r) => factory.rownum = *r,
            other => return Err(unexpected("CSV", other)),
        }
    }
    Ok(SinkRef::new(factory))
}

#[derive(Debug, Clone)]
struct JsonFactory {
    fmt: Formatter,
    rownum: bool,
}

struct JsonSink {
    fmt: Formatter,
    rownum: bool,
    started: Instant,
    columns: Vec<String>,
    types: Vec<String>,
    rows: Vec<serde_json::Value>,
    out: Box<dyn Write + Send>,
}

impl SinkFactory for JsonFactory {
    fn name(&self) -> &str {
        "JSON"
    }

    fn build(&self, env: SinkEnv) -> Result<Box<dyn Sink>> {
        Ok(Box::new(JsonSink {
            fmt: self.fmt.clone(),
            rownum: self.rownum,
            started: Instant::now(),
            columns: Vec::new(),
            types: Vec::new(),
            rows: Vec::new(),
            out: env.output,
        }))
    }
}

impl Sink for JsonSink {
    fn set_header(&mut self, columns: &Columns) -> Result<()> {
        self.columns = columns.names();
        self.types = columns.types().iter().map(|t| t.as_str().to_string()).collect();
        if self.rownum {
            self.columns.insert(0, "ROWNUM".into());
            self.types.insert(0, "int64".into());
        }
        Ok(())
    }

    fn add_row(&mut self, row: Vec<Value>) -> Result<()> {
        let mut values: Vec<serde_json::Value> = Vec::with_capacity(row.len() + 1);
        if self.rownum {
            values.push(json!(self.rows.len() + 1));
        }
        values.extend(row.iter().map(|v| self.fmt.json(v)));
        self.rows.push(serde_json::Value::Array(values));
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<String> {
        let doc = json!({
            "data": {
                "columns": self.columns,
                "types": self.types,
                "rows": self.rows,
            },
            "success": true,
            "reason": "success",
            "elapse": format!("{:?}", self.started.elapsed()),
        });
        serde_json::to_writer(&mut self.out, &doc)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(String::new())
    }
}

/// `JSON(tz()?, rownum()?, timeformat()?, precision()?)`
pub(crate) fn fn_json(args: &[Value]) -> Result<Value> {
    let (names, opts) = options("JSON", args)?;
    no_names("JSON", &names)?;
    let mut factory = JsonFactory {
        fmt: Formatter::default(),
        rownum: false,
    };
    for opt in &opts {
        if factory.fmt.apply(opt) {
            continue;
        }
        match opt {
            SinkOption::Rownum(r) => factory.rownum = *r,
            other => return Err(unexpected("JSON", other)),
        }
    }
    Ok(SinkRef::new(factory))
}

#[derive(Debug, Clone)]
struct MarkdownFactory {
    fmt: Formatter,
    brief: Option<usize>,
    rownum: bool,
}

struct MarkdownSink {
    fmt: Formatter,
    brief: Option<usize>,
    rownum: bool,
    total: usize,
    header: Vec<String>,
    lines: Vec<Vec<String>>,
    out: Box<dyn Write + Send>,
}

impl SinkFactory for MarkdownFactory {
    fn name(&self) -> &str {
        "MARKDOWN"
    }

    fn build(&self, env: SinkEnv) -> Result<Box<dyn Sink>> {
        Ok(Box::new(MarkdownSink {
            fmt: self.fmt.clone(),
            brief: self.brief,
            rownum: self.rownum,
            total: 0,
            header: Vec::new(),
            lines: Vec::new(),
            out: env.output,
        }))
    }
}

fn write_line(out: &mut dyn Write, cells: &[String]) -> std::io::Result<()> {
    writeln!(out, "|{}|", cells.join("|"))
}

impl Sink for MarkdownSink {
    fn set_header(&mut self, columns: &Columns) -> Result<()> {
        self.header = columns.names();
        if self.rownum {
            self.header.insert(0, "ROWNUM".into());
        }
        Ok(())
    }

    fn add_row(&mut self, row: Vec<Value>) -> Result<()> {
        self.total += 1;
        if self.brief.is_some_and(|n| self.lines.len() >= n) {
            return Ok(());
        }
        let mut cells = Vec::with_capacity(row.len() + 1);
        if self.rownum {
            cells.push(self.total.to_string());
        }
        cells.extend(row.iter().map(|v| self.fmt.text(v).replace('|', "\\|")));
        self.lines.push(cells);
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<String> {
        let out = self.out.as_mut();
        write_line(out, &self.header)?;
        write_line(out, &vec![":-----".to_string(); self.header.len()])?;
        for line in &self.lines {
            write_line(out, line)?;
        }
        if self.lines.len() < self.total {
            write_line(out, &vec!["...".to_string(); self.header.len()])?;
            writeln!(out, "\n> *Total {} records*", self.total)?;
        }
        out.flush()?;
        Ok(String::new())
    }
}

/// `MARKDOWN(tz()?, timeformat()?, precision()?, brief(n)?, rownum()?)`
pub(crate) fn fn_markdown(args: &[Value]) -> Result<Value> {
    let (names, opts) = options("MARKDOWN", args)?;
    no_names("MARKDOWN", &names)?;
    let mut factory = MarkdownFactory {
        fmt: Formatter {
            time_format: TimeFormat::Rfc3339,
            ..Formatter::default()
        },
        brief: None,
        rownum: false,
    };
    for opt in &opts {
        if factory.fmt.apply(opt) {
            continue;
        }
        match opt {
            SinkOption::Brief(n) => factory.brief = Some(*n),
            SinkOption::Rownum(r) => factory.rownum = *r,
            other => return Err(unexpected("MARKDOWN", other)),
        }
    }
    Ok(SinkRef::new(factory))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Line,
    Scatter,
    Bar,
}

impl ChartKind {
    fn name(self) -> &'static str {
        match self {
            ChartKind::Line => "line",
            ChartKind::Scatter => "scatter",
            ChartKind::Bar => "bar",
        }
    }
}

#[derive(Debug, Clone)]
struct ChartFactory {
    kind: ChartKind,
    fmt: Formatter,
    title: String,
    subtitle: String,
    series: Vec<String>,
}

struct ChartSink {
    spec: ChartFactory,
    x_name: String,
    labels: Vec<String>,
    x: Vec<serde_json::Value>,
    ys: Vec<Vec<serde_json::Value>>,
    out: Box<dyn Write + Send>,
}

impl SinkFactory for ChartFactory {
    fn name(&self) -> &str {
        match self.kind {
            ChartKind::Line => "CHART_LINE",
            ChartKind::Scatter => "CHART_SCATTER",
            ChartKind::Bar => "CHART_BAR",
        }
    }

    fn build(&self, env: SinkEnv) -> Result<Box<dyn Sink>> {
        Ok(Box::new(ChartSink {
            spec: self.clone(),
            x_name: String::new(),
            labels: Vec::new(),
            x: Vec::new(),
            ys: Vec::new(),
            out: env.output,
        }))
    }
}

impl Sink for ChartSink {
    fn set_header(&mut self, columns: &Columns) -> Result<()> {
        let mut names = columns.names().into_iter();
        self.x_name = names.next().unwrap_or_default();
        self.labels = names.collect();
        Ok(())
    }

    fn add_row(&mut self, row: Vec<Value>) -> Result<()> {
        let mut cells = row.iter();
        let Some(x) = cells.next() else {
            return Ok(());
        };
        self.x.push(self.spec.fmt.json(x));
        for (i, y) in cells.enumerate() {
            if self.ys.len() <= i {
                self.ys.push(vec![serde_json::Value::Null; self.x.len() - 1]);
            }
            self.ys[i].push(self.spec.fmt.json(y));
        }
        let n = self.x.len();
        for series in &mut self.ys {
            series.resize(n, serde_json::Value::Null);
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<String> {
        let series: Vec<serde_json::Value> = std::mem::take(&mut self.ys)
            .into_iter()
            .enumerate()
            .map(|(i, data)| {
                let name = self
                    .spec
                    .series
                    .get(i)
                    .or_else(|| self.labels.get(i))
                    .cloned()
                    .unwrap_or_else(|| format!("column{}", i + 1));
                json!({ "name": name, "data": data })
            })
            .collect();
        let doc = json!({
            "type": self.spec.kind.name(),
            "title": self.spec.title,
            "subtitle": self.spec.subtitle,
            "xAxis": { "name": self.x_name, "data": self.x },
            "series": series,
        });
        serde_json::to_writer(&mut self.out, &doc)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(String::new())
    }
}

fn chart(kind: ChartKind, func: &str, args: &[Value]) -> Result<Value> {
    let (names, opts) = options(func, args)?;
    no_names(func, &names)?;
    let mut factory = ChartFactory {
        kind,
        fmt: Formatter::default(),
        title: String::new(),
        subtitle: String::new(),
        series: Vec::new(),
    };
    for opt in &opts {
        if factory.fmt.apply(opt) {
            continue;
        }
        match opt {
            SinkOption::Title(t) => factory.title = t.clone(),
            SinkOption::Subtitle(t) => factory.subtitle = t.clone(),
            SinkOption::Series(s) => factory.series = s.clone(),
            other => return Err(unexpected(func, other)),
        }
    }
    Ok(SinkRef::new(factory))
}

pub(crate) fn fn_chart_line(args: &[Value]) -> Result<Value> {
    chart(ChartKind::Line, "CHART_LINE", args)
}

pub(crate) fn fn_chart_scatter(args: &[Value]) -> Result<Value> {
    chart(ChartKind::Scatter, "CHART_SCATTER", args)
}

pub(crate) fn fn_chart_bar(args: &[Value]) -> Result<Value> {
    chart(ChartKind::Bar, "CHART_BAR", args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Column, DataType};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Output buffer shared with the test after the sink consumed it.
    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn render(sink: Value, rows: Vec<Vec<Value>>) -> String {
        let out = Shared::default();
        let factory = sink.downcast_ref::<SinkRef>().unwrap().clone();
        let mut sink = factory
            .0
            .build(SinkEnv {
                output: Box::new(out.clone()),
                database: None,
            })
            .unwrap();
        sink.set_header(&Columns(vec![
            Column::new("name", DataType::Varchar),
            Column::new("value", DataType::Double),
        ]))
        .unwrap();
        for row in rows {
            sink.add_row(row).unwrap();
        }
        sink.close().unwrap();
        String::from_utf8(out.0.lock().clone()).unwrap()
    }

    fn rows() -> Vec<Vec<Value>> {
        vec![vec!["a".into(), 1.5.into()], vec!["b".into(), 2.0.into()]]
    }

    #[cfg(feature = "io-csv")]
    #[test]
    fn csv_with_heading_and_separator() {
        let sink = fn_csv(&[
            super::super::fn_heading(&[true.into()]).unwrap(),
            super::super::fn_sep(&[";".into()]).unwrap(),
        ])
        .unwrap();
        assert_eq!(render(sink, rows()), "name;value\na;1.5\nb;2\n");
    }

    #[test]
    fn json_document_shape() {
        let out = render(fn_json(&[]).unwrap(), rows());
        let doc: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(doc["data"]["columns"], json!(["name", "value"]));
        assert_eq!(doc["data"]["types"], json!(["varchar", "double"]));
        assert_eq!(doc["data"]["rows"], json!([["a", 1.5], ["b", 2.0]]));
        assert_eq!(doc["success"], json!(true));
    }

    #[test]
    fn markdown_brief_truncates() {
        let out = render(fn_markdown(&[super::super::fn_brief(&[1.into()]).unwrap()]).unwrap(), rows());
        assert_eq!(
            out,
            "|name|value|\n|:-----|:-----|\n|a|1.5|\n|...|...|\n\n> *Total 2 records*\n"
        );
    }

    #[test]
    fn chart_series_follow_columns() {
        let title = super::super::fn_title(&["demo".into()]).unwrap();
        let out = render(fn_chart_line(&[title]).unwrap(), rows());
        let doc: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(doc["type"], json!("line"));
        assert_eq!(doc["title"], json!("demo"));
        assert_eq!(doc["xAxis"]["data"], json!(["a", "b"]));
        assert_eq!(doc["series"][0], json!({"name": "value", "data": [1.5, 2.0]}));
        assert!(fn_chart_bar(&["x".into()]).is_err());
    }
}
