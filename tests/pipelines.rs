// tests/pipelines.rs

use anyhow::Result;
use serde_json::{Value as Json, json};
use std::io::Cursor;
use std::time::{Duration, Instant};
use tagflow::cancel::CancelToken;
use tagflow::testing::{SharedBuffer, TempFilePath};
use tagflow::tql::{CompileOptions, RunEnv, Runner, compile};
use tagflow::{Error, RunSummary};

fn run_with(text: &str, runner: &Runner, env: impl FnOnce(RunEnv) -> RunEnv) -> (tagflow::Result<RunSummary>, String) {
    let pipeline = compile(text, &CompileOptions::default()).expect("pipeline compiles");
    let out = SharedBuffer::new();
    let result = runner.run(&pipeline, env(RunEnv::new(out.writer())));
    (result, out.contents())
}

fn run(text: &str) -> Result<String> {
    let (result, out) = run_with(text, &Runner::default(), |env| env);
    result?;
    Ok(out)
}

#[test]
fn fake_linspace_to_csv_with_heading() -> Result<()> {
    let out = run("FAKE(linspace(0, 1, 3))\nCSV(heading(true))")?;
    assert_eq!(out, "id,x\n1,0\n2,0.5\n3,1\n");
    Ok(())
}

#[test]
fn comments_and_blank_lines_are_ignored() -> Result<()> {
    let text = "
# generate
FAKE( linspace(1, 4, 4) )

# keep the tail
DROP(2)
CSV( sep('|') )
";
    assert_eq!(run(text)?, "3|3\n4|4\n");
    Ok(())
}

#[test]
fn string_source_splits_on_delimiter() -> Result<()> {
    let out = run("STRING('a\\nb\\nc', delimiter('\\n'))\nFILTER(K != 2)\nCSV()")?;
    assert_eq!(out, "1,a\n3,c\n");
    Ok(())
}

#[test]
fn string_source_reads_payload() -> Result<()> {
    let (result, out) = run_with(
        "STRING(payload(), '\\n')\nCSV()",
        &Runner::default(),
        |env| env.with_input(Box::new(Cursor::new(b"x\ny\n".to_vec()))),
    );
    assert_eq!(result?.rows, 2);
    assert_eq!(out, "1,x\n2,y\n");
    Ok(())
}

#[test]
fn payload_without_input_fails() {
    let (result, _) = run_with("STRING(payload())\nCSV()", &Runner::default(), |env| env);
    let err = result.unwrap_err();
    assert!(err.to_string().contains("no input payload"), "{err}");
}

#[test]
fn csv_file_source_with_typed_columns() -> Result<()> {
    let file = TempFilePath::with_contents("csv", "name,value\na,1.5\nb,2\n")?;
    let text = format!(
        "CSV(file({}), col(1, 'double', 'value'), header(true))\nCSV(heading(true))",
        file.tql_literal()
    );
    assert_eq!(run(&text)?, "id,name,value\n1,a,1.5\n2,b,2\n");
    Ok(())
}

#[test]
fn csv_file_source_rejects_bad_numbers() -> Result<()> {
    let file = TempFilePath::with_contents("csv", "a,1\nb,oops\n")?;
    let text = format!("CSV(file({}), col(1, 'double'))\nCSV()", file.tql_literal());
    let (result, out) = run_with(&text, &Runner::default(), |env| env);
    let err = result.unwrap_err();
    assert!(err.to_string().contains("row 2 column 1"), "{err}");
    assert_eq!(out, "1,a,1\n");
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let (result, _) = run_with(
        "STRING(file('/definitely/not/here.txt'))\nCSV()",
        &Runner::default(),
        |env| env,
    );
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn markdown_brief_summarizes_the_rest() -> Result<()> {
    let out = run("FAKE(linspace(1, 3, 3))\nMARKDOWN(brief(2))")?;
    assert_eq!(
        out,
        "|id|x|\n|:-----|:-----|\n|1|1|\n|2|2|\n|...|...|\n\n> *Total 3 records*\n"
    );
    Ok(())
}

#[test]
fn json_document_carries_schema_and_rows() -> Result<()> {
    let out = run("FAKE(linspace(1, 2, 2))\nSCRIPT({ V = [element(V, 0) * 10] })\nJSON()")?;
    let doc: Json = serde_json::from_str(&out)?;
    assert_eq!(doc["success"], json!(true));
    assert_eq!(doc["data"]["columns"], json!(["id", "x"]));
    assert_eq!(doc["data"]["rows"], json!([[1, 10.0], [2, 20.0]]));
    Ok(())
}

#[test]
fn chart_sink_builds_series() -> Result<()> {
    let out = run("FAKE(linspace(1, 3, 3))\nCHART_BAR(title('bars'), series('x'))")?;
    let doc: Json = serde_json::from_str(&out)?;
    assert_eq!(doc["type"], json!("bar"));
    assert_eq!(doc["title"], json!("bars"));
    assert_eq!(doc["xAxis"]["data"], json!([1, 2, 3]));
    assert_eq!(doc["series"][0]["name"], json!("x"));
    assert_eq!(doc["series"][0]["data"], json!([1.0, 2.0, 3.0]));
    Ok(())
}

#[test]
fn pushkey_then_flatten() -> Result<()> {
    let out = run("FAKE(meshgrid(linspace(1, 2, 2), linspace(5, 6, 2)))\nPUSHKEY('g')\nFLATTEN()\nTAKE(3)\nCSV()")?;
    assert_eq!(out, "g,1\ng,1\ng,5\n");
    Ok(())
}

#[test]
fn compile_parameters_reach_expressions() -> Result<()> {
    let pipeline = compile(
        "FAKE(linspace(1, parseFloat($n), parseFloat($n)))\nCSV()",
        &CompileOptions::default().with_param("n", "4"),
    )?;
    let out = SharedBuffer::new();
    let summary = Runner::default().run(&pipeline, RunEnv::new(out.writer()))?;
    assert_eq!(summary.rows, 4);
    assert_eq!(pipeline.stages(), vec!["FAKE", "CSV"]);
    Ok(())
}

#[test]
fn compile_errors_name_the_line() {
    let err = compile("FAKE(linspace(1, 2, 2))\nNOPE()\nCSV()", &CompileOptions::default()).unwrap_err();
    assert!(
        matches!(&err, Error::Pipeline { line: Some(2), .. }),
        "{err:?}"
    );
    assert!(err.to_string().contains("'NOPE' is not a map function"), "{err}");

    let err = compile("FAKE(linspace(1, 2, 2))\ncsv()", &CompileOptions::default()).unwrap_err();
    assert!(err.to_string().contains("upper-case"), "{err}");

    assert!(compile("CSV()", &CompileOptions::default()).is_err());
    assert!(compile("FAKE(linspace(1, 2, 2)\nCSV()", &CompileOptions::default()).is_err());
    assert!(compile("FAKE(linspace(1, 2, 2))\nCSV(bogus(1))", &CompileOptions::default()).is_err());
}

#[test]
fn map_errors_carry_the_stage_line() {
    let (result, _) = run_with(
        "FAKE(linspace(1, 3, 3))\nSCRIPT({ V = nothing })\nCSV()",
        &Runner::default(),
        |env| env,
    );
    let err = result.unwrap_err();
    assert!(err.to_string().starts_with("line 2: SCRIPT"), "{err}");
}

#[test]
fn fft_finds_the_dominant_frequency() -> Result<()> {
    let text = "
FAKE( oscillator( freq(50, 1.0), freq(120, 0.5), range(0, '1s', '1ms') ) )
SCRIPT({ V = [K, element(V, 0)]; K = 'sig' })
GROUPBYKEY()
FFT( minHz(10), maxHz(200) )
JSON()
";
    let out = run(text)?;
    let doc: Json = serde_json::from_str(&out)?;
    let rows = doc["data"]["rows"].as_array().expect("rows");
    assert!(!rows.is_empty());
    for row in rows {
        assert_eq!(row[0], json!("sig"));
        let hz = row[1].as_f64().expect("hz");
        assert!((10.0..=200.0).contains(&hz), "{hz}");
    }
    let peak = rows
        .iter()
        .max_by(|a, b| a[2].as_f64().unwrap().total_cmp(&b[2].as_f64().unwrap()))
        .expect("peak");
    assert!((peak[1].as_f64().unwrap() - 50.0).abs() < 0.5, "{peak}");
    assert!((peak[2].as_f64().unwrap() - 1.0).abs() < 0.1, "{peak}");
    Ok(())
}

#[test]
fn lazy_groupbykey_holds_until_end() -> Result<()> {
    let text = "FAKE(linspace(1, 6, 6))\nSCRIPT({ K = K % 2 == 0 ? 'even' : 'odd'; V = element(V, 0) })\nGROUPBYKEY(lazy(true))\nJSON()";
    let doc: Json = serde_json::from_str(&run(text)?)?;
    let mut rows = doc["data"]["rows"].as_array().expect("rows").clone();
    rows.sort_by_key(|r| r[0].as_str().unwrap_or_default().to_string());
    assert_eq!(rows, vec![json!(["even", 2.0, 4.0, 6.0]), json!(["odd", 1.0, 3.0, 5.0])]);
    Ok(())
}

#[test]
fn pre_cancelled_run_writes_nothing() -> Result<()> {
    let cancel = CancelToken::new();
    cancel.cancel();
    let (result, out) = run_with(
        "FAKE(linspace(1, 1000, 1000))\nCSV()",
        &Runner::default(),
        |env| env.with_cancel(cancel),
    );
    assert_eq!(result?.rows, 0);
    assert_eq!(out, "");
    Ok(())
}

#[test_log::test]
fn deadline_stops_a_long_pipeline() {
    let started = Instant::now();
    let (result, _) = run_with(
        "FAKE(oscillator(freq(1, 1.0), range(0, '10000s', '1ms')))\nCSV()",
        &Runner::default().with_deadline(Duration::from_millis(50)),
        |env| env,
    );
    let err = result.unwrap_err();
    assert!(err.to_string().contains("deadline exceeded"), "{err}");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn circuit_break_beats_the_deadline() -> Result<()> {
    let (result, out) = run_with(
        "FAKE(oscillator(freq(1, 1.0), range(0, '10000s', '1ms')))\nTAKE(2)\nCSV(timeformat('s'))",
        &Runner::default().with_deadline(Duration::from_secs(30)),
        |env| env,
    );
    assert_eq!(result?.rows, 2);
    assert_eq!(out.lines().count(), 2);
    assert!(out.starts_with("0,"));
    Ok(())
}

#[cfg(feature = "metrics")]
#[test]
fn summary_counts_each_stage() -> Result<()> {
    let pipeline = compile("FAKE(linspace(1, 10, 10))\nFILTER(K > 4)\nCSV()", &CompileOptions::default())?;
    let summary = Runner::default().run(&pipeline, RunEnv::new(SharedBuffer::new().writer()))?;
    assert_eq!(summary.rows, 6);
    let names: Vec<&str> = summary.stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["FAKE", "FILTER", "CSV"]);
    assert_eq!(summary.stages[1].rows_in, 10);
    assert_eq!(summary.stages[1].rows_out, 6);
    assert_eq!(summary.stages[1].dropped, 4);
    Ok(())
}
