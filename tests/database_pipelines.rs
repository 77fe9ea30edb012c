// tests/database_pipelines.rs

use anyhow::Result;
use std::sync::Arc;
use tagflow::client::{Column, DataType};
use tagflow::testing::{MockResult, MockServer, SharedBuffer, connect};
use tagflow::tql::{
    Bridge, BridgeConn, CompileOptions, Database, RunEnv, Runner, SqlBridge, compile,
    register_bridge, unregister_bridge,
};
use tagflow::wire::Native;
use tagflow::{Error, RunSummary};

fn run_on(server: &Arc<MockServer>, text: &str) -> Result<(tagflow::Result<RunSummary>, String)> {
    let pipeline = compile(text, &CompileOptions::default())?;
    let db = Database::new(connect(server)?, "sys", "manager");
    let out = SharedBuffer::new();
    let result = Runner::default().run(&pipeline, RunEnv::new(out.writer()).with_database(db));
    Ok((result, out.contents()))
}

#[test]
fn sql_source_binds_parameters() -> Result<()> {
    let server = MockServer::start();
    let (result, out) = run_on(
        &server,
        "SQL('select * from tag_data where name = ?', 'query1')\nCSV(timeformat('ns'), heading(true))",
    )?;
    assert_eq!(result?.rows, 1);
    assert_eq!(out, "name,time,value\ntag,1,3.14\n");
    assert_eq!(server.open_rows(), 0);
    server.stop();
    Ok(())
}

#[test]
fn sql_statement_without_rows_reports_its_message() -> Result<()> {
    let server = MockServer::start();
    let (result, out) = run_on(
        &server,
        "SQL('insert into example (name, time, value) values(?, ?, ?)', 'a', 1, 2)\nCSV()",
    )?;
    result?;
    assert_eq!(out, "a row inserted.\n");
    server.stop();
    Ok(())
}

#[test]
fn query_builder_runs_generated_sql() -> Result<()> {
    let server = MockServer::start();
    server.register_query(
        "SELECT time, value FROM EXAMPLE WHERE name = 'sig.1' AND time BETWEEN 1000 AND 2000 LIMIT 0, 10",
        MockResult {
            columns: vec![
                Column::new("time", DataType::Datetime),
                Column::new("value", DataType::Double),
            ],
            rows: vec![
                vec![Native::Time(Native::time_from_nanos(1000)), Native::F64(1.5)],
                vec![Native::Time(Native::time_from_nanos(1500)), Native::F64(2.5)],
            ],
            expect_param: None,
        },
    );
    let (result, out) = run_on(
        &server,
        "QUERY('value', from('example', 'sig.1'), between(1000, 2000), limit(10))\nCSV()",
    )?;
    assert_eq!(result?.rows, 2);
    assert_eq!(out, "1000,1.5\n1500,2.5\n");
    server.stop();
    Ok(())
}

#[test_log::test]
fn unknown_query_fails_and_releases_the_connection() -> Result<()> {
    let server = MockServer::start();
    let (result, out) = run_on(
        &server,
        "QUERY(from('nowhere', 'x'), between(1, 2))\nCSV()",
    )?;
    let err = result.unwrap_err();
    assert!(matches!(err, Error::Server(_)), "{err:?}");
    assert_eq!(out, "");
    assert_eq!(server.open_conns(), 0);
    server.stop();
    Ok(())
}

#[test]
fn insert_sink_executes_per_row() -> Result<()> {
    let server = MockServer::start();
    let (result, _) = run_on(
        &server,
        "FAKE(linspace(1, 3, 3))\nINSERT('time', 'value', table('example'), tag('sig'))",
    )?;
    let summary = result?;
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.message, "3 rows inserted.");

    let executed = server.executed();
    assert_eq!(executed.len(), 3);
    assert_eq!(executed[0].0, "INSERT INTO example(name,time,value) VALUES(?,?,?)");
    assert_eq!(
        executed[2].1,
        vec![Native::Str("sig".into()), Native::I64(3), Native::F64(3.0)]
    );
    server.stop();
    Ok(())
}

#[test]
fn insert_rejects_rows_of_the_wrong_width() -> Result<()> {
    let server = MockServer::start();
    let (result, _) = run_on(
        &server,
        "FAKE(meshgrid(linspace(1, 2, 2), linspace(1, 2, 2)))\nINSERT('time', 'value', table('example'))",
    )?;
    let err = result.unwrap_err();
    assert!(err.to_string().contains("row has 3 values, but 2 columns"), "{err}");
    assert!(server.executed().is_empty());
    server.stop();
    Ok(())
}

#[test]
fn append_sink_streams_rows() -> Result<()> {
    let server = MockServer::start();
    let (result, _) = run_on(
        &server,
        "FAKE(linspace(1, 5, 5))\nSCRIPT({ V = ['sig', element(V, 0)] })\nAPPEND(table('example'))",
    )?;
    let summary = result?;
    assert_eq!(summary.message, "append 5 rows (success 5, fail 0).");

    let appended = server.appended("example");
    assert_eq!(appended.len(), 5);
    assert_eq!(
        appended[4],
        vec![Native::I64(5), Native::Str("sig".into()), Native::F64(5.0)]
    );
    server.stop();
    Ok(())
}

#[test]
fn database_sinks_need_a_database() -> Result<()> {
    for text in [
        "FAKE(linspace(1, 2, 2))\nINSERT('x', table('t'))",
        "FAKE(linspace(1, 2, 2))\nAPPEND(table('t'))",
        "SQL('select 1')\nCSV()",
    ] {
        let pipeline = compile(text, &CompileOptions::default())?;
        let err = Runner::default()
            .run(&pipeline, RunEnv::new(SharedBuffer::new().writer()))
            .unwrap_err();
        assert!(err.to_string().contains("no database is configured"), "{text}: {err}");
    }
    assert!(compile("FAKE(linspace(1, 2, 2))\nINSERT('x')", &CompileOptions::default()).is_err());
    Ok(())
}

#[test]
fn script_reaches_a_bridge() -> Result<()> {
    let server = MockServer::start();
    register_bridge(
        "script-mock",
        Arc::new(SqlBridge::new(connect(&server)?, "sys", "manager")),
    );
    let text = "
FAKE( linspace(1, 2, 2) )
SCRIPT({
    let br = bridge('script-mock')
    let found = bridgeQuery(br, 'select * from tag_data where name = ?', 'query1')
    let n = bridgeExec(br, 'insert into example (name, time, value) values(?, ?, ?)', 'b', K, element(V, 0))
    V = [len(found), n]
})
CSV()
";
    let pipeline = compile(text, &CompileOptions::default())?;
    let out = SharedBuffer::new();
    Runner::default().run(&pipeline, RunEnv::new(out.writer()))?;

    assert_eq!(out.contents(), "1,1,1\n2,1,1\n");
    assert_eq!(server.executed().len(), 2);
    assert_eq!(server.open_conns(), 0);
    assert!(unregister_bridge("script-mock"));
    server.stop();
    Ok(())
}

struct Exploding;

impl Bridge for Exploding {
    fn connect(&self) -> tagflow::Result<Box<dyn BridgeConn>> {
        panic!("bridge exploded")
    }
}

#[test_log::test]
fn a_panicking_stage_fails_only_its_pipeline() -> Result<()> {
    register_bridge("exploding", Arc::new(Exploding));
    let pipeline = compile(
        "FAKE(linspace(1, 3, 3))\nSCRIPT({ V = [bridge('exploding')] })\nCSV()",
        &CompileOptions::default(),
    )?;
    let err = Runner::default()
        .run(&pipeline, RunEnv::new(SharedBuffer::new().writer()))
        .unwrap_err();
    assert!(
        matches!(&err, Error::Pipeline { line: Some(2), reason, .. } if reason.contains("bridge exploded")),
        "{err:?}"
    );
    unregister_bridge("exploding");

    let again = compile("FAKE(linspace(1, 3, 3))\nCSV()", &CompileOptions::default())?;
    let summary = Runner::default().run(&again, RunEnv::new(SharedBuffer::new().writer()))?;
    assert_eq!(summary.rows, 3);
    Ok(())
}
