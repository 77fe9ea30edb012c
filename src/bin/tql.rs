use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::time::Duration;
use tagflow::testing::{MockServer, connect};
use tagflow::tql::{CompileOptions, Database, RunEnv, Runner, compile};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tql")]
#[command(about = "Compile and run TQL pipelines")]
struct Args {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a pipeline file, or standard input when the file is `-`.
    Run {
        file: PathBuf,

        /// `name=value` for `$name` references; may be repeated.
        #[arg(long = "param", short = 'p', value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Write the sink output here instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Run SQL, QUERY, INSERT and APPEND stages against an in-process
        /// mock server. Without it those stages fail: no network transport
        /// is built in, embedders register one with `client::register_transport`.
        #[arg(long)]
        mock: bool,

        #[arg(long, default_value = "sys", env = "TAGFLOW_USER")]
        user: String,

        #[arg(long, default_value = "manager", env = "TAGFLOW_PASSWORD")]
        password: String,

        /// Stop the pipeline after this many seconds.
        #[arg(long)]
        timeout: Option<f64>,

        /// Print the run summary as JSON on stderr.
        #[arg(long)]
        summary: bool,
    },
    /// Compile a pipeline file and print its stages.
    Check {
        file: PathBuf,

        #[arg(long = "param", short = 'p', value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{s}'")),
    }
}

fn read_source(file: &PathBuf) -> anyhow::Result<String> {
    if file.as_os_str() == "-" {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))
}

fn options(params: Vec<(String, String)>) -> CompileOptions {
    params
        .into_iter()
        .fold(CompileOptions::default(), |opts, (name, value)| {
            opts.with_param(name, value)
        })
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    match args.command {
        Command::Check { file, params } => {
            let text = read_source(&file)?;
            let pipeline = compile(&text, &options(params))?;
            println!("{}", pipeline.stages().join(" -> "));
            Ok(())
        }
        Command::Run {
            file,
            params,
            output,
            user,
            password,
            mock,
            timeout,
            summary,
        } => {
            let text = read_source(&file)?;
            let pipeline = compile(&text, &options(params))?;
            tracing::debug!(stages = ?pipeline.stages(), "compiled");

            let writer: Box<dyn Write + Send> = match &output {
                Some(path) => Box::new(BufWriter::new(
                    File::create(path).with_context(|| format!("creating {}", path.display()))?,
                )),
                None => Box::new(BufWriter::new(io::stdout())),
            };

            let mock_server = mock.then(MockServer::start);
            let mut env = RunEnv::new(writer);
            if let Some(server) = &mock_server {
                env = env.with_database(Database::new(connect(server)?, &user, &password));
            }

            let mut runner = Runner::default();
            if let Some(secs) = timeout {
                if !(secs.is_finite() && secs > 0.0) {
                    bail!("--timeout must be a positive number of seconds");
                }
                runner = runner.with_deadline(Duration::from_secs_f64(secs));
            }

            let result = runner.run(&pipeline, env);
            if let Some(mock) = mock_server {
                mock.stop();
            }
            let run = result?;

            if summary {
                eprintln!("{}", serde_json::to_string_pretty(&run)?);
            } else if !run.message.is_empty() {
                eprintln!("{}", run.message);
            }
            tracing::info!(rows = run.rows, elapsed_ms = run.elapsed.as_millis() as u64, "done");
            Ok(())
        }
    }
}
