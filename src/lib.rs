//! # tagflow
//!
//! A client for a tag time-series database and **TQL**, a line-oriented
//! pipeline language that moves data between the database, files and
//! generated signals.
//!
//! ## Layers
//!
//! - [`wire`]: value envelopes and append tuples exchanged with the server
//! - [`client`]: sessions, queries, row cursors and appenders over a
//!   [`client::Transport`]
//! - [`driver`]: a generic SQL driver facade over the client
//! - [`expr`]: the expression language used inside TQL stages
//! - [`tql`]: the pipeline compiler and runner
//!
//! ## Quick Start
//!
//! ```no_run
//! use tagflow::tql::{CompileOptions, RunEnv, Runner, compile};
//!
//! # fn main() -> anyhow::Result<()> {
//! let text = r#"
//! # a 5 Hz sine, sampled every 10ms for a second
//! FAKE( oscillator(freq(5, 1.0), range('now', '1s', '10ms')) )
//! TAKE(10)
//! CSV( timeformat('rfc3339'), heading(true) )
//! "#;
//! let pipeline = compile(text, &CompileOptions::default())?;
//! let summary = Runner::default().run(&pipeline, RunEnv::new(Box::new(std::io::stdout())))?;
//! eprintln!("{} rows in {:?}", summary.rows, summary.elapsed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Querying the database
//!
//! ```no_run
//! use tagflow::cancel::CancelToken;
//! use tagflow::client::{Client, Config};
//!
//! # fn main() -> anyhow::Result<()> {
//! let client = Client::new(Config::default().with_server_addr("tcp://127.0.0.1:5655"))?;
//! let conn = client.connect("sys", "manager")?;
//! let mut rows = conn.query(&CancelToken::new(), "select * from example where name = ?", &["sig.1".into()])?;
//! while rows.next() {
//!     println!("{:?}", rows.values());
//! }
//! rows.close()?;
//! conn.close()?;
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod client;
pub mod driver;
pub mod error;
pub mod expr;
pub mod metrics;
pub mod testing;
pub mod tql;
pub mod value;
pub mod wire;

pub use error::{Error, Result};
pub use metrics::RunSummary;
pub use value::Value;
