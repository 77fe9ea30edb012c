//! TQL: line-oriented data pipelines over the database and other sources.
//!
//! ```no_run
//! use tagflow::tql::{CompileOptions, RunEnv, Runner, compile};
//!
//! # fn main() -> anyhow::Result<()> {
//! let pipeline = compile(
//!     "FAKE(oscillator(freq(50, 1.0), range('now', '1s', '1ms')))\nFFT(minHz(40), maxHz(60))\nJSON()",
//!     &CompileOptions::default(),
//! )?;
//! let summary = Runner::default().run(&pipeline, RunEnv::new(Box::new(std::io::stdout())))?;
//! eprintln!("{} rows", summary.rows);
//! # Ok(())
//! # }
//! ```

pub mod context;
pub(crate) mod funcs;
pub(crate) mod map;
pub(crate) mod parser;
pub(crate) mod registry;
pub(crate) mod runner;
pub mod sink;
pub mod source;
pub mod time;

pub use context::{Context, Database, Param, Params, Record, Signal};
pub use map::bridge::{Bridge, BridgeConn, BridgeHandle, SqlBridge, register_bridge, unregister_bridge};
pub use parser::{CompileOptions, Pipeline, compile};
pub use runner::{RunEnv, Runner};
