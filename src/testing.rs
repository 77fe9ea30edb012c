//! Test support: an in-process database server and pipeline fixtures.
//!
//! ```no_run
//! use tagflow::testing::{MockServer, SharedBuffer, connect};
//! use tagflow::tql::{CompileOptions, Database, RunEnv, Runner, compile};
//!
//! # fn main() -> anyhow::Result<()> {
//! let server = MockServer::start();
//! let db = Database::new(connect(&server)?, "sys", "manager");
//! let out = SharedBuffer::new();
//! let pipeline = compile("FAKE(linspace(0, 1, 3))\nINSERT('time', 'value', table('example'), tag('sig'))", &CompileOptions::default())?;
//! Runner::default().run(&pipeline, RunEnv::new(out.writer()).with_database(db))?;
//! server.stop();
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod mock_io;
mod mock_server;

pub use fixtures::*;
pub use mock_io::{SharedBuffer, TempFilePath};
pub use mock_server::{MockResult, MockServer};

use crate::client::{Client, Config};
use std::sync::Arc;

/// A client talking to `server`.
pub fn connect(server: &Arc<MockServer>) -> anyhow::Result<Client> {
    Ok(Client::new(Config::default().with_transport(server.transport()))?)
}
