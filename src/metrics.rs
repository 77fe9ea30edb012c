//! Execution counters for pipeline runs.
//!
//! Every stage owns a [`StageStats`] updated with atomic increments by its
//! worker. When the run ends the runner folds them into a [`RunSummary`],
//! which can be printed, serialized to JSON or saved to a file.
//!
//! ```no_run
//! use tagflow::tql::{compile, CompileOptions, Runner, RunEnv};
//!
//! # fn main() -> anyhow::Result<()> {
//! let pipeline = compile("FAKE(linspace(0, 1, 5))\nCSV()", &CompileOptions::default())?;
//! let summary = Runner::default().run(&pipeline, RunEnv::new(Box::new(std::io::sink())))?;
//! summary.print();
//! summary.save_to_file("metrics.json")?;
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use serde::Serialize;
use serde_json::{Value, json};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters of one stage.
#[derive(Debug)]
pub struct StageStats {
    name: String,
    rows_in: AtomicU64,
    rows_out: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
}

impl StageStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows_in: AtomicU64::new(0),
            rows_out: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn record_in(&self) {
        self.rows_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_out(&self, n: u64) {
        self.rows_out.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            name: self.name.clone(),
            rows_in: self.rows_in.load(Ordering::Relaxed),
            rows_out: self.rows_out.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a [`StageStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSnapshot {
    pub name: String,
    pub rows_in: u64,
    pub rows_out: u64,
    pub dropped: u64,
    pub errors: u64,
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Rows written by the sink.
    pub rows: u64,
    #[serde(serialize_with = "as_millis")]
    pub elapsed: Duration,
    /// Sink result message, e.g. "10 rows inserted." for database sinks.
    pub message: String,
    /// Per-stage counters, source first. Empty without the `metrics` feature.
    pub stages: Vec<StageSnapshot>,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u128(d.as_millis())
}

impl RunSummary {
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "rows": self.rows,
            "elapsed_ms": self.elapsed.as_millis(),
            "message": self.message,
            "stages": self.stages,
        })
    }

    pub fn print(&self) {
        println!("\n========== Pipeline Metrics ==========");
        println!(
            "Execution Time: {:.3}s ({} ms)",
            self.elapsed.as_secs_f64(),
            self.elapsed.as_millis()
        );
        println!("Rows: {}", self.rows);
        if !self.message.is_empty() {
            println!("Message: {}", self.message);
        }
        println!("--------------------------------------");
        for s in &self.stages {
            println!(
                "{}: in={} out={} dropped={} errors={}",
                s.name, s.rows_in, s.rows_out, s.dropped, s.errors
            );
        }
        println!("======================================\n");
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        let formatted = serde_json::to_string_pretty(&self.to_json())?;
        file.write_all(formatted.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = StageStats::new("TAKE");
        stats.record_in();
        stats.record_in();
        stats.record_out(1);
        stats.record_dropped();
        let snap = stats.snapshot();
        assert_eq!((snap.rows_in, snap.rows_out, snap.dropped, snap.errors), (2, 1, 1, 0));
    }

    #[test]
    fn summary_json_shape() {
        let summary = RunSummary {
            rows: 3,
            elapsed: Duration::from_millis(12),
            message: String::new(),
            stages: vec![StageStats::new("FAKE").snapshot()],
        };
        let v = summary.to_json();
        assert_eq!(v["rows"], 3);
        assert_eq!(v["elapsed_ms"], 12);
        assert_eq!(v["stages"][0]["name"], "FAKE");
    }
}
