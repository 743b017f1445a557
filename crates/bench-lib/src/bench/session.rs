//! On-disk layout of one benchmark session
//!
//! ```text
//! <root>/<process>-<backend>/<YYYY-MM-DD-HH-MM-SS>/
//!     r<rate>-t<threads>-c<connections>-d<duration>   raw tool output
//!     avg_latency.csv
//!     tail_latency.csv
//!     throughput.csv
//!     session.json                                   how the session was produced
//! ```
//!
//! The three tables are opened once and appended to as each run finishes.

use super::normalize::{format_row, Metric};
use super::sweep::{BenchmarkRun, SweepPlan};
use crate::error::Result;
use crate::models::{BackendKind, Endpoint, ProcessKind};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const MANIFEST_FILE: &str = "session.json";

/// Parameters a session was recorded with
#[derive(Debug, Clone, Serialize)]
pub struct SessionManifest {
    pub process: ProcessKind,
    pub backend: BackendKind,
    pub endpoint: Endpoint,
    pub started: DateTime<Local>,
    /// Absent for the cache benchmark, which has no rate sweep
    pub sweep: Option<SweepPlan>,
}

pub struct BenchmarkSession {
    dir: PathBuf,
    tables: Vec<(Metric, File)>,
}

impl BenchmarkSession {
    /// Create the session directory for a process/backend pair, named after `started`
    pub async fn create(
        root: &Path,
        process: ProcessKind,
        backend: BackendKind,
        started: DateTime<Local>,
    ) -> Result<Self> {
        let dir = root
            .join(format!("{}-{}", process.label(), backend.label()))
            .join(started.format("%Y-%m-%d-%H-%M-%S").to_string());
        Self::open(dir).await
    }

    /// Use `dir` as the session directory, creating it if needed
    pub async fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;

        let mut tables = Vec::with_capacity(Metric::ALL.len());
        for metric in Metric::ALL {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(dir.join(metric.file_name()))
                .await?;
            tables.push((metric, file));
        }

        info!(dir = %dir.display(), "Benchmark session created");
        Ok(Self { dir, tables })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Raw output file name for one run
    pub fn raw_file_name(rate: u32, threads: u32, connections: u32, duration_secs: u32) -> String {
        format!("r{}-t{}-c{}-d{}", rate, threads, connections, duration_secs)
    }

    /// Write an arbitrary raw capture into the session directory
    pub async fn write_raw(&self, file_name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.join(file_name);
        fs::write(&path, contents).await?;
        Ok(path)
    }

    pub async fn write_manifest(&self, manifest: &SessionManifest) -> Result<PathBuf> {
        let text = serde_json::to_string_pretty(manifest)?;
        self.write_raw(MANIFEST_FILE, &text).await
    }

    /// Persist a finished run: raw output plus one row per table
    pub async fn record(&mut self, run: &BenchmarkRun) -> Result<PathBuf> {
        let name = Self::raw_file_name(
            run.rate,
            run.threads,
            run.connections,
            run.duration_secs,
        );
        let raw_path = self.write_raw(&name, &run.raw_output).await?;

        for (metric, file) in &mut self.tables {
            let row = format_row(run.rate, run.metrics.get(*metric));
            file.write_all(row.as_bytes()).await?;
            file.flush().await?;
        }

        debug!(rate = run.rate, path = %raw_path.display(), "Recorded run");
        Ok(raw_path)
    }
}
