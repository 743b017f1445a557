//! Benchmark execution and result reduction
//!
//! This module provides:
//! - Rate sweeps driven through a pluggable load generator (wrk2 by default)
//! - The two-phase cache benchmark
//! - Per-session on-disk tables of normalised metrics

mod cache;
mod normalize;
mod session;
mod sweep;

pub use cache::{CacheBenchmark, CacheRun};
pub use normalize::{
    extract_raw, format_row, normalize, parse_run_output, Metric, MetricTable, RunMetrics,
};
pub use session::{BenchmarkSession, SessionManifest};
pub use sweep::{
    BenchmarkRun, LoadGenerator, LoadRequest, SweepDriver, SweepPlan, Wrk2Generator,
    DEFAULT_RATES,
};

/// Split a sweep's runs into one table per metric, in rate order
pub fn tables(runs: &[BenchmarkRun]) -> Vec<MetricTable> {
    Metric::ALL
        .iter()
        .map(|metric| {
            let mut table = MetricTable::new(*metric);
            for run in runs {
                table.push(run.rate, &run.metrics);
            }
            table
        })
        .collect()
}
