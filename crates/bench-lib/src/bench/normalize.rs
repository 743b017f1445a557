//! Load-generator output reduction
//!
//! Extracts mean latency, tail latency and throughput from wrk2 text output
//! and normalises latencies to milliseconds:
//!
//! ```text
//!   Thread Stats   Avg      Stdev     Max   +/- Stdev
//!     Latency     1.07ms  512.00us   4.20ms   70.00%
//!     Req/Sec     10.00     0.50    12.00    95.00%
//!  99.999%    4.20ms
//! ```

use crate::error::{BenchError, Result};
use serde::Serialize;
use std::fmt::Write as _;
use tracing::warn;

/// Metrics kept for every run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    AvgLatency,
    TailLatency,
    Throughput,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::AvgLatency, Metric::TailLatency, Metric::Throughput];

    /// Name of the CSV table holding this metric
    pub fn file_name(&self) -> &'static str {
        match self {
            Metric::AvgLatency => "avg_latency.csv",
            Metric::TailLatency => "tail_latency.csv",
            Metric::Throughput => "throughput.csv",
        }
    }

    /// Label preceding the value on its output line
    fn key(&self) -> &'static str {
        match self {
            Metric::AvgLatency => "Latency",
            Metric::TailLatency => "99.999%",
            Metric::Throughput => "Req/Sec",
        }
    }

    /// Whether the captured value may carry a unit suffix
    fn has_unit(&self) -> bool {
        !matches!(self, Metric::Throughput)
    }
}

/// Normalised metrics of one run; `None` when the output had no such line
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunMetrics {
    /// Milliseconds
    pub avg_latency: Option<f64>,
    /// Milliseconds
    pub tail_latency: Option<f64>,
    /// Requests per second per thread
    pub throughput: Option<f64>,
}

impl RunMetrics {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::AvgLatency => self.avg_latency,
            Metric::TailLatency => self.tail_latency,
            Metric::Throughput => self.throughput,
        }
    }

    fn set(&mut self, metric: Metric, value: f64) {
        match metric {
            Metric::AvgLatency => self.avg_latency = Some(value),
            Metric::TailLatency => self.tail_latency = Some(value),
            Metric::Throughput => self.throughput = Some(value),
        }
    }
}

/// Raw value following `key` and at least one space on this line
fn capture_after<'a>(line: &'a str, key: &str, allow_units: bool) -> Option<&'a str> {
    for (index, _) in line.rmatch_indices(key) {
        let rest = &line[index + key.len()..];
        let trimmed = rest.trim_start_matches(' ');
        if trimmed.len() == rest.len() {
            continue;
        }

        let end = trimmed
            .char_indices()
            .find(|(_, c)| {
                !(c.is_ascii_digit() || *c == '.' || (allow_units && c.is_ascii_lowercase()))
            })
            .map(|(i, _)| i)
            .unwrap_or(trimmed.len());

        if end > 0 {
            return Some(&trimmed[..end]);
        }
    }
    None
}

/// Raw metric values as printed, first occurrence of each
pub fn extract_raw(output: &str) -> [Option<String>; 3] {
    let mut found: [Option<String>; 3] = [None, None, None];

    for line in output.lines() {
        for (slot, metric) in Metric::ALL.iter().enumerate() {
            if found[slot].is_some() {
                continue;
            }
            if let Some(value) = capture_after(line, metric.key(), metric.has_unit()) {
                found[slot] = Some(value.to_string());
                // A line carries at most one metric
                break;
            }
        }
    }

    found
}

/// Convert a value with an optional time unit to milliseconds.
///
/// `us`, `ms`, `s` and `m` (minutes) are recognised; a bare number is
/// returned unchanged.
pub fn normalize(value: &str) -> Result<f64> {
    let value = value.trim();

    // (digits, multiplier, divisor)
    let (number, multiplier, divisor) = if let Some(n) = value.strip_suffix("us") {
        (n, 1.0, 1000.0)
    } else if let Some(n) = value.strip_suffix("ms") {
        (n, 1.0, 1.0)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, 1000.0, 1.0)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 60_000.0, 1.0)
    } else {
        (value, 1.0, 1.0)
    };

    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(BenchError::MetricParse(value.to_string()));
    }

    number
        .parse::<f64>()
        .map(|v| v * multiplier / divisor)
        .map_err(|_| BenchError::MetricParse(value.to_string()))
}

/// Parse and normalise all metrics of one run.
/// Unreadable values are reported as unavailable.
pub fn parse_run_output(output: &str) -> RunMetrics {
    let mut metrics = RunMetrics::default();

    for (metric, raw) in Metric::ALL.iter().zip(extract_raw(output)) {
        let Some(raw) = raw else {
            continue;
        };
        match normalize(&raw) {
            Ok(value) => metrics.set(*metric, value),
            Err(e) => warn!(metric = ?metric, error = %e, "Ignoring unreadable metric"),
        }
    }

    metrics
}

/// One `rate,value` line; `rate,` when the value is unavailable
pub fn format_row(rate: u32, value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{},{:.2}\n", rate, v),
        None => format!("{},\n", rate),
    }
}

/// Rate-ordered rows of a single metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricTable {
    pub metric: Metric,
    pub rows: Vec<(u32, Option<f64>)>,
}

impl MetricTable {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, rate: u32, metrics: &RunMetrics) {
        self.rows.push((rate, metrics.get(self.metric)));
    }

    /// CSV text of the whole table
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for (rate, value) in &self.rows {
            let _ = write!(out, "{}", format_row(*rate, *value));
        }
        out
    }
}
