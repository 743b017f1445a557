//! Output formatting utilities

use bench_lib::bench::BenchmarkRun;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Render items as a rounded table, `None` when there is nothing to show
pub fn render_table<T: Tabled>(items: &[T]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    Some(Table::new(items).with(Style::rounded()).to_string())
}

/// Print a table from a list of items
pub fn print_table<T: Tabled>(items: &[T]) {
    match render_table(items) {
        Some(table) => println!("{}", table),
        None => println!("{}", "No items found".yellow()),
    }
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format an optional metric with two decimals, `-` when unavailable
pub fn format_metric(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}", v),
        None => "-".to_string(),
    }
}

/// One row of the sweep summary
#[derive(Tabled)]
pub struct RunRow {
    #[tabled(rename = "Rate (req/s)")]
    pub rate: u32,
    #[tabled(rename = "Avg latency (ms)")]
    pub avg_latency: String,
    #[tabled(rename = "p99.999 (ms)")]
    pub tail_latency: String,
    #[tabled(rename = "Req/Sec")]
    pub throughput: String,
}

impl From<&BenchmarkRun> for RunRow {
    fn from(run: &BenchmarkRun) -> Self {
        Self {
            rate: run.rate,
            avg_latency: format_metric(run.metrics.avg_latency),
            tail_latency: format_metric(run.metrics.tail_latency),
            throughput: format_metric(run.metrics.throughput),
        }
    }
}

/// Print the per-rate summary of a sweep
pub fn print_runs(runs: &[BenchmarkRun], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(&runs),
        OutputFormat::Table => {
            let rows: Vec<RunRow> = runs.iter().map(RunRow::from).collect();
            print_table(&rows);

            let missing = runs
                .iter()
                .filter(|r| r.metrics.avg_latency.is_none())
                .count();
            if missing > 0 {
                print_warning(&format!("{} run(s) produced no latency figures", missing));
            }
            Ok(())
        }
    }
}

/// Color a forwarding rule count: red when any rule failed
pub fn color_rules(inserted: usize, present: usize, failed: usize) -> String {
    let text = format!(
        "{} inserted, {} already present, {} failed",
        inserted, present, failed
    );
    if failed > 0 {
        text.red().to_string()
    } else {
        text.green().to_string()
    }
}
