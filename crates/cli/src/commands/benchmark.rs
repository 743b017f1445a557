//! Benchmark command

use anyhow::{Context, Result};
use bench_lib::bench::{
    BenchmarkSession, CacheBenchmark, SessionManifest, SweepDriver, SweepPlan, Wrk2Generator,
    DEFAULT_RATES,
};
use bench_lib::{Endpoint, ProcessKind};
use chrono::Local;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use super::{AppContext, SweepOptions};
use crate::output::{print_info, print_json, print_runs, print_success, print_warning, OutputFormat};

/// Validated sweep plan; the default rate list when none was given
pub fn sweep_plan(options: SweepOptions) -> Result<SweepPlan> {
    let rates = if options.rates.is_empty() {
        DEFAULT_RATES.to_vec()
    } else {
        options.rates
    };
    let plan = SweepPlan::new(
        rates,
        options.threads,
        options.connections,
        options.duration_secs,
    )?;
    Ok(plan)
}

/// JSON summary of a cache benchmark
#[derive(Serialize)]
struct CacheSummary<'a> {
    session: Option<&'a PathBuf>,
    #[serde(flatten)]
    run: &'a bench_lib::bench::CacheRun,
}

/// Benchmark an already reachable endpoint
pub async fn run_benchmark(
    ctx: &AppContext,
    process: ProcessKind,
    endpoint: &Endpoint,
    options: SweepOptions,
    format: OutputFormat,
) -> Result<()> {
    // Validate before anything touches the disk
    let plan = match process {
        ProcessKind::WebServer => Some(sweep_plan(options)?),
        ProcessKind::Cache => None,
    };

    let mut session = if ctx.dry_run {
        None
    } else {
        let started = Local::now();
        let session = BenchmarkSession::create(&ctx.config.output_root, process, ctx.backend, started)
            .await
            .context("Failed to create benchmark session directory")?;
        session
            .write_manifest(&SessionManifest {
                process,
                backend: ctx.backend,
                endpoint: endpoint.clone(),
                started,
                sweep: plan.clone(),
            })
            .await?;
        Some(session)
    };
    let session_dir = session.as_ref().map(|s| s.dir().to_path_buf());

    if matches!(format, OutputFormat::Table) {
        match &session_dir {
            Some(dir) => print_info(&format!(
                "Putting {} benchmarks in {}",
                process.label(),
                dir.display().to_string().cyan()
            )),
            None => print_warning("Dry run: results are not saved"),
        }
    }

    match plan {
        Some(plan) => {
            let generator = Wrk2Generator::new(ctx.runner.clone(), ctx.config.wrk2_path.clone());
            let driver = SweepDriver::new(Arc::new(generator));
            let runs = driver
                .run_sweep(endpoint, &plan, session.as_mut())
                .await
                .with_context(|| format!("Sweep against {} failed", endpoint))?;

            print_runs(&runs, format)?;
        }
        None => {
            let bench = CacheBenchmark::new(ctx.runner.clone(), ctx.config.cache_tools_dir.clone());
            let run = bench
                .run(endpoint, session.as_ref())
                .await
                .with_context(|| format!("Cache benchmark against {} failed", endpoint))?;

            match format {
                OutputFormat::Json => print_json(&CacheSummary {
                    session: session_dir.as_ref(),
                    run: &run,
                })?,
                OutputFormat::Table => {
                    println!("{}", run.client_output.trim_end());
                    if run.load_status != 0 || run.client_status != 0 {
                        print_warning("A cache benchmark phase exited with failure");
                    }
                }
            }
        }
    }

    if let (Some(dir), OutputFormat::Table) = (&session_dir, format) {
        print_success(&format!("Results saved to {}", dir.display()));
    }

    Ok(())
}
