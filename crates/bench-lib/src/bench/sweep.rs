//! Offered-rate sweep
//!
//! Runs the load generator once per rate, strictly one run at a time,
//! and keeps every capture even when the tool fails.

use super::normalize::{parse_run_output, RunMetrics};
use super::session::BenchmarkSession;
use crate::error::{BenchError, Result};
use crate::exec::CommandRunner;
use crate::models::Endpoint;
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// Rates offered by a default web-server sweep, requests per second
pub const DEFAULT_RATES: [u32; 22] = [
    1, 10, 25, 50, 75, 100, 150, 200, 250, 300, 400, 500, 750, 1000, 1250, 1500, 1750, 2000, 2250,
    2500, 2750, 3000,
];

/// Validated sweep parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepPlan {
    rates: Vec<u32>,
    threads: u32,
    connections: u32,
    duration_secs: u32,
}

impl SweepPlan {
    pub fn new(rates: Vec<u32>, threads: u32, connections: u32, duration_secs: u32) -> Result<Self> {
        if rates.is_empty() {
            return Err(BenchError::InvalidSweep("no rates given".to_string()));
        }
        for rate in &rates {
            if *rate == 0 {
                return Err(BenchError::InvalidRate(*rate));
            }
        }
        for pair in rates.windows(2) {
            if pair[1] <= pair[0] {
                return Err(BenchError::InvalidRateSequence {
                    previous: pair[0],
                    next: pair[1],
                });
            }
        }
        if threads == 0 || connections == 0 {
            return Err(BenchError::InvalidSweep(
                "threads and connections must be at least 1".to_string(),
            ));
        }
        if connections < threads {
            return Err(BenchError::InvalidSweep(format!(
                "{} connections cannot be spread over {} threads",
                connections, threads
            )));
        }
        if duration_secs == 0 {
            return Err(BenchError::InvalidSweep("duration must be positive".to_string()));
        }

        Ok(Self {
            rates,
            threads,
            connections,
            duration_secs,
        })
    }

    pub fn rates(&self) -> &[u32] {
        &self.rates
    }

    pub fn threads(&self) -> u32 {
        self.threads
    }

    pub fn connections(&self) -> u32 {
        self.connections
    }

    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }
}

/// Parameters of a single load-generator invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub endpoint: Endpoint,
    pub rate: u32,
    pub threads: u32,
    pub connections: u32,
    pub duration_secs: u32,
}

/// External load generator
#[async_trait]
pub trait LoadGenerator: Send + Sync {
    /// Run once and return everything the tool printed.
    /// A non-zero exit is not an error; only failing to start the tool is.
    async fn run(&self, request: &LoadRequest) -> Result<String>;
}

/// wrk2 against `http://<endpoint><path>`
pub struct Wrk2Generator {
    runner: Arc<dyn CommandRunner>,
    binary: PathBuf,
    path: String,
}

impl Wrk2Generator {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            binary: binary.into(),
            path: "/index.html".to_string(),
        }
    }

    /// Request a different page
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Target URL for an endpoint
    pub fn target_url(&self, endpoint: &Endpoint) -> Result<Url> {
        let base = Url::parse(&format!("http://{}", endpoint))
            .map_err(|_| BenchError::InvalidAddress(endpoint.to_string()))?;
        base.join(&self.path)
            .map_err(|_| BenchError::InvalidAddress(format!("{}{}", endpoint, self.path)))
    }

    pub fn args(&self, request: &LoadRequest) -> Result<Vec<String>> {
        Ok(vec![
            format!("-R{}", request.rate),
            format!("-t{}", request.threads),
            format!("-c{}", request.connections),
            format!("-d{}s", request.duration_secs),
            "-L".to_string(),
            self.target_url(&request.endpoint)?.to_string(),
        ])
    }
}

#[async_trait]
impl LoadGenerator for Wrk2Generator {
    async fn run(&self, request: &LoadRequest) -> Result<String> {
        let args = self.args(request)?;
        let program = self.binary.to_string_lossy();
        let output = self.runner.run(&program, &args).await?;

        if !output.is_success() {
            warn!(rate = request.rate, status = output.status, stderr = %output.stderr.trim(), "wrk2 exited with failure");
        }
        Ok(output.stdout)
    }
}

/// Result of one rate of a sweep
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkRun {
    pub rate: u32,
    pub threads: u32,
    pub connections: u32,
    pub duration_secs: u32,
    #[serde(skip)]
    pub raw_output: String,
    pub metrics: RunMetrics,
}

/// Runs sweeps with one load generator
pub struct SweepDriver {
    generator: Arc<dyn LoadGenerator>,
}

impl SweepDriver {
    pub fn new(generator: Arc<dyn LoadGenerator>) -> Self {
        Self { generator }
    }

    /// Run every rate of the plan in order.
    ///
    /// A run whose tool could not be started is recorded with empty output,
    /// so every metric of that row is unavailable. When a session is given
    /// each run is persisted as soon as it finishes.
    pub async fn run_sweep(
        &self,
        endpoint: &Endpoint,
        plan: &SweepPlan,
        mut session: Option<&mut BenchmarkSession>,
    ) -> Result<Vec<BenchmarkRun>> {
        info!(
            endpoint = %endpoint,
            rates = plan.rates().len(),
            threads = plan.threads(),
            connections = plan.connections(),
            duration_secs = plan.duration_secs(),
            "Starting sweep"
        );

        let mut runs = Vec::with_capacity(plan.rates().len());

        for &rate in plan.rates() {
            let request = LoadRequest {
                endpoint: endpoint.clone(),
                rate,
                threads: plan.threads(),
                connections: plan.connections(),
                duration_secs: plan.duration_secs(),
            };

            let raw_output = match self.generator.run(&request).await {
                Ok(output) => output,
                Err(e) if e.is_precondition() => return Err(e),
                Err(e) => {
                    warn!(rate, error = %e, "Load generator failed, recording empty run");
                    String::new()
                }
            };

            let run = BenchmarkRun {
                rate,
                threads: plan.threads(),
                connections: plan.connections(),
                duration_secs: plan.duration_secs(),
                metrics: parse_run_output(&raw_output),
                raw_output,
            };

            if let Some(session) = session.as_deref_mut() {
                session.record(&run).await?;
            }

            info!(
                rate,
                avg_latency_ms = ?run.metrics.avg_latency,
                tail_latency_ms = ?run.metrics.tail_latency,
                throughput = ?run.metrics.throughput,
                "Run complete"
            );
            runs.push(run);
        }

        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, RecordingRunner};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replays canned outputs by rate and records invocation order
    struct FakeGenerator {
        outputs: Vec<(u32, Result<String>)>,
        calls: Mutex<Vec<u32>>,
    }

    impl FakeGenerator {
        fn new(outputs: Vec<(u32, Result<String>)>) -> Self {
            Self {
                outputs,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LoadGenerator for FakeGenerator {
        async fn run(&self, request: &LoadRequest) -> Result<String> {
            self.calls.lock().unwrap().push(request.rate);
            match self.outputs.iter().find(|(rate, _)| *rate == request.rate) {
                Some((_, Ok(text))) => Ok(text.clone()),
                Some((_, Err(_))) => Err(BenchError::Spawn {
                    command: "wrk".into(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "wrk"),
                }),
                None => Ok(String::new()),
            }
        }
    }

    fn output(avg: &str, tail: &str, rps: &str) -> String {
        format!(
            "    Latency   {}  0.10ms  2.00ms  70.00%\n    Req/Sec   {}  1.00  12.00  90.00%\n 99.999%    {}\n",
            avg, rps, tail
        )
    }

    #[test]
    fn test_plan_validation() {
        assert!(SweepPlan::new(vec![1, 10, 25], 1, 1, 60).is_ok());
        assert!(matches!(
            SweepPlan::new(vec![0, 10], 1, 1, 60),
            Err(BenchError::InvalidRate(0))
        ));
        assert!(matches!(
            SweepPlan::new(vec![1, 10, 10], 1, 1, 60),
            Err(BenchError::InvalidRateSequence { previous: 10, next: 10 })
        ));
        assert!(matches!(
            SweepPlan::new(vec![25, 10], 1, 1, 60),
            Err(BenchError::InvalidRateSequence { previous: 25, next: 10 })
        ));
        assert!(SweepPlan::new(vec![], 1, 1, 60).is_err());
        assert!(SweepPlan::new(vec![1], 2, 1, 60).is_err());
        assert!(SweepPlan::new(vec![1], 1, 1, 0).is_err());
        assert!(SweepPlan::new(DEFAULT_RATES.to_vec(), 1, 1, 60).is_ok());
    }

    #[tokio::test]
    async fn test_sweep_keeps_empty_run() {
        let generator = Arc::new(FakeGenerator::new(vec![
            (1, Ok(output("1.00ms", "2.00ms", "1.00"))),
            (10, Ok(String::new())),
            (25, Ok(output("1.50ms", "3.00ms", "25.00"))),
        ]));
        let driver = SweepDriver::new(generator.clone());
        let plan = SweepPlan::new(vec![1, 10, 25], 1, 1, 60).unwrap();

        let runs = driver
            .run_sweep(&Endpoint::new("10.0.0.5", 32768), &plan, None)
            .await
            .unwrap();

        assert_eq!(runs.len(), 3);
        assert_eq!(runs.iter().map(|r| r.rate).collect::<Vec<_>>(), vec![1, 10, 25]);
        assert_eq!(runs[1].metrics, RunMetrics::default());
        assert_eq!(runs[2].metrics.throughput, Some(25.0));
        assert_eq!(*generator.calls.lock().unwrap(), vec![1, 10, 25]);
    }

    #[tokio::test]
    async fn test_sweep_continues_when_tool_cannot_start() {
        let generator = Arc::new(FakeGenerator::new(vec![
            (1, Err(BenchError::InvalidSweep("unused".into()))),
            (10, Ok(output("500us", "1.00ms", "10.00"))),
        ]));
        let driver = SweepDriver::new(generator);
        let plan = SweepPlan::new(vec![1, 10], 1, 1, 5).unwrap();

        let runs = driver
            .run_sweep(&Endpoint::new("10.0.0.5", 80), &plan, None)
            .await
            .unwrap();

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].metrics, RunMetrics::default());
        assert_eq!(runs[1].metrics.avg_latency, Some(0.5));
    }

    #[tokio::test]
    async fn test_sweep_writes_session_tables() {
        let root = TempDir::new().unwrap();
        let mut session = BenchmarkSession::open(root.path().join("s")).await.unwrap();
        let generator = Arc::new(FakeGenerator::new(vec![
            (1, Ok(output("1.00ms", "2.00s", "1.00"))),
            (10, Ok("    Latency   3.00ms\n".to_string())),
        ]));
        let driver = SweepDriver::new(generator);
        let plan = SweepPlan::new(vec![1, 10], 1, 1, 60).unwrap();

        let runs = driver
            .run_sweep(&Endpoint::new("10.0.0.5", 80), &plan, Some(&mut session))
            .await
            .unwrap();

        let dir = root.path().join("s");
        for table in crate::bench::tables(&runs) {
            assert_eq!(
                std::fs::read_to_string(dir.join(table.metric.file_name())).unwrap(),
                table.to_csv()
            );
        }
        assert_eq!(
            std::fs::read_to_string(dir.join("avg_latency.csv")).unwrap(),
            "1,1.00\n10,3.00\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.join("tail_latency.csv")).unwrap(),
            "1,2000.00\n10,\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.join("throughput.csv")).unwrap(),
            "1,1.00\n10,\n"
        );
        assert!(dir.join("r1-t1-c1-d60").exists());
    }

    #[tokio::test]
    async fn test_wrk2_invocation() {
        let runner = Arc::new(RecordingRunner::new());
        runner.respond(
            "wrk",
            CommandOutput {
                status: 1,
                stdout: "    Latency   2.00ms\n".to_string(),
                stderr: "socket errors".to_string(),
            },
        );
        let generator = Wrk2Generator::new(runner.clone(), "wrk");

        let request = LoadRequest {
            endpoint: Endpoint::new("10.0.0.5", 32768),
            rate: 250,
            threads: 2,
            connections: 4,
            duration_secs: 30,
        };
        let text = generator.run(&request).await.unwrap();

        // Output survives a failing exit status
        assert_eq!(text, "    Latency   2.00ms\n");
        assert_eq!(
            runner.commands(),
            vec!["wrk -R250 -t2 -c4 -d30s -L http://10.0.0.5:32768/index.html"]
        );
    }
}
