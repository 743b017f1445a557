//! Cache benchmark: preload the cache, then run the mutated client once

use super::session::BenchmarkSession;
use crate::error::Result;
use crate::exec::{command_line, CommandOutput, CommandRunner};
use crate::models::Endpoint;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const LOAD_TOOL: &str = "load_memcache";
const CLIENT_TOOL: &str = "mutated_memcache";

/// Captured output of both cache benchmark phases
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheRun {
    pub endpoint: String,
    pub load_status: i32,
    pub client_status: i32,
    #[serde(skip)]
    pub load_output: String,
    #[serde(skip)]
    pub client_output: String,
}

/// Runs the memcached load tools found in one directory
pub struct CacheBenchmark {
    runner: Arc<dyn CommandRunner>,
    tools_dir: PathBuf,
}

impl CacheBenchmark {
    pub fn new(runner: Arc<dyn CommandRunner>, tools_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            tools_dir: tools_dir.into(),
        }
    }

    fn tool(&self, name: &str) -> String {
        self.tools_dir.join(name).to_string_lossy().into_owned()
    }

    async fn phase(&self, tool: &str, endpoint: &Endpoint) -> Result<CommandOutput> {
        let program = self.tool(tool);
        let args = vec![endpoint.to_string()];
        info!(command = %command_line(&program, &args), "Running cache phase");

        let output = self.runner.run(&program, &args).await?;
        if !output.is_success() {
            warn!(tool, status = output.status, stderr = %output.stderr.trim(), "Cache phase exited with failure");
        }
        Ok(output)
    }

    /// Preload, then measure. Both captures go to the session when given.
    pub async fn run(
        &self,
        endpoint: &Endpoint,
        session: Option<&BenchmarkSession>,
    ) -> Result<CacheRun> {
        let load = self.phase(LOAD_TOOL, endpoint).await?;
        let client = self.phase(CLIENT_TOOL, endpoint).await?;

        if let Some(session) = session {
            session.write_raw(LOAD_TOOL, &load.stdout).await?;
            session.write_raw(CLIENT_TOOL, &client.stdout).await?;
        }

        Ok(CacheRun {
            endpoint: endpoint.to_string(),
            load_status: load.status,
            client_status: client.status,
            load_output: load.stdout,
            client_output: client.stdout,
        })
    }
}
