//! Batch runner: every case of a round through the [`CaseExecutor`].
//!
//! Cases run sequentially against one staged candidate. A failing or
//! timed-out case never stops the ones after it, and the report is
//! index-aligned with the submitted inputs. There are no retries here.

use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

use crate::case::ExecutionReport;
use crate::error::SandboxError;
use crate::executor::CaseExecutor;
use crate::protocol::{write_atomic, RunRequest, RunnerScript, REQUEST_FILE, RUNNER_FILE};
use crate::traits::Sandbox;

/// Artifacts of one round, as seen from inside the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedRound {
    /// Context path of the runner program
    pub runner_path: String,
    /// Context path of the request artifact
    pub request_path: String,
    /// Number of cases in the request
    pub case_count: usize,
}

/// Fans a list of inputs through the case executor.
pub struct BatchRunner<'a, S: Sandbox + ?Sized> {
    sandbox: &'a S,
    executor: CaseExecutor,
    runner: RunnerScript,
}

impl<'a, S: Sandbox + ?Sized> BatchRunner<'a, S> {
    /// Create a runner over a provisioned sandbox.
    pub fn new(sandbox: &'a S, case_timeout: Duration) -> Self {
        Self {
            sandbox,
            executor: CaseExecutor::new(case_timeout),
            runner: RunnerScript::Embedded,
        }
    }

    /// Use a different runner program.
    #[must_use]
    pub fn runner(mut self, runner: RunnerScript) -> Self {
        self.runner = runner;
        self
    }

    /// Write the runner and the request artifact into the workspace.
    ///
    /// Both are fully committed before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::StagingFailed`] if either artifact cannot be
    /// placed.
    #[instrument(skip(self, source, inputs), fields(cases = inputs.len()))]
    pub async fn stage(
        &self,
        source: &str,
        entry_point: Option<&str>,
        inputs: &[Value],
    ) -> Result<StagedRound, SandboxError> {
        let runner_host = self.runner.materialize().await?;
        self.sandbox.copy_in(&runner_host, RUNNER_FILE).await?;

        let request = RunRequest::new(source, entry_point, inputs.to_vec());
        let bytes = serde_json::to_vec(&request)
            .map_err(|e| SandboxError::StagingFailed(format!("cannot encode request: {e}")))?;

        let layout = self.sandbox.layout();
        write_atomic(&layout.host_path(REQUEST_FILE), &bytes)
            .await
            .map_err(|e| SandboxError::StagingFailed(format!("cannot write request: {e}")))?;

        Ok(StagedRound {
            runner_path: layout.context_path(RUNNER_FILE),
            request_path: layout.context_path(REQUEST_FILE),
            case_count: inputs.len(),
        })
    }

    /// Stage the candidate and run every input against it.
    ///
    /// # Errors
    ///
    /// Only staging failures are returned; per-case failures are recorded in
    /// the report.
    #[instrument(skip(self, source, inputs), fields(sandbox = self.sandbox.kind(), cases = inputs.len()))]
    pub async fn run(
        &self,
        source: &str,
        entry_point: Option<&str>,
        inputs: &[Value],
    ) -> Result<ExecutionReport, SandboxError> {
        let staged = self.stage(source, entry_point, inputs).await?;
        let start = Instant::now();

        let mut results = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            results.push(self.executor.execute(self.sandbox, &staged, index, input).await);
        }

        let report = ExecutionReport::new(results);
        let infra = report.infrastructure_errors();
        if infra > 0 {
            warn!(infra, "Batch finished with infrastructure errors");
        }
        info!(
            cases = report.len(),
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Batch finished"
        );

        Ok(report)
    }
}
