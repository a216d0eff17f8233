//! Case executor: one `(candidate, input)` pair through the runner.
//!
//! The executor never returns an error. Everything that can go wrong while
//! running a case ends up in the [`CaseResult`]:
//!
//! | What happened | Outcome |
//! |---------------|---------|
//! | runner replied, `error` null | `Returned(value)` |
//! | runner replied with `error` | `Failed(Runtime)` |
//! | wall-clock budget exceeded | `Failed(Timeout)` |
//! | non-zero exit, crash, unreadable reply | `Failed(Infrastructure)` |

use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use crate::batch::StagedRound;
use crate::case::{CaseError, CaseResult};
use crate::error::SandboxError;
use crate::protocol::RunnerReply;
use crate::traits::{ExecutionResult, Sandbox};

/// Runs single cases inside a provisioned sandbox.
#[derive(Debug, Clone, Copy)]
pub struct CaseExecutor {
    timeout: Duration,
}

impl CaseExecutor {
    /// Create an executor with a per-case wall-clock budget.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Wall-clock budget applied to every case.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run case `index` of a staged round.
    #[instrument(skip(self, sandbox, staged, input), fields(sandbox = sandbox.kind()))]
    pub async fn execute<S: Sandbox + ?Sized>(
        &self,
        sandbox: &S,
        staged: &StagedRound,
        index: usize,
        input: &Value,
    ) -> CaseResult {
        let argv = vec![
            sandbox.interpreter().to_string(),
            staged.runner_path.clone(),
            staged.request_path.clone(),
            index.to_string(),
        ];

        match sandbox.exec(&argv, self.timeout).await {
            Ok(output) => interpret(input, &output),
            Err(SandboxError::Timeout(limit_ms)) => {
                warn!(case = index, limit_ms, "Case exceeded its time budget");
                CaseResult::failed(input.clone(), "", CaseError::Timeout { limit_ms })
            }
            Err(e) => {
                error!(case = index, error = %e, "Case could not be run");
                CaseResult::failed(input.clone(), "", CaseError::Infrastructure(e.to_string()))
            }
        }
    }
}

/// Turn the runner's process output into a case result.
fn interpret(input: &Value, output: &ExecutionResult) -> CaseResult {
    match RunnerReply::parse(&output.stdout) {
        Ok(reply) if output.is_success() => {
            debug!(elapsed_ms = output.execution_time_ms, "Runner replied");
            match reply.error {
                Some(message) => {
                    CaseResult::failed(input.clone(), reply.printed, CaseError::Runtime(message))
                }
                None => CaseResult::returned(input.clone(), reply.printed, reply.returned),
            }
        }
        Ok(reply) => {
            let detail = reply
                .error
                .unwrap_or_else(|| format!("runner exited with status {}", output.exit_code));
            error!(exit_code = output.exit_code, %detail, "Runner rejected the request");
            CaseResult::failed(input.clone(), reply.printed, CaseError::Infrastructure(detail))
        }
        Err(parse_error) => {
            let stderr = output.stderr.trim();
            error!(exit_code = output.exit_code, %parse_error, stderr, "Runner reply unreadable");
            let detail = if stderr.is_empty() {
                format!("runner exited with status {}: {}", output.exit_code, parse_error)
            } else {
                format!(
                    "runner exited with status {}: {}; stderr: {}",
                    output.exit_code, parse_error, stderr
                )
            };
            CaseResult::failed(input.clone(), "", CaseError::Infrastructure(detail))
        }
    }
}
