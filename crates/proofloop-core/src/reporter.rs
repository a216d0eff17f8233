//! Reporter seam between execution and analysis.
//!
//! The controller never reads an [`ExecutionReport`] directly: a
//! [`Reporter`] turns it into the textual summary format, which is then parsed
//! with the strict grammar. The default reporter renders the local Oracle
//! verdict; an external one (for example an LLM asked to compare results)
//! may return free-form text around the summary block.

use async_trait::async_trait;
use proofloop_sandbox::ExecutionReport;

use crate::analyzer::Oracle;
use crate::error::ProposerError;
use crate::summary::render_summary;
use crate::types::TestCase;

/// Produces the textual analysis of one round.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, cases: &[TestCase], report: &ExecutionReport) -> Result<String, ProposerError>;
}

/// Renders the [`Oracle`] verdict.
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleReporter;

#[async_trait]
impl Reporter for OracleReporter {
    async fn report(&self, cases: &[TestCase], report: &ExecutionReport) -> Result<String, ProposerError> {
        Ok(render_summary(&Oracle::analyze(cases, report)))
    }
}
