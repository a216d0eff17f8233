//! External proposer interfaces.
//!
//! Proposers are opaque text-in/text-out services (typically an LLM behind
//! a prompt). The loop only ever sees their raw answers and runs them
//! through [`crate::extract`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::analyzer::AnalysisSummary;
use crate::error::ProposerError;
use crate::extract::{CASES_ACK, CODE_ACK};
use crate::types::{CandidateCode, Task, TestCase};

/// What went wrong in the previous round, sent along with a revision request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    /// Round the feedback comes from
    pub round: u32,
    /// Textual report (the summary block, or the raw execution report when
    /// the summary could not be parsed)
    pub report: String,
    /// Parsed summary, when there is one
    pub summary: Option<AnalysisSummary>,
    /// Code that was executed
    pub code: Option<CandidateCode>,
    /// Cases it was executed against
    pub cases: Vec<TestCase>,
}

impl Feedback {
    /// Phrase the code proposer must answer with to keep its code.
    #[must_use]
    pub const fn code_ack() -> &'static str {
        CODE_ACK
    }

    /// Phrase the test proposer must answer with to keep its cases.
    #[must_use]
    pub const fn cases_ack() -> &'static str {
        CASES_ACK
    }
}

/// Produces candidate implementations.
#[async_trait]
pub trait CodeProposer: Send + Sync {
    /// Propose code for `task`.
    ///
    /// Without feedback this is the initial request; with feedback the
    /// answer is either corrected code or the [`CODE_ACK`] phrase.
    async fn propose_code(&self, task: &Task, feedback: Option<&Feedback>) -> Result<String, ProposerError>;
}

/// Produces test cases.
#[async_trait]
pub trait TestProposer: Send + Sync {
    /// Propose a JSON array of `{input, expected_output}` for `task`.
    ///
    /// With feedback the answer is either corrected cases or the
    /// [`CASES_ACK`] phrase.
    async fn propose_tests(&self, task: &Task, feedback: Option<&Feedback>) -> Result<String, ProposerError>;
}
