//! # proofloop-core
//!
//! Validate generated functions against generated test cases, and repair
//! them until every case passes or the iteration bound is reached.
//!
//! This crate provides:
//! - [`IterationController`] - The bounded propose/execute/analyze/revise loop
//! - [`Oracle`] - Literal expected-value comparison producing an [`AnalysisSummary`]
//! - [`render_summary`] / [`parse_summary`] - The textual summary grammar
//! - [`extract`] - Strict extraction of code and cases from proposer text
//! - [`CodeProposer`] / [`TestProposer`] / [`Reporter`] - Seams for external services
//!
//! Execution itself lives in [`proofloop_sandbox`], re-exported as [`sandbox`].
//!
//! ## Outcomes
//!
//! | Outcome | Meaning |
//! |---------|---------|
//! | `Ok` + [`Verdict::Verified`] | Every case passed |
//! | `Ok` + [`Verdict::Unverified`] | Bound reached; last candidate returned |
//! | `Err(`[`LoopError`]`)` | Sandbox could not be provisioned or staged |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use proofloop_core::prelude::*;
//! use async_trait::async_trait;
//!
//! struct Coder;
//! struct Tester;
//!
//! #[async_trait]
//! impl CodeProposer for Coder {
//!     async fn propose_code(&self, _task: &Task, _fb: Option<&Feedback>) -> Result<String, ProposerError> {
//!         Ok("```python\ndef add(a, b):\n    return a + b\n```".into())
//!     }
//! }
//!
//! #[async_trait]
//! impl TestProposer for Tester {
//!     async fn propose_tests(&self, _task: &Task, _fb: Option<&Feedback>) -> Result<String, ProposerError> {
//!         Ok(r#"[{"input": [2, 3], "expected_output": 5}]"#.into())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sandbox = DockerSandbox::new(SandboxConfig::from_env())?;
//!     let mut controller = IterationController::new(sandbox, Coder, Tester)
//!         .config(LoopConfig::from_env());
//!
//!     let outcome = controller.run(&Task::new("Add two numbers", "add")).await?;
//!     println!("{:?} after {} rounds:\n{}", outcome.verdict, outcome.rounds, outcome.code);
//!     Ok(())
//! }
//! ```

pub mod analyzer;
pub mod config;
pub mod controller;
pub mod error;
pub mod extract;
pub mod prelude;
pub mod proposer;
pub mod reporter;
pub mod summary;
pub mod transcript;
pub mod types;

pub use proofloop_sandbox as sandbox;

pub use analyzer::{values_equal, AnalysisSummary, Mismatch, Oracle};
pub use config::LoopConfig;
pub use controller::{IterationController, Phase, UnverifiedReason, Verdict, WorkflowOutcome};
pub use error::{AnalysisParseError, ExtractionError, LoopError, ProposerError};
pub use extract::{Revision, CASES_ACK, CODE_ACK};
pub use proposer::{CodeProposer, Feedback, TestProposer};
pub use reporter::{OracleReporter, Reporter};
pub use summary::{parse_summary, render_summary, SENTINEL};
pub use transcript::{Channel, Transcript, TranscriptEntry};
pub use types::{CandidateCode, Task, TestCase};
