//! Prelude - Import everything you need with one line.
//!
//! ```rust
//! use proofloop_core::prelude::*;
//! ```
//!
//! Brings in the controller and its seams, the data types, the errors, and
//! the sandbox backends with their configuration.

pub use crate::analyzer::{AnalysisSummary, Mismatch, Oracle};
pub use crate::config::LoopConfig;
pub use crate::controller::{IterationController, Phase, UnverifiedReason, Verdict, WorkflowOutcome};
pub use crate::error::{AnalysisParseError, ExtractionError, LoopError, ProposerError};
pub use crate::proposer::{CodeProposer, Feedback, TestProposer};
pub use crate::reporter::{OracleReporter, Reporter};
pub use crate::transcript::{Channel, Transcript};
pub use crate::types::{CandidateCode, Task, TestCase};

pub use proofloop_sandbox::{
    CaseError, CaseResult, ExecutionReport, NetworkPolicy, Sandbox, SandboxConfig, SandboxError,
};

#[cfg(feature = "docker")]
pub use proofloop_sandbox::DockerSandbox;

#[cfg(feature = "process")]
pub use proofloop_sandbox::ProcessSandbox;
