//! Iteration Controller: the bounded validate/repair state machine.
//!
//! ```text
//! Init ─► Proposing ─► Executing ─► Analyzing ─┬─► Done
//!            ▲                                  │
//!            └──────────── Revising ◄───────────┘
//!                             │ round == max_iterations
//!                             ▼
//!                         Exhausted
//! ```
//!
//! - `Proposing` asks for whatever is still missing (initial requests, no
//!   feedback).
//! - `Executing` resets the workspace and runs every case through the
//!   [`BatchRunner`].
//! - `Analyzing` goes through the [`Reporter`] and the strict summary
//!   grammar. An unreadable summary is not terminal: the raw report becomes
//!   the feedback.
//! - `Revising` sends the round's feedback to both proposers independently
//!   (an acknowledgment keeps that side's artifact), then moves the round
//!   counter. It is the only place the counter moves, so the final round's
//!   feedback is delivered too and an exhausted workflow returns the last
//!   revision it produced.
//!
//! Proposer failures and unusable answers are logged and cost the round.
//! Only provisioning and staging failures abort the workflow.

use proofloop_sandbox::{BatchRunner, ExecutionReport, RunnerScript, Sandbox, SandboxScope};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::analyzer::AnalysisSummary;
use crate::config::LoopConfig;
use crate::error::{AnalysisParseError, LoopError};
use crate::extract::{case_revision, code_revision, extract_cases, extract_code, Revision};
use crate::proposer::{CodeProposer, Feedback, TestProposer};
use crate::reporter::{OracleReporter, Reporter};
use crate::summary::parse_summary;
use crate::transcript::{Channel, Transcript};
use crate::types::{CandidateCode, Task, TestCase};

const CONTROLLER: &str = "controller";

/// Phase of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing requested yet
    Init,
    /// Requesting whatever artifact is still missing
    Proposing,
    /// Running every case in the sandbox
    Executing,
    /// Turning the report into a summary
    Analyzing,
    /// Sending feedback to both proposers, then checking the bound
    Revising,
    /// Every case passed
    Done,
    /// The iteration bound was reached
    Exhausted,
}

impl Phase {
    /// Whether the loop stops in this phase.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Exhausted)
    }
}

/// Why a returned candidate is not verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnverifiedReason {
    /// The bound was reached with failing cases
    Exhausted,
    /// The bound was reached and the last round could not be analyzed
    AnalysisFailed,
}

/// Final judgement on the returned candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Every case of the last analyzed round passed
    Verified,
    /// Returned as-is, without a passing round
    Unverified(UnverifiedReason),
}

/// What a workflow hands back.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub verdict: Verdict,
    /// Terminal phase (`Done` or `Exhausted`)
    pub phase: Phase,
    /// Last candidate produced; after exhaustion this is the final revision,
    /// which has not been executed
    pub code: CandidateCode,
    /// Cases after the last revision
    pub cases: Vec<TestCase>,
    /// Summary of the last analyzed round
    pub summary: Option<AnalysisSummary>,
    /// Report of the last executed round
    pub report: Option<ExecutionReport>,
    /// Final round number (0 when the first round passed)
    pub rounds: u32,
}

impl WorkflowOutcome {
    /// Whether every case passed.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.verdict == Verdict::Verified
    }
}

/// Mutable state of one workflow invocation.
#[derive(Debug)]
pub(crate) struct IterationState {
    pub(crate) round: u32,
    pub(crate) phase: Phase,
    pub(crate) code: Option<CandidateCode>,
    pub(crate) cases: Vec<TestCase>,
    pub(crate) report: Option<ExecutionReport>,
    pub(crate) summary: Option<AnalysisSummary>,
    pub(crate) terminal: bool,
    feedback: Option<Feedback>,
    analysis_failed: bool,
}

impl IterationState {
    fn new() -> Self {
        Self {
            round: 0,
            phase: Phase::Init,
            code: None,
            cases: Vec::new(),
            report: None,
            summary: None,
            terminal: false,
            feedback: None,
            analysis_failed: false,
        }
    }

    /// Revising → Proposing, or Exhausted once the bound is hit.
    fn advance_round(&mut self, max_iterations: u32) -> Phase {
        self.round += 1;
        if self.round >= max_iterations {
            Phase::Exhausted
        } else {
            Phase::Proposing
        }
    }

    fn snapshot(&self, report: String, summary: Option<AnalysisSummary>) -> Feedback {
        Feedback {
            round: self.round,
            report,
            summary,
            code: self.code.clone(),
            cases: self.cases.clone(),
        }
    }
}

/// Drives proposers, sandbox and analysis until the candidate passes or the
/// bound is reached.
///
/// # Example
///
/// ```rust,ignore
/// let sandbox = DockerSandbox::new(SandboxConfig::from_env())?;
/// let mut controller = IterationController::new(sandbox, coder, tester)
///     .config(LoopConfig::from_env());
///
/// let outcome = controller.run(&Task::new("Add two numbers", "add")).await?;
/// if outcome.is_verified() {
///     println!("{}", outcome.code);
/// }
/// ```
pub struct IterationController<S: Sandbox> {
    sandbox: S,
    coder: Arc<dyn CodeProposer>,
    tester: Arc<dyn TestProposer>,
    reporter: Arc<dyn Reporter>,
    config: LoopConfig,
    runner: RunnerScript,
    transcript: Transcript,
}

impl<S: Sandbox> IterationController<S> {
    /// Create a controller owning `sandbox`.
    pub fn new(
        sandbox: S,
        coder: impl CodeProposer + 'static,
        tester: impl TestProposer + 'static,
    ) -> Self {
        Self {
            sandbox,
            coder: Arc::new(coder),
            tester: Arc::new(tester),
            reporter: Arc::new(OracleReporter),
            config: LoopConfig::default(),
            runner: RunnerScript::default(),
            transcript: Transcript::new(),
        }
    }

    /// Replace the default [`OracleReporter`].
    #[must_use]
    pub fn reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    /// Replace the loop configuration.
    #[must_use]
    pub fn config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a runner program other than the embedded one.
    #[must_use]
    pub fn runner(mut self, runner: RunnerScript) -> Self {
        self.runner = runner;
        self
    }

    /// Sandbox the workflows run in.
    pub fn sandbox(&self) -> &S {
        &self.sandbox
    }

    /// History of the last (or current) workflow.
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Run one workflow for `task`.
    ///
    /// The sandbox is provisioned on entry and torn down on every exit path.
    ///
    /// # Errors
    ///
    /// [`LoopError::Sandbox`] when provisioning or staging fails,
    /// [`LoopError::NoCandidate`] when no code was ever obtained, and
    /// [`LoopError::Config`] for an invalid configuration.
    #[instrument(skip(self, task), fields(function = %task.function_name, sandbox = self.sandbox.kind()))]
    pub async fn run(&mut self, task: &Task) -> Result<WorkflowOutcome, LoopError> {
        self.config.validate()?;

        let Self {
            sandbox,
            coder,
            tester,
            reporter,
            config,
            runner,
            transcript,
        } = self;

        transcript.clear();
        transcript.record(Channel::Executor, CONTROLLER, "Workflow starts");

        let scope = SandboxScope::acquire(&*sandbox).await?;
        let mut workflow = Workflow {
            sandbox: scope.sandbox(),
            coder: &**coder,
            tester: &**tester,
            reporter: &**reporter,
            config,
            runner,
            transcript,
        };
        let driven = workflow.drive(task).await;

        if let Err(e) = scope.release().await {
            warn!(error = %e, "Sandbox teardown failed");
        }

        let state = driven?;
        debug_assert!(state.terminal && state.phase.is_terminal());
        let verdict = match (state.phase, state.analysis_failed) {
            (Phase::Done, _) => Verdict::Verified,
            (_, true) => Verdict::Unverified(UnverifiedReason::AnalysisFailed),
            (_, false) => Verdict::Unverified(UnverifiedReason::Exhausted),
        };
        let code = state.code.ok_or(LoopError::NoCandidate { rounds: state.round })?;

        info!(rounds = state.round, ?verdict, "Workflow finished");
        Ok(WorkflowOutcome {
            verdict,
            phase: state.phase,
            code,
            cases: state.cases,
            summary: state.summary,
            report: state.report,
            rounds: state.round,
        })
    }
}

/// Borrowed view of a controller for the duration of one workflow.
struct Workflow<'a, S: Sandbox + ?Sized> {
    sandbox: &'a S,
    coder: &'a dyn CodeProposer,
    tester: &'a dyn TestProposer,
    reporter: &'a dyn Reporter,
    config: &'a LoopConfig,
    runner: &'a RunnerScript,
    transcript: &'a mut Transcript,
}

impl<S: Sandbox + ?Sized> Workflow<'_, S> {
    async fn drive(&mut self, task: &Task) -> Result<IterationState, LoopError> {
        let mut state = IterationState::new();

        loop {
            let next = match state.phase {
                Phase::Init => Phase::Proposing,
                Phase::Proposing => self.propose(task, &mut state).await,
                Phase::Executing => self.execute(&mut state).await?,
                Phase::Analyzing => self.analyze(&mut state).await,
                Phase::Revising => self.revise(task, &mut state).await,
                Phase::Done | Phase::Exhausted => break,
            };
            debug!(from = ?state.phase, to = ?next, round = state.round, "Phase transition");
            state.phase = next;
        }

        state.terminal = true;
        Ok(state)
    }

    async fn propose(&mut self, task: &Task, state: &mut IterationState) -> Phase {
        if state.cases.is_empty() {
            self.propose_cases(task, state, None).await;
        }
        if state.code.is_none() {
            self.propose_code(task, state, None).await;
        }

        if state.code.is_some() && !state.cases.is_empty() {
            Phase::Executing
        } else {
            warn!(round = state.round, "Round has no runnable candidate");
            self.transcript.record(
                Channel::Executor,
                CONTROLLER,
                format!("Round {} has no runnable candidate", state.round),
            );
            Phase::Revising
        }
    }

    async fn propose_cases(&mut self, task: &Task, state: &mut IterationState, feedback: Option<&Feedback>) {
        let initial = state.cases.is_empty();
        let feedback = if initial { None } else { feedback };
        self.transcript
            .record(Channel::Tester, CONTROLLER, request_note(task, feedback, "test cases"));

        let answer = match self.tester.propose_tests(task, feedback).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "Test proposer failed");
                self.transcript
                    .record(Channel::Tester, CONTROLLER, format!("Test proposer failed: {e}"));
                return;
            }
        };
        self.transcript.record(Channel::Tester, "tester", answer.as_str());

        let parsed = if initial {
            extract_cases(&answer).map(Revision::Replace)
        } else {
            case_revision(&answer)
        };
        match parsed {
            Ok(Revision::Keep) => info!("Test proposer kept its cases"),
            Ok(Revision::Replace(cases)) => {
                info!(cases = cases.len(), "Test cases accepted");
                state.cases = cases;
            }
            Err(e) => {
                warn!(error = %e, "Unusable test proposal");
                self.transcript
                    .record(Channel::Tester, CONTROLLER, format!("Unusable test proposal: {e}"));
            }
        }
    }

    async fn propose_code(&mut self, task: &Task, state: &mut IterationState, feedback: Option<&Feedback>) {
        let initial = state.code.is_none();
        let feedback = if initial { None } else { feedback };
        self.transcript
            .record(Channel::Coder, CONTROLLER, request_note(task, feedback, "an implementation"));

        let answer = match self.coder.propose_code(task, feedback).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "Code proposer failed");
                self.transcript
                    .record(Channel::Coder, CONTROLLER, format!("Code proposer failed: {e}"));
                return;
            }
        };
        self.transcript.record(Channel::Coder, "coder", answer.as_str());

        let parsed = if initial {
            extract_code(&answer, &task.function_name).map(Revision::Replace)
        } else {
            code_revision(&answer, &task.function_name)
        };
        match parsed {
            Ok(Revision::Keep) => info!("Code proposer kept its implementation"),
            Ok(Revision::Replace(code)) => {
                info!("Candidate code accepted");
                state.code = Some(code);
            }
            Err(e) => {
                warn!(error = %e, "Unusable code proposal");
                self.transcript
                    .record(Channel::Coder, CONTROLLER, format!("Unusable code proposal: {e}"));
            }
        }
    }

    async fn execute(&mut self, state: &mut IterationState) -> Result<Phase, LoopError> {
        let Some(code) = state.code.as_ref() else {
            return Ok(Phase::Revising);
        };

        info!(round = state.round, cases = state.cases.len(), "Executing round");
        self.transcript.record(
            Channel::Executor,
            CONTROLLER,
            format!("The iteration {} starts.", state.round),
        );

        if let Err(e) = self.sandbox.reset().await {
            warn!(error = %e, "Workspace reset failed, continuing");
        }

        let inputs: Vec<Value> = state.cases.iter().map(|c| c.input.clone()).collect();
        self.transcript.record(
            Channel::Executor,
            CONTROLLER,
            serde_json::json!({
                "code": code.source(),
                "function_name": code.entry_point(),
                "testcases": &state.cases,
            })
            .to_string(),
        );

        let report = BatchRunner::new(self.sandbox, self.config.case_timeout)
            .runner(self.runner.clone())
            .run(code.source(), Some(code.entry_point()), &inputs)
            .await?;

        self.transcript.record(Channel::Executor, "executor", report.to_json());
        state.report = Some(report);
        Ok(Phase::Analyzing)
    }

    async fn analyze(&mut self, state: &mut IterationState) -> Phase {
        let Some(report) = state.report.as_ref() else {
            return Phase::Revising;
        };

        let parsed = match self.reporter.report(&state.cases, report).await {
            Ok(text) => {
                self.transcript.record(Channel::Executor, "reporter", text.as_str());
                parse_summary(&text)
                    .and_then(|summary| check_total(summary, state.cases.len()))
                    .map(|summary| (text, summary))
                    .map_err(|e| e.to_string())
            }
            Err(e) => Err(format!("reporter failed: {e}")),
        };

        match parsed {
            Ok((_, summary)) if summary.all_passed() => {
                info!(round = state.round, passed = summary.passed_count, "All cases passed");
                self.transcript.record(
                    Channel::Executor,
                    CONTROLLER,
                    format!("All tests passed in iteration {}", state.round),
                );
                state.analysis_failed = false;
                state.summary = Some(summary);
                Phase::Done
            }
            Ok((text, summary)) => {
                info!(
                    round = state.round,
                    passed = summary.passed_count,
                    failed = summary.failed_count,
                    "Cases failed"
                );
                self.transcript.record(
                    Channel::Executor,
                    CONTROLLER,
                    "Some testcases failed. feedback loop starts",
                );
                state.analysis_failed = false;
                state.feedback = Some(state.snapshot(text, Some(summary.clone())));
                state.summary = Some(summary);
                Phase::Revising
            }
            Err(reason) => {
                warn!(round = state.round, %reason, "Analysis failed, sending raw report as feedback");
                self.transcript
                    .record(Channel::Executor, CONTROLLER, format!("Error analysing: {reason}"));
                let raw = report.to_json();
                state.analysis_failed = true;
                state.summary = None;
                state.feedback = Some(state.snapshot(raw, None));
                Phase::Revising
            }
        }
    }

    async fn revise(&mut self, task: &Task, state: &mut IterationState) -> Phase {
        if let Some(feedback) = state.feedback.take() {
            self.propose_cases(task, state, Some(&feedback)).await;
            self.propose_code(task, state, Some(&feedback)).await;
        }

        let next = state.advance_round(self.config.max_iterations);
        if next == Phase::Exhausted {
            warn!(rounds = state.round, "Iteration bound reached without success");
            self.transcript.record(
                Channel::Executor,
                CONTROLLER,
                "MAX_ITER reached without success. Current code will be returned.",
            );
        } else {
            info!(round = state.round, "Starting revision round");
        }
        next
    }
}

fn check_total(summary: AnalysisSummary, executed: usize) -> Result<AnalysisSummary, AnalysisParseError> {
    if summary.total() == executed {
        Ok(summary)
    } else {
        Err(AnalysisParseError::TotalMismatch {
            summarized: summary.total(),
            executed,
        })
    }
}

fn request_note(task: &Task, feedback: Option<&Feedback>, what: &str) -> String {
    match feedback {
        None => format!(
            "Requesting {} for '{}': {}",
            what, task.function_name, task.description
        ),
        Some(fb) => format!("Requesting revised {} after round {}:\n{}", what, fb.round, fb.report),
    }
}
