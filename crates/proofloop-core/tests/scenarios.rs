//! Controller scenarios against a sandbox that speaks the runner protocol.
//!
//! `FakePython` reads the staged request artifact, decodes the candidate and
//! "runs" the handful of functions these scenarios use, replying exactly as
//! the in-context runner would.

use async_trait::async_trait;
use proofloop_core::prelude::*;
use proofloop_core::sandbox::{ExecutionResult, RunRequest, RunnerScript, WorkspaceLayout};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct Counters {
    provisions: AtomicUsize,
    resets: AtomicUsize,
    teardowns: AtomicUsize,
    execs: AtomicUsize,
}

struct FakePython {
    layout: WorkspaceLayout,
    fail_provision: bool,
    counters: Arc<Counters>,
}

impl FakePython {
    fn new(dir: &Path) -> (Self, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let sandbox = Self {
            layout: WorkspaceLayout::new(dir, dir.to_string_lossy().into_owned()),
            fail_provision: false,
            counters: counters.clone(),
        };
        (sandbox, counters)
    }

    fn call(source: &str, input: &Value) -> Result<Value, String> {
        let (a, b) = match input {
            Value::Array(args) if args.len() == 2 => (args[0].as_i64(), args[1].as_i64()),
            _ => (None, None),
        };
        match (a, b) {
            (Some(a), Some(b)) if source.contains("return a + b") => Ok(json!(a + b)),
            (Some(a), Some(b)) if source.contains("return a - b") => Ok(json!(a - b)),
            _ => Err("TypeError: unsupported call".into()),
        }
    }
}

#[async_trait]
impl Sandbox for FakePython {
    fn kind(&self) -> &'static str {
        "fake-python"
    }

    fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    fn interpreter(&self) -> &str {
        "python3"
    }

    async fn provision(&self) -> Result<(), SandboxError> {
        self.counters.provisions.fetch_add(1, Ordering::SeqCst);
        if self.fail_provision {
            return Err(SandboxError::ProvisionFailed("docker daemon not running".into()));
        }
        Ok(())
    }

    async fn reset(&self) -> Result<(), SandboxError> {
        self.counters.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn teardown(&self) -> Result<(), SandboxError> {
        self.counters.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn copy_in(&self, host_path: &Path, sandbox_path: &str) -> Result<(), SandboxError> {
        let bytes = std::fs::read(host_path).map_err(|e| SandboxError::StagingFailed(e.to_string()))?;
        std::fs::write(self.layout.host_path(sandbox_path), bytes)?;
        Ok(())
    }

    async fn exec(&self, argv: &[String], timeout: Duration) -> Result<ExecutionResult, SandboxError> {
        self.counters.execs.fetch_add(1, Ordering::SeqCst);
        assert!(Path::new(&argv[1]).exists(), "runner not staged");

        let request: RunRequest = serde_json::from_slice(&std::fs::read(&argv[2])?)
            .map_err(|e| SandboxError::ExecutionFailed(e.to_string()))?;
        let source = request.source().map_err(SandboxError::ExecutionFailed)?;
        let index: usize = argv[3].parse().map_err(|_| SandboxError::ExecutionFailed("index".into()))?;
        let input = &request.inputs[index];

        if source.contains("time.sleep") {
            return Err(SandboxError::Timeout(timeout.as_millis() as u64));
        }

        let reply = match Self::call(&source, input) {
            Ok(returned) => json!({"input": input, "printed": "", "returned": returned, "error": null}),
            Err(error) => json!({"input": input, "printed": "", "returned": null, "error": error}),
        };
        Ok(ExecutionResult {
            exit_code: 0,
            stdout: format!("{reply}\n"),
            stderr: String::new(),
            execution_time_ms: 1,
        })
    }

    async fn is_ready(&self) -> Result<bool, SandboxError> {
        Ok(true)
    }
}

/// Answers from a fixed script; the last answer repeats.
#[derive(Clone)]
struct Script {
    answers: Arc<Vec<Result<String, ProposerError>>>,
    calls: Arc<Mutex<Vec<Option<Feedback>>>>,
}

impl Script {
    fn new(answers: &[&str]) -> Self {
        Self::with_results(answers.iter().map(|a| Ok(a.to_string())).collect())
    }

    fn with_results(answers: Vec<Result<String, ProposerError>>) -> Self {
        Self {
            answers: Arc::new(answers),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn answer(&self, feedback: Option<&Feedback>) -> Result<String, ProposerError> {
        let mut calls = self.calls.lock().unwrap();
        let i = calls.len().min(self.answers.len() - 1);
        calls.push(feedback.cloned());
        self.answers[i].clone()
    }

    fn calls(&self) -> Vec<Option<Feedback>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeProposer for Script {
    async fn propose_code(&self, _task: &Task, feedback: Option<&Feedback>) -> Result<String, ProposerError> {
        self.answer(feedback)
    }
}

#[async_trait]
impl TestProposer for Script {
    async fn propose_tests(&self, _task: &Task, feedback: Option<&Feedback>) -> Result<String, ProposerError> {
        self.answer(feedback)
    }
}

struct FixedReporter(&'static str);

#[async_trait]
impl Reporter for FixedReporter {
    async fn report(&self, _cases: &[TestCase], _report: &ExecutionReport) -> Result<String, ProposerError> {
        Ok(self.0.to_string())
    }
}

const ADD: &str = "```python\ndef add(a, b):\n    return a + b\n```";
const ADD_BUGGY: &str = "def add(a, b):\n    return a - b\n";
const ADD_CASES: &str = r#"Here are the cases: [{"input": [2, 3], "expected_output": 5}]"#;
const CASES_OK: &str = "I'm sure the cases are correct";

fn add_task() -> Task {
    Task::new("Return the sum of two integers", "add").seed(json!([1, 1]), json!(2))
}

fn executor_messages(controller: &IterationController<FakePython>) -> Vec<String> {
    controller
        .transcript()
        .channel(Channel::Executor)
        .map(|e| e.message.clone())
        .collect()
}

#[tokio::test]
async fn scenario_a_correct_code_passes_in_round_zero() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sandbox, counters) = FakePython::new(dir.path());
    let coder = Script::new(&[ADD]);
    let tester = Script::new(&[ADD_CASES]);

    let mut controller = IterationController::new(sandbox, coder.clone(), tester.clone());
    let outcome = controller.run(&add_task()).await.unwrap();

    assert!(outcome.is_verified());
    assert_eq!(outcome.phase, Phase::Done);
    assert_eq!(outcome.rounds, 0);
    let summary = outcome.summary.unwrap();
    assert_eq!((summary.passed_count, summary.failed_count), (1, 0));
    assert_eq!(outcome.code.source(), "def add(a, b):\n    return a + b\n");

    assert_eq!(coder.calls(), vec![None]);
    assert_eq!(counters.provisions.load(Ordering::SeqCst), 1);
    assert_eq!(counters.teardowns.load(Ordering::SeqCst), 1);

    let messages = executor_messages(&controller);
    assert!(messages.contains(&"The iteration 0 starts.".to_string()));
    assert!(messages.contains(&"All tests passed in iteration 0".to_string()));
}

#[tokio::test]
async fn scenario_b_buggy_code_is_revised() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sandbox, counters) = FakePython::new(dir.path());
    let coder = Script::new(&[ADD_BUGGY, ADD]);
    let tester = Script::new(&[ADD_CASES, CASES_OK]);

    let mut controller = IterationController::new(sandbox, coder.clone(), tester.clone());
    let outcome = controller.run(&add_task()).await.unwrap();

    assert!(outcome.is_verified());
    assert_eq!(outcome.rounds, 1);

    let calls = coder.calls();
    assert_eq!(calls.len(), 2);
    let feedback = calls[1].clone().expect("revision request carries feedback");
    let summary = feedback.summary.unwrap();
    assert_eq!(summary.failed_count, 1);
    assert_eq!(summary.mismatches[0].expected, json!(5));
    assert_eq!(summary.mismatches[0].actual, Some(json!(-1)));
    assert!(feedback.report.contains("Summary: Passed: 0 Failed: 1"));
    assert!(feedback.report.contains("expected output: 5 ; program output: -1"));
    assert_eq!(feedback.code.unwrap().source(), ADD_BUGGY);

    // The tester acknowledged, so its cases were kept.
    assert_eq!(tester.calls().len(), 2);
    assert_eq!(outcome.cases, vec![TestCase::new(json!([2, 3]), json!(5))]);

    assert_eq!(counters.execs.load(Ordering::SeqCst), 2);
    assert!(executor_messages(&controller)
        .contains(&"Some testcases failed. feedback loop starts".to_string()));
}

#[tokio::test]
async fn scenario_c_timeout_is_a_failed_case() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sandbox, _) = FakePython::new(dir.path());
    let coder = Script::new(&["def slow(n):\n    import time\n    time.sleep(10)\n    return n\n"]);
    let tester = Script::new(&[r#"[{"input": 3, "expected_output": 3}]"#]);

    let config = LoopConfig::default()
        .max_iterations(1)
        .case_timeout(Duration::from_secs(1));
    let mut controller = IterationController::new(sandbox, coder, tester).config(config);
    let outcome = controller.run(&Task::new("Return n slowly", "slow")).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::Unverified(UnverifiedReason::Exhausted));
    let summary = outcome.summary.unwrap();
    assert_eq!(summary.failed_count, 1);
    assert_eq!(summary.mismatches[0].actual, None);
    assert_eq!(
        summary.mismatches[0].error.as_deref(),
        Some("[timeout] exceeded 1000 ms")
    );
    assert!(outcome.report.unwrap().get(0).unwrap().is_timeout());
}

#[tokio::test]
async fn scenario_d_bound_reached_returns_last_revision() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sandbox, counters) = FakePython::new(dir.path());
    let last_revision = "```python\ndef add(a, b):\n    return b - a\n```";
    let coder = Script::new(&[ADD_BUGGY, ADD_BUGGY, last_revision]);
    let tester = Script::new(&[ADD_CASES, CASES_OK]);

    let mut controller = IterationController::new(sandbox, coder.clone(), tester.clone())
        .config(LoopConfig::default().max_iterations(2));
    let outcome = controller.run(&add_task()).await.unwrap();

    assert_eq!(outcome.phase, Phase::Exhausted);
    assert_eq!(outcome.verdict, Verdict::Unverified(UnverifiedReason::Exhausted));
    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.code.source(), "def add(a, b):\n    return b - a\n");
    assert_eq!(outcome.summary.unwrap().failed_count, 1);

    // One initial request, then one revision request per executed round.
    let rounds: Vec<Option<u32>> = coder.calls().iter().map(|fb| fb.as_ref().map(|f| f.round)).collect();
    assert_eq!(rounds, vec![None, Some(0), Some(1)]);
    let rounds: Vec<Option<u32>> = tester.calls().iter().map(|fb| fb.as_ref().map(|f| f.round)).collect();
    assert_eq!(rounds, vec![None, Some(0), Some(1)]);

    assert_eq!(counters.execs.load(Ordering::SeqCst), 2);
    assert_eq!(counters.resets.load(Ordering::SeqCst), 2);
    assert!(executor_messages(&controller)
        .contains(&"MAX_ITER reached without success. Current code will be returned.".to_string()));
}

#[tokio::test]
async fn unreadable_summary_is_not_terminal() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sandbox, _) = FakePython::new(dir.path());
    let coder = Script::new(&[ADD]);
    let tester = Script::new(&[ADD_CASES, CASES_OK]);

    let mut controller = IterationController::new(sandbox, coder.clone(), tester)
        .reporter(FixedReporter("Looks good to me!"))
        .config(LoopConfig::default().max_iterations(2));
    let outcome = controller.run(&add_task()).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::Unverified(UnverifiedReason::AnalysisFailed));
    assert!(outcome.summary.is_none());

    let feedback = coder.calls()[1].clone().unwrap();
    assert!(feedback.summary.is_none());
    assert!(feedback.report.contains("\"executions\""));
}

#[tokio::test]
async fn free_form_external_report_is_parsed() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sandbox, _) = FakePython::new(dir.path());

    let mut controller = IterationController::new(sandbox, Script::new(&[ADD]), Script::new(&[ADD_CASES]))
        .reporter(FixedReporter(
            "I compared every result.\n\nquit chat\n\nSummary:\n    Passed: 1\n    Failed: 0\n",
        ));
    let outcome = controller.run(&add_task()).await.unwrap();

    assert!(outcome.is_verified());
}

#[tokio::test]
async fn summary_that_skips_cases_is_rejected() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sandbox, _) = FakePython::new(dir.path());

    let mut controller = IterationController::new(sandbox, Script::new(&[ADD]), Script::new(&[ADD_CASES]))
        .reporter(FixedReporter("quit chat\nSummary: Passed: 0 Failed: 0\n"))
        .config(LoopConfig::default().max_iterations(1));
    let outcome = controller.run(&add_task()).await.unwrap();

    assert_eq!(outcome.verdict, Verdict::Unverified(UnverifiedReason::AnalysisFailed));
}

#[tokio::test]
async fn proposer_failure_costs_a_round() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sandbox, counters) = FakePython::new(dir.path());
    let coder = Script::with_results(vec![
        Err(ProposerError::Unavailable("rate limited".into())),
        Ok(ADD.to_string()),
    ]);

    let mut controller = IterationController::new(sandbox, coder.clone(), Script::new(&[ADD_CASES]));
    let outcome = controller.run(&add_task()).await.unwrap();

    assert!(outcome.is_verified());
    assert_eq!(outcome.rounds, 1);
    assert_eq!(coder.calls(), vec![None, None]);
    assert_eq!(counters.execs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn no_candidate_at_all_is_an_error() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sandbox, counters) = FakePython::new(dir.path());

    let mut controller = IterationController::new(
        sandbox,
        Script::new(&["Sorry, I cannot help with that."]),
        Script::new(&[ADD_CASES]),
    )
    .config(LoopConfig::default().max_iterations(2));
    let err = controller.run(&add_task()).await.unwrap_err();

    assert!(matches!(err, LoopError::NoCandidate { rounds: 2 }));
    assert_eq!(counters.execs.load(Ordering::SeqCst), 0);
    assert_eq!(counters.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn provisioning_failure_aborts_before_proposing() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (mut sandbox, counters) = FakePython::new(dir.path());
    sandbox.fail_provision = true;
    let coder = Script::new(&[ADD]);

    let mut controller = IterationController::new(sandbox, coder.clone(), Script::new(&[ADD_CASES]));
    let err = controller.run(&add_task()).await.unwrap_err();

    assert!(matches!(err, LoopError::Sandbox(SandboxError::ProvisionFailed(_))));
    assert!(coder.calls().is_empty());
    assert_eq!(counters.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_runner_aborts_and_releases_sandbox() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sandbox, counters) = FakePython::new(dir.path());

    let mut controller = IterationController::new(sandbox, Script::new(&[ADD]), Script::new(&[ADD_CASES]))
        .runner(RunnerScript::File("/nonexistent/run_case.py".into()));
    let err = controller.run(&add_task()).await.unwrap_err();

    assert!(matches!(err, LoopError::Sandbox(SandboxError::StagingFailed(_))));
    assert_eq!(counters.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transcript_is_reset_per_workflow() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sandbox, _) = FakePython::new(dir.path());

    let mut controller = IterationController::new(sandbox, Script::new(&[ADD]), Script::new(&[ADD_CASES]));
    controller.run(&add_task()).await.unwrap();
    let first = controller.transcript().len();
    controller.run(&add_task()).await.unwrap();

    assert_eq!(controller.transcript().len(), first);
    let starts = executor_messages(&controller)
        .iter()
        .filter(|m| m.as_str() == "Workflow starts")
        .count();
    assert_eq!(starts, 1);
    assert!(controller.transcript().channel(Channel::Coder).count() >= 2);
    assert!(controller.transcript().channel(Channel::Tester).count() >= 2);
}
