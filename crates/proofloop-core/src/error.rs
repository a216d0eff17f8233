//! Loop error types.

use proofloop_sandbox::SandboxError;
use thiserror::Error;

/// A proposer response did not contain a usable payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// Nothing but whitespace
    #[error("response is empty")]
    Empty,

    /// A code fence was opened but never closed
    #[error("unterminated code fence")]
    UnterminatedFence,

    /// More than one fenced block; none is preferred over the others
    #[error("ambiguous response: {count} fenced blocks")]
    AmbiguousPayload { count: usize },

    /// The code does not define the expected top-level function
    #[error("no top-level function named '{name}'")]
    MissingEntryPoint { name: String },

    /// The expected function is defined more than once at top level
    #[error("function '{name}' is defined {count} times at top level")]
    DuplicateEntryPoint { name: String, count: usize },

    /// No JSON array in the response
    #[error("no JSON array found")]
    NoArray,

    /// The array is not valid JSON
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// An element is not an `{input, expected_output}` object
    #[error("case {index} is malformed: {reason}")]
    MalformedCase { index: usize, reason: String },

    /// The array has no cases
    #[error("no test cases")]
    NoCases,
}

/// A textual analysis summary does not follow the summary grammar.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisParseError {
    /// The termination marker is absent
    #[error("summary marker '{marker}' not found")]
    MissingSentinel { marker: &'static str },

    /// No parsable `Summary: Passed: <n> Failed: <n>` line after the marker
    #[error("no parsable pass/fail counts")]
    MissingCounts,

    /// A mismatch line could not be read
    #[error("line {line}: {reason}")]
    MalformedMismatch { line: usize, reason: String },

    /// The number of mismatch lines disagrees with the failed count
    #[error("declared {declared} failures but listed {listed}")]
    CountMismatch { declared: usize, listed: usize },

    /// Passed plus failed does not match the number of cases run
    #[error("summary covers {summarized} cases but {executed} were run")]
    TotalMismatch { summarized: usize, executed: usize },
}

/// An external proposer call failed.
#[derive(Error, Debug, Clone)]
pub enum ProposerError {
    /// The service could not be reached or returned an error
    #[error("Proposer unavailable: {0}")]
    Unavailable(String),

    /// The call did not finish in time
    #[error("Proposer timed out")]
    Timeout,

    /// The proposer refused the request
    #[error("Proposer refused: {0}")]
    Refused(String),
}

/// Errors that abort a whole workflow.
///
/// Everything else (case failures, proposer hiccups during revision,
/// unreadable summaries) consumes a round instead.
#[derive(Error, Debug)]
pub enum LoopError {
    /// Provisioning or staging failed
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// The bound was reached before any candidate code was obtained
    #[error("no candidate code obtained in {rounds} rounds")]
    NoCandidate { rounds: u32 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
