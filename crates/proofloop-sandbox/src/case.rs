//! Per-case results and the aggregate execution report.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const TIMEOUT_TAG: &str = "[timeout] exceeded ";
const INFRA_TAG: &str = "[infrastructure] ";

/// Why a case produced no return value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaseError {
    /// The candidate raised during the call
    #[error("{0}")]
    Runtime(String),

    /// The case exceeded its wall-clock budget
    #[error("[timeout] exceeded {limit_ms} ms")]
    Timeout { limit_ms: u64 },

    /// The boundary protocol broke (runner crashed, reply unreadable)
    #[error("[infrastructure] {0}")]
    Infrastructure(String),
}

impl CaseError {
    /// Recover the variant from its rendered text.
    #[must_use]
    pub fn from_wire(text: &str) -> Self {
        if let Some(limit_ms) = text
            .strip_prefix(TIMEOUT_TAG)
            .and_then(|rest| rest.strip_suffix(" ms"))
            .and_then(|ms| ms.parse().ok())
        {
            return Self::Timeout { limit_ms };
        }
        if let Some(detail) = text.strip_prefix(INFRA_TAG) {
            return Self::Infrastructure(detail.to_string());
        }
        Self::Runtime(text.to_string())
    }

    /// Whether the failure is the candidate's rather than the harness's.
    #[must_use]
    pub const fn is_candidate_fault(&self) -> bool {
        matches!(self, Self::Runtime(_) | Self::Timeout { .. })
    }
}

/// Exactly one of a return value or an error.
#[derive(Debug, Clone, PartialEq)]
pub enum CaseOutcome {
    /// The call returned (possibly `null`)
    Returned(Value),
    /// The call did not return
    Failed(CaseError),
}

/// Result of running one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "CaseRecord", from = "CaseRecord")]
pub struct CaseResult {
    /// Input the case was run with
    pub input: Value,
    /// Text the candidate wrote to standard output
    pub printed: String,
    /// Return value or error
    pub outcome: CaseOutcome,
}

impl CaseResult {
    /// A case that returned.
    pub fn returned(input: Value, printed: impl Into<String>, value: Value) -> Self {
        Self {
            input,
            printed: printed.into(),
            outcome: CaseOutcome::Returned(value),
        }
    }

    /// A case that failed.
    pub fn failed(input: Value, printed: impl Into<String>, error: CaseError) -> Self {
        Self {
            input,
            printed: printed.into(),
            outcome: CaseOutcome::Failed(error),
        }
    }

    /// Return value, absent when the case failed.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match &self.outcome {
            CaseOutcome::Returned(v) => Some(v),
            CaseOutcome::Failed(_) => None,
        }
    }

    /// Error, absent when the case returned.
    #[must_use]
    pub fn error(&self) -> Option<&CaseError> {
        match &self.outcome {
            CaseOutcome::Returned(_) => None,
            CaseOutcome::Failed(e) => Some(e),
        }
    }

    /// Whether the case hit its time budget.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.outcome, CaseOutcome::Failed(CaseError::Timeout { .. }))
    }

    /// Whether the boundary protocol broke for this case.
    #[must_use]
    pub const fn is_infrastructure_error(&self) -> bool {
        matches!(self.outcome, CaseOutcome::Failed(CaseError::Infrastructure(_)))
    }
}

/// Wire shape: `{input, printed, returned, error}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CaseRecord {
    #[serde(default)]
    input: Value,
    #[serde(default)]
    printed: String,
    #[serde(default)]
    returned: Value,
    #[serde(default)]
    error: Option<String>,
}

impl From<CaseResult> for CaseRecord {
    fn from(result: CaseResult) -> Self {
        let (returned, error) = match result.outcome {
            CaseOutcome::Returned(v) => (v, None),
            CaseOutcome::Failed(e) => (Value::Null, Some(e.to_string())),
        };
        Self {
            input: result.input,
            printed: result.printed,
            returned,
            error,
        }
    }
}

impl From<CaseRecord> for CaseResult {
    fn from(record: CaseRecord) -> Self {
        let outcome = match record.error {
            Some(text) => CaseOutcome::Failed(CaseError::from_wire(&text)),
            None => CaseOutcome::Returned(record.returned),
        };
        Self {
            input: record.input,
            printed: record.printed,
            outcome,
        }
    }
}

/// Results of one batch, index-aligned with the submitted cases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    executions: Vec<CaseResult>,
}

impl ExecutionReport {
    /// Wrap results that are already in submission order.
    #[must_use]
    pub fn new(executions: Vec<CaseResult>) -> Self {
        Self { executions }
    }

    /// Number of cases run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.executions.len()
    }

    /// Whether no case was run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    /// Result of case `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&CaseResult> {
        self.executions.get(index)
    }

    /// Results in submission order.
    pub fn iter(&self) -> std::slice::Iter<'_, CaseResult> {
        self.executions.iter()
    }

    /// Number of cases that hit the boundary-protocol failure path.
    #[must_use]
    pub fn infrastructure_errors(&self) -> usize {
        self.executions
            .iter()
            .filter(|r| r.is_infrastructure_error())
            .count()
    }

    /// Pretty JSON of the whole report.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }
}

impl<'a> IntoIterator for &'a ExecutionReport {
    type Item = &'a CaseResult;
    type IntoIter = std::slice::Iter<'a, CaseResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.executions.iter()
    }
}
