//! Result Analyzer / Oracle.
//!
//! A case passes iff it returned and the returned value equals the expected
//! output. Equality is structural over JSON values with one relaxation:
//! numbers compare by numeric value, so `5` equals `5.0`. Types otherwise
//! matter (`3` is not `"3"`, `true` is not `1`).
//!
//! Numbers are kept as their JSON text (`serde_json/arbitrary_precision`), so
//! integers of any size compare exactly, and an integer equals a float only
//! when the float holds exactly that integer.

use proofloop_sandbox::{CaseResult, ExecutionReport};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt::Write as _;

use crate::types::TestCase;

/// A failing case with everything needed to explain it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    /// Position in the submitted case list
    pub index: usize,
    pub input: Value,
    pub expected: Value,
    /// Returned value, absent when the case errored
    pub actual: Option<Value>,
    pub error: Option<String>,
}

/// Pass/fail counts and the failing cases, in case order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub passed_count: usize,
    pub failed_count: usize,
    pub mismatches: Vec<Mismatch>,
}

impl AnalysisSummary {
    /// Number of cases judged.
    #[must_use]
    pub fn total(&self) -> usize {
        self.passed_count + self.failed_count
    }

    /// Whether no case failed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed_count == 0
    }
}

/// Compares execution results against expected outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Oracle;

impl Oracle {
    /// Judge every case of a report.
    ///
    /// The report is index-aligned with `cases`; a case with no result is a
    /// failure.
    #[must_use]
    pub fn analyze(cases: &[TestCase], report: &ExecutionReport) -> AnalysisSummary {
        let mut summary = AnalysisSummary::default();

        for (index, case) in cases.iter().enumerate() {
            match judge(case, report.get(index)) {
                None => summary.passed_count += 1,
                Some((actual, error)) => {
                    summary.failed_count += 1;
                    summary.mismatches.push(Mismatch {
                        index,
                        input: case.input.clone(),
                        expected: case.expected_output.clone(),
                        actual,
                        error,
                    });
                }
            }
        }

        summary
    }
}

/// `None` when the case passes, otherwise what it produced instead.
fn judge(case: &TestCase, result: Option<&CaseResult>) -> Option<(Option<Value>, Option<String>)> {
    let Some(result) = result else {
        return Some((None, Some("[infrastructure] no result recorded".into())));
    };

    if let Some(error) = result.error() {
        return Some((None, Some(error.to_string())));
    }

    match result.value() {
        Some(value) if values_equal(value, &case.expected_output) => None,
        value => Some((value.cloned(), None)),
    }
}

/// Structural equality with numeric comparison across integer and float.
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
    let (x, y) = (x.to_string(), y.to_string());
    match (integer_literal(&x), integer_literal(&y)) {
        (Some(a), Some(b)) => a == b,
        (Some(int), None) => integer_equals_float(int, &y),
        (None, Some(int)) => integer_equals_float(int, &x),
        (None, None) => matches!((x.parse::<f64>(), y.parse::<f64>()), (Ok(a), Ok(b)) if a == b),
    }
}

/// Sign and significant digits of an integer literal; `None` for floats.
fn integer_literal(text: &str) -> Option<(bool, &str)> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, text),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match digits.trim_start_matches('0') {
        "" => Some((false, "0")),
        significant => Some((negative, significant)),
    }
}

fn integer_equals_float((negative, digits): (bool, &str), float: &str) -> bool {
    let Ok(f) = float.parse::<f64>() else {
        return false;
    };
    if !f.is_finite() || f.fract() != 0.0 {
        return false;
    }
    if f == 0.0 {
        return digits == "0";
    }
    (f < 0.0) == negative && integral_digits(f.abs()) == digits
}

/// Exact decimal expansion of a positive integral `f64`.
fn integral_digits(f: f64) -> String {
    const BASE: u64 = 1_000_000_000;

    if f < 18_446_744_073_709_551_616.0 {
        return (f as u64).to_string();
    }

    // f = mantissa * 2^shift, with shift > 0 above 2^64.
    let bits = f.to_bits();
    let mut shift = i64::try_from((bits >> 52) & 0x7ff).unwrap_or(0) - 1075;
    let mantissa = (bits & ((1 << 52) - 1)) | (1 << 52);

    // Little-endian base 10^9 limbs.
    let mut limbs = vec![mantissa % BASE, mantissa / BASE];
    while shift > 0 {
        let step = shift.min(29);
        let mut carry = 0;
        for limb in &mut limbs {
            let v = (*limb << step) + carry;
            *limb = v % BASE;
            carry = v / BASE;
        }
        if carry > 0 {
            limbs.push(carry);
        }
        shift -= step;
    }

    let mut limbs = limbs.iter().rev().skip_while(|&&limb| limb == 0);
    let mut out = limbs.next().map(u64::to_string).unwrap_or_default();
    for limb in limbs {
        let _ = write!(out, "{limb:09}");
    }
    out
}
