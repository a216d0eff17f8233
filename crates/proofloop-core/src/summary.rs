//! Textual summary format for the analysis-feedback channel.
//!
//! ```text
//! quit chat
//! Summary: Passed: 1 Failed: 1
//! Mismatches:
//! Testcase 1 -> input: [2,3] ; expected output: 5 ; program output: -1 ; error: null
//! ```
//!
//! Values are JSON. `error` is a JSON string or `null`; when it is a string
//! the program output is ignored (the case produced no value). The counts
//! may also be split over several lines (`Summary:` / `Passed: n` /
//! `Failed: n`). A block without a parsable `Failed` count is an error, never
//! a pass.

use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::analyzer::{AnalysisSummary, Mismatch};
use crate::error::AnalysisParseError;

/// Termination marker that opens every summary block.
pub const SENTINEL: &str = "quit chat";

fn counts_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\A\s*Summary:\s*Passed:\s*(\d+)\s*,?\s*Failed:\s*(\d+)[ \t]*(?:\r?\n|\z)").unwrap()
    })
}

fn testcase_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\ATestcase\s+(\d+)\s*->\s*input:").unwrap())
}

/// Render a summary in the textual format.
#[must_use]
pub fn render_summary(summary: &AnalysisSummary) -> String {
    let mut out = format!(
        "{}\nSummary: Passed: {} Failed: {}\n",
        SENTINEL, summary.passed_count, summary.failed_count
    );

    if !summary.mismatches.is_empty() {
        out.push_str("Mismatches:\n");
    }
    for m in &summary.mismatches {
        let actual = m.actual.clone().unwrap_or(Value::Null);
        let error = m.error.clone().map_or(Value::Null, Value::String);
        out.push_str(&format!(
            "Testcase {} -> input: {} ; expected output: {} ; program output: {} ; error: {}\n",
            m.index, m.input, m.expected, actual, error
        ));
    }

    out
}

/// Parse a summary block out of `text`.
///
/// Anything before the [`SENTINEL`] line is ignored.
///
/// # Errors
///
/// Returns an [`AnalysisParseError`] describing the first violation.
pub fn parse_summary(text: &str) -> Result<AnalysisSummary, AnalysisParseError> {
    let (block, mut line_no) = after_sentinel(text)?;

    let counts = counts_regex()
        .captures(block)
        .ok_or(AnalysisParseError::MissingCounts)?;
    let passed_count = counts[1].parse().map_err(|_| AnalysisParseError::MissingCounts)?;
    let failed_count: usize = counts[2].parse().map_err(|_| AnalysisParseError::MissingCounts)?;

    let (head, body) = block.split_at(counts.get(0).map_or(0, |m| m.end()));
    line_no += head.matches('\n').count();

    let mut mismatches = Vec::new();
    let mut seen_header = false;
    for line in body.lines() {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !seen_header && mismatches.is_empty() && starts_with_ignore_case(line, "Mismatches") {
            seen_header = true;
            continue;
        }
        let mismatch = parse_mismatch(line).map_err(|reason| AnalysisParseError::MalformedMismatch {
            line: line_no,
            reason,
        })?;
        mismatches.push(mismatch);
    }

    if mismatches.len() != failed_count {
        return Err(AnalysisParseError::CountMismatch {
            declared: failed_count,
            listed: mismatches.len(),
        });
    }

    Ok(AnalysisSummary {
        passed_count,
        failed_count,
        mismatches,
    })
}

/// Text following the sentinel line and the 1-based number of that line.
fn after_sentinel(text: &str) -> Result<(&str, usize), AnalysisParseError> {
    let mut offset = 0;
    for (index, line) in text.split_inclusive('\n').enumerate() {
        offset += line.len();
        if line.trim().eq_ignore_ascii_case(SENTINEL) {
            return Ok((&text[offset..], index + 1));
        }
    }
    Err(AnalysisParseError::MissingSentinel { marker: SENTINEL })
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn parse_mismatch(line: &str) -> Result<Mismatch, String> {
    let head = testcase_regex()
        .captures(line)
        .ok_or_else(|| "expected 'Testcase <i> -> input: ...'".to_string())?;
    let index = head[1]
        .parse()
        .map_err(|_| format!("bad case index '{}'", &head[1]))?;

    let mut rest = &line[head.get(0).map_or(0, |m| m.end())..];
    let input = take_value(&mut rest, "input")?;
    expect_field(&mut rest, "expected output:")?;
    let expected = take_value(&mut rest, "expected output")?;
    expect_field(&mut rest, "program output:")?;
    let actual = take_value(&mut rest, "program output")?;
    expect_field(&mut rest, "error:")?;
    let error = match take_value(&mut rest, "error")? {
        Value::Null => None,
        Value::String(message) => Some(message),
        other => return Err(format!("error must be a string or null, got {other}")),
    };

    if !rest.trim().is_empty() {
        return Err(format!("unexpected trailing text '{}'", rest.trim()));
    }

    Ok(Mismatch {
        index,
        input,
        expected,
        actual: if error.is_some() { None } else { Some(actual) },
        error,
    })
}

/// Consume one JSON value from the front of `rest`.
fn take_value(rest: &mut &str, field: &str) -> Result<Value, String> {
    let text = rest.trim_start();
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    let value = stream
        .next()
        .ok_or_else(|| format!("missing {field}"))?
        .map_err(|e| format!("{field} is not JSON: {e}"))?;
    *rest = &text[stream.byte_offset()..];
    Ok(value)
}

/// Consume `; <label>` from the front of `rest`.
fn expect_field(rest: &mut &str, label: &str) -> Result<(), String> {
    let text = rest
        .trim_start()
        .strip_prefix(';')
        .ok_or_else(|| format!("expected '; {label}'"))?
        .trim_start();
    if !starts_with_ignore_case(text, label) {
        return Err(format!("expected '{label}'"));
    }
    *rest = &text[label.len()..];
    Ok(())
}

impl fmt::Display for AnalysisSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_summary(self))
    }
}

impl FromStr for AnalysisSummary {
    type Err = AnalysisParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_summary(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn failing() -> AnalysisSummary {
        AnalysisSummary {
            passed_count: 1,
            failed_count: 2,
            mismatches: vec![
                Mismatch {
                    index: 1,
                    input: json!([2, 3]),
                    expected: json!(5),
                    actual: Some(json!(-1)),
                    error: None,
                },
                Mismatch {
                    index: 2,
                    input: json!({"s": "a ; b", "n": null}),
                    expected: json!("x"),
                    actual: None,
                    error: Some("ValueError: bad ; input".into()),
                },
            ],
        }
    }

    #[test]
    fn test_render_format() {
        let text = render_summary(&failing());
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "quit chat");
        assert_eq!(lines[1], "Summary: Passed: 1 Failed: 2");
        assert_eq!(lines[2], "Mismatches:");
        assert_eq!(
            lines[3],
            "Testcase 1 -> input: [2,3] ; expected output: 5 ; program output: -1 ; error: null"
        );
    }

    #[test]
    fn test_round_trip() {
        let summary = failing();
        assert_eq!(parse_summary(&render_summary(&summary)).unwrap(), summary);

        let clean = AnalysisSummary {
            passed_count: 3,
            ..AnalysisSummary::default()
        };
        assert_eq!(clean.to_string().parse::<AnalysisSummary>().unwrap(), clean);
    }

    #[test]
    fn test_null_return_survives_round_trip() {
        let summary = AnalysisSummary {
            passed_count: 0,
            failed_count: 1,
            mismatches: vec![Mismatch {
                index: 0,
                input: json!(1),
                expected: json!(2),
                actual: Some(Value::Null),
                error: None,
            }],
        };
        assert_eq!(parse_summary(&render_summary(&summary)).unwrap(), summary);
    }

    #[test]
    fn test_free_form_report_with_multiline_counts() {
        let text = "All cases were run.\n\nquit chat\n\nSummary:\n    Passed: 0\n    Failed: 1\nMismatches: (Failed Testcases)\n    Testcase 0 -> input: [2, 3] ; expected output: 5 ; program output: -1 ; error: null\n";
        let summary = parse_summary(text).unwrap();

        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.mismatches[0].actual, Some(json!(-1)));
    }

    #[test]
    fn test_missing_pieces_are_errors() {
        assert_eq!(
            parse_summary("Summary: Passed: 1 Failed: 0").unwrap_err(),
            AnalysisParseError::MissingSentinel { marker: SENTINEL }
        );
        assert_eq!(
            parse_summary("quit chat\nEverything passed!").unwrap_err(),
            AnalysisParseError::MissingCounts
        );
        assert_eq!(
            parse_summary("quit chat\nSummary: Passed: 4").unwrap_err(),
            AnalysisParseError::MissingCounts
        );
    }

    #[test]
    fn test_count_must_match_listed_mismatches() {
        let err = parse_summary("quit chat\nSummary: Passed: 0 Failed: 2\nMismatches:\nTestcase 0 -> input: 1 ; expected output: 2 ; program output: 3 ; error: null\n").unwrap_err();
        assert_eq!(err, AnalysisParseError::CountMismatch { declared: 2, listed: 1 });
    }

    #[test]
    fn test_malformed_mismatch_line() {
        let err = parse_summary("quit chat\nSummary: Passed: 0 Failed: 1\nMismatches:\nTestcase 0 -> input: (2, 3) ; expected output: 5 ; program output: -1 ; error: null\n").unwrap_err();
        assert!(matches!(err, AnalysisParseError::MalformedMismatch { line: 4, .. }));
    }
}
