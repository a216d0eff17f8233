//! Payload extraction from proposer responses.
//!
//! Proposers answer in free-form text. The grammar accepted here:
//!
//! ```text
//! response  := ack | fenced | bare
//! fenced    := <text> "```" [lang] NEWLINE body "```" <text>   (exactly one block)
//! bare      := body                                           (no fence at all)
//! cases     := <text> JSON-array-of {input, expected_output} <text>
//! ```
//!
//! An acknowledgment is a response containing the side's phrase
//! ([`CODE_ACK`] / [`CASES_ACK`]) and no payload. Anything else that does
//! not fit is an [`ExtractionError`]; nothing is guessed.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::error::ExtractionError;
use crate::types::{CandidateCode, TestCase};

/// Phrase a code proposer uses to keep its implementation.
pub const CODE_ACK: &str = "implementation is correct";

/// Phrase a test proposer uses to keep its cases.
pub const CASES_ACK: &str = "cases are correct";

const FENCE: &str = "```";

fn fenced_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[ \t]*[A-Za-z0-9_+.-]*[ \t]*\r?\n(.*?)```").unwrap())
}

/// Outcome of a revision request for one side.
#[derive(Debug, Clone, PartialEq)]
pub enum Revision<T> {
    /// The proposer acknowledged its artifact as correct
    Keep,
    /// The proposer sent a replacement
    Replace(T),
}

/// Body of the single fenced block, or `None` when there is no fence.
fn fenced_payload(text: &str) -> Result<Option<&str>, ExtractionError> {
    let markers = text.matches(FENCE).count();
    if markers == 0 {
        return Ok(None);
    }
    if markers % 2 != 0 {
        return Err(ExtractionError::UnterminatedFence);
    }

    let blocks: Vec<&str> = fenced_block_regex()
        .captures_iter(text)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str()))
        .collect();

    match blocks.len() {
        0 => Err(ExtractionError::UnterminatedFence),
        1 => Ok(Some(blocks[0])),
        count => Err(ExtractionError::AmbiguousPayload { count }),
    }
}

/// Extract candidate code defining `entry_point`.
///
/// # Errors
///
/// Fence errors, an empty body, or a body that does not define
/// `entry_point` exactly once.
pub fn extract_code(text: &str, entry_point: &str) -> Result<CandidateCode, ExtractionError> {
    let body = fenced_payload(text)?.unwrap_or(text).trim();
    if body.is_empty() {
        return Err(ExtractionError::Empty);
    }
    CandidateCode::new(format!("{body}\n"), entry_point)
}

/// Extract a JSON array of test cases.
///
/// Text before the array and after its closing bracket is ignored.
///
/// # Errors
///
/// [`ExtractionError::NoArray`], [`ExtractionError::InvalidJson`],
/// [`ExtractionError::MalformedCase`] or [`ExtractionError::NoCases`].
pub fn extract_cases(text: &str) -> Result<Vec<TestCase>, ExtractionError> {
    let scope = fenced_payload(text)?.unwrap_or(text);
    let start = scope.find('[').ok_or(ExtractionError::NoArray)?;

    let value = serde_json::Deserializer::from_str(&scope[start..])
        .into_iter::<Value>()
        .next()
        .ok_or(ExtractionError::NoArray)?
        .map_err(|e| ExtractionError::InvalidJson(e.to_string()))?;

    let Value::Array(items) = value else {
        return Err(ExtractionError::NoArray);
    };
    if items.is_empty() {
        return Err(ExtractionError::NoCases);
    }

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| case_from_value(index, item))
        .collect()
}

fn case_from_value(index: usize, item: Value) -> Result<TestCase, ExtractionError> {
    let Value::Object(mut fields) = item else {
        return Err(ExtractionError::MalformedCase {
            index,
            reason: "not an object".into(),
        });
    };

    let mut take = |key: &str| {
        fields.remove(key).ok_or_else(|| ExtractionError::MalformedCase {
            index,
            reason: format!("missing '{key}'"),
        })
    };

    let input = take("input")?;
    let expected_output = take("expected_output")?;
    Ok(TestCase::new(input, expected_output))
}

fn acknowledges(text: &str, phrase: &str) -> bool {
    text.to_lowercase().contains(phrase)
}

/// Interpret a code proposer's answer to feedback.
///
/// # Errors
///
/// Same as [`extract_code`] when the answer is not an acknowledgment.
pub fn code_revision(text: &str, entry_point: &str) -> Result<Revision<CandidateCode>, ExtractionError> {
    if !text.contains(FENCE) && acknowledges(text, CODE_ACK) {
        return Ok(Revision::Keep);
    }
    extract_code(text, entry_point).map(Revision::Replace)
}

/// Interpret a test proposer's answer to feedback.
///
/// # Errors
///
/// Same as [`extract_cases`] when the answer is not an acknowledgment.
pub fn case_revision(text: &str) -> Result<Revision<Vec<TestCase>>, ExtractionError> {
    if !text.contains('[') && acknowledges(text, CASES_ACK) {
        return Ok(Revision::Keep);
    }
    extract_cases(text).map(Revision::Replace)
}
