//! Core type definitions for the validation loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExtractionError;

/// One input and the output it must produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Scalar, sequence (positional args) or mapping (keyword args)
    pub input: Value,
    /// Expected return value
    pub expected_output: Value,
}

impl TestCase {
    /// Create a case from its input and expected output.
    pub fn new(input: Value, expected_output: Value) -> Self {
        Self {
            input,
            expected_output,
        }
    }
}

/// Candidate source defining a known top-level function.
///
/// Candidates are replaced between rounds, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCode {
    source: String,
    entry_point: String,
}

impl CandidateCode {
    /// Accept `source` if it defines `entry_point` exactly once at top level.
    ///
    /// Other top-level helpers are allowed.
    ///
    /// # Errors
    ///
    /// [`ExtractionError::MissingEntryPoint`] or
    /// [`ExtractionError::DuplicateEntryPoint`].
    pub fn new(source: impl Into<String>, entry_point: impl Into<String>) -> Result<Self, ExtractionError> {
        let source = source.into();
        let entry_point = entry_point.into();

        match count_top_level_defs(&source, &entry_point) {
            0 => Err(ExtractionError::MissingEntryPoint { name: entry_point }),
            1 => Ok(Self {
                source,
                entry_point,
            }),
            count => Err(ExtractionError::DuplicateEntryPoint {
                name: entry_point,
                count,
            }),
        }
    }

    /// Full candidate source.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Name of the function the cases call.
    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

impl std::fmt::Display for CandidateCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// Count `def name(` / `async def name(` lines at column 0.
///
/// Lines inside triple-quoted strings are skipped. The scan is lexical, so a
/// triple quote inside a single-quoted string or a comment still toggles it.
fn count_top_level_defs(source: &str, name: &str) -> usize {
    let mut open = None;
    let mut count = 0;
    for line in source.lines() {
        if open.is_none() && defines(line, name) {
            count += 1;
        }
        open = track_triple_quotes(line, open);
    }
    count
}

/// Delimiter of the triple-quoted string still open after `line`.
fn track_triple_quotes(line: &str, mut open: Option<&'static str>) -> Option<&'static str> {
    let mut rest = line;
    loop {
        let found = match open {
            Some(quote) => rest.find(quote).map(|i| (i, quote)),
            None => ["\"\"\"", "'''"]
                .into_iter()
                .filter_map(|quote| rest.find(quote).map(|i| (i, quote)))
                .min(),
        };
        let Some((i, quote)) = found else {
            return open;
        };
        rest = &rest[i + quote.len()..];
        open = if open.is_some() { None } else { Some(quote) };
    }
}

fn defines(line: &str, name: &str) -> bool {
    let line = match line.strip_prefix("async") {
        Some(rest) if rest.starts_with(char::is_whitespace) => rest.trim_start(),
        _ => line,
    };
    line.strip_prefix("def")
        .filter(|rest| rest.starts_with(char::is_whitespace))
        .and_then(|rest| rest.trim_start().strip_prefix(name))
        .is_some_and(|after| after.trim_start().starts_with('('))
}

/// What the proposers are asked to build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Natural-language description of the function
    pub description: String,
    /// Name the function must have
    pub function_name: String,
    /// Validation examples shown to the code proposer in every request
    #[serde(default)]
    pub seed_cases: Vec<TestCase>,
}

impl Task {
    /// Create a task without seed cases.
    pub fn new(description: impl Into<String>, function_name: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            function_name: function_name.into(),
            seed_cases: Vec::new(),
        }
    }

    /// Add a seed validation case.
    #[must_use]
    pub fn seed(mut self, input: Value, expected_output: Value) -> Self {
        self.seed_cases.push(TestCase::new(input, expected_output));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_candidate_requires_entry_point() {
        let code = CandidateCode::new("def add(a, b):\n    return a + b\n", "add").unwrap();
        assert_eq!(code.entry_point(), "add");

        let err = CandidateCode::new("def sub(a, b):\n    return a - b\n", "add").unwrap_err();
        assert_eq!(err, ExtractionError::MissingEntryPoint { name: "add".into() });
    }

    #[test]
    fn test_nested_and_prefixed_names_do_not_count() {
        let source = "def adder(x):\n    def add(y):\n        return y\n    return add\n";
        assert!(CandidateCode::new(source, "add").is_err());
    }

    #[test]
    fn test_helpers_allowed_but_not_duplicates() {
        let helpers = "def _norm(x):\n    return x\n\ndef add(a, b):\n    return _norm(a) + b\n";
        assert!(CandidateCode::new(helpers, "add").is_ok());

        let twice = "def add(a, b):\n    return a\n\ndef add(a, b):\n    return b\n";
        assert_eq!(
            CandidateCode::new(twice, "add").unwrap_err(),
            ExtractionError::DuplicateEntryPoint { name: "add".into(), count: 2 }
        );
    }

    #[test]
    fn test_async_def_counts() {
        assert!(CandidateCode::new("async def fetch(x):\n    return x\n", "fetch").is_ok());
    }

    #[test]
    fn test_any_whitespace_after_def() {
        assert!(CandidateCode::new("def\tadd(a, b):\n    return a + b\n", "add").is_ok());
        assert!(CandidateCode::new("async\tdef  add(a, b):\n    return a + b\n", "add").is_ok());
        assert!(CandidateCode::new("define add(a, b):\n", "add").is_err());
    }

    #[test]
    fn test_defs_inside_docstrings_are_ignored() {
        let source = concat!(
            "def add(a, b):\n",
            "    \"\"\"Usage:\n",
            "\n",
            "def add(x, y):\n",
            "    ...\n",
            "    \"\"\"\n",
            "    return a + b\n",
            "\n",
            "NOTES = '''\n",
            "def add(a, b): pass\n",
            "'''\n",
        );
        assert!(CandidateCode::new(source, "add").is_ok());

        let after_one_line_docstring = "\"\"\"Module.\"\"\"\ndef add(a, b):\n    return a + b\n";
        assert!(CandidateCode::new(after_one_line_docstring, "add").is_ok());
    }

    #[test]
    fn test_task_builder() {
        let task = Task::new("Add two numbers", "add").seed(json!([1, 2]), json!(3));
        assert_eq!(task.seed_cases, vec![TestCase::new(json!([1, 2]), json!(3))]);
    }
}
