//! Request/response protocol across the sandbox boundary.
//!
//! ```text
//! host                                   context
//! ────                                   ───────
//! request.json  {code, entry_point, inputs}  ──►  run_case.py request.json <i>
//!                                             ◄──  {"input","printed","returned","error"}
//! ```
//!
//! One request artifact is written per round; the runner is invoked once per
//! case index and prints exactly one JSON object on stdout.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::SandboxError;

/// File name of the runner inside the workspace.
pub const RUNNER_FILE: &str = "run_case.py";

/// File name of the request artifact inside the workspace.
pub const REQUEST_FILE: &str = "request.json";

const EMBEDDED_RUNNER: &str = include_str!("../runner/run_case.py");

/// Request artifact shared by every case of a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Base64 of the candidate source
    pub code: String,
    /// Name of the function to call
    #[serde(default)]
    pub entry_point: Option<String>,
    /// Case inputs, in submission order
    pub inputs: Vec<Value>,
}

impl RunRequest {
    /// Encode a candidate and its inputs.
    pub fn new(source: &str, entry_point: Option<&str>, inputs: Vec<Value>) -> Self {
        Self {
            code: BASE64.encode(source.as_bytes()),
            entry_point: entry_point.map(str::to_string),
            inputs,
        }
    }

    /// Decode the candidate source.
    ///
    /// # Errors
    ///
    /// Returns a message if the code is not base64 of UTF-8 text.
    pub fn source(&self) -> Result<String, String> {
        let bytes = BASE64.decode(&self.code).map_err(|e| e.to_string())?;
        String::from_utf8(bytes).map_err(|e| e.to_string())
    }
}

/// What the runner prints for one case.
///
/// Runner-level failures only carry `error`, hence the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerReply {
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub printed: String,
    #[serde(default)]
    pub returned: Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunnerReply {
    /// Parse the runner's stdout.
    ///
    /// The reply is the last non-empty line; anything a candidate managed to
    /// write around the redirect is ignored.
    ///
    /// # Errors
    ///
    /// Returns a message when no line parses as a reply object.
    pub fn parse(stdout: &str) -> Result<Self, String> {
        let line = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| "runner produced no output".to_string())?;

        serde_json::from_str(line).map_err(|e| format!("malformed runner reply ({e}): {line}"))
    }
}

/// Where the in-context runner program comes from.
#[derive(Debug, Clone, Default)]
pub enum RunnerScript {
    /// The runner shipped with this crate
    #[default]
    Embedded,
    /// A runner on the host filesystem
    File(PathBuf),
}

impl RunnerScript {
    /// Source of the embedded runner.
    #[must_use]
    pub const fn embedded_source() -> &'static str {
        EMBEDDED_RUNNER
    }

    /// Host path of the runner, writing the embedded one out if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::StagingFailed`] when a file runner is missing
    /// or the embedded runner cannot be written.
    pub async fn materialize(&self) -> Result<PathBuf, SandboxError> {
        match self {
            Self::File(path) => {
                if tokio::fs::try_exists(path).await.unwrap_or(false) {
                    Ok(path.clone())
                } else {
                    Err(SandboxError::StagingFailed(format!(
                        "runner not found: {}",
                        path.display()
                    )))
                }
            }
            Self::Embedded => {
                let dir = std::env::temp_dir().join("proofloop");
                let path = dir.join(format!("run_case-{}.py", env!("CARGO_PKG_VERSION")));
                write_atomic(&path, EMBEDDED_RUNNER.as_bytes())
                    .await
                    .map_err(|e| SandboxError::StagingFailed(format!("cannot write runner: {e}")))?;
                Ok(path)
            }
        }
    }
}

/// Write `bytes` to `path` so readers only ever see the complete file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = path.with_file_name(format!(
        ".{}.{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("artifact"),
        uuid::Uuid::new_v4()
    ));

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = RunRequest::new("def add(a, b):\n    return a + b\n", Some("add"), vec![json!([2, 3])]);
        let wire = serde_json::to_value(&request).unwrap();

        assert_eq!(wire["entry_point"], "add");
        assert_eq!(wire["inputs"], json!([[2, 3]]));
        assert_eq!(request.source().unwrap(), "def add(a, b):\n    return a + b\n");
    }

    #[test]
    fn test_reply_takes_last_line() {
        let stdout = "stray\n{\"input\": [1], \"printed\": \"hi\\n\", \"returned\": 2, \"error\": null}\n\n";
        let reply = RunnerReply::parse(stdout).unwrap();

        assert_eq!(reply.printed, "hi\n");
        assert_eq!(reply.returned, json!(2));
        assert!(reply.error.is_none());
    }

    #[test]
    fn test_runner_level_error_reply() {
        let reply = RunnerReply::parse("{\"error\": \"case index out of range: 9\"}").unwrap();
        assert_eq!(reply.error.as_deref(), Some("case index out of range: 9"));
        assert_eq!(reply.returned, Value::Null);
    }

    #[test]
    fn test_unreadable_reply() {
        assert!(RunnerReply::parse("").is_err());
        assert!(RunnerReply::parse("Traceback (most recent call last):").is_err());
    }

    #[test]
    fn test_embedded_runner_speaks_protocol() {
        let source = RunnerScript::embedded_source();
        assert!(source.contains("\"printed\""));
        assert!(source.contains("entry_point"));
    }

    #[tokio::test]
    async fn test_missing_file_runner_is_staging_error() {
        let script = RunnerScript::File(PathBuf::from("/nope/run_case.py"));
        let err = script.materialize().await.unwrap_err();
        assert!(matches!(err, SandboxError::StagingFailed(_)));
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(REQUEST_FILE);

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
