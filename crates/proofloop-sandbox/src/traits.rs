//! Sandbox traits and types.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SandboxError;
use crate::protocol::write_atomic;

/// Where the shared working directory lives on each side of the boundary.
///
/// The host side is where artifacts are written; the context side is the same
/// directory as seen by commands running inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    /// Host-side directory
    pub host_dir: PathBuf,
    /// Path of the same directory inside the context
    pub context_dir: String,
}

impl WorkspaceLayout {
    /// Create a layout from both sides of the mount.
    pub fn new(host_dir: impl Into<PathBuf>, context_dir: impl Into<String>) -> Self {
        Self {
            host_dir: host_dir.into(),
            context_dir: context_dir.into(),
        }
    }

    /// Host path of a file inside the workspace.
    #[must_use]
    pub fn host_path(&self, relative: &str) -> PathBuf {
        self.host_dir.join(relative)
    }

    /// Context path of a file inside the workspace.
    #[must_use]
    pub fn context_path(&self, relative: &str) -> String {
        format!("{}/{}", self.context_dir.trim_end_matches('/'), relative)
    }
}

/// Result of one command run inside the context.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Exit code (0 = success, -1 when killed by a signal)
    pub exit_code: i32,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    /// Check if execution was successful.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Trait for sandbox implementations.
///
/// A sandbox owns exactly one live isolated context at a time. Consumers only
/// call through it; the handle itself is never shared by value.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Short backend name used in logs.
    fn kind(&self) -> &'static str;

    /// Shared working directory of the context.
    fn layout(&self) -> &WorkspaceLayout;

    /// Interpreter used to launch the in-context runner.
    fn interpreter(&self) -> &str;

    /// Create the isolated context.
    ///
    /// An already-existing context is absorbed, not reported.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::ProvisionFailed`] if the isolation mechanism
    /// cannot be started.
    async fn provision(&self) -> Result<(), SandboxError>;

    /// Clear all working-directory state without destroying the context.
    ///
    /// # Errors
    ///
    /// Returns an error only if clearing fails for a reason other than there
    /// being nothing to clear.
    async fn reset(&self) -> Result<(), SandboxError>;

    /// Force-stop and remove the context. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::StopFailed`] if a live context could not be
    /// removed.
    async fn teardown(&self) -> Result<(), SandboxError>;

    /// Stage a host file into the context at `sandbox_path`, relative to the
    /// workspace.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::StagingFailed`] if the host file is missing or
    /// cannot be copied.
    async fn copy_in(&self, host_path: &Path, sandbox_path: &str) -> Result<(), SandboxError>;

    /// Run `argv` inside the context under a hard wall-clock `timeout`.
    ///
    /// On timeout only the offending subprocess is killed; the context stays
    /// usable.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Timeout`] when the limit is hit, or
    /// [`SandboxError::ExecutionFailed`] if the command could not be launched.
    async fn exec(&self, argv: &[String], timeout: Duration) -> Result<ExecutionResult, SandboxError>;

    /// Check if the context is live.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be queried.
    async fn is_ready(&self) -> Result<bool, SandboxError>;

    /// Synchronous best-effort teardown, used when an async release was
    /// skipped (panics, early drops).
    fn teardown_blocking(&self) {}
}

#[async_trait]
impl Sandbox for Box<dyn Sandbox> {
    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    fn layout(&self) -> &WorkspaceLayout {
        (**self).layout()
    }

    fn interpreter(&self) -> &str {
        (**self).interpreter()
    }

    async fn provision(&self) -> Result<(), SandboxError> {
        (**self).provision().await
    }

    async fn reset(&self) -> Result<(), SandboxError> {
        (**self).reset().await
    }

    async fn teardown(&self) -> Result<(), SandboxError> {
        (**self).teardown().await
    }

    async fn copy_in(&self, host_path: &Path, sandbox_path: &str) -> Result<(), SandboxError> {
        (**self).copy_in(host_path, sandbox_path).await
    }

    async fn exec(&self, argv: &[String], timeout: Duration) -> Result<ExecutionResult, SandboxError> {
        (**self).exec(argv, timeout).await
    }

    async fn is_ready(&self) -> Result<bool, SandboxError> {
        (**self).is_ready().await
    }

    fn teardown_blocking(&self) {
        (**self).teardown_blocking();
    }
}

/// Copy `host_path` into the host side of `layout` at `sandbox_path`.
///
/// Shared by backends whose context sees the host workspace through a mount.
pub(crate) async fn stage_into_workspace(
    layout: &WorkspaceLayout,
    host_path: &Path,
    sandbox_path: &str,
) -> Result<(), SandboxError> {
    if !tokio::fs::try_exists(host_path).await.unwrap_or(false) {
        return Err(SandboxError::StagingFailed(format!(
            "host file not found: {}",
            host_path.display()
        )));
    }

    let bytes = tokio::fs::read(host_path).await.map_err(|e| {
        SandboxError::StagingFailed(format!("cannot read {}: {}", host_path.display(), e))
    })?;

    let dest = layout.host_path(sandbox_path);
    write_atomic(&dest, &bytes).await.map_err(|e| {
        SandboxError::StagingFailed(format!("cannot write {}: {}", dest.display(), e))
    })?;

    Ok(())
}
