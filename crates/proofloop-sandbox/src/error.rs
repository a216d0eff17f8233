//! Sandbox error types.

use thiserror::Error;

/// Errors that can occur during sandbox operations.
///
/// Only [`SandboxError::ProvisionFailed`] and [`SandboxError::StagingFailed`]
/// are fatal to a workflow. Everything that goes wrong while running a single
/// case is folded into a [`CaseError`](crate::CaseError) instead.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The isolation mechanism could not be started
    #[error("Failed to provision sandbox: {0}")]
    ProvisionFailed(String),

    /// A file required inside the context could not be staged
    #[error("Failed to stage artifact: {0}")]
    StagingFailed(String),

    /// No live context exists
    #[error("Sandbox not ready: {0}")]
    NotReady(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Execution timed out
    #[error("Execution timed out after {0} ms")]
    Timeout(u64),

    /// A command inside the context could not be run
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Failed to stop or remove the context
    #[error("Failed to stop sandbox: {0}")]
    StopFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SandboxError {
    /// Whether this error must abort the surrounding workflow.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ProvisionFailed(_) | Self::StagingFailed(_))
    }
}
