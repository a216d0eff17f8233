//! Process-based sandbox for local development.
//!
//! **Warning**: This sandbox provides NO network or filesystem isolation and
//! should only be used for development with trusted candidates. Memory and
//! CPU ceilings are applied with `ulimit` on unix.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::config::{memory_limit_kib, SandboxConfig};
use crate::error::SandboxError;
use crate::traits::{stage_into_workspace, ExecutionResult, Sandbox, WorkspaceLayout};

/// Process-based sandbox for development.
///
/// The context is a plain host directory; its context path is the host path.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    config: SandboxConfig,
    layout: WorkspaceLayout,
}

impl ProcessSandbox {
    /// Create a process sandbox rooted at the configured host directory.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::ConfigError`] for an invalid configuration.
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        config.validate()?;
        let host = config.layout().host_dir;
        let layout = WorkspaceLayout::new(host.clone(), host.to_string_lossy().into_owned());
        Ok(Self { config, layout })
    }

    /// Configuration this sandbox was built with.
    #[must_use]
    pub const fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn command(&self, argv: &[String], timeout: Duration) -> Command {
        #[cfg(unix)]
        let mut cmd = {
            let kib = memory_limit_kib(&self.config.memory_limit).unwrap_or(u64::MAX);
            let cpu_secs = timeout.as_secs() + 1;
            let mut cmd = Command::new("sh");
            cmd.arg("-c")
                .arg(format!(
                    "ulimit -v {kib} 2>/dev/null; ulimit -t {cpu_secs} 2>/dev/null; exec \"$@\""
                ))
                .arg("proofloop-case")
                .args(argv);
            cmd
        };

        #[cfg(not(unix))]
        let mut cmd = {
            let _ = timeout;
            let mut cmd = Command::new(&argv[0]);
            cmd.args(&argv[1..]);
            cmd
        };

        cmd.current_dir(&self.layout.host_dir)
            .env_clear()
            .env("PATH", std::env::var_os("PATH").unwrap_or_default())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    fn kind(&self) -> &'static str {
        "process"
    }

    fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    fn interpreter(&self) -> &str {
        &self.config.interpreter
    }

    #[instrument(skip(self), fields(sandbox = "process"))]
    async fn provision(&self) -> Result<(), SandboxError> {
        warn!("ProcessSandbox provides NO network isolation!");
        tokio::fs::create_dir_all(&self.layout.host_dir)
            .await
            .map_err(|e| {
                SandboxError::ProvisionFailed(format!(
                    "cannot create workspace {}: {}",
                    self.layout.host_dir.display(),
                    e
                ))
            })?;
        info!(dir = %self.layout.host_dir.display(), "Workspace ready");
        Ok(())
    }

    #[instrument(skip(self), fields(sandbox = "process"))]
    async fn reset(&self) -> Result<(), SandboxError> {
        let mut entries = match tokio::fs::read_dir(&self.layout.host_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Workspace missing, nothing to clear");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }
        debug!("Workspace cleared");
        Ok(())
    }

    #[instrument(skip(self), fields(sandbox = "process"))]
    async fn teardown(&self) -> Result<(), SandboxError> {
        match tokio::fs::remove_dir_all(&self.layout.host_dir).await {
            Ok(()) => {
                info!("Workspace removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SandboxError::StopFailed(e.to_string())),
        }
    }

    async fn copy_in(&self, host_path: &Path, sandbox_path: &str) -> Result<(), SandboxError> {
        stage_into_workspace(&self.layout, host_path, sandbox_path).await
    }

    #[instrument(skip(self, argv), fields(sandbox = "process"))]
    async fn exec(&self, argv: &[String], timeout: Duration) -> Result<ExecutionResult, SandboxError> {
        if argv.is_empty() {
            return Err(SandboxError::ExecutionFailed("empty command".into()));
        }

        let start = Instant::now();
        let output = tokio::time::timeout(timeout, self.command(argv, timeout).output())
            .await
            .map_err(|_| SandboxError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)))?
            .map_err(|e| SandboxError::ExecutionFailed(e.to_string()))?;

        Ok(ExecutionResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            execution_time_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    async fn is_ready(&self) -> Result<bool, SandboxError> {
        Ok(tokio::fs::try_exists(&self.layout.host_dir).await.unwrap_or(false))
    }

    fn teardown_blocking(&self) {
        let _ = std::fs::remove_dir_all(&self.layout.host_dir);
    }
}
