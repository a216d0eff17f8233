//! Docker-based sandbox execution.
//!
//! One long-lived container per sandbox (`tail -f /dev/null` keeps it up),
//! with the host workspace bind-mounted read-write. Cases run through
//! `docker exec`, so a timed-out case only costs its own process.
//!
//! # Example
//!
//! ```rust,no_run
//! use proofloop_sandbox::{DockerSandbox, Sandbox, SandboxConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sandbox = DockerSandbox::new(SandboxConfig::default().image("python:3.12-slim"))?;
//!
//!     sandbox.provision().await?;
//!     println!("ready: {}", sandbox.is_ready().await?);
//!     sandbox.teardown().await?;
//!
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::traits::{stage_into_workspace, ExecutionResult, Sandbox, WorkspaceLayout};

/// Extra time the in-context `timeout` allows beyond the supervisor's limit.
const KILL_GRACE: Duration = Duration::from_millis(250);

/// Upper bound on the cleanup exec issued after a supervisor timeout.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Docker sandbox for isolated code execution.
#[derive(Debug)]
pub struct DockerSandbox {
    config: SandboxConfig,
    layout: WorkspaceLayout,
    docker_bin: String,
    live: AtomicBool,
}

impl DockerSandbox {
    /// Create a Docker sandbox; nothing is started until [`Sandbox::provision`].
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::ConfigError`] for an invalid configuration.
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        config.validate()?;
        let layout = config.layout();
        Ok(Self {
            config,
            layout,
            docker_bin: "docker".into(),
            live: AtomicBool::new(false),
        })
    }

    /// Use a docker-compatible CLI other than `docker` (e.g., `podman`).
    #[must_use]
    pub fn with_docker_binary(mut self, bin: impl Into<String>) -> Self {
        self.docker_bin = bin.into();
        self
    }

    /// Configuration this sandbox was built with.
    #[must_use]
    pub const fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Arguments of the `docker run` that creates the context.
    #[must_use]
    pub fn run_args(&self) -> Vec<String> {
        let c = &self.config;
        vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            c.name.clone(),
            "--network".into(),
            c.network.as_docker_arg().into(),
            "--memory".into(),
            c.memory_limit.clone(),
            "--cpus".into(),
            c.cpu_limit.to_string(),
            "--pids-limit".into(),
            "256".into(),
            "--security-opt".into(),
            "no-new-privileges".into(),
            "-v".into(),
            format!("{}:{}:rw", self.layout.host_dir.display(), self.layout.context_dir),
            c.image.clone(),
            "tail".into(),
            "-f".into(),
            "/dev/null".into(),
        ]
    }

    /// Arguments of the `docker exec` that runs `argv` under `timeout`.
    ///
    /// The in-context `timeout -s KILL` is a backstop so a killed client
    /// cannot leave the candidate running.
    #[must_use]
    pub fn exec_args(&self, argv: &[String], timeout: Duration) -> Vec<String> {
        let backstop = timeout + KILL_GRACE;
        let mut args = vec![
            "exec".into(),
            self.config.name.clone(),
            "timeout".into(),
            "-s".into(),
            "KILL".into(),
            format!("{:.3}", backstop.as_secs_f64()),
        ];
        args.extend(argv.iter().cloned());
        args
    }

    /// Arguments of the `docker exec` that kills every process in the
    /// context except its init (`tail -f /dev/null`).
    ///
    /// Cases run one at a time, so after a timeout the only survivors are the
    /// timed-out case and its children.
    #[must_use]
    pub fn kill_args(&self) -> Vec<String> {
        vec![
            "exec".into(),
            self.config.name.clone(),
            "sh".into(),
            "-c".into(),
            "kill -9 -1".into(),
        ]
    }

    async fn kill_in_context(&self) {
        match tokio::time::timeout(KILL_WAIT, self.docker(&self.kill_args())).await {
            Ok(Ok(output)) if output.status.success() => debug!("Killed timed-out case processes"),
            Ok(Ok(output)) => debug!(stderr = %stderr_of(&output), "No case processes left to kill"),
            Ok(Err(e)) => warn!(error = %e, "Could not kill timed-out case processes"),
            Err(_) => warn!("Killing timed-out case processes did not finish in time"),
        }
    }

    async fn docker(&self, args: &[String]) -> std::io::Result<Output> {
        Command::new(&self.docker_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn is_missing_container(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such container") || stderr.contains("is not running")
}

fn is_name_conflict(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("already in use") || stderr.contains("conflict")
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn kind(&self) -> &'static str {
        "docker"
    }

    fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    fn interpreter(&self) -> &str {
        &self.config.interpreter
    }

    #[instrument(skip(self), fields(sandbox = "docker", name = %self.config.name))]
    async fn provision(&self) -> Result<(), SandboxError> {
        tokio::fs::create_dir_all(&self.layout.host_dir)
            .await
            .map_err(|e| {
                SandboxError::ProvisionFailed(format!(
                    "cannot create workspace {}: {}",
                    self.layout.host_dir.display(),
                    e
                ))
            })?;

        let output = self
            .docker(&self.run_args())
            .await
            .map_err(|e| SandboxError::ProvisionFailed(format!("cannot run {}: {}", self.docker_bin, e)))?;

        if output.status.success() {
            info!(image = %self.config.image, "Sandbox container started");
            self.live.store(true, Ordering::SeqCst);
            return Ok(());
        }

        let stderr = stderr_of(&output);
        if !is_name_conflict(&stderr) {
            return Err(SandboxError::ProvisionFailed(stderr));
        }

        // A container with this name exists; make sure it is running and reuse it.
        debug!("Sandbox container already exists, reusing it");
        let start = self
            .docker(&["start".into(), self.config.name.clone()])
            .await
            .map_err(|e| SandboxError::ProvisionFailed(e.to_string()))?;
        if !start.status.success() {
            return Err(SandboxError::ProvisionFailed(stderr_of(&start)));
        }

        self.live.store(true, Ordering::SeqCst);
        Ok(())
    }

    #[instrument(skip(self), fields(sandbox = "docker", name = %self.config.name))]
    async fn reset(&self) -> Result<(), SandboxError> {
        let output = self
            .docker(&[
                "exec".into(),
                self.config.name.clone(),
                "find".into(),
                self.layout.context_dir.clone(),
                "-mindepth".into(),
                "1".into(),
                "-delete".into(),
            ])
            .await?;

        if output.status.success() {
            debug!("Workspace cleared");
            return Ok(());
        }

        let stderr = stderr_of(&output);
        if is_missing_container(&stderr) || stderr.to_ascii_lowercase().contains("no such file") {
            info!(%stderr, "Nothing to clear");
            return Ok(());
        }

        warn!(%stderr, "Failed to clear workspace");
        Err(SandboxError::ExecutionFailed(format!("cannot clear workspace: {stderr}")))
    }

    #[instrument(skip(self), fields(sandbox = "docker", name = %self.config.name))]
    async fn teardown(&self) -> Result<(), SandboxError> {
        if let Err(e) = self.reset().await {
            warn!(error = %e, "Workspace not cleared before removal");
        }

        let output = self
            .docker(&["rm".into(), "-f".into(), self.config.name.clone()])
            .await
            .map_err(|e| SandboxError::StopFailed(e.to_string()))?;

        self.live.store(false, Ordering::SeqCst);

        if output.status.success() {
            info!("Sandbox container removed");
            return Ok(());
        }

        let stderr = stderr_of(&output);
        if is_missing_container(&stderr) {
            debug!("Sandbox container already gone");
            return Ok(());
        }
        Err(SandboxError::StopFailed(stderr))
    }

    async fn copy_in(&self, host_path: &Path, sandbox_path: &str) -> Result<(), SandboxError> {
        stage_into_workspace(&self.layout, host_path, sandbox_path).await
    }

    #[instrument(skip(self, argv), fields(sandbox = "docker"))]
    async fn exec(&self, argv: &[String], timeout: Duration) -> Result<ExecutionResult, SandboxError> {
        let start = Instant::now();
        let args = self.exec_args(argv, timeout);

        let output = match tokio::time::timeout(timeout, self.docker(&args)).await {
            Ok(output) => output
                .map_err(|e| SandboxError::ExecutionFailed(format!("cannot run {}: {}", self.docker_bin, e)))?,
            Err(_) => {
                // Dropping the client does not stop the process inside the container.
                self.kill_in_context().await;
                return Err(SandboxError::Timeout(
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                ));
            }
        };

        Ok(ExecutionResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            execution_time_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    async fn is_ready(&self) -> Result<bool, SandboxError> {
        let output = self
            .docker(&[
                "inspect".into(),
                "-f".into(),
                "{{.State.Running}}".into(),
                self.config.name.clone(),
            ])
            .await?;

        Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    fn teardown_blocking(&self) {
        if !self.live.swap(false, Ordering::SeqCst) {
            return;
        }
        warn!(name = %self.config.name, "Removing sandbox container without async release");
        let _ = std::process::Command::new(&self.docker_bin)
            .args(["rm", "-f", &self.config.name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}
