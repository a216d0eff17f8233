//! # proofloop-sandbox
//!
//! Resource-bounded execution of untrusted generated functions.
//!
//! A [`Sandbox`] owns one isolated context with a shared working directory.
//! Candidates never run in the host process: the [`BatchRunner`] stages the
//! candidate and its inputs as a request artifact, then invokes an in-context
//! runner once per case through the [`CaseExecutor`]. Every case yields a
//! [`CaseResult`]; candidate exceptions, timeouts and protocol breakage are
//! all values, never errors.
//!
//! ## Features
//!
//! - `process` (default) - Local subprocess execution (for development)
//! - `docker` (default) - Docker container isolation (for production)
//!
//! ## Example
//!
//! ```rust,no_run
//! use proofloop_sandbox::{BatchRunner, ProcessSandbox, SandboxConfig, SandboxScope};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sandbox = ProcessSandbox::new(SandboxConfig::from_env().interpreter("python3"))?;
//!
//!     let scope = SandboxScope::acquire(&sandbox).await?;
//!     let report = BatchRunner::new(scope.sandbox(), Duration::from_secs(5))
//!         .run("def add(a, b):\n    return a + b\n", Some("add"), &[json!([2, 3])])
//!         .await?;
//!     println!("{}", report.to_json());
//!
//!     scope.release().await?;
//!     Ok(())
//! }
//! ```

mod batch;
mod case;
mod config;
mod error;
mod executor;
mod protocol;
mod scope;
mod traits;

#[cfg(feature = "process")]
mod process;

#[cfg(feature = "docker")]
mod docker;

pub use batch::{BatchRunner, StagedRound};
pub use case::{CaseError, CaseOutcome, CaseResult, ExecutionReport};
pub use config::{NetworkPolicy, SandboxConfig};
pub use error::SandboxError;
pub use executor::CaseExecutor;
pub use protocol::{RunRequest, RunnerReply, RunnerScript, REQUEST_FILE, RUNNER_FILE};
pub use scope::SandboxScope;
pub use traits::{ExecutionResult, Sandbox, WorkspaceLayout};

#[cfg(feature = "process")]
pub use process::ProcessSandbox;

#[cfg(feature = "docker")]
pub use docker::DockerSandbox;
