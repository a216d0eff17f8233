//! Sandbox configuration.
//!
//! Defaults give a no-egress `python:3.9` container with 512 MiB of memory
//! and half a CPU. Every field can be overridden through the builder or the
//! `PROOFLOOP_*` environment. The per-case time budget is not a property of
//! the context; callers pass it to each [`Sandbox::exec`](crate::Sandbox::exec).

use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

use crate::error::SandboxError;
use crate::traits::WorkspaceLayout;

/// Outbound network policy of the context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NetworkPolicy {
    /// No network at all
    #[default]
    Isolated,
    /// Default bridge network
    Bridge,
    /// Any other named docker network
    Named(String),
}

impl NetworkPolicy {
    /// Value passed to `docker run --network`.
    #[must_use]
    pub fn as_docker_arg(&self) -> &str {
        match self {
            Self::Isolated => "none",
            Self::Bridge => "bridge",
            Self::Named(name) => name,
        }
    }
}

impl FromStr for NetworkPolicy {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(SandboxError::ConfigError("empty network policy".into())),
            "none" | "isolated" => Ok(Self::Isolated),
            "bridge" => Ok(Self::Bridge),
            other => Ok(Self::Named(other.to_string())),
        }
    }
}

/// Configuration for a sandbox context.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Execution image
    pub image: String,
    /// Network mode
    pub network: NetworkPolicy,
    /// Memory ceiling (e.g., "512m", "1g")
    pub memory_limit: String,
    /// CPU ceiling in cores
    pub cpu_limit: f64,
    /// Name of the context (container name)
    pub name: String,
    /// Host directory mounted into the context
    pub host_dir: PathBuf,
    /// Mount point inside the context
    pub context_dir: String,
    /// Interpreter that runs the in-context runner
    pub interpreter: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "python:3.9".into(),
            network: NetworkPolicy::Isolated,
            memory_limit: "512m".into(),
            cpu_limit: 0.5,
            name: "sandbox".into(),
            host_dir: PathBuf::from("./sandbox"),
            context_dir: "/app/sandbox".into(),
            interpreter: "python".into(),
        }
    }
}

impl SandboxConfig {
    /// Defaults overridden by any `PROOFLOOP_*` variables that are set.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(image) = std::env::var("PROOFLOOP_IMAGE") {
            config.image = image;
        }
        if let Some(network) = parse_env::<NetworkPolicy>("PROOFLOOP_NETWORK") {
            config.network = network;
        }
        if let Ok(memory) = std::env::var("PROOFLOOP_MEMORY") {
            config.memory_limit = memory;
        }
        if let Some(cpus) = parse_env::<f64>("PROOFLOOP_CPUS") {
            config.cpu_limit = cpus;
        }
        if let Ok(name) = std::env::var("PROOFLOOP_CONTAINER") {
            config.name = name;
        }
        if let Ok(mount) = std::env::var("PROOFLOOP_MOUNT") {
            config.host_dir = PathBuf::from(mount);
        }
        if let Ok(python) = std::env::var("PROOFLOOP_PYTHON") {
            config.interpreter = python;
        }
        config
    }

    /// Set the execution image.
    #[must_use]
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Set the network policy.
    #[must_use]
    pub fn network(mut self, network: NetworkPolicy) -> Self {
        self.network = network;
        self
    }

    /// Set the memory ceiling (e.g., "512m", "1g").
    #[must_use]
    pub fn memory_limit(mut self, limit: impl Into<String>) -> Self {
        self.memory_limit = limit.into();
        self
    }

    /// Set the CPU ceiling (e.g., 1.0 = 1 CPU core).
    #[must_use]
    pub fn cpu_limit(mut self, limit: f64) -> Self {
        self.cpu_limit = limit;
        self
    }

    /// Set the context name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the host directory and the mount point inside the context.
    #[must_use]
    pub fn mount(mut self, host_dir: impl Into<PathBuf>, context_dir: impl Into<String>) -> Self {
        self.host_dir = host_dir.into();
        self.context_dir = context_dir.into();
        self
    }

    /// Set the interpreter.
    #[must_use]
    pub fn interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    /// Reject values no backend can honour.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::ConfigError`] describing the first bad field.
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.image.trim().is_empty() {
            return Err(SandboxError::ConfigError("image must not be empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(SandboxError::ConfigError("name must not be empty".into()));
        }
        if !(self.cpu_limit.is_finite() && self.cpu_limit > 0.0) {
            return Err(SandboxError::ConfigError(format!(
                "cpu limit must be positive, got {}",
                self.cpu_limit
            )));
        }
        if memory_limit_kib(&self.memory_limit).is_none() {
            return Err(SandboxError::ConfigError(format!(
                "unrecognised memory limit: {}",
                self.memory_limit
            )));
        }
        if self.interpreter.trim().is_empty() {
            return Err(SandboxError::ConfigError("interpreter must not be empty".into()));
        }
        Ok(())
    }

    /// Workspace layout, with the host directory made absolute.
    #[must_use]
    pub fn layout(&self) -> WorkspaceLayout {
        let host_dir = if self.host_dir.is_absolute() {
            self.host_dir.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&self.host_dir))
                .unwrap_or_else(|_| self.host_dir.clone())
        };
        WorkspaceLayout::new(host_dir, self.context_dir.clone())
    }
}

/// Convert a docker-style memory string ("512m", "1g", "65536k", "1048576")
/// to KiB.
pub(crate) fn memory_limit_kib(limit: &str) -> Option<u64> {
    let limit = limit.trim().to_ascii_lowercase();
    let (digits, unit) = match limit.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => limit.split_at(idx),
        None => (limit.as_str(), ""),
    };
    let value: u64 = digits.parse().ok()?;
    let kib = match unit.trim_end_matches('b') {
        "" => value / 1024,
        "k" => value,
        "m" => value.checked_mul(1024)?,
        "g" => value.checked_mul(1024 * 1024)?,
        _ => return None,
    };
    (kib > 0).then_some(kib)
}

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable sandbox setting");
            None
        }
    }
}
