//! Loop configuration.

use std::time::Duration;
use tracing::warn;

use crate::error::LoopError;

/// Bounds of the validate/repair loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Rounds before the loop gives up (MAX_ITER)
    pub max_iterations: u32,
    /// Wall-clock budget per case
    pub case_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            case_timeout: Duration::from_secs(5),
        }
    }
}

impl LoopConfig {
    /// Defaults overridden by `PROOFLOOP_MAX_ITER` and
    /// `PROOFLOOP_CASE_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("PROOFLOOP_MAX_ITER") {
            match raw.parse() {
                Ok(n) => config.max_iterations = n,
                Err(_) => warn!(value = %raw, "Ignoring unparsable PROOFLOOP_MAX_ITER"),
            }
        }
        if let Ok(raw) = std::env::var("PROOFLOOP_CASE_TIMEOUT_MS") {
            match raw.parse() {
                Ok(ms) => config.case_timeout = Duration::from_millis(ms),
                Err(_) => warn!(value = %raw, "Ignoring unparsable PROOFLOOP_CASE_TIMEOUT_MS"),
            }
        }

        config
    }

    /// Set the iteration bound.
    #[must_use]
    pub const fn max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    /// Set the per-case timeout.
    #[must_use]
    pub const fn case_timeout(mut self, timeout: Duration) -> Self {
        self.case_timeout = timeout;
        self
    }

    /// # Errors
    ///
    /// Returns [`LoopError::Config`] for a zero bound or zero timeout.
    pub fn validate(&self) -> Result<(), LoopError> {
        if self.max_iterations == 0 {
            return Err(LoopError::Config("max_iterations must be at least 1".into()));
        }
        if self.case_timeout.is_zero() {
            return Err(LoopError::Config("case timeout must be non-zero".into()));
        }
        Ok(())
    }
}
