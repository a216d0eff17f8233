//! Scoped ownership of a live context.
//!
//! [`SandboxScope::acquire`] provisions, [`SandboxScope::release`] tears
//! down. If a scope is dropped without being released (early return, panic,
//! cancelled future) the backend's blocking teardown runs instead, so no
//! context outlives its workflow.

use tracing::{debug, instrument, warn};

use crate::error::SandboxError;
use crate::traits::Sandbox;

/// A provisioned sandbox that is torn down when the scope ends.
pub struct SandboxScope<'a, S: Sandbox + ?Sized> {
    sandbox: &'a S,
    released: bool,
}

impl<'a, S: Sandbox + ?Sized> SandboxScope<'a, S> {
    /// Provision `sandbox` and take responsibility for tearing it down.
    ///
    /// # Errors
    ///
    /// Returns the provisioning error; whatever was half-created is removed
    /// first.
    #[instrument(skip(sandbox), fields(sandbox = sandbox.kind()))]
    pub async fn acquire(sandbox: &'a S) -> Result<Self, SandboxError> {
        if let Err(e) = sandbox.provision().await {
            if let Err(cleanup) = sandbox.teardown().await {
                warn!(error = %cleanup, "Cleanup after failed provision also failed");
            }
            return Err(e);
        }
        debug!("Sandbox acquired");
        Ok(Self {
            sandbox,
            released: false,
        })
    }

    /// Sandbox held by this scope.
    #[must_use]
    pub fn sandbox(&self) -> &'a S {
        self.sandbox
    }

    /// Tear the context down.
    ///
    /// # Errors
    ///
    /// Returns the teardown error; the scope counts as released either way.
    pub async fn release(mut self) -> Result<(), SandboxError> {
        self.released = true;
        self.sandbox.teardown().await
    }
}

impl<S: Sandbox + ?Sized> Drop for SandboxScope<'_, S> {
    fn drop(&mut self) {
        if !self.released {
            warn!(sandbox = self.sandbox.kind(), "Sandbox scope dropped without release");
            self.sandbox.teardown_blocking();
        }
    }
}
