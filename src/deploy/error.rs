//! Deployment error taxonomy.
//!
//! Health-check failures and unavailable metrics are *not* represented here:
//! the former is reported as a status with `is_healthy = false`, the latter
//! is absorbed by the controller as a stale tick.

use thiserror::Error;

/// Operator or programming mistakes. Reported synchronously, never mutate state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidOperation {
    /// A canary is already active; a second one cannot be started.
    #[error("canary '{version}' is already active")]
    CanaryAlreadyActive {
        /// Version of the canary currently active.
        version: String,
    },

    /// Promotion or canary monitoring requested with no active canary.
    #[error("no canary is active")]
    NoActiveCanary,

    /// No earlier deployment exists to roll back to.
    #[error("no prior deployment to roll back to")]
    NoPriorDeployment,

    /// Nothing is currently deployed that could be rolled back.
    #[error("no current deployment to roll back")]
    NothingToRollBack,

    /// `canary` was passed as a blue/green target.
    #[error("the canary environment can only be deployed via a canary release")]
    CanaryNotDeployable,

    /// A blue/green cutover was requested while a canary is under observation.
    #[error("canary '{version}' is in progress; promote or roll it back first")]
    CanaryInProgress {
        /// Version of the canary currently active.
        version: String,
    },

    /// Another deployment is between health check and commit.
    #[error("deployment of '{version}' to {environment} is in progress")]
    DeploymentInProgress {
        /// Environment the in-flight deployment targets.
        environment: String,
        /// Version being deployed.
        version: String,
    },
}

/// Errors produced by the deployment controller.
#[derive(Debug, Error)]
pub enum DeploymentError {
    /// The requested operation is not valid in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(#[from] InvalidOperation),

    /// A canary override or setting is out of range.
    #[error("invalid config field '{field}': {reason}")]
    InvalidConfig {
        /// Field that failed validation.
        field: String,
        /// Why it failed.
        reason: String,
    },

    /// Internal lock poisoned.
    #[error("deployment lock poisoned")]
    LockPoisoned,
}

impl DeploymentError {
    /// Return the [`InvalidOperation`] behind this error, if any.
    pub fn invalid_operation(&self) -> Option<&InvalidOperation> {
        match self {
            DeploymentError::InvalidOperation(op) => Some(op),
            _ => None,
        }
    }
}
