//! Error taxonomy for the control plane
//!
//! Transient failures (bus publish, malformed payloads, missing classifier)
//! are handled at the call site and surface as degraded outcome values.
//! What remains here are the errors that abort a cycle's dependent steps.

use std::time::Duration;
use thiserror::Error;

use crate::models::PrewarmPhase;

/// Errors surfaced by control-plane components
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A bounded wait on the orchestration platform ran out of time
    #[error("timed out after {waited:?} waiting for `{selector}`: found {found}, need {expected}")]
    ProvisioningTimeout {
        selector: String,
        expected: usize,
        found: usize,
        waited: Duration,
    },

    /// A deployment template required for provisioning does not exist
    #[error("deployment `{0}` not found")]
    DeploymentNotFound(String),

    /// Partitioning was requested with an empty processor set
    #[error("no live processors to assign machines to")]
    NoProcessors,

    /// A prewarm pod was asked to skip or repeat a phase
    #[error("pod `{pod}` cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        pod: String,
        from: PrewarmPhase,
        to: PrewarmPhase,
    },

    /// Orchestration platform call failed
    #[error("orchestrator call failed: {0:#}")]
    Orchestrator(#[source] anyhow::Error),

    /// Message bus operation failed
    #[error("bus operation failed: {0:#}")]
    Bus(#[source] anyhow::Error),

    /// Classifier artifact could not be loaded or scored
    #[error("classifier error: {0:#}")]
    Classifier(#[source] anyhow::Error),
}

impl SchedulerError {
    /// Bounded-wait failures only abort the current cycle
    pub fn is_timeout(&self) -> bool {
        matches!(self, SchedulerError::ProvisioningTimeout { .. })
    }

    /// Setup failures abort the provisioning attempt but never the loop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::DeploymentNotFound(_) | SchedulerError::NoProcessors
        )
    }
}

pub type Result<T, E = SchedulerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let timeout = SchedulerError::ProvisioningTimeout {
            selector: "app=machine".to_string(),
            expected: 5,
            found: 2,
            waited: Duration::from_secs(120),
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_fatal());

        let missing = SchedulerError::DeploymentNotFound("processor-prewarm".to_string());
        assert!(missing.is_fatal());
        assert!(!missing.is_timeout());
    }

    #[test]
    fn test_timeout_message() {
        let err = SchedulerError::ProvisioningTimeout {
            selector: "app=processor".to_string(),
            expected: 2,
            found: 0,
            waited: Duration::from_secs(3),
        };
        let msg = err.to_string();
        assert!(msg.contains("app=processor"));
        assert!(msg.contains("found 0, need 2"));
    }
}
