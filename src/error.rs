//! Custom error types for smu.

use thiserror::Error;

/// Errors that can occur during pool migration and volume upgrade.
#[derive(Error, Debug)]
pub enum SmuError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Expected exactly one {kind} for {selector}, found {count}")]
    AmbiguousMatch {
        kind: String,
        selector: String,
        count: usize,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("[{0}] conflict: {1}")]
    Conflict(String, String),

    #[error("Timed out after {attempts} attempts waiting for {operation}: {last_error}")]
    Timeout {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Invalid step status: {0}")]
    InvalidStatus(String),

    #[error("Pre-upgrade check failed: {0}")]
    PreCheckFailed(String),

    #[error("[{0}] Kubernetes API error: {1}")]
    KubernetesApi(String, String),
}

impl SmuError {
    /// Classify a kube client error for the given resource kind and verb.
    ///
    /// HTTP 409 becomes [`SmuError::Conflict`], so read-modify-write callers can
    /// re-fetch and try again. Everything else is reported as an API error.
    pub fn kube(kind: &str, verb: &str, name: &str, err: kube::Error) -> Self {
        let component = format!("{kind}::{verb}");
        match err {
            kube::Error::Api(ae) if ae.code == 409 => {
                Self::Conflict(component, format!("{name}: {}", ae.message))
            }
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound(format!("{kind} {name}")),
            other => Self::KubernetesApi(component, format!("{name}: {other}")),
        }
    }

    /// Returns true if the write lost an optimistic concurrency race.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_, _))
    }
}

/// Returns true if the error chain contains a conflict from the API server.
pub fn is_conflict(err: &anyhow::Error) -> bool {
    err.downcast_ref::<SmuError>()
        .is_some_and(SmuError::is_conflict)
}
