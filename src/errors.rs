use std::{io, time::Duration};

use chrono::{DateTime, Utc};

/// Failure of a single remote call (zone API or replica query).
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ApiError {
    pub message: String,
    pub is_retryable: bool,
}

impl ApiError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_retryable: false,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    #[error("Invalid change request: {0}")]
    InvalidRequest(String),

    #[error("Change submission rejected: {0}")]
    Submission(ApiError),

    #[error("Polling change {change_id} failed after {attempts} attempts: {cause}")]
    Query {
        change_id: String,
        attempts: u32,
        cause: ApiError,
    },

    #[error(
        "Change {change_id} not converged after {elapsed:?} ({attempts} attempts, timeout {timeout:?}, submitted {submitted_at})"
    )]
    NonConvergence {
        change_id: String,
        submitted_at: DateTime<Utc>,
        elapsed: Duration,
        timeout: Duration,
        attempts: u32,
    },

    #[error("Unable to resolve replica addresses: {0}")]
    ReplicaResolution(ApiError),

    #[error("Cancelled")]
    Cancelled,

    #[error("Unable to write probe log: {0}")]
    LogWrite(#[from] io::Error),
}

impl ProbeError {
    /// Whether the probe loop can carry on with the next iteration.
    pub fn is_iteration_failure(&self) -> bool {
        !matches!(self, ProbeError::Cancelled | ProbeError::LogWrite(_))
    }
}

#[cfg(test)]
mod tests {
    use super::{ApiError, ProbeError};
    use std::io;

    #[test]
    fn iteration_failures() {
        assert_eq!(
            true,
            ProbeError::Submission(ApiError::fatal("exists")).is_iteration_failure()
        );
        assert_eq!(
            true,
            ProbeError::InvalidRequest(String::from("bad")).is_iteration_failure()
        );
        assert_eq!(false, ProbeError::Cancelled.is_iteration_failure());
        assert_eq!(
            false,
            ProbeError::LogWrite(io::Error::new(io::ErrorKind::Other, "disk full"))
                .is_iteration_failure()
        );
    }
}
