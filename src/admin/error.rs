use thiserror::Error;

use crate::exec::ExecutionError;
use crate::security::InvalidInput;

/// Outcome taxonomy for administrative operations.
///
/// Messages are safe to return to API clients: none of them carries the
/// privileged command line or its output.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{0}")]
    Validation(#[from] InvalidInput),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Protected(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// The privileged command ran but its expected artifact never appeared.
    #[error("{0}")]
    MissingArtifact(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{failed} (completed: {})", .completed.join(", "))]
    PartialFailure {
        completed: Vec<String>,
        failed: String,
    },
}

impl AdminError {
    /// Stable machine-readable category, used in API responses.
    pub fn category(&self) -> &'static str {
        match self {
            AdminError::Validation(_) => "validation",
            AdminError::Conflict(_) => "conflict",
            AdminError::NotFound(_) => "not_found",
            AdminError::Protected(_) => "protected",
            AdminError::Execution(ExecutionError::Timeout(_)) => "timeout",
            AdminError::Execution(_) | AdminError::MissingArtifact(_) => "execution",
            AdminError::Io { .. } => "io",
            AdminError::PartialFailure { .. } => "partial_failure",
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        AdminError::Io {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn categories() {
        let err: AdminError = InvalidInput("username is required".into()).into();
        assert_eq!(err.category(), "validation");
        assert_eq!(err.to_string(), "username is required");

        let err: AdminError = ExecutionError::Timeout(Duration::from_secs(60)).into();
        assert_eq!(err.category(), "timeout");

        let err: AdminError = ExecutionError::Runtime {
            exit_code: 1,
            output: "secret output".into(),
        }
        .into();
        assert_eq!(err.category(), "execution");
        assert!(!err.to_string().contains("secret output"));
    }

    #[test]
    fn partial_failure_names_both_steps() {
        let err = AdminError::PartialFailure {
            completed: vec!["certificate revoked".into()],
            failed: "profile file removal failed".into(),
        };
        assert_eq!(err.category(), "partial_failure");
        assert_eq!(
            err.to_string(),
            "profile file removal failed (completed: certificate revoked)"
        );
    }
}
