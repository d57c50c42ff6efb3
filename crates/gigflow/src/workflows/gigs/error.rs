use super::lifecycle::TransitionRejected;
use super::repository::RepositoryError;

/// Reason a lifecycle operation was aborted. Nothing is written when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum GigError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("state conflict: {0}")]
    StateConflict(String),
    #[error("not authorized: {0}")]
    Authorization(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Lost a race on a versioned write; the caller may retry.
    #[error("concurrent update: {0}")]
    ConcurrencyConflict(String),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl GigError {
    pub const fn kind(&self) -> &'static str {
        match self {
            GigError::Validation(_) => "validation_error",
            GigError::StateConflict(_) => "state_conflict",
            GigError::Authorization(_) => "authorization_error",
            GigError::NotFound(_) => "not_found",
            GigError::ConcurrencyConflict(_) => "concurrency_conflict",
            GigError::Repository(_) => "repository_error",
        }
    }

    pub const fn is_retryable(&self) -> bool {
        matches!(self, GigError::ConcurrencyConflict(_))
    }
}

impl From<TransitionRejected> for GigError {
    fn from(value: TransitionRejected) -> Self {
        GigError::StateConflict(value.to_string())
    }
}

impl From<RepositoryError> for GigError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::VersionConflict => GigError::ConcurrencyConflict(
                "record was modified by another request, retry the operation".to_string(),
            ),
            RepositoryError::ScheduleConflict { job_id } => GigError::StateConflict(format!(
                "worker already holds an accepted job at this time ({job_id})"
            )),
            other => GigError::Repository(other),
        }
    }
}
