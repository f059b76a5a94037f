use thiserror::Error;

use crate::queue::{JobId, JobState};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Concurrency limit must be at least 1, got {0}")]
    InvalidConcurrencyLimit(usize),

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("No tokio runtime available. Create the queue from within a runtime.")]
    NoRuntime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_limit_display() {
        let err = DispatchError::InvalidConcurrencyLimit(0);
        assert_eq!(err.to_string(), "Concurrency limit must be at least 1, got 0");
    }

    #[test]
    fn invalid_transition_display() {
        let id = JobId::new();
        let err = DispatchError::InvalidTransition {
            id,
            from: JobState::Completed,
            to: JobState::Active,
        };
        assert_eq!(
            err.to_string(),
            format!("Job {id} cannot move from COMPLETED to ACTIVE")
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DispatchError>();
    }
}
