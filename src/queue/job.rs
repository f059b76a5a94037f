use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;

/// Identificador opaco de job, único durante a vida da fila.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req_{}", self.0.simple())
    }
}

/// Os quatro estados pelos quais um job passa.
///
/// Cada job flui por: PENDING → ACTIVE → COMPLETED | FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Só avanços são válidos; estados terminais não têm sucessores.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Active)
                | (JobState::Active, JobState::Completed)
                | (JobState::Active, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "PENDING"),
            JobState::Active => write!(f, "ACTIVE"),
            JobState::Completed => write!(f, "COMPLETED"),
            JobState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Por que um handler não produziu resultado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// A future do handler resolveu com erro.
    Rejected(String),
    /// O handler entrou em pânico, ao construir a future ou durante o poll.
    Panicked(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Rejected(msg) => write!(f, "Handler error: {msg}"),
            FailureKind::Panicked(msg) => write!(f, "Handler panicked: {msg}"),
        }
    }
}

/// Uma unidade de trabalho submetida, como registrada pelo ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job<P> {
    pub id: JobId,
    pub payload: P,
    pub state: JobState,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure: Option<FailureKind>,
}

impl<P> Job<P> {
    pub fn new(payload: P) -> Self {
        Self {
            id: JobId::new(),
            payload,
            state: JobState::Pending,
            enqueued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failure: None,
        }
    }

    /// Pending → Active.
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), DispatchError> {
        self.transition(JobState::Active)?;
        self.started_at = Some(at);
        Ok(())
    }

    /// Active → Completed.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<(), DispatchError> {
        self.transition(JobState::Completed)?;
        self.completed_at = Some(at);
        Ok(())
    }

    /// Active → Failed, guardando o detalhe da falha no registro.
    pub fn fail(&mut self, at: DateTime<Utc>, failure: FailureKind) -> Result<(), DispatchError> {
        self.transition(JobState::Failed)?;
        self.completed_at = Some(at);
        self.failure = Some(failure);
        Ok(())
    }

    /// Milissegundos entre início e conclusão. `None` até o estado terminal.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some((completed - started).num_milliseconds()),
            _ => None,
        }
    }

    fn transition(&mut self, to: JobState) -> Result<(), DispatchError> {
        if !self.state.can_transition_to(to) {
            return Err(DispatchError::InvalidTransition {
                id: self.id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

/// O que o handler recebe quando seu job é admitido.
#[derive(Debug, Clone)]
pub struct JobContext<P> {
    pub id: JobId,
    pub payload: P,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn job_creation_defaults() {
        let job = Job::new("hello");
        assert_eq!(job.state, JobState::Pending);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
        assert!(job.failure.is_none());
        assert!(job.duration_ms().is_none());
    }

    #[test]
    fn happy_path_walks_all_states() {
        let mut job = Job::new(());
        let t0 = Utc::now();

        job.start(t0).unwrap();
        assert_eq!(job.state, JobState::Active);
        assert_eq!(job.started_at, Some(t0));
        assert!(job.duration_ms().is_none());

        job.complete(t0 + Duration::milliseconds(250)).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.duration_ms(), Some(250));
    }

    #[test]
    fn failure_records_detail() {
        let mut job = Job::new(());
        let t0 = Utc::now();
        job.start(t0).unwrap();
        job.fail(t0 + Duration::milliseconds(40), FailureKind::Rejected("HTTP 500".into()))
            .unwrap();

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.duration_ms(), Some(40));
        assert_eq!(job.failure, Some(FailureKind::Rejected("HTTP 500".into())));
    }

    #[test]
    fn pending_cannot_complete() {
        let mut job = Job::new(());
        let err = job.complete(Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::InvalidTransition {
                from: JobState::Pending,
                to: JobState::Completed,
                ..
            }
        ));
        assert_eq!(job.state, JobState::Pending);
    }

    #[test]
    fn terminal_states_are_immutable() {
        let mut job = Job::new(());
        let now = Utc::now();
        job.start(now).unwrap();
        job.complete(now).unwrap();

        assert!(job.start(now).is_err());
        assert!(job.fail(now, FailureKind::Panicked("late".into())).is_err());
        assert!(job.complete(now).is_err());
        assert_eq!(job.state, JobState::Completed);
        assert!(job.failure.is_none());
    }

    #[test]
    fn transition_table() {
        use JobState::*;
        let all = [Pending, Active, Completed, Failed];
        let legal = [(Pending, Active), (Active, Completed), (Active, Failed)];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
        assert!(Completed.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Active.is_terminal());
    }

    #[test]
    fn display_formats() {
        assert_eq!(JobState::Pending.to_string(), "PENDING");
        assert_eq!(JobState::Failed.to_string(), "FAILED");
        assert_eq!(
            FailureKind::Rejected("timeout".into()).to_string(),
            "Handler error: timeout"
        );
        assert_eq!(
            FailureKind::Panicked("boom".into()).to_string(),
            "Handler panicked: boom"
        );
        assert!(JobId::new().to_string().starts_with("req_"));
    }

    #[test]
    fn job_ids_are_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
    }
}
