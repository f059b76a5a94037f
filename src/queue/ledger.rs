//! Registro autoritativo de todos os jobs submetidos.
//!
//! O ledger nunca executa handlers nem fala com assinantes. Cada método que
//! altera estado acrescenta os eventos produzidos a um outbox fornecido pelo
//! chamador, o que permite à [`DispatchQueue`](super::DispatchQueue)
//! publicá-los exatamente na ordem em que as transições aconteceram.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;

use super::events::{Completed, Failed, QueueEvent, QueueStatus, Submitted};
use super::job::{FailureKind, Job, JobContext, JobId, JobState};
use crate::error::DispatchError;

/// Handler com tipo apagado, invocado no máximo uma vez.
pub type BoxedHandler<P, R> =
    Box<dyn FnOnce(JobContext<P>) -> BoxFuture<'static, anyhow::Result<R>> + Send>;

pub(super) struct PendingJob<P, R> {
    pub(super) job: Job<P>,
    pub(super) handler: BoxedHandler<P, R>,
}

/// Tudo que o executor precisa para rodar um job admitido.
pub struct Dispatch<P, R> {
    pub context: JobContext<P>,
    pub handler: BoxedHandler<P, R>,
    /// Geração do ledger em que o job foi admitido.
    pub generation: u64,
}

/// Contadores desde a criação ou o último reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueTotals {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    /// Jobs removidos do backlog por [`Ledger::cancel`].
    pub cancelled: u64,
}

/// O que um reset descartou.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetSummary {
    pub discarded_pending: usize,
    pub forgotten_active: usize,
}

/// Cópia pontual do ledger, para tabelas e painéis.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot<P> {
    pub status: QueueStatus,
    pub max_concurrent: usize,
    pub totals: QueueTotals,
    /// Backlog na ordem de admissão.
    pub queued: Vec<Job<P>>,
    /// Jobs ativos ordenados pelo início.
    pub active: Vec<Job<P>>,
    /// Jobs finalizados mais recentes, do mais antigo ao mais novo.
    pub finished: Vec<Job<P>>,
}

pub struct Ledger<P, R> {
    pub(super) max_concurrent: usize,
    pub(super) pending: VecDeque<PendingJob<P, R>>,
    pub(super) active: HashMap<JobId, Job<P>>,
    pub(super) history: VecDeque<Job<P>>,
    pub(super) history_limit: usize,
    pub(super) generation: u64,
    pub(super) totals: QueueTotals,
}

impl<P: Clone, R> Ledger<P, R> {
    pub fn new(max_concurrent: usize, history_limit: usize) -> Result<Self, DispatchError> {
        validate_limit(max_concurrent)?;
        Ok(Self {
            max_concurrent,
            pending: VecDeque::new(),
            active: HashMap::new(),
            history: VecDeque::new(),
            history_limit,
            generation: 0,
            totals: QueueTotals::default(),
        })
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            active: self.active.len(),
            queued: self.pending.len(),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn totals(&self) -> QueueTotals {
        self.totals
    }

    /// Registra um novo job pendente no fim do backlog.
    pub fn submit(
        &mut self,
        payload: P,
        handler: BoxedHandler<P, R>,
        outbox: &mut Vec<QueueEvent<P, R>>,
    ) -> JobId {
        let job = Job::new(payload);
        let id = job.id;
        let enqueued_at = job.enqueued_at;
        let payload = job.payload.clone();

        self.pending.push_back(PendingJob { job, handler });
        self.totals.submitted += 1;

        outbox.push(QueueEvent::Submitted(Submitted {
            id,
            payload,
            enqueued_at,
            status: self.status(),
        }));
        id
    }

    /// Aplica o resultado de um handler a um job ativo.
    ///
    /// Retorna `false` quando o resultado está obsoleto: pertence a uma
    /// geração que um reset já esqueceu, ou a um id que o ledger não
    /// acompanha mais. Resultados obsoletos não alteram nada.
    pub fn settle(
        &mut self,
        id: JobId,
        generation: u64,
        outcome: Result<R, FailureKind>,
        at: DateTime<Utc>,
        outbox: &mut Vec<QueueEvent<P, R>>,
    ) -> bool {
        if generation != self.generation {
            return false;
        }
        let Some(mut job) = self.active.remove(&id) else {
            return false;
        };

        let transition = match outcome {
            Ok(result) => job.complete(at).map(|()| Ok(result)),
            Err(failure) => job.fail(at, failure.clone()).map(|()| Err(failure)),
        };
        let outcome = match transition {
            Ok(outcome) => outcome,
            Err(err) => {
                // Só jobs ativos vivem em `active`; não deveria acontecer.
                tracing::error!(job_id = %id, error = %err, "dropping settlement");
                return false;
            }
        };

        let duration_ms = job.duration_ms().unwrap_or_default();
        let payload = job.payload.clone();
        let status = self.status();
        let event = match outcome {
            Ok(result) => {
                self.totals.completed += 1;
                QueueEvent::Completed(Completed {
                    id,
                    payload,
                    result,
                    completed_at: at,
                    duration_ms,
                    status,
                })
            }
            Err(error) => {
                self.totals.failed += 1;
                QueueEvent::Failed(Failed {
                    id,
                    payload,
                    error,
                    completed_at: at,
                    duration_ms,
                    status,
                })
            }
        };
        outbox.push(event);
        self.remember(job);
        true
    }

    /// Esquece o backlog, o conjunto ativo e o histórico, e inicia uma nova
    /// geração. Os handlers do backlog são descartados sem rodar.
    pub fn reset(&mut self) -> ResetSummary {
        let summary = ResetSummary {
            discarded_pending: self.pending.len(),
            forgotten_active: self.active.len(),
        };
        self.pending.clear();
        self.active.clear();
        self.history.clear();
        self.totals = QueueTotals::default();
        self.generation += 1;
        summary
    }

    /// Remove do backlog um job ainda pendente, descartando o handler sem
    /// rodá-lo. Retorna `false` se o job já foi admitido, terminou ou não
    /// existe.
    pub fn cancel(&mut self, id: JobId) -> bool {
        let Some(index) = self.pending.iter().position(|p| p.job.id == id) else {
            return false;
        };
        self.pending.remove(index);
        self.totals.cancelled += 1;
        true
    }

    pub fn set_max_concurrent(&mut self, limit: usize) -> Result<(), DispatchError> {
        validate_limit(limit)?;
        self.max_concurrent = limit;
        Ok(())
    }

    pub fn state_of(&self, id: JobId) -> Option<JobState> {
        if self.active.contains_key(&id) {
            return Some(JobState::Active);
        }
        if self.pending.iter().any(|p| p.job.id == id) {
            return Some(JobState::Pending);
        }
        self.history.iter().find(|j| j.id == id).map(|j| j.state)
    }

    pub fn snapshot(&self) -> QueueSnapshot<P> {
        let mut active: Vec<Job<P>> = self.active.values().cloned().collect();
        active.sort_by_key(|j| (j.started_at, j.enqueued_at));

        QueueSnapshot {
            status: self.status(),
            max_concurrent: self.max_concurrent,
            totals: self.totals,
            queued: self.pending.iter().map(|p| p.job.clone()).collect(),
            active,
            finished: self.history.iter().cloned().collect(),
        }
    }

    fn remember(&mut self, job: Job<P>) {
        if self.history_limit == 0 {
            return;
        }
        while self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(job);
    }
}

fn validate_limit(limit: usize) -> Result<(), DispatchError> {
    if limit == 0 {
        return Err(DispatchError::InvalidConcurrencyLimit(limit));
    }
    Ok(())
}
