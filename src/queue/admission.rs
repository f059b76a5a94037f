//! Controle de admissão: o único lugar onde um job pendente vira ativo.

use chrono::Utc;

use super::events::{QueueEvent, Started};
use super::job::JobContext;
use super::ledger::{Dispatch, Ledger};

impl<P: Clone, R> Ledger<P, R> {
    /// Promove jobs pendentes, do mais antigo ao mais novo, enquanto houver
    /// slot livre.
    ///
    /// Nunca mexe em jobs já ativos: baixar o limite abaixo da contagem
    /// ativa apenas suspende promoções até que terminem jobs suficientes.
    pub fn admit(&mut self, outbox: &mut Vec<QueueEvent<P, R>>) -> Vec<Dispatch<P, R>> {
        let mut dispatched = Vec::new();

        while self.active.len() < self.max_concurrent {
            let Some(pending) = self.pending.pop_front() else {
                break;
            };
            let mut job = pending.job;
            let started_at = Utc::now();
            if let Err(err) = job.start(started_at) {
                // Entradas do backlog são sempre pendentes; ignora o resto.
                tracing::error!(job_id = %job.id, error = %err, "refusing to admit job");
                continue;
            }

            let context = JobContext {
                id: job.id,
                payload: job.payload.clone(),
                enqueued_at: job.enqueued_at,
                started_at,
            };
            self.active.insert(job.id, job);

            tracing::debug!(
                job_id = %context.id,
                active = self.active.len(),
                queued = self.pending.len(),
                max_concurrent = self.max_concurrent,
                "admitted job"
            );

            outbox.push(QueueEvent::Started(Started {
                id: context.id,
                payload: context.payload.clone(),
                started_at,
                status: self.status(),
            }));
            dispatched.push(Dispatch {
                context,
                handler: pending.handler,
                generation: self.generation,
            });
        }

        dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::events::{EventKind, QueueStatus};
    use crate::queue::ledger::tests::noop_handler;

    #[test]
    fn admits_up_to_limit_in_fifo_order() {
        let mut ledger: Ledger<&'static str, u32> = Ledger::new(2, 10).unwrap();
        let mut outbox = Vec::new();
        for name in ["j1", "j2", "j3"] {
            ledger.submit(name, noop_handler(), &mut outbox);
        }

        let dispatched = ledger.admit(&mut outbox);
        let admitted: Vec<_> = dispatched.iter().map(|d| d.context.payload).collect();
        assert_eq!(admitted, vec!["j1", "j2"]);
        assert_eq!(ledger.status(), QueueStatus { active: 2, queued: 1 });

        let started: Vec<_> = outbox
            .iter()
            .filter(|e| e.kind() == EventKind::Started)
            .map(|e| *e.payload())
            .collect();
        assert_eq!(started, vec!["j1", "j2"]);
    }

    #[test]
    fn admit_is_idempotent_when_full() {
        let mut ledger: Ledger<&'static str, u32> = Ledger::new(1, 10).unwrap();
        let mut outbox = Vec::new();
        ledger.submit("a", noop_handler(), &mut outbox);
        ledger.submit("b", noop_handler(), &mut outbox);

        assert_eq!(ledger.admit(&mut outbox).len(), 1);
        assert!(ledger.admit(&mut outbox).is_empty());
        assert_eq!(ledger.status(), QueueStatus { active: 1, queued: 1 });
    }

    #[test]
    fn empty_backlog_admits_nothing() {
        let mut ledger: Ledger<&'static str, u32> = Ledger::new(3, 10).unwrap();
        let mut outbox = Vec::new();
        assert!(ledger.admit(&mut outbox).is_empty());
        assert!(outbox.is_empty());
    }

    #[test]
    fn lowering_limit_never_demotes() {
        let mut ledger: Ledger<&'static str, u32> = Ledger::new(5, 10).unwrap();
        let mut outbox = Vec::new();
        let ids: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|p| ledger.submit(p, noop_handler(), &mut outbox))
            .collect();
        ledger.admit(&mut outbox);
        assert_eq!(ledger.status().active, 4);

        ledger.set_max_concurrent(1).unwrap();
        let extra = ledger.submit("e", noop_handler(), &mut outbox);
        assert!(ledger.admit(&mut outbox).is_empty());
        assert_eq!(ledger.status(), QueueStatus { active: 4, queued: 1 });

        // Drain down to zero active; "e" may only start once the last one finishes.
        for id in &ids[..3] {
            ledger.settle(*id, 0, Ok(0), Utc::now(), &mut outbox);
            assert!(ledger.admit(&mut outbox).is_empty());
        }
        ledger.settle(ids[3], 0, Ok(0), Utc::now(), &mut outbox);
        let next = ledger.admit(&mut outbox);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].context.id, extra);
    }

    #[test]
    fn raising_limit_promotes_more() {
        let mut ledger: Ledger<&'static str, u32> = Ledger::new(1, 10).unwrap();
        let mut outbox = Vec::new();
        for name in ["a", "b", "c"] {
            ledger.submit(name, noop_handler(), &mut outbox);
        }
        ledger.admit(&mut outbox);

        ledger.set_max_concurrent(3).unwrap();
        let more: Vec<_> = ledger
            .admit(&mut outbox)
            .iter()
            .map(|d| d.context.payload)
            .collect();
        assert_eq!(more, vec!["b", "c"]);
    }

    #[test]
    fn dispatch_carries_current_generation() {
        let mut ledger: Ledger<&'static str, u32> = Ledger::new(1, 10).unwrap();
        let mut outbox = Vec::new();
        ledger.reset();
        ledger.reset();
        ledger.submit("a", noop_handler(), &mut outbox);
        let dispatched = ledger.admit(&mut outbox);
        assert_eq!(dispatched[0].generation, 2);
    }
}
