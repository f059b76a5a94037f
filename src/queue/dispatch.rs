use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::events::{EventBus, EventKind, QueueEvent, QueueStatus, Subscriber, SubscriptionId};
use super::executor;
use super::job::{FailureKind, JobContext, JobId, JobState};
use super::ledger::{Dispatch, Ledger, QueueSnapshot, ResetSummary};
use crate::error::DispatchError;

/// Teto padrão de jobs ativos simultâneos.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Quantidade padrão de jobs finalizados mantidos para [`DispatchQueue::snapshot`].
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Configuração da fila no momento da criação.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Teto inicial de concorrência. Precisa ser pelo menos 1.
    pub max_concurrent: usize,
    /// Quantos jobs finalizados lembrar.
    pub history_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

// Eventos aguardando entrega, na ordem das transições.
struct Outbox<P, R> {
    events: VecDeque<QueueEvent<P, R>>,
    draining: bool,
}

pub(super) struct Shared<P, R> {
    ledger: Mutex<Ledger<P, R>>,
    outbox: Mutex<Outbox<P, R>>,
    bus: RwLock<EventBus<P, R>>,
    pub(super) runtime: Handle,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<P, R> Shared<P, R>
where
    P: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    /// Move os eventos recém-produzidos para o outbox. Quem chama segura o
    /// lock do ledger enquanto isso, o que fixa a ordem de entrega.
    fn enqueue(&self, events: Vec<QueueEvent<P, R>>) {
        if events.is_empty() {
            return;
        }
        lock(&self.outbox).events.extend(events);
    }

    /// Entrega os eventos enfileirados aos assinantes sem segurar o lock do
    /// ledger.
    ///
    /// Só uma thread drena por vez. Quem chega durante uma drenagem deixa
    /// seus eventos para quem já está drenando, então os assinantes sempre
    /// observam uma única ordem global.
    fn flush(&self) {
        {
            let mut outbox = lock(&self.outbox);
            if outbox.draining || outbox.events.is_empty() {
                return;
            }
            outbox.draining = true;
        }

        let mut closed_channels = false;
        loop {
            let event = {
                let mut outbox = lock(&self.outbox);
                match outbox.events.pop_front() {
                    Some(event) => event,
                    None => {
                        outbox.draining = false;
                        break;
                    }
                }
            };
            let bus = self
                .bus
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            bus.emit(&event);
            closed_channels |= bus.has_closed_channels();
        }

        if closed_channels {
            let pruned = self
                .bus
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .prune();
            tracing::debug!(pruned, "dropped closed event channels");
        }
    }

    fn launch(self: &Arc<Self>, dispatches: Vec<Dispatch<P, R>>) {
        for dispatch in dispatches {
            executor::spawn(self, dispatch);
        }
    }

    /// Registra o resultado de um handler e preenche o slot liberado.
    pub(super) fn settle(self: &Arc<Self>, id: JobId, generation: u64, outcome: Result<R, FailureKind>) {
        let dispatches = {
            let mut ledger = lock(&self.ledger);
            let mut events = Vec::new();
            if !ledger.settle(id, generation, outcome, Utc::now(), &mut events) {
                tracing::debug!(
                    job_id = %id,
                    generation,
                    current_generation = ledger.generation(),
                    "discarding stale settlement"
                );
                return;
            }
            let dispatches = ledger.admit(&mut events);
            let status = ledger.status();
            tracing::debug!(
                job_id = %id,
                active = status.active,
                queued = status.queued,
                "job settled"
            );
            self.enqueue(events);
            dispatches
        };
        self.flush();
        self.launch(dispatches);
    }
}

/// Fila de despacho com concorrência limitada.
///
/// Jobs são admitidos estritamente na ordem de submissão enquanto houver
/// menos de `max_concurrent` ativos. Cada handler admitido roda como uma task
/// própria no runtime tokio em que a fila foi criada. Clonar a fila devolve
/// outro handle para o mesmo ledger.
pub struct DispatchQueue<P, R> {
    shared: Arc<Shared<P, R>>,
}

impl<P, R> Clone for DispatchQueue<P, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P, R> DispatchQueue<P, R>
where
    P: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    /// Cria uma fila com o teto informado. Precisa ser chamada de dentro de
    /// um runtime tokio.
    pub fn new(max_concurrent: usize) -> Result<Self, DispatchError> {
        Self::with_config(QueueConfig {
            max_concurrent,
            ..QueueConfig::default()
        })
    }

    pub fn with_config(config: QueueConfig) -> Result<Self, DispatchError> {
        let runtime = Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;
        let ledger = Ledger::new(config.max_concurrent, config.history_limit)?;
        Ok(Self {
            shared: Arc::new(Shared {
                ledger: Mutex::new(ledger),
                outbox: Mutex::new(Outbox {
                    events: VecDeque::new(),
                    draining: false,
                }),
                bus: RwLock::new(EventBus::new()),
                runtime,
            }),
        })
    }

    /// Submete um job e devolve o id imediatamente. O job pode ou não ter
    /// começado quando isto retorna.
    ///
    /// `handler` é chamado no máximo uma vez, quando o job é admitido. Nunca
    /// é chamado se o job for descartado antes por [`reset`](Self::reset) ou
    /// [`cancel`](Self::cancel).
    pub fn add<F, Fut>(&self, payload: P, handler: F) -> JobId
    where
        F: FnOnce(JobContext<P>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let (id, dispatches) = {
            let mut ledger = lock(&self.shared.ledger);
            let mut events = Vec::new();
            let id = ledger.submit(
                payload,
                Box::new(move |ctx| handler(ctx).boxed()),
                &mut events,
            );
            let dispatches = ledger.admit(&mut events);
            let status = ledger.status();
            tracing::debug!(
                job_id = %id,
                active = status.active,
                queued = status.queued,
                max_concurrent = ledger.max_concurrent(),
                "job submitted"
            );
            self.shared.enqueue(events);
            (id, dispatches)
        };
        self.shared.flush();
        self.shared.launch(dispatches);
        id
    }

    /// Registra um callback para um tipo de evento.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&QueueEvent<P, R>) + Send + Sync + 'static,
    {
        self.bus_mut().on(kind, callback)
    }

    /// Registra um assinante para todos os tipos de evento.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber<P, R>>) -> SubscriptionId {
        self.bus_mut().subscribe(subscriber)
    }

    /// Cancela um registro feito com [`on`](Self::on) ou
    /// [`subscribe`](Self::subscribe). Uma entrega já em andamento ainda pode
    /// alcançá-lo; as seguintes não.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.bus_mut().off(id)
    }

    /// Assinantes vivos, sem contar canais cujo receiver foi descartado.
    pub fn subscriber_count(&self) -> usize {
        let mut bus = self.bus_mut();
        bus.prune();
        bus.len()
    }

    /// Devolve um canal que recebe todos os eventos a partir de agora.
    /// Descartar o receiver cancela a assinatura.
    pub fn events(&self) -> mpsc::UnboundedReceiver<QueueEvent<P, R>> {
        self.bus_mut().channel()
    }

    pub fn status(&self) -> QueueStatus {
        lock(&self.shared.ledger).status()
    }

    pub fn snapshot(&self) -> QueueSnapshot<P> {
        lock(&self.shared.ledger).snapshot()
    }

    /// Estado atual de um job, ou `None` depois que um reset ou cancelamento
    /// o esqueceu.
    pub fn state_of(&self, id: JobId) -> Option<JobState> {
        lock(&self.shared.ledger).state_of(id)
    }

    /// Descarta o backlog e esquece o conjunto ativo.
    ///
    /// Handlers já rodando não são abortados. O resultado deles pertence a
    /// uma geração antiga e é descartado sem emitir eventos nem liberar
    /// capacidade.
    pub fn reset(&self) -> ResetSummary {
        let summary = lock(&self.shared.ledger).reset();
        tracing::info!(
            discarded_pending = summary.discarded_pending,
            forgotten_active = summary.forgotten_active,
            "queue reset"
        );
        summary
    }

    /// Remove do backlog um job ainda pendente. O handler nunca roda e
    /// nenhum evento segue o `submitted` dele. Jobs ativos, finalizados ou
    /// desconhecidos devolvem `false`; jobs em execução não são interrompidos.
    pub fn cancel(&self, id: JobId) -> bool {
        let cancelled = lock(&self.shared.ledger).cancel(id);
        if cancelled {
            tracing::info!(job_id = %id, "pending job cancelled");
        } else {
            tracing::debug!(job_id = %id, "cancel ignored, job is not pending");
        }
        cancelled
    }

    /// Muda o teto para admissões futuras e admite na hora se a capacidade
    /// aumentou. Jobs ativos nunca são interrompidos.
    pub fn set_concurrency_limit(&self, limit: usize) -> Result<(), DispatchError> {
        let dispatches = {
            let mut ledger = lock(&self.shared.ledger);
            let previous = ledger.max_concurrent();
            ledger.set_max_concurrent(limit)?;
            let mut events = Vec::new();
            let dispatches = ledger.admit(&mut events);
            tracing::info!(previous, limit, active = ledger.status().active, "concurrency limit changed");
            self.shared.enqueue(events);
            dispatches
        };
        self.shared.flush();
        self.shared.launch(dispatches);
        Ok(())
    }

    pub fn concurrency_limit(&self) -> usize {
        lock(&self.shared.ledger).max_concurrent()
    }

    fn bus_mut(&self) -> std::sync::RwLockWriteGuard<'_, EventBus<P, R>> {
        self.shared
            .bus
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::sleep;

    type Queue = DispatchQueue<&'static str, u32>;

    #[test]
    fn new_outside_runtime_fails() {
        assert!(matches!(Queue::new(2), Err(DispatchError::NoRuntime)));
    }

    #[tokio::test]
    async fn zero_limit_rejected() {
        assert!(matches!(
            Queue::new(0),
            Err(DispatchError::InvalidConcurrencyLimit(0))
        ));
        let queue = Queue::new(2).unwrap();
        assert!(queue.set_concurrency_limit(0).is_err());
        assert_eq!(queue.concurrency_limit(), 2);
    }

    #[tokio::test]
    async fn started_is_emitted_before_add_returns() {
        let queue = Queue::new(1).unwrap();
        let mut events = queue.events();

        let id = queue.add("a", |_| async { Ok(1) });

        let submitted = events.try_recv().unwrap();
        assert_eq!(submitted.kind(), EventKind::Submitted);
        assert_eq!(submitted.id(), id);
        let started = events.try_recv().unwrap();
        assert_eq!(started.kind(), EventKind::Started);
        assert_eq!(started.status(), QueueStatus { active: 1, queued: 0 });
        assert_eq!(queue.state_of(id), Some(JobState::Active));
    }

    #[tokio::test]
    async fn completed_event_carries_result_and_duration() {
        let queue = Queue::new(1).unwrap();
        let mut events = queue.events();
        queue.add("payload", |ctx| async move {
            assert_eq!(ctx.payload, "payload");
            Ok(99)
        });

        let done = loop {
            match events.recv().await.unwrap() {
                QueueEvent::Completed(done) => break done,
                QueueEvent::Failed(failed) => panic!("unexpected failure: {}", failed.error),
                _ => {}
            }
        };
        assert_eq!(done.result, 99);
        assert_eq!(done.payload, "payload");
        assert!(done.duration_ms >= 0);
        assert_eq!(done.status, QueueStatus::default());
    }

    #[tokio::test]
    async fn rejected_handler_fails_only_its_job() {
        let queue = Queue::new(2).unwrap();
        let mut events = queue.events();
        queue.add("bad", |_| async { bail!("HTTP error! status: 500") });
        queue.add("good", |_| async { Ok(1) });

        let mut outcomes = Vec::new();
        while outcomes.len() < 2 {
            match events.recv().await.unwrap() {
                QueueEvent::Completed(e) => outcomes.push((e.payload, "completed".to_string())),
                QueueEvent::Failed(e) => outcomes.push((e.payload, e.error.to_string())),
                _ => {}
            }
        }
        outcomes.sort();
        assert_eq!(
            outcomes,
            vec![
                ("bad", "Handler error: HTTP error! status: 500".to_string()),
                ("good", "completed".to_string()),
            ]
        );
        assert_eq!(queue.status(), QueueStatus::default());
    }

    #[tokio::test]
    async fn callbacks_see_only_their_kind() {
        let queue = Queue::new(1).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        queue.on(EventKind::Started, move |e| sink.lock().unwrap().push(*e.payload()));
        let mut events = queue.events();

        queue.add("x", |_| async { Ok(0) });
        queue.add("y", |_| async { Ok(0) });

        let mut terminal = 0;
        while terminal < 2 {
            if matches!(events.recv().await.unwrap(), QueueEvent::Completed(_)) {
                terminal += 1;
            }
        }
        assert_eq!(*seen.lock().unwrap(), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn subscriber_can_read_status_during_callback() {
        let queue = Queue::new(1).unwrap();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let reader = queue.clone();
        let sink = observed.clone();
        queue.on(EventKind::Submitted, move |_| {
            sink.lock().unwrap().push(reader.status());
        });

        queue.add("a", |_| async { Ok(0) });

        // A admissão já aconteceu quando a entrega roda.
        assert_eq!(
            *observed.lock().unwrap(),
            vec![QueueStatus { active: 1, queued: 0 }]
        );
    }

    #[tokio::test]
    async fn raising_the_limit_promotes_backlog() {
        let queue = Queue::new(1).unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        queue.add("blocker", |_| async move {
            let _ = release_rx.await;
            Ok(0)
        });
        queue.add("waiting", |_| async {
            sleep(Duration::from_secs(3600)).await;
            Ok(0)
        });
        assert_eq!(queue.status(), QueueStatus { active: 1, queued: 1 });

        queue.set_concurrency_limit(2).unwrap();
        assert_eq!(queue.status(), QueueStatus { active: 2, queued: 0 });
        drop(release_tx);
    }

    #[tokio::test]
    async fn snapshot_tracks_finished_jobs() {
        let queue = Queue::new(2).unwrap();
        let mut events = queue.events();
        queue.add("ok", |_| async { Ok(1) });
        queue.add("err", |_| async { bail!("nope") });

        let mut terminal = 0;
        while terminal < 2 {
            match events.recv().await.unwrap() {
                QueueEvent::Completed(_) | QueueEvent::Failed(_) => terminal += 1,
                _ => {}
            }
        }

        let snap = queue.snapshot();
        assert_eq!(snap.finished.len(), 2);
        assert_eq!(snap.totals.completed, 1);
        assert_eq!(snap.totals.failed, 1);
        let failed = snap
            .finished
            .iter()
            .find(|j| j.payload == "err")
            .unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.failure, Some(FailureKind::Rejected("nope".into())));
    }

    #[tokio::test]
    async fn cancel_drops_a_pending_job_without_running_it() {
        let queue = Queue::new(1).unwrap();
        let mut events = queue.events();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let ran = Arc::new(Mutex::new(Vec::new()));

        let blocker = queue.add("blocker", |_| async move {
            let _ = release_rx.await;
            Ok(0)
        });
        let victim = {
            let ran = ran.clone();
            queue.add("victim", move |_| async move {
                ran.lock().unwrap().push("victim");
                Ok(1)
            })
        };
        let next = {
            let ran = ran.clone();
            queue.add("next", move |_| async move {
                ran.lock().unwrap().push("next");
                Ok(2)
            })
        };

        assert!(!queue.cancel(blocker));
        assert!(queue.cancel(victim));
        assert!(!queue.cancel(victim));
        assert_eq!(queue.state_of(victim), None);
        assert_eq!(queue.status(), QueueStatus { active: 1, queued: 1 });

        drop(release_tx);
        let mut seen = Vec::new();
        let mut terminal = 0;
        while terminal < 2 {
            let event = events.recv().await.unwrap();
            if matches!(event, QueueEvent::Completed(_) | QueueEvent::Failed(_)) {
                terminal += 1;
            }
            seen.push((*event.payload(), event.kind()));
        }

        assert_eq!(*ran.lock().unwrap(), vec!["next"]);
        let victim_events: Vec<_> = seen.iter().filter(|(p, _)| *p == "victim").collect();
        assert_eq!(victim_events, vec![&("victim", EventKind::Submitted)]);
        assert_eq!(queue.state_of(next), Some(JobState::Completed));
        let totals = queue.snapshot().totals;
        assert_eq!(totals.cancelled, 1);
        assert_eq!(totals.completed, 2);
    }

    #[tokio::test]
    async fn off_stops_delivery_to_that_callback() {
        let queue = Queue::new(1).unwrap();
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        let token = queue.on(EventKind::Submitted, move |_| *counter.lock().unwrap() += 1);

        queue.add("counted", |_| async { Ok(0) });
        assert!(queue.off(token));
        assert!(!queue.off(token));
        queue.add("ignored", |_| async { Ok(0) });

        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn dropped_event_receivers_do_not_accumulate() {
        let queue = Queue::new(1).unwrap();
        let mut events = queue.events();
        for _ in 0..1000 {
            drop(queue.events());
        }

        queue.add("job", |_| async { Ok(0) });
        loop {
            if let QueueEvent::Completed(_) = events.recv().await.unwrap() {
                break;
            }
        }

        assert_eq!(queue.subscriber_count(), 1);
        drop(events);
        assert_eq!(queue.subscriber_count(), 0);
    }
}
