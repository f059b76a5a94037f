//! Eventos tipados do ciclo de vida e o barramento que os distribui.
//!
//! Assinantes só enxergam eventos por referência. Eles nunca recebem acesso
//! ao ledger, então nada que façam alcança a contabilidade dos jobs.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use super::job::{FailureKind, JobId};

/// Contadores instantâneos da fila.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    /// Jobs ocupando um slot.
    pub active: usize,
    /// Jobs esperando no backlog.
    pub queued: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Submitted,
    Started,
    Completed,
    Failed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Submitted => write!(f, "submitted"),
            EventKind::Started => write!(f, "started"),
            EventKind::Completed => write!(f, "completed"),
            EventKind::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Submitted<P> {
    pub id: JobId,
    pub payload: P,
    pub enqueued_at: DateTime<Utc>,
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct Started<P> {
    pub id: JobId,
    pub payload: P,
    pub started_at: DateTime<Utc>,
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct Completed<P, R> {
    pub id: JobId,
    pub payload: P,
    pub result: R,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct Failed<P> {
    pub id: JobId,
    pub payload: P,
    pub error: FailureKind,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub status: QueueStatus,
}

/// Uma notificação do ciclo de vida. `status` é o estado da fila logo após a
/// transição que produziu o evento.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum QueueEvent<P, R> {
    Submitted(Submitted<P>),
    Started(Started<P>),
    Completed(Completed<P, R>),
    Failed(Failed<P>),
}

impl<P, R> QueueEvent<P, R> {
    pub fn kind(&self) -> EventKind {
        match self {
            QueueEvent::Submitted(_) => EventKind::Submitted,
            QueueEvent::Started(_) => EventKind::Started,
            QueueEvent::Completed(_) => EventKind::Completed,
            QueueEvent::Failed(_) => EventKind::Failed,
        }
    }

    pub fn id(&self) -> JobId {
        match self {
            QueueEvent::Submitted(e) => e.id,
            QueueEvent::Started(e) => e.id,
            QueueEvent::Completed(e) => e.id,
            QueueEvent::Failed(e) => e.id,
        }
    }

    pub fn payload(&self) -> &P {
        match self {
            QueueEvent::Submitted(e) => &e.payload,
            QueueEvent::Started(e) => &e.payload,
            QueueEvent::Completed(e) => &e.payload,
            QueueEvent::Failed(e) => &e.payload,
        }
    }

    pub fn status(&self) -> QueueStatus {
        match self {
            QueueEvent::Submitted(e) => e.status,
            QueueEvent::Started(e) => e.status,
            QueueEvent::Completed(e) => e.status,
            QueueEvent::Failed(e) => e.status,
        }
    }
}

/// Recebe eventos do ciclo de vida. Todo método é um no-op por padrão, então
/// implementações sobrescrevem só o que interessa.
///
/// Callbacks rodam de forma síncrona na thread que causou a transição. Podem
/// ler a fila (`status`, `snapshot`), mas não devem submeter, resetar nem
/// reconfigurá-la de dentro de um callback.
pub trait Subscriber<P, R>: Send + Sync {
    fn on_submitted(&self, _event: &Submitted<P>) {}

    fn on_started(&self, _event: &Started<P>) {}

    fn on_completed(&self, _event: &Completed<P, R>) {}

    fn on_failed(&self, _event: &Failed<P>) {}

    /// Encaminha o evento para o método `on_*` correspondente.
    fn handle(&self, event: &QueueEvent<P, R>) {
        match event {
            QueueEvent::Submitted(e) => self.on_submitted(e),
            QueueEvent::Started(e) => self.on_started(e),
            QueueEvent::Completed(e) => self.on_completed(e),
            QueueEvent::Failed(e) => self.on_failed(e),
        }
    }
}

// Closure registrada para um único tipo de evento.
struct Callback<F> {
    kind: EventKind,
    f: F,
}

impl<P, R, F> Subscriber<P, R> for Callback<F>
where
    F: Fn(&QueueEvent<P, R>) + Send + Sync,
{
    fn handle(&self, event: &QueueEvent<P, R>) {
        if event.kind() == self.kind {
            (self.f)(event);
        }
    }
}

/// Token devolvido por [`EventBus::subscribe`] e [`EventBus::on`], usado
/// para cancelar o registro com [`EventBus::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

enum Sink<P, R> {
    Subscriber(Arc<dyn Subscriber<P, R>>),
    Channel(mpsc::UnboundedSender<QueueEvent<P, R>>),
}

impl<P, R> Clone for Sink<P, R> {
    fn clone(&self) -> Self {
        match self {
            Sink::Subscriber(s) => Sink::Subscriber(Arc::clone(s)),
            Sink::Channel(tx) => Sink::Channel(tx.clone()),
        }
    }
}

impl<P, R> Sink<P, R> {
    // Canal cujo receiver já foi descartado.
    fn is_closed(&self) -> bool {
        match self {
            Sink::Subscriber(_) => false,
            Sink::Channel(tx) => tx.is_closed(),
        }
    }
}

struct Registration<P, R> {
    id: SubscriptionId,
    sink: Sink<P, R>,
}

impl<P, R> Clone for Registration<P, R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            sink: self.sink.clone(),
        }
    }
}

/// Distribuição ordenada para os assinantes registrados.
pub struct EventBus<P, R> {
    registrations: Vec<Registration<P, R>>,
    next_id: u64,
}

impl<P, R> Default for EventBus<P, R> {
    fn default() -> Self {
        Self {
            registrations: Vec::new(),
            next_id: 0,
        }
    }
}

impl<P, R> Clone for EventBus<P, R> {
    fn clone(&self) -> Self {
        Self {
            registrations: self.registrations.clone(),
            next_id: self.next_id,
        }
    }
}

impl<P, R> EventBus<P, R>
where
    P: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber<P, R>>) -> SubscriptionId {
        self.register(Sink::Subscriber(subscriber))
    }

    pub fn on<F>(&mut self, kind: EventKind, f: F) -> SubscriptionId
    where
        F: Fn(&QueueEvent<P, R>) + Send + Sync + 'static,
    {
        self.register(Sink::Subscriber(Arc::new(Callback { kind, f })))
    }

    /// Canal que recebe todos os eventos a partir de agora. Descartar o
    /// receiver cancela o registro.
    pub fn channel(&mut self) -> mpsc::UnboundedReceiver<QueueEvent<P, R>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(Sink::Channel(tx));
        rx
    }

    /// Remove um registro. Retorna `false` se o token já não estava ativo.
    pub fn off(&mut self, id: SubscriptionId) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.id != id);
        let removed = self.registrations.len() < before;
        self.prune();
        removed
    }

    /// Descarta canais cujo receiver não existe mais. Retorna quantos saíram.
    pub fn prune(&mut self) -> usize {
        let before = self.registrations.len();
        self.registrations.retain(|r| !r.sink.is_closed());
        before - self.registrations.len()
    }

    /// Se algum canal registrado já perdeu o receiver.
    pub fn has_closed_channels(&self) -> bool {
        self.registrations.iter().any(|r| r.sink.is_closed())
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    fn register(&mut self, sink: Sink<P, R>) -> SubscriptionId {
        self.prune();
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.registrations.push(Registration { id, sink });
        id
    }

    /// Entrega `event` a cada assinante na ordem de registro.
    ///
    /// Um assinante que entra em pânico é logado e ignorado; os demais ainda
    /// rodam. Canais fechados são pulados sem clonar o evento.
    pub fn emit(&self, event: &QueueEvent<P, R>) {
        for registration in &self.registrations {
            match &registration.sink {
                Sink::Channel(tx) => {
                    if !tx.is_closed() {
                        // O receiver pode sumir entre a checagem e o envio.
                        let _ = tx.send(event.clone());
                    }
                }
                Sink::Subscriber(subscriber) => {
                    if catch_unwind(AssertUnwindSafe(|| subscriber.handle(event))).is_err() {
                        tracing::warn!(
                            job_id = %event.id(),
                            event = %event.kind(),
                            "subscriber panicked while handling event"
                        );
                    }
                }
            }
        }
    }
}
