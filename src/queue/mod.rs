//! Fila de despacho com concorrência limitada.
//!
//! [`DispatchQueue`] é o ponto de entrada. O [`Ledger`] é dono do estado dos
//! jobs e, via [`Ledger::admit`], decide quais jobs pendentes podem começar.
//! Handlers admitidos rodam no executor, e cada transição é publicada no
//! [`EventBus`].

mod admission;
mod dispatch;
mod events;
mod executor;
mod job;
mod ledger;

pub use dispatch::{DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_CONCURRENT, DispatchQueue, QueueConfig};
pub use events::{
    Completed, EventBus, EventKind, Failed, QueueEvent, QueueStatus, Started, Submitted,
    Subscriber, SubscriptionId,
};
pub use job::{FailureKind, Job, JobContext, JobId, JobState};
pub use ledger::{BoxedHandler, Dispatch, Ledger, QueueSnapshot, QueueTotals, ResetSummary};
