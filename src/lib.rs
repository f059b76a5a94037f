//! Despacho de requisições com concorrência limitada e eventos de ciclo de
//! vida, mais o harness que envia lotes de frases por ele até um webhook.

pub mod config;
pub mod error;
pub mod harness;
pub mod queue;
pub mod stats;
pub mod ui;
pub mod webhook;

pub use error::DispatchError;
pub use queue::{
    DispatchQueue, EventKind, JobContext, JobId, QueueEvent, QueueStatus, SubscriptionId,
};
