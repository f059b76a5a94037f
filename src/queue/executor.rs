//! Executa o handler de um job admitido e reporta o resultado ao ledger.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use super::dispatch::Shared;
use super::job::{FailureKind, JobContext};
use super::ledger::{BoxedHandler, Dispatch};

/// Dispara o handler no runtime da fila. Quando ele termina, o ledger é
/// atualizado e a admissão roda de novo.
pub(super) fn spawn<P, R>(shared: &Arc<Shared<P, R>>, dispatch: Dispatch<P, R>)
where
    P: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    let Dispatch {
        context,
        handler,
        generation,
    } = dispatch;
    let id = context.id;
    let task_shared = Arc::clone(shared);

    shared.runtime.spawn(async move {
        let outcome = execute(context, handler).await;
        if let Err(failure) = &outcome {
            tracing::debug!(job_id = %id, error = %failure, "handler failed");
        }
        task_shared.settle(id, generation, outcome);
    });
}

/// Invoca o handler exatamente uma vez. Erros e pânicos, inclusive um pânico
/// antes de o handler devolver a future, viram um [`FailureKind`].
pub(super) async fn execute<P, R>(
    context: JobContext<P>,
    handler: BoxedHandler<P, R>,
) -> Result<R, FailureKind> {
    let outcome = AssertUnwindSafe(async move { handler(context).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(FailureKind::Rejected(format!("{err:#}"))),
        Err(panic) => Err(FailureKind::Panicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
