//! Owning-thread executor.
//!
//! The host's mutable state may only be touched from one execution context.
//! The executor exposes a single ingress queue; a dedicated pump task owns the
//! state and runs each submitted task to completion before the next, in strict
//! FIFO order across all submitters. A panicking task is captured and
//! delivered as a failed completion; the pump itself never dies.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::OperationError;

/// A unit of work to run on the owning context.
pub type HostTask<S> = Box<dyn FnOnce(&mut S) -> Result<Value, OperationError> + Send>;

struct QueuedTask<S> {
    run: HostTask<S>,
    done: oneshot::Sender<Result<Value, OperationError>>,
}

/// Handle for submitting work to the owning context. Cheap to clone; safe to
/// use from any task or thread.
pub struct OwningExecutor<S> {
    ingress: mpsc::UnboundedSender<QueuedTask<S>>,
}

impl<S> Clone for OwningExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            ingress: self.ingress.clone(),
        }
    }
}

impl<S: Send + 'static> OwningExecutor<S> {
    /// Start the pump task that owns `state` and drains the ingress queue.
    pub fn spawn(mut state: S) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedTask<S>>();
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                let outcome = match catch_unwind(AssertUnwindSafe(|| (task.run)(&mut state))) {
                    Ok(result) => result,
                    Err(panic) => {
                        let detail = panic_message(panic.as_ref());
                        tracing::error!(detail = %detail, "Operation panicked on owning context");
                        Err(OperationError::internal(format!(
                            "operation panicked: {detail}"
                        )))
                    }
                };
                // A dropped receiver means nobody is waiting anymore; the
                // result is discarded, not retried.
                let _ = task.done.send(outcome);
            }
            tracing::debug!("Owning executor pump stopped");
        });
        Self { ingress: tx }
    }

    /// Queue a task; the returned channel resolves when the pump has run it.
    pub fn submit(&self, run: HostTask<S>) -> oneshot::Receiver<Result<Value, OperationError>> {
        let (done, completion) = oneshot::channel();
        if let Err(rejected) = self.ingress.send(QueuedTask { run, done }) {
            let QueuedTask { done, .. } = rejected.0;
            let _ = done.send(Err(OperationError::internal("owning executor stopped")));
        }
        completion
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
