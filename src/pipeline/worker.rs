//! Handle to a spawned stage task with a one-shot stop signal.

use std::future::Future;

use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};

/// A running stage task.
///
/// The task receives the stop signal as a `oneshot::Receiver<()>`. The
/// receiver also resolves if the `Worker` is dropped, so an abandoned stage
/// winds down on its own. The task's output (usually the plugin it borrowed)
/// is handed back by [`Worker::stop`].
pub(crate) struct Worker<T> {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> Worker<T> {
    /// Spawn `task` on the current runtime.
    pub(crate) fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(task(stop_rx));
        Self { stop_tx, handle }
    }

    /// Signal the task and wait until it has exited.
    pub(crate) async fn stop(self) -> Result<T, JoinError> {
        // The task may already have exited on its own.
        let _ = self.stop_tx.send(());
        self.handle.await
    }
}

/// Lifecycle of a stage that owns a plugin `P`.
pub(crate) enum StageState<P, T = P> {
    /// Constructed, plugin not yet opened.
    Idle(P),
    /// Plugin opened and moved into the worker.
    Running(Worker<T>),
    /// Worker exited and plugin closed.
    Stopped,
}

impl<P, T> StageState<P, T> {
    pub(crate) fn is_running(&self) -> bool {
        matches!(self, Self::Running(_))
    }
}
