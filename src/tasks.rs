use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::AppResult;

type TaskFuture = Pin<Box<dyn Future<Output = AppResult<()>> + Send + 'static>>;

/// Unit of best-effort background work
pub struct BackgroundTask {
    name: &'static str,
    future: TaskFuture,
}

impl BackgroundTask {
    pub fn new<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = AppResult<()>> + Send + 'static,
    {
        Self {
            name,
            future: Box::pin(future),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runs the task, logging instead of propagating failure
    async fn execute(self) -> bool {
        let name = self.name;
        match tokio::spawn(self.future).await {
            Ok(Ok(())) => {
                tracing::debug!(task = name, "Background task finished");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(task = name, error = %e, "Background task failed");
                false
            }
            Err(e) => {
                tracing::error!(task = name, error = %e, "Background task panicked");
                false
            }
        }
    }
}

/// Executes fire-and-forget work off the request path
///
/// `submit` never waits for the task itself and never reports its outcome.
#[async_trait::async_trait]
pub trait TaskPool: Send + Sync {
    async fn submit(&self, task: BackgroundTask);
}

/// Fixed set of tokio workers draining a bounded queue
#[derive(Clone)]
pub struct WorkerPool {
    queue_tx: mpsc::Sender<BackgroundTask>,
}

/// Handle for gracefully shutting down the worker pool
pub struct WorkerPoolHandle {
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    /// Stops accepting work, lets the workers drain the queue, and waits for them
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker join error");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

impl WorkerPool {
    /// Spawns `workers` tasks sharing a queue of `capacity` pending jobs
    pub fn new(workers: usize, capacity: usize) -> (Self, WorkerPoolHandle) {
        let (queue_tx, queue_rx) = mpsc::channel(capacity.max(1));
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let shutdown = CancellationToken::new();

        let workers = (0..workers.max(1))
            .map(|worker_id| {
                let queue_rx = Arc::clone(&queue_rx);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    Self::worker_loop(worker_id, queue_rx, shutdown).await;
                })
            })
            .collect();

        tracing::info!(capacity, "Worker pool started");

        (Self { queue_tx }, WorkerPoolHandle { shutdown, workers })
    }

    async fn worker_loop(
        worker_id: usize,
        queue_rx: Arc<Mutex<mpsc::Receiver<BackgroundTask>>>,
        shutdown: CancellationToken,
    ) {
        loop {
            let next = {
                let mut rx = queue_rx.lock().await;
                tokio::select! {
                    task = rx.recv() => task,
                    _ = shutdown.cancelled() => {
                        // Drain whatever is already queued, then exit
                        rx.try_recv().ok()
                    }
                }
            };

            match next {
                Some(task) => {
                    task.execute().await;
                }
                None => break,
            }
        }
        tracing::debug!(worker_id, "Worker stopped");
    }
}

#[async_trait::async_trait]
impl TaskPool for WorkerPool {
    async fn submit(&self, task: BackgroundTask) {
        let name = task.name();
        if let Err(e) = self.queue_tx.try_send(task) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "pool closed",
            };
            tracing::warn!(task = name, reason, "Dropping background task");
        }
    }
}

/// Runs each task to completion inside `submit`; for tests
#[derive(Debug, Default)]
pub struct InlineTaskPool {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl InlineTaskPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TaskPool for InlineTaskPool {
    async fn submit(&self, task: BackgroundTask) {
        if task.execute().await {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
