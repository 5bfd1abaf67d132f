//! Priority work queue with bounded concurrency.
//!
//! Tasks are admitted highest priority first (FIFO among equal priorities)
//! whenever a slot frees up. Running tasks are never preempted or cancelled;
//! only pending tasks can be discarded. A failed or panicking task still
//! counts as processed so a gallery-wide pass always completes.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("recognition queue must be created inside a tokio runtime")]
    NoRuntime,
}

/// Snapshot of queue counters for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub active: usize,
    pub processed: usize,
}

impl QueueStats {
    pub fn is_processing(&self) -> bool {
        self.active > 0 || self.pending > 0
    }
}

type TaskFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
type BoxedTask = Box<dyn FnOnce() -> TaskFuture + Send>;

struct PendingTask {
    priority: i32,
    run: BoxedTask,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingTask>,
    active: usize,
    processed: usize,
}

impl QueueState {
    fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.pending.len(),
            active: self.active,
            processed: self.processed,
        }
    }
}

struct Inner {
    concurrency: usize,
    state: Mutex<QueueState>,
    stats_tx: watch::Sender<QueueStats>,
    runtime: Handle,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &QueueState) {
        self.stats_tx.send_replace(state.stats());
    }

    /// Admit pending tasks until every slot is busy.
    fn drain(self: &Arc<Self>) {
        let mut admitted = Vec::new();
        {
            let mut state = self.lock();
            while state.active < self.concurrency {
                let Some(task) = state.pending.pop_front() else {
                    break;
                };
                state.active += 1;
                admitted.push(task);
            }
            self.publish(&state);
        }

        for task in admitted {
            let inner = Arc::clone(self);
            self.runtime.spawn(async move {
                let priority = task.priority;
                let run = task.run;
                // Run in a child task so a panic surfaces as a JoinError.
                let outcome = inner.runtime.spawn(async move { run().await }).await;
                match outcome {
                    Ok(Ok(())) => tracing::debug!(priority, "queue task finished"),
                    Ok(Err(error)) => tracing::warn!(priority, %error, "queue task failed"),
                    Err(error) => tracing::warn!(priority, %error, "queue task aborted"),
                }
                inner.finish();
            });
        }
    }

    fn finish(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            state.active -= 1;
            state.processed += 1;
        }
        self.drain();
    }
}

/// Clone-safe handle to a bounded-concurrency priority queue.
#[derive(Clone)]
pub struct RecognitionQueue {
    inner: Arc<Inner>,
}

impl RecognitionQueue {
    /// Create a queue on the current tokio runtime.
    pub fn new(concurrency: usize) -> Result<Self, QueueError> {
        let runtime = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        Ok(Self::with_runtime(runtime, concurrency))
    }

    /// Create a queue that spawns its tasks on the given runtime.
    pub fn with_runtime(runtime: Handle, concurrency: usize) -> Self {
        if concurrency == 0 {
            tracing::warn!("queue concurrency 0 clamped to 1");
        }
        let (stats_tx, _) = watch::channel(QueueStats::default());
        Self {
            inner: Arc::new(Inner {
                concurrency: concurrency.max(1),
                state: Mutex::new(QueueState::default()),
                stats_tx,
                runtime,
            }),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Add a task; higher priorities are admitted first.
    pub fn enqueue<F, Fut, E>(&self, task: F, priority: i32)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let run: BoxedTask = Box::new(move || {
            Box::pin(async move { task().await.map_err(|e| e.to_string()) })
        });

        {
            let mut state = self.inner.lock();
            let at = state.pending.partition_point(|t| t.priority >= priority);
            state.pending.insert(at, PendingTask { priority, run });
            self.inner.publish(&state);
        }
        self.inner.drain();
    }

    /// Discard all pending tasks. In-flight tasks run to completion.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        let dropped = state.pending.len();
        state.pending.clear();
        self.inner.publish(&state);
        tracing::debug!(dropped, "cleared pending queue tasks");
    }

    /// Zero the processed counter before a new pass.
    pub fn reset_counters(&self) {
        let mut state = self.inner.lock();
        state.processed = 0;
        self.inner.publish(&state);
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.lock().stats()
    }

    pub fn is_processing(&self) -> bool {
        self.stats().is_processing()
    }

    /// Subscribe to counter updates.
    pub fn subscribe(&self) -> watch::Receiver<QueueStats> {
        self.inner.stats_tx.subscribe()
    }

    /// Wait until nothing is pending or running.
    pub async fn wait_idle(&self) {
        let mut rx = self.subscribe();
        loop {
            if !rx.borrow_and_update().is_processing() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
