use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tracing::{debug, error, warn};

use super::error::{Result, StreamError};
use crate::observability::Metrics;

/// Unit of work queued on a key's chain
type Job<S> = Box<dyn FnOnce(Arc<AsyncMutex<S>>) -> BoxFuture<'static, ()> + Send>;

/// KeyedScheduler runs operations for the same key strictly one after another
///
/// Architecture:
/// 1. The first `schedule(key, ..)` lazily spawns a chain worker for `key`
///    that owns an unbounded queue and the key's state `S`
/// 2. Each submission is pushed onto that queue synchronously, so the order
///    of `schedule` calls is the execution order
/// 3. The worker pops one job at a time and awaits it before the next
/// 4. A failed or panicking job resolves its own `Completion` with an error
///    and the worker moves on
///
/// Chains for different keys run concurrently. Chains are never removed.
pub struct KeyedScheduler<S> {
    chains: Mutex<HashMap<String, mpsc::UnboundedSender<Job<S>>>>,
    sealed: AtomicBool,
    metrics: Arc<Metrics>,
}

impl<S> KeyedScheduler<S>
where
    S: Default + Send + 'static,
{
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            chains: Mutex::new(HashMap::new()),
            sealed: AtomicBool::new(false),
            metrics,
        }
    }

    /// Queue `task` behind every task previously scheduled for `key`
    ///
    /// Must be called from within a tokio runtime. The returned `Completion`
    /// resolves with the task's own result; dropping it does not cancel the task.
    pub fn schedule<T, F, Fut>(&self, key: &str, task: F) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<AsyncMutex<S>>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut chains = self.lock_chains();
        if self.sealed.load(Ordering::SeqCst) {
            return Completion::failed(key, StreamError::Closed);
        }

        let sender = chains
            .entry(key.to_string())
            .or_insert_with(|| spawn_chain::<S>(key));
        enqueue(key, sender, Arc::clone(&self.metrics), task)
    }

    /// Refuse further submissions and queue one last task on every chain
    ///
    /// The final tasks run after everything already queued for their key.
    pub fn seal<T, F, Fut>(&self, mut final_task: impl FnMut(&str) -> F) -> Vec<Completion<T>>
    where
        T: Send + 'static,
        F: FnOnce(Arc<AsyncMutex<S>>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let chains = self.lock_chains();
        self.sealed.store(true, Ordering::SeqCst);

        chains
            .iter()
            .map(|(key, sender)| enqueue(key, sender, Arc::clone(&self.metrics), final_task(key)))
            .collect()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Number of keys that have ever had a task scheduled
    pub fn chain_count(&self) -> usize {
        self.lock_chains().len()
    }

    /// Whether `key` has a chain, i.e. has ever had a task scheduled
    pub fn has_chain(&self, key: &str) -> bool {
        self.lock_chains().contains_key(key)
    }

    fn lock_chains(&self) -> MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<Job<S>>>> {
        // Nothing panics while holding this lock, but stay usable if something ever does.
        self.chains.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn spawn_chain<S>(key: &str) -> mpsc::UnboundedSender<Job<S>>
where
    S: Default + Send + 'static,
{
    let (sender, mut receiver) = mpsc::unbounded_channel::<Job<S>>();
    let state = Arc::new(AsyncMutex::new(S::default()));
    let key = key.to_string();

    tokio::spawn(async move {
        debug!(key = %key, "Operation chain started");
        while let Some(job) = receiver.recv().await {
            job(Arc::clone(&state)).await;
        }
        debug!(key = %key, "Operation chain stopped");
    });

    sender
}

fn enqueue<S, T, F, Fut>(
    key: &str,
    sender: &mpsc::UnboundedSender<Job<S>>,
    metrics: Arc<Metrics>,
    task: F,
) -> Completion<T>
where
    S: Send + 'static,
    T: Send + 'static,
    F: FnOnce(Arc<AsyncMutex<S>>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let (ack_tx, ack_rx) = oneshot::channel();
    let task_key = key.to_string();

    let job: Job<S> = Box::new(move |state: Arc<AsyncMutex<S>>| -> BoxFuture<'static, ()> {
        Box::pin(async move {
            // Spawned so a panic stays inside this task; the chain awaits it either way.
            let outcome = match tokio::spawn(async move { task(state).await }).await {
                Ok(result) => result,
                Err(join_err) => {
                    error!(key = %task_key, error = %join_err, "Stream operation panicked");
                    Err(StreamError::TaskPanicked(task_key.clone()))
                }
            };

            if let Err(err) = &outcome {
                metrics.operation_failed();
                warn!(key = %task_key, error = %err, "Stream operation failed");
            }

            // Receiver may be gone if the caller stopped waiting.
            let _ = ack_tx.send(outcome);
        })
    });

    if sender.send(job).is_err() {
        return Completion::failed(key, StreamError::ChainClosed(key.to_string()));
    }

    Completion {
        key: key.to_string(),
        state: CompletionState::Pending(ack_rx),
    }
}

/// Outcome of a scheduled task, resolved once the chain has run it
#[must_use = "a Completion reports whether the operation succeeded"]
pub struct Completion<T> {
    key: String,
    state: CompletionState<T>,
}

enum CompletionState<T> {
    Pending(oneshot::Receiver<Result<T>>),
    Ready(Option<Result<T>>),
}

impl<T> Completion<T> {
    /// A completion that resolves to `result` without anything being scheduled
    pub fn ready(key: &str, result: Result<T>) -> Self {
        Self {
            key: key.to_string(),
            state: CompletionState::Ready(Some(result)),
        }
    }

    /// A completion that fails without anything being scheduled
    pub fn failed(key: &str, err: StreamError) -> Self {
        Self::ready(key, Err(err))
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<T> Unpin for Completion<T> {}

impl<T> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            CompletionState::Pending(receiver) => Pin::new(receiver).poll(cx).map(|received| {
                received.unwrap_or_else(|_| Err(StreamError::ChainClosed(this.key.clone())))
            }),
            CompletionState::Ready(result) => Poll::Ready(
                result
                    .take()
                    .unwrap_or_else(|| Err(StreamError::ChainClosed(this.key.clone()))),
            ),
        }
    }
}
