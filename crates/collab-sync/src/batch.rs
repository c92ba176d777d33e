//! Request coalescing.
//!
//! A [`KeyedBatch`] collects calls for a short window and resolves them with
//! a single invocation of its callback. Calls with identical arguments share
//! one slot in the batch.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::config::BatchOptions;
use crate::error::BatchError;

/// Resolver for a whole batch: one result per argument, in order.
pub type BatchCallback<A, V> = Box<
    dyn Fn(Vec<A>) -> Pin<Box<dyn Future<Output = Result<Vec<Result<V, String>>, String>> + Send>>
        + Send
        + Sync,
>;

type Waiter<V> = oneshot::Sender<Result<V, BatchError>>;

/// Cache and dedup key for a set of call arguments.
pub(crate) fn batch_key<A: Serialize>(args: &A) -> Result<String, BatchError> {
    serde_json::to_string(args).map_err(|e| BatchError::Key(e.to_string()))
}

struct PendingCall<A, V> {
    key: String,
    args: A,
    /// Everyone waiting on this argument set.
    waiters: Vec<Waiter<V>>,
}

struct Queue<A, V> {
    calls: Vec<PendingCall<A, V>>,
    timer: Option<JoinHandle<()>>,
}

struct Inner<A, V> {
    callback: BatchCallback<A, V>,
    options: BatchOptions,
    queue: Mutex<Queue<A, V>>,
    /// Whether the most recent flush failed as a whole.
    error: AtomicBool,
}

/// Coalesces concurrent calls into batched callback invocations.
pub struct KeyedBatch<A, V> {
    inner: Arc<Inner<A, V>>,
}

impl<A, V> Clone for KeyedBatch<A, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, V> KeyedBatch<A, V>
where
    A: Serialize + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new(callback: BatchCallback<A, V>, options: BatchOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                callback,
                options,
                queue: Mutex::new(Queue {
                    calls: Vec::new(),
                    timer: None,
                }),
                error: AtomicBool::new(false),
            }),
        }
    }

    /// Build a batch from an async closure.
    pub fn from_fn<F, Fut>(callback: F, options: BatchOptions) -> Self
    where
        F: Fn(Vec<A>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Result<V, String>>, String>> + Send + 'static,
    {
        Self::new(Box::new(move |args| Box::pin(callback(args))), options)
    }

    /// Queue a call and wait for its result.
    ///
    /// The batch flushes as soon as it holds `size` distinct calls, or
    /// `delay` after the first call was queued, whichever comes first.
    pub async fn add(&self, args: A) -> Result<V, BatchError> {
        let key = batch_key(&args)?;
        let (tx, rx) = oneshot::channel();

        let ready = {
            let mut queue = self.inner.queue.lock();
            match queue.calls.iter_mut().find(|call| call.key == key) {
                Some(call) => {
                    trace!(key = %key, "joining queued call");
                    call.waiters.push(tx);
                }
                None => queue.calls.push(PendingCall {
                    key,
                    args,
                    waiters: vec![tx],
                }),
            }

            if queue.calls.len() >= self.inner.options.size.max(1) {
                if let Some(timer) = queue.timer.take() {
                    timer.abort();
                }
                Some(std::mem::take(&mut queue.calls))
            } else {
                if queue.timer.is_none() {
                    queue.timer = Some(self.spawn_timer());
                }
                None
            }
        };

        if let Some(calls) = ready {
            tokio::spawn(Arc::clone(&self.inner).flush(calls));
        }

        // A dropped sender means the queue was cleared.
        rx.await.unwrap_or(Err(BatchError::Cancelled))
    }

    fn spawn_timer(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let delay = inner.options.delay;
        tokio::spawn(async move {
            sleep(delay).await;
            let calls = {
                let mut queue = inner.queue.lock();
                queue.timer = None;
                std::mem::take(&mut queue.calls)
            };
            if !calls.is_empty() {
                inner.flush(calls).await;
            }
        })
    }

    /// Drop every queued call. Their callers get [`BatchError::Cancelled`].
    pub fn clear(&self) {
        let mut queue = self.inner.queue.lock();
        if let Some(timer) = queue.timer.take() {
            timer.abort();
        }
        let dropped = std::mem::take(&mut queue.calls);
        if !dropped.is_empty() {
            debug!(calls = dropped.len(), "cleared pending batch");
        }
    }

    /// Number of distinct calls waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.inner.queue.lock().calls.len()
    }

    /// Whether the most recent flush failed as a whole.
    pub fn has_error(&self) -> bool {
        self.inner.error.load(Ordering::SeqCst)
    }
}

impl<A, V> Inner<A, V>
where
    A: Send + 'static,
    V: Clone + Send + 'static,
{
    async fn flush(self: Arc<Self>, calls: Vec<PendingCall<A, V>>) {
        let expected = calls.len();
        let (args, waiters): (Vec<A>, Vec<Vec<Waiter<V>>>) =
            calls.into_iter().map(|call| (call.args, call.waiters)).unzip();

        debug!(calls = expected, "flushing batch");
        self.error.store(false, Ordering::SeqCst);

        match (self.callback)(args).await {
            Ok(results) if results.len() == expected => {
                for (result, waiters) in results.into_iter().zip(waiters) {
                    fan_out(waiters, result.map_err(BatchError::Item));
                }
            }
            Ok(results) => {
                warn!(
                    expected,
                    actual = results.len(),
                    "batch callback returned misaligned results"
                );
                self.error.store(true, Ordering::SeqCst);
                let error = BatchError::Misaligned {
                    expected,
                    actual: results.len(),
                };
                for waiters in waiters {
                    fan_out(waiters, Err(error.clone()));
                }
            }
            Err(message) => {
                warn!(error = %message, calls = expected, "batch callback failed");
                self.error.store(true, Ordering::SeqCst);
                let error = BatchError::Failed(message);
                for waiters in waiters {
                    fan_out(waiters, Err(error.clone()));
                }
            }
        }
    }
}

fn fan_out<V: Clone>(waiters: Vec<Waiter<V>>, result: Result<V, BatchError>) {
    for waiter in waiters {
        // The caller may have stopped waiting.
        let _ = waiter.send(result.clone());
    }
}
