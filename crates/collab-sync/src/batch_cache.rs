//! Memoized request coalescing.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::batch::{BatchCallback, KeyedBatch, batch_key};
use crate::config::BatchOptions;
use crate::error::BatchError;

type Slot<V> = Arc<OnceCell<Result<V, BatchError>>>;

/// A [`KeyedBatch`] with a per-key memo table.
///
/// Successful results and per-item errors are remembered until evicted.
/// Whole-batch failures are not: the next call for the key goes back to the
/// server.
pub struct BatchCache<A, V> {
    batch: KeyedBatch<A, V>,
    entries: DashMap<String, Slot<V>>,
}

impl<A, V> BatchCache<A, V>
where
    A: Serialize + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(callback: BatchCallback<A, V>, options: BatchOptions) -> Self {
        Self::from_batch(KeyedBatch::new(callback, options))
    }

    pub fn from_batch(batch: KeyedBatch<A, V>) -> Self {
        Self {
            batch,
            entries: DashMap::new(),
        }
    }

    /// Resolve `args`, from the memo table if possible.
    ///
    /// Concurrent calls for the same key share one request.
    pub async fn get(&self, args: A) -> Result<V, BatchError> {
        let key = batch_key(&args)?;
        let slot = Arc::clone(self.entries.entry(key.clone()).or_default().value());

        let outcome = slot
            .get_or_try_init(|| async move {
                match self.batch.add(args).await {
                    Err(error) if error.is_batch_failure() => Err(error),
                    result => Ok(result),
                }
            })
            .await;

        match outcome {
            Ok(result) => result.clone(),
            Err(error) => {
                trace!(key = %key, error = %error, "not caching batch failure");
                // Only evict our own slot, and only if no retry filled it.
                self.entries
                    .remove_if(&key, |_, cell| Arc::ptr_eq(cell, &slot) && !cell.initialized());
                Err(error)
            }
        }
    }

    /// The memoized result for `args`, if one has been recorded.
    pub fn peek(&self, args: &A) -> Option<Result<V, BatchError>> {
        let key = batch_key(args).ok()?;
        self.entries.get(&key)?.get().cloned()
    }

    /// Forget the result for `args`.
    pub fn remove(&self, args: &A) {
        if let Ok(key) = batch_key(args) {
            self.entries.remove(&key);
        }
    }

    /// Forget every result and cancel calls still waiting to be flushed.
    pub fn clear(&self) {
        debug!(entries = self.entries.len(), "clearing batch cache");
        self.entries.clear();
        self.batch.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch(&self) -> &KeyedBatch<A, V> {
        &self.batch
    }
}
