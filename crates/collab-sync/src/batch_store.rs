//! Subscribable view over a [`BatchCache`].
//!
//! Lookups such as user or room info are resolved through a batch cache, but
//! UI code wants to read and subscribe to them rather than await them. A
//! [`BatchStore`] mirrors the state of every requested key in a [`Store`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::trace;

use crate::batch::{BatchCallback, batch_key};
use crate::batch_cache::BatchCache;
use crate::config::BatchOptions;
use crate::error::BatchError;
use crate::store::{Store, Unsubscribe};

/// State of one asynchronously resolved key.
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncResult<V> {
    Loading,
    Success(V),
    Error(BatchError),
}

impl<V> AsyncResult<V> {
    pub fn is_loading(&self) -> bool {
        matches!(self, AsyncResult::Loading)
    }
}

pub type BatchStoreState<V> = HashMap<String, AsyncResult<V>>;

pub struct BatchStore<A, V> {
    cache: BatchCache<A, V>,
    store: Store<BatchStoreState<V>>,
}

impl<A, V> BatchStore<A, V>
where
    A: Serialize + Send + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(callback: BatchCallback<A, V>, options: BatchOptions) -> Self {
        Self::from_cache(BatchCache::new(callback, options))
    }

    pub fn from_cache(cache: BatchCache<A, V>) -> Self {
        Self {
            cache,
            store: Store::new(HashMap::new()),
        }
    }

    /// Resolve `args`, recording `Loading` and then the outcome.
    pub async fn enqueue(&self, args: A) -> Result<V, BatchError> {
        let key = batch_key(&args)?;

        // Resolved entries are final until invalidated. Whole-batch failures
        // were never cached, so those retry.
        match self.store.get().get(&key) {
            Some(AsyncResult::Success(value)) => return Ok(value.clone()),
            Some(AsyncResult::Error(error)) if !error.is_batch_failure() => {
                return Err(error.clone());
            }
            _ => {}
        }

        self.update(&key, AsyncResult::Loading);
        let result = self.cache.get(args).await;
        let state = match &result {
            Ok(value) => AsyncResult::Success(value.clone()),
            Err(error) => AsyncResult::Error(error.clone()),
        };
        trace!(key = %key, ok = result.is_ok(), "batch store entry resolved");
        self.update(&key, state);
        result
    }

    fn update(&self, key: &str, next: AsyncResult<V>) {
        self.store.set(|current| {
            if current.get(key) == Some(&next) {
                return Arc::clone(current);
            }
            let mut entries = HashMap::clone(current);
            entries.insert(key.to_string(), next);
            Arc::new(entries)
        });
    }

    /// Current state for `args`, if it was ever requested.
    pub fn get_state(&self, args: &A) -> Option<AsyncResult<V>> {
        let key = batch_key(args).ok()?;
        self.store.get().get(&key).cloned()
    }

    pub fn snapshot(&self) -> Arc<BatchStoreState<V>> {
        self.store.get()
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&Arc<BatchStoreState<V>>) + Send + Sync + 'static,
    ) -> Unsubscribe<BatchStoreState<V>> {
        self.store.subscribe(callback)
    }

    /// Forget `args` in both the memo table and the store.
    pub fn invalidate(&self, args: &A) {
        self.cache.remove(args);
        let Ok(key) = batch_key(args) else {
            return;
        };
        self.store.set(|current| {
            if !current.contains_key(&key) {
                return Arc::clone(current);
            }
            let mut entries = HashMap::clone(current);
            entries.remove(&key);
            Arc::new(entries)
        });
    }

    pub fn clear(&self) {
        self.cache.clear();
        self.store.set(|current| {
            if current.is_empty() {
                Arc::clone(current)
            } else {
                Arc::new(HashMap::new())
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::KeyedBatch;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    fn lengths() -> BatchStore<String, usize> {
        let batch = KeyedBatch::from_fn(
            |names: Vec<String>| async move {
                let results: Vec<Result<usize, String>> = names
                    .iter()
                    .map(|name| {
                        if name.is_empty() {
                            Err("empty name".to_string())
                        } else {
                            Ok(name.len())
                        }
                    })
                    .collect();
                Ok::<_, String>(results)
            },
            BatchOptions::default(),
        );
        BatchStore::from_cache(BatchCache::from_batch(batch))
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_records_loading_then_success() {
        let store = lengths();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _handle = store.subscribe(move |state| {
            sink.lock().push(state.get("\"alice\"").cloned());
        });

        assert_eq!(store.enqueue("alice".to_string()).await, Ok(5));

        assert_eq!(
            *seen.lock(),
            vec![None, Some(AsyncResult::Loading), Some(AsyncResult::Success(5))]
        );
        assert_eq!(
            store.get_state(&"alice".to_string()),
            Some(AsyncResult::Success(5))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_error_is_recorded() {
        let store = lengths();

        let result = store.enqueue(String::new()).await;

        assert_eq!(result, Err(BatchError::Item("empty name".into())));
        assert_eq!(
            store.get_state(&String::new()),
            Some(AsyncResult::Error(BatchError::Item("empty name".into())))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_item_error_is_silent() {
        let store = lengths();
        store.enqueue(String::new()).await.unwrap_err();

        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        let _handle = store.subscribe(move |_| *sink.lock() += 1);
        *seen.lock() = 0;

        let result = store.enqueue(String::new()).await;

        assert_eq!(result, Err(BatchError::Item("empty name".into())));
        assert_eq!(*seen.lock(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_and_clear() {
        let store = lengths();
        store.enqueue("bob".to_string()).await.unwrap();
        store.enqueue("carol".to_string()).await.unwrap();

        store.invalidate(&"bob".to_string());
        assert_eq!(store.get_state(&"bob".to_string()), None);
        assert!(store.get_state(&"carol".to_string()).is_some());

        store.clear();
        assert!(store.snapshot().is_empty());
    }
}
