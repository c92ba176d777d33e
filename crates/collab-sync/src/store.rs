//! Minimal observable state container.
//!
//! A [`Store`] holds an immutable `Arc<T>` snapshot. Writers replace the
//! snapshot through [`Store::set`]; subscribers are told about every new
//! snapshot synchronously. [`Store::batch`] collapses any number of writes
//! into a single notification.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

type Callback<T> = Arc<dyn Fn(&Arc<T>) + Send + Sync>;

struct Subscribers<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

#[derive(Default)]
struct NotifyState {
    /// A notification pass is running.
    running: bool,
    /// A write landed while the pass was running.
    pending: bool,
}

struct BatchState<T> {
    depth: usize,
    /// Snapshot at the start of the outermost batch.
    start: Option<Arc<T>>,
}

/// Observable container for an immutable snapshot.
pub struct Store<T> {
    state: Mutex<Arc<T>>,
    subscribers: Arc<Mutex<Subscribers<T>>>,
    batch: Mutex<BatchState<T>>,
    notify: Mutex<NotifyState>,
}

impl<T: Send + Sync + 'static> Store<T> {
    pub fn new(initial: T) -> Self {
        Self {
            state: Mutex::new(Arc::new(initial)),
            subscribers: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                entries: Vec::new(),
            })),
            batch: Mutex::new(BatchState {
                depth: 0,
                start: None,
            }),
            notify: Mutex::new(NotifyState::default()),
        }
    }

    /// Current snapshot.
    pub fn get(&self) -> Arc<T> {
        Arc::clone(&self.state.lock())
    }

    /// Replace the snapshot with `f(current)`.
    ///
    /// Returning the same `Arc` (pointer-equal) means "unchanged" and
    /// notifies nobody. `f` runs with the snapshot cell locked and must not
    /// call back into this store.
    pub fn set(&self, f: impl FnOnce(&Arc<T>) -> Arc<T>) {
        let changed = {
            let mut state = self.state.lock();
            let next = f(&state);
            if Arc::ptr_eq(&state, &next) {
                false
            } else {
                *state = next;
                true
            }
        };

        if changed && self.batch.lock().depth == 0 {
            self.notify_subscribers();
        }
    }

    /// Run `f` as one transaction: subscribers hear about the end result
    /// once, or not at all if the snapshot is unchanged. Nested batches
    /// flatten into the outermost one.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        {
            let mut batch = self.batch.lock();
            if batch.depth == 0 {
                batch.start = Some(self.get());
            }
            batch.depth += 1;
        }
        let _guard = BatchGuard { store: self };
        f()
    }

    fn end_batch(&self) {
        let start = {
            let mut batch = self.batch.lock();
            batch.depth = batch.depth.saturating_sub(1);
            if batch.depth > 0 {
                return;
            }
            batch.start.take()
        };

        let current = self.get();
        let changed = start.is_none_or(|start| !Arc::ptr_eq(&start, &current));
        if changed {
            self.notify_subscribers();
        } else {
            trace!("store batch ended without changes");
        }
    }

    /// Register `callback`, call it once with the current snapshot, and
    /// return a handle that removes it again.
    pub fn subscribe(&self, callback: impl Fn(&Arc<T>) + Send + Sync + 'static) -> Unsubscribe<T> {
        let callback: Callback<T> = Arc::new(callback);
        let id = {
            let mut subscribers = self.subscribers.lock();
            let id = subscribers.next_id;
            subscribers.next_id += 1;
            subscribers.entries.push((id, Arc::clone(&callback)));
            id
        };

        callback(&self.get());

        Unsubscribe {
            subscribers: Arc::downgrade(&self.subscribers),
            id,
        }
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().entries.len()
    }

    fn notify_subscribers(&self) {
        {
            let mut notify = self.notify.lock();
            if notify.running {
                // Picked up by the running pass once it finishes.
                notify.pending = true;
                return;
            }
            notify.running = true;
        }
        let _reset = NotifyGuard { store: self };

        loop {
            let snapshot = self.get();
            let callbacks: Vec<Callback<T>> = self
                .subscribers
                .lock()
                .entries
                .iter()
                .map(|(_, cb)| Arc::clone(cb))
                .collect();

            for callback in callbacks {
                callback(&snapshot);
            }

            let mut notify = self.notify.lock();
            if notify.pending {
                notify.pending = false;
                continue;
            }
            break;
        }
    }
}

impl<T: Default + Send + Sync + 'static> Default for Store<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

struct BatchGuard<'a, T: Send + Sync + 'static> {
    store: &'a Store<T>,
}

impl<T: Send + Sync + 'static> Drop for BatchGuard<'_, T> {
    fn drop(&mut self) {
        self.store.end_batch();
    }
}

struct NotifyGuard<'a, T> {
    store: &'a Store<T>,
}

impl<T> Drop for NotifyGuard<'_, T> {
    fn drop(&mut self) {
        let mut notify = self.store.notify.lock();
        notify.running = false;
        notify.pending = false;
    }
}

/// Handle returned by [`Store::subscribe`].
///
/// Dropping the handle keeps the subscription alive; call
/// [`Unsubscribe::unsubscribe`] to remove it.
pub struct Unsubscribe<T> {
    subscribers: Weak<Mutex<Subscribers<T>>>,
    id: u64,
}

impl<T> Unsubscribe<T> {
    pub fn unsubscribe(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.lock().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_subscriber(store: &Store<u32>) -> (Arc<Mutex<Vec<u32>>>, Unsubscribe<u32>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = store.subscribe(move |state| sink.lock().push(**state));
        (seen, handle)
    }

    #[test]
    fn test_subscribe_fires_immediately() {
        let store = Store::new(7u32);
        let (seen, _handle) = counting_subscriber(&store);
        assert_eq!(*seen.lock(), vec![7]);
    }

    #[test]
    fn test_set_notifies_with_new_snapshot() {
        let store = Store::new(0u32);
        let (seen, _handle) = counting_subscriber(&store);

        store.set(|s| Arc::new(**s + 1));
        store.set(|s| Arc::new(**s + 1));

        assert_eq!(*store.get(), 2);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unchanged_set_is_silent() {
        let store = Store::new(0u32);
        let (seen, _handle) = counting_subscriber(&store);

        store.set(Arc::clone);

        assert_eq!(*seen.lock(), vec![0]);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let store = Store::new(0u32);
        let (seen, handle) = counting_subscriber(&store);
        handle.unsubscribe();
        assert_eq!(store.subscriber_count(), 0);

        store.set(|_| Arc::new(5));
        assert_eq!(*seen.lock(), vec![0]);
    }

    #[test]
    fn test_batch_collapses_notifications() {
        let store = Store::new(0u32);
        let (seen, _handle) = counting_subscriber(&store);

        store.batch(|| {
            store.set(|s| Arc::new(**s + 1));
            store.set(|s| Arc::new(**s + 1));
            store.set(|s| Arc::new(**s + 1));
        });

        assert_eq!(*seen.lock(), vec![0, 3]);
    }

    #[test]
    fn test_nested_batches_flatten() {
        let store = Store::new(0u32);
        let (seen, _handle) = counting_subscriber(&store);

        store.batch(|| {
            store.set(|_| Arc::new(1));
            store.batch(|| store.set(|_| Arc::new(2)));
            // Inner batch must not have notified.
            store.set(|_| Arc::new(3));
        });

        assert_eq!(*seen.lock(), vec![0, 3]);
    }

    #[test]
    fn test_batch_without_changes_is_silent() {
        let store = Store::new(0u32);
        let (seen, _handle) = counting_subscriber(&store);

        let value = store.batch(|| {
            store.set(Arc::clone);
            42
        });

        assert_eq!(value, 42);
        assert_eq!(*seen.lock(), vec![0]);
    }

    #[test]
    fn test_reentrant_set_notifies_after_pass_with_latest() {
        let store = Arc::new(Store::new(0u32));
        let calls = Arc::new(AtomicUsize::new(0));

        let writer = Arc::clone(&store);
        let counter = Arc::clone(&calls);
        let _first = store.subscribe(move |state| {
            counter.fetch_add(1, Ordering::SeqCst);
            // Bump odd values to the next even one.
            if **state % 2 == 1 {
                writer.set(|s| Arc::new(**s + 1));
            }
        });

        let (seen, _second) = counting_subscriber(&store);

        store.set(|_| Arc::new(1));

        assert_eq!(*store.get(), 2);
        // The second subscriber sees 1 within the first pass, then 2 in the
        // follow-up pass. It never sees an interleaved notification.
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        // first: initial(0), pass(1), follow-up pass(2)
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_batch_notifies_even_if_closure_panics() {
        let store = Arc::new(Store::new(0u32));
        let (seen, _handle) = counting_subscriber(&store);

        let inner = Arc::clone(&store);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            inner.batch::<()>(|| {
                inner.set(|_| Arc::new(9));
                panic!("boom");
            })
        }));

        assert!(result.is_err());
        assert_eq!(*seen.lock(), vec![0, 9]);

        // Depth was restored: plain sets notify again.
        store.set(|_| Arc::new(10));
        assert_eq!(*seen.lock(), vec![0, 9, 10]);
    }
}
