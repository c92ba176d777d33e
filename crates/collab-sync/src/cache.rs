//! Optimistic entity cache.
//!
//! [`OptimisticCache`] keeps the last confirmed server state for threads,
//! inbox notifications and notification settings, plus an ordered queue of
//! pending local mutations. Reads go through [`OptimisticCache::projected`],
//! which overlays the queue on the confirmed maps.
//!
//! Every confirmed-write entry point drops the optimistic update it confirms
//! and commits the confirmed entity in one [`Store::batch`], so subscribers
//! never observe the update both queued and committed, or neither.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::config::SyncConfig;
use crate::context::EngineContext;
use crate::optimistic::{OptimisticEffect, OptimisticUpdate, new_optimistic_id};
use crate::projection::{ProjectedState, apply_optimistic_updates, mark_thread_notification_read};
use crate::reconcile::{
    NotificationUpdates, ThreadUpdates, add_reaction, apply_notifications_updates,
    apply_thread_updates, delete_comment, delete_thread, patch_metadata, remove_reaction,
    set_resolved, upsert_comment,
};
use crate::settings::NotificationSettings;
use crate::store::{Store, Unsubscribe};
use crate::types::{
    Comment, CommentUserReaction, InboxNotification, QueryState, Thread, ThreadMetadataPatch,
};

/// Confirmed server state plus the queue of pending local mutations.
///
/// Each map sits behind its own `Arc`, so a write clones only the map it
/// touches.
#[derive(Debug, Clone, Default)]
pub struct CacheState {
    pub threads: Arc<HashMap<String, Thread>>,
    pub inbox_notifications: Arc<HashMap<String, InboxNotification>>,
    /// Keyed by room id.
    pub notification_settings: Arc<HashMap<String, NotificationSettings>>,
    pub queries: Arc<HashMap<String, QueryState>>,
    pub optimistic_updates: Arc<Vec<OptimisticUpdate>>,
}

impl CacheState {
    /// Whether every map is shared with `other`.
    fn same_as(&self, other: &CacheState) -> bool {
        Arc::ptr_eq(&self.threads, &other.threads)
            && Arc::ptr_eq(&self.inbox_notifications, &other.inbox_notifications)
            && Arc::ptr_eq(&self.notification_settings, &other.notification_settings)
            && Arc::ptr_eq(&self.queries, &other.queries)
            && Arc::ptr_eq(&self.optimistic_updates, &other.optimistic_updates)
    }

    /// Drop a queued optimistic update. Returns whether it was queued.
    fn drop_optimistic(&mut self, id: &str) -> bool {
        if !self.optimistic_updates.iter().any(|u| u.id == id) {
            return false;
        }
        Arc::make_mut(&mut self.optimistic_updates).retain(|u| u.id != id);
        true
    }

    fn set_query(&mut self, key: &str, query: QueryState) {
        if self.queries.get(key) == Some(&query) {
            return;
        }
        Arc::make_mut(&mut self.queries).insert(key.to_string(), query);
    }
}

/// Locally mirrored, optimistically updated collaboration entities.
pub struct OptimisticCache {
    store: Store<CacheState>,
    context: Arc<EngineContext>,
}

impl OptimisticCache {
    pub fn new(config: &SyncConfig) -> Self {
        Self::with_context(Arc::new(EngineContext::new(config.dev_warnings)))
    }

    /// Build a cache around an existing context.
    pub fn with_context(context: Arc<EngineContext>) -> Self {
        Self {
            store: Store::new(CacheState::default()),
            context,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    /// Confirmed state, without optimistic updates.
    pub fn get(&self) -> Arc<CacheState> {
        self.store.get()
    }

    /// Confirmed state with all pending optimistic updates applied.
    pub fn projected(&self) -> ProjectedState {
        apply_optimistic_updates(&self.store.get())
    }

    /// Subscribe to confirmed-state changes. Call
    /// [`apply_optimistic_updates`] on the snapshot for the projected view.
    pub fn subscribe(
        &self,
        callback: impl Fn(&Arc<CacheState>) + Send + Sync + 'static,
    ) -> Unsubscribe<CacheState> {
        self.store.subscribe(callback)
    }

    /// Apply `f` to a working copy of the state and publish it if any map
    /// changed.
    fn mutate(&self, f: impl FnOnce(&mut CacheState)) {
        self.store.set(|current| {
            let mut next = CacheState::clone(current);
            f(&mut next);
            if next.same_as(current) {
                Arc::clone(current)
            } else {
                Arc::new(next)
            }
        });
    }

    fn take_optimistic(&self, optimistic_id: &str) {
        self.mutate(|state| {
            if state.drop_optimistic(optimistic_id) {
                trace!(optimistic_id = %optimistic_id, "optimistic update confirmed");
            }
        });
    }

    // ---- Optimistic queue ----

    /// Queue a local mutation. Returns the id to confirm or roll it back with.
    pub fn add_optimistic_update(&self, effect: OptimisticEffect) -> String {
        let id = new_optimistic_id();
        debug!(optimistic_id = %id, kind = effect.kind(), "queued optimistic update");
        let update = OptimisticUpdate {
            id: id.clone(),
            effect,
        };
        self.mutate(|state| Arc::make_mut(&mut state.optimistic_updates).push(update));
        id
    }

    /// Drop a queued mutation, e.g. after the server rejected it.
    pub fn remove_optimistic_update(&self, optimistic_id: &str) {
        let mut found = false;
        self.mutate(|state| found = state.drop_optimistic(optimistic_id));
        if found {
            debug!(optimistic_id = %optimistic_id, "removed optimistic update");
        } else {
            self.context.warn_once(
                &format!("unknown-optimistic-update:{optimistic_id}"),
                &format!("optimistic update {optimistic_id} is not queued"),
            );
        }
    }

    // ---- Threads ----

    /// Commit a confirmed new thread.
    pub fn create_thread(&self, optimistic_id: &str, thread: Thread) {
        self.store.batch(|| {
            self.take_optimistic(optimistic_id);
            self.mutate(|state| {
                trace!(thread_id = %thread.id, "thread created");
                Arc::make_mut(&mut state.threads).insert(thread.id.clone(), thread);
            });
        });
    }

    /// Commit a confirmed thread deletion.
    pub fn delete_thread(&self, thread_id: &str, optimistic_id: &str, deleted_at: DateTime<Utc>) {
        self.update_thread(thread_id, Some(optimistic_id), None, |thread| {
            delete_thread(thread, deleted_at)
        });
    }

    /// Commit `f(thread)` for a cached thread.
    ///
    /// Nothing happens if the thread is unknown or deleted, or if `updated_at`
    /// is given and the cached thread was updated later. The optimistic update
    /// is dropped either way.
    pub fn update_thread(
        &self,
        thread_id: &str,
        optimistic_id: Option<&str>,
        updated_at: Option<DateTime<Utc>>,
        f: impl FnOnce(Thread) -> Thread,
    ) {
        self.store.batch(|| {
            if let Some(optimistic_id) = optimistic_id {
                self.take_optimistic(optimistic_id);
            }

            let mut unknown = false;
            self.mutate(|state| {
                let Some(existing) = state.threads.get(thread_id) else {
                    unknown = true;
                    return;
                };
                if existing.is_deleted() {
                    trace!(thread_id = %thread_id, "ignoring update to deleted thread");
                    return;
                }
                let stale = updated_at
                    .is_some_and(|at| existing.updated_at.is_some_and(|cached| cached > at));
                if stale {
                    trace!(thread_id = %thread_id, "ignoring stale thread update");
                    return;
                }
                let next = f(existing.clone());
                if &next != existing {
                    Arc::make_mut(&mut state.threads).insert(thread_id.to_string(), next);
                }
            });

            if unknown {
                self.context.warn_once(
                    &format!("unknown-thread:{thread_id}"),
                    &format!("confirmed update for thread {thread_id}, which is not cached"),
                );
            }
        });
    }

    pub fn patch_thread_metadata(
        &self,
        thread_id: &str,
        optimistic_id: &str,
        patch: &ThreadMetadataPatch,
        updated_at: DateTime<Utc>,
    ) {
        self.update_thread(thread_id, Some(optimistic_id), Some(updated_at), |thread| {
            patch_metadata(thread, patch, updated_at)
        });
    }

    pub fn mark_thread_resolved(
        &self,
        thread_id: &str,
        optimistic_id: &str,
        resolved: bool,
        updated_at: DateTime<Utc>,
    ) {
        self.update_thread(thread_id, Some(optimistic_id), Some(updated_at), |thread| {
            set_resolved(thread, resolved, updated_at)
        });
    }

    pub fn add_reaction(
        &self,
        thread_id: &str,
        optimistic_id: &str,
        comment_id: &str,
        reaction: CommentUserReaction,
    ) {
        let created_at = reaction.created_at;
        self.update_thread(thread_id, Some(optimistic_id), Some(created_at), |thread| {
            add_reaction(thread, comment_id, reaction)
        });
    }

    /// Same staleness guard as [`OptimisticCache::add_reaction`]: a removal
    /// older than the thread's last update is dropped.
    pub fn remove_reaction(
        &self,
        thread_id: &str,
        optimistic_id: &str,
        comment_id: &str,
        emoji: &str,
        user_id: &str,
        removed_at: DateTime<Utc>,
    ) {
        self.update_thread(thread_id, Some(optimistic_id), Some(removed_at), |thread| {
            remove_reaction(thread, comment_id, emoji, user_id, removed_at)
        });
    }

    pub fn delete_comment(
        &self,
        thread_id: &str,
        optimistic_id: &str,
        comment_id: &str,
        deleted_at: DateTime<Utc>,
    ) {
        self.update_thread(thread_id, Some(optimistic_id), Some(deleted_at), |thread| {
            delete_comment(thread, comment_id, deleted_at)
        });
    }

    /// Commit a confirmed new or edited comment.
    ///
    /// Posting in a thread also reads its inbox notification. The optimistic
    /// update is dropped even when the parent thread is not cached.
    pub fn create_comment(&self, comment: Comment, optimistic_id: &str) {
        self.store.batch(|| {
            self.take_optimistic(optimistic_id);

            let mut unknown = false;
            self.mutate(|state| {
                let Some(existing) = state.threads.get(&comment.thread_id) else {
                    unknown = true;
                    return;
                };
                if existing.is_deleted() {
                    trace!(thread_id = %comment.thread_id, "ignoring comment on deleted thread");
                    return;
                }
                let thread_id = comment.thread_id.clone();
                let created_at = comment.created_at;
                let next = upsert_comment(existing.clone(), comment);
                if &next != existing {
                    Arc::make_mut(&mut state.threads).insert(thread_id.clone(), next);
                }
                mark_thread_notification_read(
                    &mut state.inbox_notifications,
                    &thread_id,
                    created_at,
                );
            });

            if unknown {
                self.context.warn_once(
                    "comment-for-unknown-thread",
                    "confirmed comment for a thread that is not cached; dropping it",
                );
            }
        });
    }

    // ---- Delta sync ----

    /// Fold one thread and, optionally, its notification. The same
    /// newer-wins rules as a delta sync apply.
    pub fn update_thread_and_notification(
        &self,
        thread: Thread,
        notification: Option<InboxNotification>,
    ) {
        let threads = ThreadUpdates {
            new_threads: vec![thread],
            deleted_threads: Vec::new(),
        };
        let notifications = NotificationUpdates {
            new_inbox_notifications: notification.into_iter().collect(),
            deleted_inbox_notifications: Vec::new(),
        };
        self.update_threads_and_notifications(&threads, &notifications, None);
    }

    /// Fold a delta sync into the confirmed maps, and mark `query_key` as
    /// loaded if given. Pending optimistic updates are left alone.
    pub fn update_threads_and_notifications(
        &self,
        threads: &ThreadUpdates,
        notifications: &NotificationUpdates,
        query_key: Option<&str>,
    ) {
        debug!(
            threads = threads.new_threads.len(),
            deleted_threads = threads.deleted_threads.len(),
            notifications = notifications.new_inbox_notifications.len(),
            deleted_notifications = notifications.deleted_inbox_notifications.len(),
            "applying delta"
        );

        self.store.batch(|| {
            self.mutate(|state| {
                // Stale or repeated deltas keep the existing maps.
                if !threads.new_threads.is_empty() || !threads.deleted_threads.is_empty() {
                    let folded = apply_thread_updates(HashMap::clone(&state.threads), threads);
                    if folded != *state.threads {
                        state.threads = Arc::new(folded);
                    }
                }
                if !notifications.new_inbox_notifications.is_empty()
                    || !notifications.deleted_inbox_notifications.is_empty()
                {
                    let folded = apply_notifications_updates(
                        HashMap::clone(&state.inbox_notifications),
                        notifications,
                    );
                    if folded != *state.inbox_notifications {
                        state.inbox_notifications = Arc::new(folded);
                    }
                }
                if let Some(key) = query_key {
                    state.set_query(key, QueryState::Ok);
                }
            });
        });
    }

    // ---- Inbox notifications ----

    /// Commit `f(notification)` for a cached notification.
    pub fn update_inbox_notification(
        &self,
        inbox_notification_id: &str,
        optimistic_id: &str,
        f: impl FnOnce(InboxNotification) -> InboxNotification,
    ) {
        self.store.batch(|| {
            self.take_optimistic(optimistic_id);
            self.mutate(|state| {
                let Some(existing) = state.inbox_notifications.get(inbox_notification_id) else {
                    trace!(notification_id = %inbox_notification_id, "notification not cached");
                    return;
                };
                let next = f(existing.clone());
                if &next != existing {
                    Arc::make_mut(&mut state.inbox_notifications)
                        .insert(inbox_notification_id.to_string(), next);
                }
            });
        });
    }

    /// Commit `f` for every cached notification.
    pub fn update_all_inbox_notifications(
        &self,
        optimistic_id: &str,
        f: impl Fn(InboxNotification) -> InboxNotification,
    ) {
        self.store.batch(|| {
            self.take_optimistic(optimistic_id);
            self.mutate(|state| {
                if state.inbox_notifications.is_empty() {
                    return;
                }
                let next: HashMap<String, InboxNotification> = state
                    .inbox_notifications
                    .iter()
                    .map(|(id, n)| (id.clone(), f(n.clone())))
                    .collect();
                if next != *state.inbox_notifications {
                    state.inbox_notifications = Arc::new(next);
                }
            });
        });
    }

    pub fn mark_inbox_notification_as_read(
        &self,
        inbox_notification_id: &str,
        optimistic_id: &str,
        read_at: DateTime<Utc>,
    ) {
        self.update_inbox_notification(inbox_notification_id, optimistic_id, |mut n| {
            n.read_at = Some(read_at);
            n
        });
    }

    pub fn mark_all_inbox_notifications_as_read(
        &self,
        optimistic_id: &str,
        read_at: DateTime<Utc>,
    ) {
        self.update_all_inbox_notifications(optimistic_id, |mut n| {
            n.read_at = Some(read_at);
            n
        });
    }

    pub fn delete_inbox_notification(&self, inbox_notification_id: &str, optimistic_id: &str) {
        self.store.batch(|| {
            self.take_optimistic(optimistic_id);
            self.mutate(|state| {
                if state.inbox_notifications.contains_key(inbox_notification_id) {
                    Arc::make_mut(&mut state.inbox_notifications).remove(inbox_notification_id);
                }
            });
        });
    }

    pub fn delete_all_inbox_notifications(&self, optimistic_id: &str) {
        self.store.batch(|| {
            self.take_optimistic(optimistic_id);
            self.mutate(|state| {
                if !state.inbox_notifications.is_empty() {
                    state.inbox_notifications = Arc::new(HashMap::new());
                }
            });
        });
    }

    // ---- Notification settings ----

    /// Commit the server's settings for a room. They replace whatever was
    /// cached.
    pub fn update_room_notification_settings(
        &self,
        room_id: &str,
        optimistic_id: Option<&str>,
        settings: NotificationSettings,
    ) {
        self.store.batch(|| {
            if let Some(optimistic_id) = optimistic_id {
                self.take_optimistic(optimistic_id);
            }
            self.mutate(|state| {
                if state.notification_settings.get(room_id) == Some(&settings) {
                    return;
                }
                Arc::make_mut(&mut state.notification_settings)
                    .insert(room_id.to_string(), settings);
            });
        });
    }

    // ---- Query state ----

    pub fn set_query_loading(&self, key: &str) {
        debug!(query = %key, "query loading");
        self.mutate(|state| state.set_query(key, QueryState::Loading));
    }

    pub fn set_query_error(&self, key: &str, error: impl Into<String>) {
        let error = error.into();
        debug!(query = %key, error = %error, "query failed");
        self.mutate(|state| state.set_query(key, QueryState::Error(error)));
    }

    pub fn set_query_ok(&self, key: &str) {
        debug!(query = %key, "query loaded");
        self.mutate(|state| state.set_query(key, QueryState::Ok));
    }
}

impl Default for OptimisticCache {
    fn default() -> Self {
        Self::new(&SyncConfig::default())
    }
}
