//! Drive an [`OptimisticCache`] through a script.

use std::collections::HashMap;

use tracing::{debug, info};

use collab_sync::{OptimisticCache, OptimisticEffect, OptimisticUpdate};

use crate::error::ReplayError;
use crate::script::Step;

/// Replays steps against a cache, tracking labelled optimistic updates.
pub struct Replayer {
    cache: OptimisticCache,
    labels: HashMap<String, OptimisticUpdate>,
}

impl Replayer {
    pub fn new(cache: OptimisticCache) -> Self {
        Self {
            cache,
            labels: HashMap::new(),
        }
    }

    pub fn cache(&self) -> &OptimisticCache {
        &self.cache
    }

    /// Labels of optimistic updates that were neither confirmed nor rolled
    /// back, sorted.
    pub fn pending_labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.labels.keys().map(String::as_str).collect();
        labels.sort_unstable();
        labels
    }

    pub fn run(&mut self, steps: Vec<Step>) -> Result<(), ReplayError> {
        let total = steps.len();
        for (index, step) in steps.into_iter().enumerate() {
            debug!(step = index + 1, kind = step.name(), "applying step");
            self.apply(index + 1, step)?;
        }
        info!(
            steps = total,
            pending = self.labels.len(),
            "replay finished"
        );
        Ok(())
    }

    fn apply(&mut self, step: usize, current: Step) -> Result<(), ReplayError> {
        match current {
            Step::Delta {
                threads,
                notifications,
                query_key,
            } => {
                self.cache.update_threads_and_notifications(
                    &threads,
                    &notifications,
                    query_key.as_deref(),
                );
            }

            Step::Optimistic { label, effect } => {
                if self.labels.contains_key(&label) {
                    return Err(ReplayError::DuplicateLabel { step, label });
                }
                let id = self.cache.add_optimistic_update(effect.clone());
                self.labels.insert(label, OptimisticUpdate { id, effect });
            }

            Step::Rollback { label } => {
                let update = self.take(step, label)?;
                self.cache.remove_optimistic_update(&update.id);
            }

            Step::Confirm { label } => {
                let update = self.take(step, label)?;
                confirm(&self.cache, &update.id, update.effect);
            }

            Step::ConfirmComment { label, comment } => {
                let update = self.take(step, label)?;
                self.cache.create_comment(comment, &update.id);
            }

            Step::ConfirmThread { label, thread } => {
                let update = self.take(step, label)?;
                self.cache.create_thread(&update.id, thread);
            }
        }
        Ok(())
    }

    fn take(&mut self, step: usize, label: String) -> Result<OptimisticUpdate, ReplayError> {
        self.labels
            .remove(&label)
            .ok_or(ReplayError::UnknownLabel { step, label })
    }
}

/// Commit `effect` as if the server accepted it unchanged.
pub fn confirm(cache: &OptimisticCache, optimistic_id: &str, effect: OptimisticEffect) {
    match effect {
        OptimisticEffect::CreateThread { thread } => cache.create_thread(optimistic_id, thread),
        OptimisticEffect::DeleteThread {
            thread_id,
            deleted_at,
            ..
        } => cache.delete_thread(&thread_id, optimistic_id, deleted_at),
        OptimisticEffect::EditThreadMetadata {
            thread_id,
            metadata,
            updated_at,
        } => cache.patch_thread_metadata(&thread_id, optimistic_id, &metadata, updated_at),
        OptimisticEffect::MarkThreadAsResolved {
            thread_id,
            updated_at,
        } => cache.mark_thread_resolved(&thread_id, optimistic_id, true, updated_at),
        OptimisticEffect::MarkThreadAsUnresolved {
            thread_id,
            updated_at,
        } => cache.mark_thread_resolved(&thread_id, optimistic_id, false, updated_at),
        OptimisticEffect::CreateComment { comment } | OptimisticEffect::EditComment { comment } => {
            cache.create_comment(comment, optimistic_id)
        }
        OptimisticEffect::DeleteComment {
            thread_id,
            comment_id,
            deleted_at,
        } => cache.delete_comment(&thread_id, optimistic_id, &comment_id, deleted_at),
        OptimisticEffect::AddReaction {
            thread_id,
            comment_id,
            reaction,
        } => cache.add_reaction(&thread_id, optimistic_id, &comment_id, reaction),
        OptimisticEffect::RemoveReaction {
            thread_id,
            comment_id,
            emoji,
            user_id,
            removed_at,
        } => cache.remove_reaction(
            &thread_id,
            optimistic_id,
            &comment_id,
            &emoji,
            &user_id,
            removed_at,
        ),
        OptimisticEffect::MarkInboxNotificationAsRead {
            inbox_notification_id,
            read_at,
        } => cache.mark_inbox_notification_as_read(&inbox_notification_id, optimistic_id, read_at),
        OptimisticEffect::MarkAllInboxNotificationsAsRead { read_at } => {
            cache.mark_all_inbox_notifications_as_read(optimistic_id, read_at)
        }
        OptimisticEffect::DeleteInboxNotification {
            inbox_notification_id,
            ..
        } => cache.delete_inbox_notification(&inbox_notification_id, optimistic_id),
        OptimisticEffect::DeleteAllInboxNotifications { .. } => {
            cache.delete_all_inbox_notifications(optimistic_id)
        }
        OptimisticEffect::UpdateNotificationSettings { room_id, settings } => {
            // The server answers with the merged settings for the room.
            let merged = match cache.get().notification_settings.get(&room_id) {
                Some(existing) => existing.merged(&settings),
                None => settings,
            };
            cache.update_room_notification_settings(&room_id, Some(optimistic_id), merged)
        }
    }
}
