//! Read-time overlay of pending optimistic updates onto confirmed state.
//!
//! The projection is recomputed on every read and never written back, so a
//! rolled-back update simply stops showing up.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::cache::CacheState;
use crate::optimistic::{OptimisticEffect, OptimisticUpdate};
use crate::reconcile::{
    add_reaction, delete_comment, delete_thread, patch_metadata, remove_reaction, set_resolved,
    upsert_comment,
};
use crate::settings::NotificationSettings;
use crate::types::{InboxNotification, QueryState, Thread};

/// Confirmed state with every pending optimistic update applied.
#[derive(Debug, Clone, Default)]
pub struct ProjectedState {
    pub threads: Arc<HashMap<String, Thread>>,
    pub inbox_notifications: Arc<HashMap<String, InboxNotification>>,
    pub notification_settings: Arc<HashMap<String, NotificationSettings>>,
    pub queries: Arc<HashMap<String, QueryState>>,
}

/// Overlay `state.optimistic_updates`, in insertion order, onto the
/// confirmed maps. Maps no update touches are shared with `state`.
pub fn apply_optimistic_updates(state: &CacheState) -> ProjectedState {
    let mut output = ProjectedState {
        threads: Arc::clone(&state.threads),
        inbox_notifications: Arc::clone(&state.inbox_notifications),
        notification_settings: Arc::clone(&state.notification_settings),
        queries: Arc::clone(&state.queries),
    };

    for update in state.optimistic_updates.iter() {
        apply_update(&mut output, update);
    }

    output
}

fn apply_update(output: &mut ProjectedState, update: &OptimisticUpdate) {
    match &update.effect {
        OptimisticEffect::CreateThread { thread } => {
            Arc::make_mut(&mut output.threads).insert(thread.id.clone(), thread.clone());
        }

        OptimisticEffect::DeleteThread {
            thread_id,
            deleted_at,
            ..
        } => {
            map_live_thread(&mut output.threads, thread_id, |t| delete_thread(t, *deleted_at));
        }

        OptimisticEffect::EditThreadMetadata {
            thread_id,
            metadata,
            updated_at,
        } => {
            let confirmed_later = output
                .threads
                .get(thread_id)
                .and_then(|t| t.updated_at)
                .is_some_and(|confirmed| confirmed > *updated_at);
            if confirmed_later {
                trace!(update_id = %update.id, "metadata edit superseded by confirmed update");
                return;
            }
            map_live_thread(&mut output.threads, thread_id, |t| {
                patch_metadata(t, metadata, *updated_at)
            });
        }

        OptimisticEffect::MarkThreadAsResolved {
            thread_id,
            updated_at,
        } => {
            map_live_thread(&mut output.threads, thread_id, |t| {
                set_resolved(t, true, *updated_at)
            });
        }

        OptimisticEffect::MarkThreadAsUnresolved {
            thread_id,
            updated_at,
        } => {
            map_live_thread(&mut output.threads, thread_id, |t| {
                set_resolved(t, false, *updated_at)
            });
        }

        OptimisticEffect::CreateComment { comment } => {
            let applied = map_live_thread(&mut output.threads, &comment.thread_id, |t| {
                upsert_comment(t, comment.clone())
            });
            if applied {
                mark_thread_notification_read(
                    &mut output.inbox_notifications,
                    &comment.thread_id,
                    comment.created_at,
                );
            }
        }

        OptimisticEffect::EditComment { comment } => {
            map_live_thread(&mut output.threads, &comment.thread_id, |t| {
                upsert_comment(t, comment.clone())
            });
        }

        OptimisticEffect::DeleteComment {
            thread_id,
            comment_id,
            deleted_at,
        } => {
            map_live_thread(&mut output.threads, thread_id, |t| {
                delete_comment(t, comment_id, *deleted_at)
            });
        }

        OptimisticEffect::AddReaction {
            thread_id,
            comment_id,
            reaction,
        } => {
            map_live_thread(&mut output.threads, thread_id, |t| {
                add_reaction(t, comment_id, reaction.clone())
            });
        }

        OptimisticEffect::RemoveReaction {
            thread_id,
            comment_id,
            emoji,
            user_id,
            removed_at,
        } => {
            map_live_thread(&mut output.threads, thread_id, |t| {
                remove_reaction(t, comment_id, emoji, user_id, *removed_at)
            });
        }

        OptimisticEffect::MarkInboxNotificationAsRead {
            inbox_notification_id,
            read_at,
        } => {
            if output.inbox_notifications.contains_key(inbox_notification_id) {
                let notifications = Arc::make_mut(&mut output.inbox_notifications);
                if let Some(notification) = notifications.get_mut(inbox_notification_id) {
                    notification.read_at = Some(*read_at);
                }
            }
        }

        OptimisticEffect::MarkAllInboxNotificationsAsRead { read_at } => {
            if !output.inbox_notifications.is_empty() {
                for notification in Arc::make_mut(&mut output.inbox_notifications).values_mut() {
                    notification.read_at = Some(*read_at);
                }
            }
        }

        OptimisticEffect::DeleteInboxNotification {
            inbox_notification_id,
            ..
        } => {
            if output.inbox_notifications.contains_key(inbox_notification_id) {
                Arc::make_mut(&mut output.inbox_notifications).remove(inbox_notification_id);
            }
        }

        OptimisticEffect::DeleteAllInboxNotifications { .. } => {
            if !output.inbox_notifications.is_empty() {
                output.inbox_notifications = Arc::new(HashMap::new());
            }
        }

        OptimisticEffect::UpdateNotificationSettings { room_id, settings } => {
            let merged = match output.notification_settings.get(room_id) {
                Some(existing) => existing.merged(settings),
                None => settings.clone(),
            };
            Arc::make_mut(&mut output.notification_settings).insert(room_id.clone(), merged);
        }
    }
}

/// Replace a present, non-deleted thread with `f(thread)`. Returns whether
/// the thread was there to update.
fn map_live_thread(
    threads: &mut Arc<HashMap<String, Thread>>,
    thread_id: &str,
    f: impl FnOnce(Thread) -> Thread,
) -> bool {
    let Some(thread) = threads.get(thread_id) else {
        return false;
    };
    if thread.is_deleted() {
        return false;
    }
    let next = f(thread.clone());
    Arc::make_mut(threads).insert(thread_id.to_string(), next);
    true
}

/// Posting in a thread reads its notification: bump the thread's inbox
/// notification to the comment time, read.
pub(crate) fn mark_thread_notification_read(
    notifications: &mut Arc<HashMap<String, InboxNotification>>,
    thread_id: &str,
    at: DateTime<Utc>,
) {
    let Some(id) = notifications
        .values()
        .find(|n| n.thread_id() == Some(thread_id))
        .map(|n| n.id.clone())
    else {
        return;
    };
    if let Some(notification) = Arc::make_mut(notifications).get_mut(&id) {
        notification.notified_at = at;
        notification.read_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, comment, notification, reaction, thread};
    use pretty_assertions::assert_eq;

    fn state_with(threads: Vec<Thread>, notifications: Vec<InboxNotification>) -> CacheState {
        CacheState {
            threads: Arc::new(threads.into_iter().map(|t| (t.id.clone(), t)).collect()),
            inbox_notifications: Arc::new(
                notifications.into_iter().map(|n| (n.id.clone(), n)).collect(),
            ),
            ..CacheState::default()
        }
    }

    fn queued(state: &mut CacheState, effect: OptimisticEffect) {
        let id = format!("opt{}", state.optimistic_updates.len());
        Arc::make_mut(&mut state.optimistic_updates).push(OptimisticUpdate { id, effect });
    }

    #[test]
    fn test_empty_queue_shares_base_maps() {
        let state = state_with(vec![thread("t1", 0, &["c1"])], vec![]);
        let projected = apply_optimistic_updates(&state);
        assert!(Arc::ptr_eq(&projected.threads, &state.threads));
        assert!(Arc::ptr_eq(&projected.inbox_notifications, &state.inbox_notifications));
    }

    #[test]
    fn test_create_comment_appears_and_reads_notification() {
        let mut state = state_with(
            vec![thread("t1", 0, &["c1"])],
            vec![notification("n1", "t1", 1, None)],
        );
        queued(
            &mut state,
            OptimisticEffect::CreateComment {
                comment: comment("t1", "c2", 5),
            },
        );

        let projected = apply_optimistic_updates(&state);
        assert_eq!(projected.threads["t1"].comments.len(), 2);
        assert_eq!(projected.inbox_notifications["n1"].read_at, Some(at(5)));
        assert_eq!(projected.inbox_notifications["n1"].notified_at, at(5));
        // base untouched
        assert_eq!(state.threads["t1"].comments.len(), 1);
    }

    #[test]
    fn test_updates_fold_in_insertion_order() {
        let mut state = state_with(vec![thread("t1", 0, &["c1"])], vec![]);
        queued(
            &mut state,
            OptimisticEffect::AddReaction {
                thread_id: "t1".into(),
                comment_id: "c1".into(),
                reaction: reaction("👍", "alice", 2),
            },
        );
        queued(
            &mut state,
            OptimisticEffect::RemoveReaction {
                thread_id: "t1".into(),
                comment_id: "c1".into(),
                emoji: "👍".into(),
                user_id: "alice".into(),
                removed_at: at(3),
            },
        );

        let projected = apply_optimistic_updates(&state);
        assert!(projected.threads["t1"].comments[0].reactions.is_empty());
    }

    #[test]
    fn test_metadata_edit_skipped_when_confirmed_later() {
        let mut t = thread("t1", 0, &["c1"]);
        t.updated_at = Some(at(10));
        let mut state = state_with(vec![t], vec![]);
        queued(
            &mut state,
            OptimisticEffect::EditThreadMetadata {
                thread_id: "t1".into(),
                metadata: [("color".to_string(), Some(serde_json::json!("red")))].into(),
                updated_at: at(5),
            },
        );

        let projected = apply_optimistic_updates(&state);
        assert!(projected.threads["t1"].metadata.is_empty());
    }

    #[test]
    fn test_metadata_edit_applies_when_newer() {
        let mut state = state_with(vec![thread("t1", 0, &["c1"])], vec![]);
        queued(
            &mut state,
            OptimisticEffect::EditThreadMetadata {
                thread_id: "t1".into(),
                metadata: [("color".to_string(), Some(serde_json::json!("red")))].into(),
                updated_at: at(5),
            },
        );

        let projected = apply_optimistic_updates(&state);
        assert_eq!(
            projected.threads["t1"].metadata.get("color"),
            Some(&serde_json::json!("red"))
        );
    }

    #[test]
    fn test_updates_for_deleted_or_missing_threads_are_ignored() {
        let deleted = delete_thread(thread("t1", 0, &["c1"]), at(3));
        let mut state = state_with(vec![deleted.clone()], vec![]);
        queued(
            &mut state,
            OptimisticEffect::MarkThreadAsResolved {
                thread_id: "t1".into(),
                updated_at: at(4),
            },
        );
        queued(
            &mut state,
            OptimisticEffect::MarkThreadAsResolved {
                thread_id: "missing".into(),
                updated_at: at(4),
            },
        );

        let projected = apply_optimistic_updates(&state);
        assert_eq!(projected.threads["t1"], deleted);
        assert!(!projected.threads.contains_key("missing"));
    }

    #[test]
    fn test_create_then_delete_thread() {
        let mut state = CacheState::default();
        queued(
            &mut state,
            OptimisticEffect::CreateThread {
                thread: thread("t9", 1, &["c1"]),
            },
        );
        queued(
            &mut state,
            OptimisticEffect::DeleteThread {
                room_id: "room".into(),
                thread_id: "t9".into(),
                deleted_at: at(2),
            },
        );

        let projected = apply_optimistic_updates(&state);
        assert_eq!(projected.threads["t9"].deleted_at, Some(at(2)));
    }

    #[test]
    fn test_notification_effects() {
        let mut state = state_with(
            vec![],
            vec![
                notification("n1", "t1", 1, None),
                notification("n2", "t2", 2, None),
                notification("n3", "t3", 3, None),
            ],
        );
        queued(
            &mut state,
            OptimisticEffect::MarkInboxNotificationAsRead {
                inbox_notification_id: "n1".into(),
                read_at: at(4),
            },
        );
        queued(
            &mut state,
            OptimisticEffect::DeleteInboxNotification {
                inbox_notification_id: "n2".into(),
                deleted_at: at(5),
            },
        );

        let projected = apply_optimistic_updates(&state);
        assert_eq!(projected.inbox_notifications["n1"].read_at, Some(at(4)));
        assert!(!projected.inbox_notifications.contains_key("n2"));
        assert_eq!(projected.inbox_notifications["n3"].read_at, None);

        queued(
            &mut state,
            OptimisticEffect::MarkAllInboxNotificationsAsRead { read_at: at(6) },
        );
        let projected = apply_optimistic_updates(&state);
        assert!(projected.inbox_notifications.values().all(|n| n.read_at == Some(at(6))));

        queued(
            &mut state,
            OptimisticEffect::DeleteAllInboxNotifications { deleted_at: at(7) },
        );
        let projected = apply_optimistic_updates(&state);
        assert!(projected.inbox_notifications.is_empty());
        assert_eq!(state.inbox_notifications.len(), 3);
    }

    #[test]
    fn test_notification_settings_are_merged() {
        use crate::settings::NotificationChannel;
        use std::collections::BTreeMap;

        let mut base = NotificationSettings::default();
        base.channels.insert(
            NotificationChannel::Email,
            BTreeMap::from([("thread".to_string(), true)]),
        );
        let mut state = CacheState {
            notification_settings: Arc::new(HashMap::from([("room".to_string(), base)])),
            ..CacheState::default()
        };

        let mut patch = NotificationSettings::default();
        patch.channels.insert(
            NotificationChannel::Slack,
            BTreeMap::from([("thread".to_string(), true)]),
        );
        queued(
            &mut state,
            OptimisticEffect::UpdateNotificationSettings {
                room_id: "room".into(),
                settings: patch,
            },
        );

        let projected = apply_optimistic_updates(&state);
        let settings = &projected.notification_settings["room"];
        assert!(settings.is_enabled(NotificationChannel::Email, "thread"));
        assert!(settings.is_enabled(NotificationChannel::Slack, "thread"));
    }
}
