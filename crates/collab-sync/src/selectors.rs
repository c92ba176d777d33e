//! Read helpers over a projected state.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};

use crate::projection::ProjectedState;
use crate::settings::NotificationSettings;
use crate::types::{InboxNotification, Thread, ThreadMetadata};

/// Filter for [`threads_for_room`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadsQuery {
    /// Only threads with this resolved flag, if set.
    #[serde(default)]
    pub resolved: Option<bool>,
    /// Only threads whose metadata contains every one of these entries.
    #[serde(default)]
    pub metadata: ThreadMetadata,
}

impl ThreadsQuery {
    pub fn matches(&self, thread: &Thread) -> bool {
        if self.resolved.is_some_and(|resolved| thread.resolved != resolved) {
            return false;
        }
        self.metadata
            .iter()
            .all(|(key, value)| thread.metadata.get(key) == Some(value))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThreadOrder {
    /// Most recent activity first.
    #[default]
    LastActivity,
    /// Oldest thread first.
    CreatedAt,
}

/// Live threads of a room that match `query`.
pub fn threads_for_room(
    state: &ProjectedState,
    room_id: &str,
    query: &ThreadsQuery,
    order: ThreadOrder,
) -> Vec<Thread> {
    let mut threads: Vec<Thread> = state
        .threads
        .values()
        .filter(|t| t.room_id == room_id && !t.is_deleted() && query.matches(t))
        .cloned()
        .collect();

    match order {
        ThreadOrder::LastActivity => {
            threads.sort_by(|a, b| {
                b.last_activity()
                    .cmp(&a.last_activity())
                    .then_with(|| a.id.cmp(&b.id))
            });
        }
        ThreadOrder::CreatedAt => {
            threads.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        }
    }
    threads
}

/// All inbox notifications, newest first.
pub fn inbox_notifications(state: &ProjectedState) -> Vec<InboxNotification> {
    let mut notifications: Vec<InboxNotification> =
        state.inbox_notifications.values().cloned().collect();
    notifications.sort_by_key(|n| (Reverse(n.notified_at), n.id.clone()));
    notifications
}

pub fn unread_inbox_notifications_count(state: &ProjectedState) -> usize {
    state
        .inbox_notifications
        .values()
        .filter(|n| n.is_unread())
        .count()
}

/// A live thread by id.
pub fn thread<'a>(state: &'a ProjectedState, thread_id: &str) -> Option<&'a Thread> {
    state.threads.get(thread_id).filter(|t| !t.is_deleted())
}

pub fn room_notification_settings<'a>(
    state: &'a ProjectedState,
    room_id: &str,
) -> Option<&'a NotificationSettings> {
    state.notification_settings.get(room_id)
}
