//! Pure reconciliation of server and local changes, one entity at a time.
//!
//! Every function takes an entity by value and returns the next version of
//! it. A change that is stale, or that targets something already deleted,
//! returns the input unchanged. These functions never fail: out-of-order
//! arrival is expected, not exceptional.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::types::{
    Comment, CommentContent, CommentUserReaction, InboxNotification, InboxNotificationDeleteInfo,
    Reaction, ReactionUser, Thread, ThreadDeleteInfo, ThreadMetadataPatch,
};

/// Threads changed or deleted since the last delta sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadUpdates {
    #[serde(default)]
    pub new_threads: Vec<Thread>,
    #[serde(default)]
    pub deleted_threads: Vec<ThreadDeleteInfo>,
}

/// Inbox notifications changed or deleted since the last delta sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationUpdates {
    #[serde(default)]
    pub new_inbox_notifications: Vec<InboxNotification>,
    #[serde(default)]
    pub deleted_inbox_notifications: Vec<InboxNotificationDeleteInfo>,
}

/// Raise an optional timestamp to at least `at`. Never moves it backward.
fn raise(current: Option<DateTime<Utc>>, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(current.map_or(at, |current| current.max(at)))
}

/// Order two versions of a thread by recency.
///
/// Both with `updated_at`: compare those. Only one with `updated_at`: that
/// one is newer. Neither: compare `created_at`.
pub fn compare_threads(a: &Thread, b: &Thread) -> Ordering {
    match (a.updated_at, b.updated_at) {
        (Some(a_updated), Some(b_updated)) => a_updated.cmp(&b_updated),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.created_at.cmp(&b.created_at),
    }
}

/// Order two versions of an inbox notification by recency: `notified_at`
/// first, then `read_at` (a read version is newer than an unread one).
pub fn compare_inbox_notifications(a: &InboxNotification, b: &InboxNotification) -> Ordering {
    a.notified_at
        .cmp(&b.notified_at)
        .then_with(|| match (a.read_at, b.read_at) {
            (Some(a_read), Some(b_read)) => a_read.cmp(&b_read),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        })
}

/// Insert a new comment or apply an edit to an existing one.
///
/// Edits only move forward in time, and a tombstoned comment stays
/// tombstoned.
pub fn upsert_comment(mut thread: Thread, comment: Comment) -> Thread {
    if thread.is_deleted() {
        return thread;
    }
    if comment.thread_id != thread.id {
        trace!(
            thread_id = %thread.id,
            comment_thread_id = %comment.thread_id,
            "ignoring comment for another thread"
        );
        return thread;
    }

    match thread.comments.iter().position(|c| c.id == comment.id) {
        None => {
            thread.updated_at = raise(thread.updated_at, comment.created_at);
            thread.comments.push(comment);
        }
        Some(index) => {
            let existing = &thread.comments[index];
            if existing.is_deleted() {
                return thread;
            }
            let is_newer = match (comment.edited_at, existing.edited_at) {
                (Some(incoming), Some(current)) => incoming >= current,
                _ => true,
            };
            if !is_newer {
                trace!(comment_id = %comment.id, "ignoring stale comment edit");
                return thread;
            }
            thread.updated_at = raise(thread.updated_at, comment.last_edit());
            thread.comments[index] = comment;
        }
    }
    thread
}

/// Tombstone a comment. Deleting the last live comment deletes the thread.
pub fn delete_comment(mut thread: Thread, comment_id: &str, deleted_at: DateTime<Utc>) -> Thread {
    if thread.is_deleted() {
        return thread;
    }
    let Some(index) = thread.comments.iter().position(|c| c.id == comment_id) else {
        return thread;
    };
    if thread.comments[index].is_deleted() {
        return thread;
    }

    thread.comments[index].content = CommentContent::Deleted { deleted_at };

    if thread.live_comment_count() == 0 {
        return delete_thread(thread, deleted_at);
    }

    thread.updated_at = raise(thread.updated_at, deleted_at);
    thread
}

/// Tombstone a thread: `deleted_at = updated_at = deleted_at`, no comments.
pub fn delete_thread(mut thread: Thread, deleted_at: DateTime<Utc>) -> Thread {
    thread.deleted_at = Some(deleted_at);
    thread.updated_at = Some(deleted_at);
    thread.comments = Vec::new();
    thread
}

/// Add a user's reaction to a comment. Adding the same emoji twice for the
/// same user changes nothing.
pub fn add_reaction(mut thread: Thread, comment_id: &str, reaction: CommentUserReaction) -> Thread {
    if thread.is_deleted() {
        return thread;
    }
    let Some(comment) = live_comment_mut(&mut thread, comment_id) else {
        return thread;
    };

    match comment.reactions.iter().position(|r| r.emoji == reaction.emoji) {
        Some(index) if comment.reactions[index].has_user(&reaction.user_id) => return thread,
        Some(index) => comment.reactions[index].users.push(ReactionUser {
            id: reaction.user_id,
        }),
        None => comment.reactions.push(Reaction {
            emoji: reaction.emoji,
            created_at: reaction.created_at,
            users: vec![ReactionUser {
                id: reaction.user_id,
            }],
        }),
    }

    thread.updated_at = raise(thread.updated_at, reaction.created_at);
    thread
}

/// Remove a user's reaction. A bucket with no users left disappears.
pub fn remove_reaction(
    mut thread: Thread,
    comment_id: &str,
    emoji: &str,
    user_id: &str,
    removed_at: DateTime<Utc>,
) -> Thread {
    if thread.is_deleted() {
        return thread;
    }
    let Some(comment) = live_comment_mut(&mut thread, comment_id) else {
        return thread;
    };
    let Some(index) = comment.reactions.iter().position(|r| r.emoji == emoji) else {
        return thread;
    };
    if !comment.reactions[index].has_user(user_id) {
        return thread;
    }

    comment.reactions[index].users.retain(|u| u.id != user_id);
    if comment.reactions[index].users.is_empty() {
        comment.reactions.remove(index);
    }

    thread.updated_at = raise(thread.updated_at, removed_at);
    thread
}

/// Merge a metadata patch into a thread. `None` values remove keys.
pub fn patch_metadata(
    mut thread: Thread,
    patch: &ThreadMetadataPatch,
    updated_at: DateTime<Utc>,
) -> Thread {
    if thread.is_deleted() {
        return thread;
    }
    for (key, value) in patch {
        match value {
            Some(value) => {
                thread.metadata.insert(key.clone(), value.clone());
            }
            None => {
                thread.metadata.remove(key);
            }
        }
    }
    thread.updated_at = raise(thread.updated_at, updated_at);
    thread
}

/// Mark a thread resolved or unresolved.
pub fn set_resolved(mut thread: Thread, resolved: bool, updated_at: DateTime<Utc>) -> Thread {
    if thread.is_deleted() {
        return thread;
    }
    thread.resolved = resolved;
    thread.updated_at = raise(thread.updated_at, updated_at);
    thread
}

fn live_comment_mut<'a>(thread: &'a mut Thread, comment_id: &str) -> Option<&'a mut Comment> {
    thread
        .comments
        .iter_mut()
        .find(|c| c.id == comment_id && !c.is_deleted())
}

/// Fold a thread delta into the cached threads.
///
/// An incoming thread replaces the cached one unless the cached one is
/// strictly newer. Deletions stamp threads that are present and drop the
/// rest: a deletion never creates a thread.
pub fn apply_thread_updates(
    mut threads: HashMap<String, Thread>,
    updates: &ThreadUpdates,
) -> HashMap<String, Thread> {
    for incoming in &updates.new_threads {
        let cached_is_newer = threads
            .get(&incoming.id)
            .is_some_and(|existing| compare_threads(existing, incoming) == Ordering::Greater);
        if cached_is_newer {
            trace!(thread_id = %incoming.id, "keeping newer cached thread");
            continue;
        }
        threads.insert(incoming.id.clone(), incoming.clone());
    }

    for deleted in &updates.deleted_threads {
        match threads.remove(&deleted.id) {
            Some(existing) => {
                threads.insert(deleted.id.clone(), delete_thread(existing, deleted.deleted_at));
            }
            None => trace!(thread_id = %deleted.id, "dropping deletion for unknown thread"),
        }
    }

    threads
}

/// Fold a notification delta into the cached inbox notifications.
///
/// Same newer-wins rule as threads; deletions remove the entry outright.
pub fn apply_notifications_updates(
    mut notifications: HashMap<String, InboxNotification>,
    updates: &NotificationUpdates,
) -> HashMap<String, InboxNotification> {
    for incoming in &updates.new_inbox_notifications {
        let cached_is_newer = notifications.get(&incoming.id).is_some_and(|existing| {
            compare_inbox_notifications(existing, incoming) == Ordering::Greater
        });
        if cached_is_newer {
            trace!(notification_id = %incoming.id, "keeping newer cached notification");
            continue;
        }
        notifications.insert(incoming.id.clone(), incoming.clone());
    }

    for deleted in &updates.deleted_inbox_notifications {
        notifications.remove(&deleted.id);
    }

    notifications
}
