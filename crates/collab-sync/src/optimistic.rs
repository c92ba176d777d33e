//! Local mutations that have not been confirmed by the server yet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::settings::NotificationSettings;
use crate::types::{Comment, CommentUserReaction, Thread, ThreadMetadataPatch};

/// A queued local mutation, identified by the id handed out when it was
/// queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimisticUpdate {
    pub id: String,
    pub effect: OptimisticEffect,
}

/// What a queued local mutation does to the cached entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OptimisticEffect {
    #[serde(rename_all = "camelCase")]
    CreateThread { thread: Thread },

    #[serde(rename_all = "camelCase")]
    DeleteThread {
        room_id: String,
        thread_id: String,
        deleted_at: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    EditThreadMetadata {
        thread_id: String,
        metadata: ThreadMetadataPatch,
        updated_at: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    MarkThreadAsResolved {
        thread_id: String,
        updated_at: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    MarkThreadAsUnresolved {
        thread_id: String,
        updated_at: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    CreateComment { comment: Comment },

    #[serde(rename_all = "camelCase")]
    EditComment { comment: Comment },

    #[serde(rename_all = "camelCase")]
    DeleteComment {
        thread_id: String,
        comment_id: String,
        deleted_at: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    AddReaction {
        thread_id: String,
        comment_id: String,
        reaction: CommentUserReaction,
    },

    #[serde(rename_all = "camelCase")]
    RemoveReaction {
        thread_id: String,
        comment_id: String,
        emoji: String,
        user_id: String,
        removed_at: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    MarkInboxNotificationAsRead {
        inbox_notification_id: String,
        read_at: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    MarkAllInboxNotificationsAsRead { read_at: DateTime<Utc> },

    #[serde(rename_all = "camelCase")]
    DeleteInboxNotification {
        inbox_notification_id: String,
        deleted_at: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    DeleteAllInboxNotifications { deleted_at: DateTime<Utc> },

    #[serde(rename_all = "camelCase")]
    UpdateNotificationSettings {
        room_id: String,
        settings: NotificationSettings,
    },
}

impl OptimisticEffect {
    /// Short name of the mutation kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OptimisticEffect::CreateThread { .. } => "create-thread",
            OptimisticEffect::DeleteThread { .. } => "delete-thread",
            OptimisticEffect::EditThreadMetadata { .. } => "edit-thread-metadata",
            OptimisticEffect::MarkThreadAsResolved { .. } => "mark-thread-as-resolved",
            OptimisticEffect::MarkThreadAsUnresolved { .. } => "mark-thread-as-unresolved",
            OptimisticEffect::CreateComment { .. } => "create-comment",
            OptimisticEffect::EditComment { .. } => "edit-comment",
            OptimisticEffect::DeleteComment { .. } => "delete-comment",
            OptimisticEffect::AddReaction { .. } => "add-reaction",
            OptimisticEffect::RemoveReaction { .. } => "remove-reaction",
            OptimisticEffect::MarkInboxNotificationAsRead { .. } => {
                "mark-inbox-notification-as-read"
            }
            OptimisticEffect::MarkAllInboxNotificationsAsRead { .. } => {
                "mark-all-inbox-notifications-as-read"
            }
            OptimisticEffect::DeleteInboxNotification { .. } => "delete-inbox-notification",
            OptimisticEffect::DeleteAllInboxNotifications { .. } => {
                "delete-all-inbox-notifications"
            }
            OptimisticEffect::UpdateNotificationSettings { .. } => "update-notification-settings",
        }
    }

    /// The thread this mutation targets, if it targets one.
    pub fn thread_id(&self) -> Option<&str> {
        match self {
            OptimisticEffect::CreateThread { thread } => Some(&thread.id),
            OptimisticEffect::CreateComment { comment }
            | OptimisticEffect::EditComment { comment } => Some(&comment.thread_id),
            OptimisticEffect::DeleteThread { thread_id, .. }
            | OptimisticEffect::EditThreadMetadata { thread_id, .. }
            | OptimisticEffect::MarkThreadAsResolved { thread_id, .. }
            | OptimisticEffect::MarkThreadAsUnresolved { thread_id, .. }
            | OptimisticEffect::DeleteComment { thread_id, .. }
            | OptimisticEffect::AddReaction { thread_id, .. }
            | OptimisticEffect::RemoveReaction { thread_id, .. } => Some(thread_id),
            OptimisticEffect::MarkInboxNotificationAsRead { .. }
            | OptimisticEffect::MarkAllInboxNotificationsAsRead { .. }
            | OptimisticEffect::DeleteInboxNotification { .. }
            | OptimisticEffect::DeleteAllInboxNotifications { .. }
            | OptimisticEffect::UpdateNotificationSettings { .. } => None,
        }
    }
}

/// Generate a fresh optimistic update id.
pub(crate) fn new_optimistic_id() -> String {
    format!("opt_{}", uuid::Uuid::new_v4().simple())
}
