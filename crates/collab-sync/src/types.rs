//! Entity records mirrored from the collaboration server.
//!
//! Every type here is an immutable value: reconciliation produces new
//! records instead of editing existing ones in place. Field names follow the
//! server's camelCase JSON so delta payloads deserialize directly.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque thread metadata, as set by the application.
pub type ThreadMetadata = BTreeMap<String, serde_json::Value>;

/// Partial metadata update. `None` removes the key.
pub type ThreadMetadataPatch = BTreeMap<String, Option<serde_json::Value>>;

/// Opaque rich-text comment body.
pub type CommentBody = serde_json::Value;

/// A discussion thread with its embedded comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub room_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: ThreadMetadata,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub comments: Vec<Comment>,
    /// Tombstone. Once set, `comments` is empty and the thread is frozen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Thread {
    /// Whether this thread has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Latest known activity: `updated_at` when present, else `created_at`.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// Find a comment by id.
    pub fn comment(&self, comment_id: &str) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == comment_id)
    }

    /// Number of comments that are not tombstoned.
    pub fn live_comment_count(&self) -> usize {
        self.comments.iter().filter(|c| !c.is_deleted()).count()
    }
}

/// Either the comment's content or its deletion marker. Never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommentContent {
    Body {
        body: CommentBody,
    },
    #[serde(rename_all = "camelCase")]
    Deleted {
        deleted_at: DateTime<Utc>,
    },
}

/// A comment embedded in a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub thread_id: String,
    pub room_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(flatten)]
    pub content: CommentContent,
}

impl Comment {
    pub fn is_deleted(&self) -> bool {
        matches!(self.content, CommentContent::Deleted { .. })
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self.content {
            CommentContent::Deleted { deleted_at } => Some(deleted_at),
            CommentContent::Body { .. } => None,
        }
    }

    pub fn body(&self) -> Option<&CommentBody> {
        match &self.content {
            CommentContent::Body { body } => Some(body),
            CommentContent::Deleted { .. } => None,
        }
    }

    /// Timestamp of the last content change (edit or creation).
    pub fn last_edit(&self) -> DateTime<Utc> {
        self.edited_at.unwrap_or(self.created_at)
    }
}

/// A user who reacted with a given emoji.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReactionUser {
    pub id: String,
}

/// All reactions of one emoji on a comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    /// When the first user reacted with this emoji.
    pub created_at: DateTime<Utc>,
    pub users: Vec<ReactionUser>,
}

impl Reaction {
    pub fn has_user(&self, user_id: &str) -> bool {
        self.users.iter().any(|u| u.id == user_id)
    }
}

/// A single user's reaction, as carried by add-reaction updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentUserReaction {
    pub emoji: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// One activity of a custom inbox notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxNotificationActivity {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Kind-specific part of an inbox notification.
///
/// On the wire the `kind` field is `thread`, `textMention`, or an
/// application-defined name starting with `$`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNotificationKind", into = "RawNotificationKind")]
pub enum InboxNotificationKind {
    Thread {
        thread_id: String,
    },
    TextMention {
        mention_id: String,
        created_by: String,
    },
    /// Application-defined kind; `kind` keeps the `$` prefix.
    Custom {
        kind: String,
        subject_id: String,
        activities: Vec<InboxNotificationActivity>,
    },
}

impl InboxNotificationKind {
    /// Name used as the key in per-channel notification settings.
    pub fn name(&self) -> &str {
        match self {
            InboxNotificationKind::Thread { .. } => "thread",
            InboxNotificationKind::TextMention { .. } => "textMention",
            InboxNotificationKind::Custom { kind, .. } => kind,
        }
    }
}

/// Flat wire shape shared by every notification kind.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNotificationKind {
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mention_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    activities: Option<Vec<InboxNotificationActivity>>,
}

fn required(field: Option<String>, kind: &str, name: &str) -> Result<String, String> {
    field.ok_or_else(|| format!("{kind} notification is missing `{name}`"))
}

impl TryFrom<RawNotificationKind> for InboxNotificationKind {
    type Error = String;

    fn try_from(raw: RawNotificationKind) -> Result<Self, Self::Error> {
        match raw.kind.as_str() {
            "thread" => Ok(InboxNotificationKind::Thread {
                thread_id: required(raw.thread_id, "thread", "threadId")?,
            }),
            "textMention" => Ok(InboxNotificationKind::TextMention {
                mention_id: required(raw.mention_id, "textMention", "mentionId")?,
                created_by: required(raw.created_by, "textMention", "createdBy")?,
            }),
            custom if custom.starts_with('$') => Ok(InboxNotificationKind::Custom {
                subject_id: required(raw.subject_id, custom, "subjectId")?,
                activities: raw.activities.unwrap_or_default(),
                kind: raw.kind,
            }),
            other => Err(format!("unknown inbox notification kind `{other}`")),
        }
    }
}

impl From<InboxNotificationKind> for RawNotificationKind {
    fn from(kind: InboxNotificationKind) -> Self {
        let mut raw = RawNotificationKind {
            kind: kind.name().to_string(),
            thread_id: None,
            mention_id: None,
            created_by: None,
            subject_id: None,
            activities: None,
        };
        match kind {
            InboxNotificationKind::Thread { thread_id } => raw.thread_id = Some(thread_id),
            InboxNotificationKind::TextMention {
                mention_id,
                created_by,
            } => {
                raw.mention_id = Some(mention_id);
                raw.created_by = Some(created_by);
            }
            InboxNotificationKind::Custom {
                subject_id,
                activities,
                ..
            } => {
                raw.subject_id = Some(subject_id);
                raw.activities = Some(activities);
            }
        }
        raw
    }
}

/// An entry in the user's inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxNotification {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub notified_at: DateTime<Utc>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub kind: InboxNotificationKind,
}

impl InboxNotification {
    /// The thread this notification points at, for thread notifications.
    pub fn thread_id(&self) -> Option<&str> {
        match &self.kind {
            InboxNotificationKind::Thread { thread_id } => Some(thread_id),
            _ => None,
        }
    }

    /// Unread means never read, or read before the latest notification.
    pub fn is_unread(&self) -> bool {
        match self.read_at {
            None => true,
            Some(read_at) => read_at < self.notified_at,
        }
    }
}

/// Deletion record for a thread, from a delta sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadDeleteInfo {
    pub id: String,
    pub room_id: String,
    pub deleted_at: DateTime<Utc>,
}

/// Deletion record for an inbox notification, from a delta sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxNotificationDeleteInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub deleted_at: DateTime<Utc>,
}

/// Bookkeeping for a paginated or delta fetch, keyed by an arbitrary string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "camelCase")]
pub enum QueryState {
    Loading,
    Ok,
    Error(String),
}

impl QueryState {
    pub fn is_loading(&self) -> bool {
        matches!(self, QueryState::Loading)
    }
}
