//! Client-side sync engine for realtime collaboration.
//!
//! This crate mirrors server-owned collaboration entities locally and keeps
//! the mirror consistent while confirmed changes arrive out of order and
//! local changes are shown before the server confirms them.
//!
//! ## Features
//!
//! - **Store**: observable `Arc` snapshot with batched notifications
//! - **Reconciliation**: pure newer-wins merge functions for threads,
//!   comments, reactions and inbox notifications
//! - **OptimisticCache**: confirmed state plus a queue of pending local
//!   mutations, projected at read time
//! - **KeyedBatch / BatchCache**: coalescing and memoization of lookups
//!   against a remote resolver

pub mod batch;
pub mod batch_cache;
pub mod batch_store;
pub mod cache;
pub mod config;
pub mod context;
mod error;
pub mod optimistic;
pub mod projection;
pub mod reconcile;
pub mod selectors;
pub mod settings;
pub mod store;
mod types;

pub use batch::{BatchCallback, KeyedBatch};
pub use batch_cache::BatchCache;
pub use batch_store::{AsyncResult, BatchStore, BatchStoreState};
pub use cache::{CacheState, OptimisticCache};
pub use config::{BatchOptions, DEFAULT_BATCH_DELAY, DEFAULT_BATCH_SIZE, SyncConfig};
pub use context::EngineContext;
pub use error::{BatchError, SettingsError};
pub use optimistic::{OptimisticEffect, OptimisticUpdate};
pub use projection::{ProjectedState, apply_optimistic_updates};
pub use reconcile::{NotificationUpdates, ThreadUpdates};
pub use selectors::{ThreadOrder, ThreadsQuery};
pub use settings::{ChannelSettings, NotificationChannel, NotificationSettings, get_channel};
pub use store::{Store, Unsubscribe};
pub use types::*;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, TimeZone, Utc};

    use crate::types::{
        Comment, CommentContent, CommentUserReaction, InboxNotification, InboxNotificationKind,
        Thread,
    };

    /// A fixed instant plus `secs` seconds.
    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    pub fn comment(thread_id: &str, id: &str, created_secs: i64) -> Comment {
        Comment {
            id: id.to_string(),
            thread_id: thread_id.to_string(),
            room_id: "room".to_string(),
            user_id: "user".to_string(),
            created_at: at(created_secs),
            edited_at: None,
            reactions: Vec::new(),
            content: CommentContent::Body {
                body: serde_json::json!({ "text": id }),
            },
        }
    }

    /// A live thread in room `room` whose comments were all created with it.
    pub fn thread(id: &str, created_secs: i64, comment_ids: &[&str]) -> Thread {
        Thread {
            id: id.to_string(),
            room_id: "room".to_string(),
            created_at: at(created_secs),
            updated_at: None,
            metadata: Default::default(),
            resolved: false,
            comments: comment_ids
                .iter()
                .map(|c| comment(id, c, created_secs))
                .collect(),
            deleted_at: None,
        }
    }

    pub fn reaction(emoji: &str, user_id: &str, secs: i64) -> CommentUserReaction {
        CommentUserReaction {
            emoji: emoji.to_string(),
            user_id: user_id.to_string(),
            created_at: at(secs),
        }
    }

    pub fn notification(
        id: &str,
        thread_id: &str,
        notified_secs: i64,
        read_secs: Option<i64>,
    ) -> InboxNotification {
        InboxNotification {
            id: id.to_string(),
            room_id: Some("room".to_string()),
            notified_at: at(notified_secs),
            read_at: read_secs.map(at),
            kind: InboxNotificationKind::Thread {
                thread_id: thread_id.to_string(),
            },
        }
    }
}
