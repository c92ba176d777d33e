//! Rendering of the projected cache.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::warn;

use collab_sync::selectors::{self, ThreadOrder, ThreadsQuery};
use collab_sync::{AsyncResult, BatchOptions, BatchStore, KeyedBatch, ProjectedState, Thread};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Pretty,
    Json,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub rooms: Vec<RoomReport>,
    pub unread_notifications: usize,
    pub pending_updates: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomReport {
    pub room_id: String,
    pub threads: Vec<ThreadReport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadReport {
    pub id: String,
    pub resolved: bool,
    pub last_activity: DateTime<Utc>,
    pub comments: Vec<CommentReport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentReport {
    pub id: String,
    pub author: String,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    pub reactions: Vec<String>,
}

/// Resolves user ids to display names in batches.
pub type UserStore = BatchStore<String, String>;

/// A user store backed by a fixed directory. Ids missing from it resolve to
/// an item error. Without a directory every id is its own display name.
pub fn user_store(directory: Option<HashMap<String, String>>, options: BatchOptions) -> UserStore {
    let directory = Arc::new(directory);
    let batch = KeyedBatch::from_fn(
        move |ids: Vec<String>| {
            let directory = Arc::clone(&directory);
            async move {
                let names: Vec<Result<String, String>> = ids
                    .iter()
                    .map(|id| match directory.as_ref() {
                        Some(names) => names
                            .get(id)
                            .cloned()
                            .ok_or_else(|| format!("unknown user {id}")),
                        None => Ok(id.clone()),
                    })
                    .collect();
                Ok::<_, String>(names)
            }
        },
        options,
    );
    BatchStore::from_cache(collab_sync::BatchCache::from_batch(batch))
}

/// Resolve every author in `threads` concurrently, so lookups share batches.
async fn resolve_authors(users: &Arc<UserStore>, threads: &[Thread]) -> HashMap<String, String> {
    let ids: BTreeSet<String> = threads
        .iter()
        .flat_map(|t| t.comments.iter().map(|c| c.user_id.clone()))
        .collect();

    let mut lookups = JoinSet::new();
    for id in ids {
        let users = Arc::clone(users);
        lookups.spawn(async move {
            let name = users.enqueue(id.clone()).await;
            (id, name)
        });
    }

    let mut names = HashMap::new();
    while let Some(joined) = lookups.join_next().await {
        match joined {
            Ok((id, Ok(name))) => {
                names.insert(id, name);
            }
            Ok((id, Err(error))) => {
                warn!(user_id = %id, error = %error, "could not resolve user");
            }
            Err(error) => warn!(error = %error, "user lookup task failed"),
        }
    }
    names
}

pub async fn build_report(
    state: &ProjectedState,
    room: Option<&str>,
    users: &Arc<UserStore>,
    pending_updates: Vec<String>,
) -> Report {
    let room_ids: BTreeSet<String> = match room {
        Some(room) => BTreeSet::from([room.to_string()]),
        None => state.threads.values().map(|t| t.room_id.clone()).collect(),
    };

    let mut rooms = Vec::new();
    for room_id in room_ids {
        let threads = selectors::threads_for_room(
            state,
            &room_id,
            &ThreadsQuery::default(),
            ThreadOrder::LastActivity,
        );
        let names = resolve_authors(users, &threads).await;
        rooms.push(RoomReport {
            threads: threads.iter().map(|t| thread_report(t, &names)).collect(),
            room_id,
        });
    }

    Report {
        rooms,
        unread_notifications: selectors::unread_inbox_notifications_count(state),
        pending_updates,
    }
}

fn thread_report(thread: &Thread, names: &HashMap<String, String>) -> ThreadReport {
    ThreadReport {
        id: thread.id.clone(),
        resolved: thread.resolved,
        last_activity: thread.last_activity(),
        comments: thread
            .comments
            .iter()
            .map(|c| CommentReport {
                id: c.id.clone(),
                author: names.get(&c.user_id).cloned().unwrap_or_else(|| c.user_id.clone()),
                deleted: c.is_deleted(),
                body: c.body().cloned(),
                reactions: c
                    .reactions
                    .iter()
                    .map(|r| format!("{} x{}", r.emoji, r.users.len()))
                    .collect(),
            })
            .collect(),
    }
}

pub fn render(report: &Report, format: Format) -> Result<String, serde_json::Error> {
    match format {
        Format::Json => serde_json::to_string_pretty(report),
        Format::Pretty => Ok(render_pretty(report)),
    }
}

fn render_pretty(report: &Report) -> String {
    let mut out = String::new();
    for room in &report.rooms {
        let _ = writeln!(out, "room {}", room.room_id);
        if room.threads.is_empty() {
            let _ = writeln!(out, "  (no threads)");
        }
        for thread in &room.threads {
            let status = if thread.resolved { "resolved" } else { "open" };
            let _ = writeln!(
                out,
                "  thread {} [{}] last activity {}",
                thread.id,
                status,
                thread.last_activity.to_rfc3339()
            );
            for comment in &thread.comments {
                let text = match (&comment.body, comment.deleted) {
                    (_, true) => "(deleted)".to_string(),
                    (Some(serde_json::Value::String(text)), false) => text.clone(),
                    (Some(body), false) => body.to_string(),
                    (None, false) => String::new(),
                };
                let _ = write!(out, "    {} {}: {}", comment.id, comment.author, text);
                if !comment.reactions.is_empty() {
                    let _ = write!(out, " [{}]", comment.reactions.join(", "));
                }
                out.push('\n');
            }
        }
    }
    let _ = writeln!(out, "unread notifications: {}", report.unread_notifications);
    if !report.pending_updates.is_empty() {
        let _ = writeln!(
            out,
            "pending optimistic updates: {}",
            report.pending_updates.join(", ")
        );
    }
    out
}

/// State of a user lookup, for logging.
pub fn describe(result: &AsyncResult<String>) -> String {
    match result {
        AsyncResult::Loading => "loading".to_string(),
        AsyncResult::Success(name) => name.clone(),
        AsyncResult::Error(error) => format!("error: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_sync::{BatchError, OptimisticCache, NotificationUpdates, ThreadUpdates};
    use pretty_assertions::assert_eq;

    fn state() -> ProjectedState {
        let threads: ThreadUpdates = serde_json::from_value(serde_json::json!({
            "newThreads": [
                {
                    "id": "th_1",
                    "roomId": "design",
                    "createdAt": "2024-05-01T10:00:00Z",
                    "comments": [
                        {
                            "id": "cm_1",
                            "threadId": "th_1",
                            "roomId": "design",
                            "userId": "alice",
                            "createdAt": "2024-05-01T10:00:00Z",
                            "body": "ship it",
                            "reactions": [{
                                "emoji": "👍",
                                "createdAt": "2024-05-01T10:01:00Z",
                                "users": [{ "id": "bob" }, { "id": "carol" }]
                            }]
                        },
                        {
                            "id": "cm_2",
                            "threadId": "th_1",
                            "roomId": "design",
                            "userId": "mallory",
                            "createdAt": "2024-05-01T10:02:00Z",
                            "body": "why?"
                        }
                    ]
                },
                {
                    "id": "th_2",
                    "roomId": "eng",
                    "createdAt": "2024-05-01T09:00:00Z",
                    "comments": []
                }
            ]
        }))
        .unwrap();
        let cache = OptimisticCache::default();
        cache.update_threads_and_notifications(&threads, &NotificationUpdates::default(), None);
        cache.projected()
    }

    fn users() -> Arc<UserStore> {
        Arc::new(user_store(
            Some(HashMap::from([("alice".to_string(), "Alice".to_string())])),
            BatchOptions::default(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_resolves_known_authors() {
        let users = users();
        let report = build_report(&state(), Some("design"), &users, vec![]).await;

        assert_eq!(report.rooms.len(), 1);
        let comments = &report.rooms[0].threads[0].comments;
        assert_eq!(comments[0].author, "Alice");
        assert_eq!(comments[0].reactions, vec!["👍 x2"]);
        // Unknown users fall back to their id.
        assert_eq!(comments[1].author, "mallory");
        assert_eq!(
            users.get_state(&"mallory".to_string()),
            Some(AsyncResult::Error(BatchError::Item("unknown user mallory".into())))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_covers_every_room_by_default() {
        let report = build_report(&state(), None, &users(), vec!["like".into()]).await;

        let rooms: Vec<_> = report.rooms.iter().map(|r| r.room_id.as_str()).collect();
        assert_eq!(rooms, vec!["design", "eng"]);

        let text = render(&report, Format::Pretty).unwrap();
        assert!(text.contains("room design"));
        assert!(text.contains("cm_1 Alice: ship it [👍 x2]"));
        assert!(text.contains("pending optimistic updates: like"));

        let json: serde_json::Value =
            serde_json::from_str(&render(&report, Format::Json).unwrap()).unwrap();
        assert_eq!(json["rooms"][1]["roomId"], "eng");
        assert_eq!(json["unreadNotifications"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_directory_ids_are_names() {
        let users = Arc::new(user_store(None, BatchOptions::default()));
        let report = build_report(&state(), Some("design"), &users, vec![]).await;

        let authors: Vec<_> = report.rooms[0].threads[0]
            .comments
            .iter()
            .map(|c| c.author.as_str())
            .collect();
        assert_eq!(authors, vec!["alice", "mallory"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_room_renders_empty() {
        let report = build_report(&state(), Some("nowhere"), &users(), vec![]).await;

        assert!(report.rooms[0].threads.is_empty());
        let text = render(&report, Format::Pretty).unwrap();
        assert!(text.contains("room nowhere\n  (no threads)"));
        assert!(text.ends_with("unread notifications: 0\n"));
    }

    #[test]
    fn test_describe_lookup_states() {
        assert_eq!(describe(&AsyncResult::Loading), "loading");
        assert_eq!(describe(&AsyncResult::Success("Alice".into())), "Alice");
    }
}
