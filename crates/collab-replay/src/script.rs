//! Replay script format.
//!
//! A script is a JSON array of steps. Optimistic updates are given a label
//! so later steps can confirm or roll them back.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use collab_sync::{Comment, NotificationUpdates, OptimisticEffect, Thread, ThreadUpdates};

use crate::error::ReplayError;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Step {
    /// A delta sync from the server.
    #[serde(rename_all = "camelCase")]
    Delta {
        #[serde(default)]
        threads: ThreadUpdates,
        #[serde(default)]
        notifications: NotificationUpdates,
        #[serde(default)]
        query_key: Option<String>,
    },

    /// A local mutation, shown before the server confirms it.
    #[serde(rename_all = "camelCase")]
    Optimistic {
        label: String,
        effect: OptimisticEffect,
    },

    /// The server rejected a labelled mutation.
    #[serde(rename_all = "camelCase")]
    Rollback { label: String },

    /// The server accepted a labelled mutation as sent.
    #[serde(rename_all = "camelCase")]
    Confirm { label: String },

    /// The server accepted a labelled comment and returned its version.
    #[serde(rename_all = "camelCase")]
    ConfirmComment { label: String, comment: Comment },

    /// The server accepted a labelled thread and returned its version.
    #[serde(rename_all = "camelCase")]
    ConfirmThread { label: String, thread: Thread },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Delta { .. } => "delta",
            Step::Optimistic { .. } => "optimistic",
            Step::Rollback { .. } => "rollback",
            Step::Confirm { .. } => "confirm",
            Step::ConfirmComment { .. } => "confirmComment",
            Step::ConfirmThread { .. } => "confirmThread",
        }
    }
}

pub fn parse_script(json: &str) -> Result<Vec<Step>, ReplayError> {
    Ok(serde_json::from_str(json)?)
}

pub async fn load_script(path: &Path) -> Result<Vec<Step>, ReplayError> {
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ReplayError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    parse_script(&json)
}

/// User id to display name, as read from `--users`.
pub async fn load_users(path: &Path) -> Result<HashMap<String, String>, ReplayError> {
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ReplayError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(serde_json::from_str(&json)?)
}
