//! Error types for the replay tool.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("step {step}: no optimistic update labelled '{label}'")]
    UnknownLabel { step: usize, label: String },

    #[error("step {step}: label '{label}' is already in use")]
    DuplicateLabel { step: usize, label: String },
}
