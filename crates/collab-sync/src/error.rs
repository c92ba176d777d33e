//! Error types for the sync engine.

use thiserror::Error;

use crate::settings::NotificationChannel;

/// Errors delivered to callers of a [`KeyedBatch`](crate::KeyedBatch).
///
/// Cloneable because one failed flush is fanned out to every caller that was
/// queued in it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// The batch callback itself failed; every caller in the flush sees this.
    #[error("batch call failed: {0}")]
    Failed(String),

    /// The callback returned a result list that does not line up with the
    /// queued calls.
    #[error(
        "batch callback must return one result per queued call: expected {expected}, got {actual}"
    )]
    Misaligned { expected: usize, actual: usize },

    /// The callback reported a failure for this one item.
    #[error("{0}")]
    Item(String),

    /// The queue was cleared before the call was flushed.
    #[error("batch was cleared before the call completed")]
    Cancelled,

    /// The call's arguments could not be turned into a cache key.
    #[error("could not serialize batch arguments: {0}")]
    Key(String),
}

impl BatchError {
    /// Whether this error describes the whole flush rather than one item.
    ///
    /// Such errors say nothing stable about the individual key and must not
    /// be memoized.
    pub fn is_batch_failure(&self) -> bool {
        !matches!(self, BatchError::Item(_))
    }
}

/// Errors from reading notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// The settings record has no entry for this channel.
    #[error("notification channel not configured: {0}")]
    ChannelNotFound(NotificationChannel),
}
