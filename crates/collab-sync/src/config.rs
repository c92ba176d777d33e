//! Tunables for the cache and batching layers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum number of calls per batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default time a batch waits for more calls before flushing.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(100);

/// Flush triggers for a [`KeyedBatch`](crate::KeyedBatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOptions {
    /// Flush as soon as this many distinct calls are queued.
    #[serde(default = "default_size")]
    pub size: usize,
    /// Flush this long after the first call lands in an empty queue.
    #[serde(default = "default_delay", rename = "delayMs", with = "duration_ms")]
    pub delay: Duration,
}

fn default_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_delay() -> Duration {
    DEFAULT_BATCH_DELAY
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            size: DEFAULT_BATCH_SIZE,
            delay: DEFAULT_BATCH_DELAY,
        }
    }
}

impl BatchOptions {
    pub fn with_size(mut self, size: usize) -> Self {
        // A zero-sized batch would never hold a call.
        self.size = size.max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Configuration for an [`OptimisticCache`](crate::OptimisticCache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Emit once-per-key developer warnings (unknown optimistic ids, writes
    /// for threads that are not cached).
    #[serde(default = "default_true")]
    pub dev_warnings: bool,
    /// Batch options for resolvers created alongside the cache.
    #[serde(default)]
    pub batch: BatchOptions,
}

fn default_true() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dev_warnings: true,
            batch: BatchOptions::default(),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_defaults() {
        let options = BatchOptions::default();
        assert_eq!(options.size, 50);
        assert_eq!(options.delay, Duration::from_millis(100));
    }

    #[test]
    fn test_batch_options_from_json() {
        let options: BatchOptions = serde_json::from_str(r#"{"size": 3, "delayMs": 20}"#).unwrap();
        assert_eq!(options.size, 3);
        assert_eq!(options.delay, Duration::from_millis(20));

        let partial: BatchOptions = serde_json::from_str(r#"{"size": 7}"#).unwrap();
        assert_eq!(partial.delay, DEFAULT_BATCH_DELAY);
    }

    #[test]
    fn test_with_size_clamps_zero() {
        assert_eq!(BatchOptions::default().with_size(0).size, 1);
    }

    #[test]
    fn test_sync_config_defaults_from_empty_json() {
        let config: SyncConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SyncConfig::default());
    }
}
