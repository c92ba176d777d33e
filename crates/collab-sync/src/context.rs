//! Per-client engine context.
//!
//! Holds state that would otherwise be process-wide, such as which
//! developer warnings have already been emitted. One context belongs to one
//! cache instance and lives exactly as long as it does.

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::warn;

/// Shared context handed to the engine at construction time.
#[derive(Debug, Default)]
pub struct EngineContext {
    /// Whether developer warnings are emitted at all.
    warnings_enabled: bool,
    /// Keys of warnings already emitted.
    warned: Mutex<HashSet<String>>,
}

impl EngineContext {
    pub fn new(warnings_enabled: bool) -> Self {
        Self {
            warnings_enabled,
            warned: Mutex::new(HashSet::new()),
        }
    }

    /// Emit `message` once per distinct `key` for the lifetime of this
    /// context. Returns true if the warning was emitted by this call.
    pub fn warn_once(&self, key: &str, message: &str) -> bool {
        if !self.warnings_enabled {
            return false;
        }
        if !self.warned.lock().insert(key.to_string()) {
            return false;
        }
        warn!(key = %key, "{}", message);
        true
    }

    /// Whether a warning with this key has been emitted.
    pub fn has_warned(&self, key: &str) -> bool {
        self.warned.lock().contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warn_once_dedups_by_key() {
        let ctx = EngineContext::new(true);
        assert!(ctx.warn_once("a", "first"));
        assert!(!ctx.warn_once("a", "second"));
        assert!(ctx.warn_once("b", "other"));
        assert!(ctx.has_warned("a"));
    }

    #[test]
    fn test_disabled_context_is_silent() {
        let ctx = EngineContext::new(false);
        assert!(!ctx.warn_once("a", "ignored"));
        assert!(!ctx.has_warned("a"));
    }

    #[test]
    fn test_contexts_are_independent() {
        let first = EngineContext::new(true);
        let second = EngineContext::new(true);
        assert!(first.warn_once("k", "m"));
        assert!(second.warn_once("k", "m"));
    }
}
