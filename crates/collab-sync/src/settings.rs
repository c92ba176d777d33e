//! Per-room notification settings.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Delivery channel for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationChannel {
    Email,
    Slack,
    Teams,
    WebPush,
}

impl NotificationChannel {
    pub const ALL: [NotificationChannel; 4] = [
        NotificationChannel::Email,
        NotificationChannel::Slack,
        NotificationChannel::Teams,
        NotificationChannel::WebPush,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Slack => "slack",
            NotificationChannel::Teams => "teams",
            NotificationChannel::WebPush => "webPush",
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification kind name (`thread`, `textMention`, `$custom`) to enabled flag.
pub type ChannelSettings = BTreeMap<String, bool>;

/// Notification settings for one room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(flatten)]
    pub channels: BTreeMap<NotificationChannel, ChannelSettings>,
}

impl NotificationSettings {
    /// Whether `kind` is enabled on `channel`. Unknown channels and kinds are
    /// treated as disabled.
    pub fn is_enabled(&self, channel: NotificationChannel, kind: &str) -> bool {
        get_channel(self, channel)
            .ok()
            .and_then(|c| c.get(kind).copied())
            .unwrap_or(false)
    }

    /// Overlay `patch` onto these settings, channel by channel and kind by kind.
    pub fn merged(&self, patch: &NotificationSettings) -> NotificationSettings {
        let mut merged = self.clone();
        for (channel, kinds) in &patch.channels {
            let entry = merged.channels.entry(*channel).or_default();
            for (kind, enabled) in kinds {
                entry.insert(kind.clone(), *enabled);
            }
        }
        merged
    }
}

/// Look up one channel's settings.
pub fn get_channel(
    settings: &NotificationSettings,
    channel: NotificationChannel,
) -> Result<&ChannelSettings, SettingsError> {
    settings
        .channels
        .get(&channel)
        .ok_or(SettingsError::ChannelNotFound(channel))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email_only() -> NotificationSettings {
        let mut channels = BTreeMap::new();
        channels.insert(
            NotificationChannel::Email,
            BTreeMap::from([("thread".to_string(), true), ("textMention".to_string(), false)]),
        );
        NotificationSettings { channels }
    }

    #[test]
    fn test_get_channel_present() {
        let settings = email_only();
        let email = get_channel(&settings, NotificationChannel::Email).unwrap();
        assert_eq!(email.get("thread"), Some(&true));
    }

    #[test]
    fn test_get_channel_missing_is_typed_error() {
        let settings = email_only();
        assert_eq!(
            get_channel(&settings, NotificationChannel::Slack),
            Err(SettingsError::ChannelNotFound(NotificationChannel::Slack))
        );
    }

    #[test]
    fn test_is_enabled_defaults_to_false() {
        let settings = email_only();
        assert!(settings.is_enabled(NotificationChannel::Email, "thread"));
        assert!(!settings.is_enabled(NotificationChannel::Email, "textMention"));
        assert!(!settings.is_enabled(NotificationChannel::Email, "$custom"));
        assert!(!settings.is_enabled(NotificationChannel::WebPush, "thread"));
    }

    #[test]
    fn test_merged_overlays_kinds() {
        let base = email_only();
        let mut patch = NotificationSettings::default();
        patch.channels.insert(
            NotificationChannel::Email,
            BTreeMap::from([("textMention".to_string(), true)]),
        );
        patch.channels.insert(
            NotificationChannel::Slack,
            BTreeMap::from([("thread".to_string(), true)]),
        );

        let merged = base.merged(&patch);
        assert!(merged.is_enabled(NotificationChannel::Email, "thread"));
        assert!(merged.is_enabled(NotificationChannel::Email, "textMention"));
        assert!(merged.is_enabled(NotificationChannel::Slack, "thread"));
    }

    #[test]
    fn test_settings_json_shape() {
        let json = serde_json::json!({
            "email": { "thread": true },
            "webPush": { "thread": false }
        });
        let settings: NotificationSettings = serde_json::from_value(json).unwrap();
        assert!(settings.is_enabled(NotificationChannel::Email, "thread"));
        assert!(!settings.is_enabled(NotificationChannel::WebPush, "thread"));
    }
}
