//! Outbound send requests.

use super::{ChannelType, Platform};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Target conversation of an outbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Platform-scoped channel ID.
    pub id: String,

    /// Conversation kind; decides e.g. group vs. private send on QQ.
    #[serde(rename = "type")]
    pub kind: ChannelType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
}

impl ChannelInfo {
    pub fn new(id: impl Into<String>, kind: ChannelType) -> Self {
        Self {
            id: id.into(),
            kind,
            guild_id: None,
        }
    }
}

/// Platform-specific send options.
///
/// Drivers only look at the variant for their own platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum MessageExtra {
    /// OneBot options.
    Qq {
        #[serde(default)]
        at_sender: bool,
        #[serde(default)]
        auto_escape: bool,
    },

    /// Bot API options.
    Telegram {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to_message_id: Option<i32>,
        #[serde(default)]
        disable_notification: bool,
    },
}

/// A request to publish one message to one or more platforms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Target conversation.
    pub channel: ChannelInfo,

    /// Plain-text content.
    pub content: String,

    /// Platforms to send to. `None` broadcasts to every driver; an empty set
    /// targets nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platforms: Option<HashSet<Platform>>,

    /// Typed platform options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<MessageExtra>,

    /// Untyped options passed through from the host.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub raw_extra: Map<String, Value>,
}

impl SendMessageRequest {
    /// A broadcast request.
    pub fn new(channel: ChannelInfo, content: impl Into<String>) -> Self {
        Self {
            channel,
            content: content.into(),
            ..Default::default()
        }
    }

    /// Restrict delivery to the given platforms.
    pub fn to_platforms(mut self, platforms: impl IntoIterator<Item = Platform>) -> Self {
        self.platforms = Some(platforms.into_iter().collect());
        self
    }

    pub fn with_extra(mut self, extra: MessageExtra) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Target channel ID.
    pub fn channel_id(&self) -> &str {
        &self.channel.id
    }

    /// Whether a driver for `platform` should handle this request.
    pub fn targets(&self, platform: Platform) -> bool {
        self.platforms
            .as_ref()
            .map_or(true, |set| set.contains(&platform))
    }

    /// QQ options as `(at_sender, auto_escape)`, if present.
    pub fn qq_extra(&self) -> Option<(bool, bool)> {
        match self.extra {
            Some(MessageExtra::Qq {
                at_sender,
                auto_escape,
            }) => Some((at_sender, auto_escape)),
            _ => None,
        }
    }

    /// Telegram options as `(reply_to_message_id, disable_notification)`.
    pub fn telegram_extra(&self) -> Option<(Option<i32>, bool)> {
        match self.extra {
            Some(MessageExtra::Telegram {
                reply_to_message_id,
                disable_notification,
            }) => Some((reply_to_message_id, disable_notification)),
            _ => None,
        }
    }
}
