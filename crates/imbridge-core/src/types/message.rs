//! Inbound message and event types.

use super::Platform;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event type emitted when a user joins a group.
pub const EVENT_MEMBER_JOIN: &str = "guild.member.join";

/// Event type emitted when a user leaves a group.
pub const EVENT_MEMBER_LEAVE: &str = "guild.member.leave";

/// A user on some platform. `id` is only unique within that platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Platform-scoped user ID.
    pub id: String,

    /// Account-level display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Per-group nickname.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,

    /// Avatar URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,

    /// Whether the user is a bot account.
    #[serde(default)]
    pub is_bot: bool,
}

impl User {
    /// A user known only by ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Best human-readable label: nick, then name, then ID.
    pub fn display_name(&self) -> &str {
        self.nick
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Kind of conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Multi-user group chat or room.
    Group,

    /// One-to-one conversation.
    #[default]
    Private,

    /// Broadcast channel.
    Channel,
}

/// A conversation on some platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Platform-scoped channel ID.
    pub id: String,

    /// Conversation kind.
    #[serde(rename = "type")]
    pub kind: ChannelType,

    /// Channel title, when the platform exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Owning guild/server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
}

impl Channel {
    pub fn group(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ChannelType::Group,
            ..Default::default()
        }
    }

    pub fn private(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ChannelType::Private,
            ..Default::default()
        }
    }
}

/// A chat message received from a platform.
///
/// Built once by the driver that received it and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Platform-scoped message ID.
    pub id: String,

    /// Plain-text content.
    pub content: String,

    /// Where the message was posted.
    pub channel: Channel,

    /// Who posted it.
    pub user: User,

    /// Originating platform.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,

    /// ID of the message this one replies to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    /// Platform timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A state change on a platform (member join/leave and similar).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event ID; platforms without one use the event timestamp.
    pub id: String,

    /// Dotted event type, e.g. [`EVENT_MEMBER_JOIN`].
    #[serde(rename = "type")]
    pub kind: String,

    /// Originating platform.
    pub platform: Platform,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,

    /// Free-form payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Event {
    /// Create an event with no channel, user, or payload.
    pub fn new(id: impl Into<String>, kind: impl Into<String>, platform: Platform) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            platform,
            channel: None,
            user: None,
            data: None,
        }
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}
