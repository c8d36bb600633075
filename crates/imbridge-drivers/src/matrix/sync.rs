//! `/sync` response model and the room state learned from it.
//!
//! Everything here is pure; the worker feeds responses in and gets
//! normalized messages out.

use chrono::{TimeZone, Utc};
use imbridge_core::{Channel, Message, Platform, User};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: Rooms,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Rooms {
    #[serde(default)]
    pub join: HashMap<String, JoinedRoom>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct JoinedRoom {
    #[serde(default)]
    pub state: EventList,
    #[serde(default)]
    pub timeline: EventList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct EventList {
    #[serde(default)]
    pub events: Vec<RoomEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RoomEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub state_key: Option<String>,
    #[serde(default)]
    pub origin_server_ts: Option<i64>,
    #[serde(default)]
    pub content: Value,
}

/// Room names and member display names seen so far.
#[derive(Debug, Default)]
pub(crate) struct RoomDirectory {
    names: HashMap<String, String>,
    members: HashMap<String, HashMap<String, String>>,
}

impl RoomDirectory {
    pub(crate) fn room_name(&self, room_id: &str) -> Option<&str> {
        self.names.get(room_id).map(String::as_str)
    }

    pub(crate) fn member_name(&self, room_id: &str, user_id: &str) -> Option<&str> {
        self.members
            .get(room_id)
            .and_then(|m| m.get(user_id))
            .map(String::as_str)
    }

    /// Record state carried by `event`, if any.
    fn absorb(&mut self, room_id: &str, event: &RoomEvent) {
        match event.kind.as_str() {
            "m.room.name" => match event.content.get("name").and_then(Value::as_str) {
                Some(name) if !name.is_empty() => {
                    self.names.insert(room_id.to_string(), name.to_string());
                }
                _ => {
                    self.names.remove(room_id);
                }
            },
            "m.room.member" => {
                let Some(user_id) = event.state_key.as_deref() else {
                    return;
                };
                let members = self.members.entry(room_id.to_string()).or_default();
                let joined = event.content.get("membership").and_then(Value::as_str) == Some("join");
                match event.content.get("displayname").and_then(Value::as_str) {
                    Some(display) if joined && !display.is_empty() => {
                        members.insert(user_id.to_string(), display.to_string());
                    }
                    _ => {
                        members.remove(user_id);
                    }
                }
            }
            _ => {}
        }
    }

    /// Learn room state from `response` without producing messages.
    pub(crate) fn absorb_backlog(&mut self, response: &SyncResponse) {
        for (room_id, room) in &response.rooms.join {
            for event in room.state.events.iter().chain(&room.timeline.events) {
                self.absorb(room_id, event);
            }
        }
    }

    /// Learn room state from `response` and translate the text messages in
    /// its timelines, skipping those sent by `self_id`.
    ///
    /// `user.name` and `user.avatar` are left for the caller to fill from
    /// the profile cache.
    pub(crate) fn collect(&mut self, response: &SyncResponse, self_id: &str) -> Vec<Message> {
        let mut messages = Vec::new();
        for (room_id, room) in &response.rooms.join {
            for event in &room.state.events {
                self.absorb(room_id, event);
            }
            for event in &room.timeline.events {
                self.absorb(room_id, event);
                if event.sender == self_id {
                    continue;
                }
                if let Some(message) = self.text_message(room_id, event) {
                    messages.push(message);
                }
            }
        }
        messages
    }

    fn text_message(&self, room_id: &str, event: &RoomEvent) -> Option<Message> {
        if event.kind != "m.room.message" {
            return None;
        }
        if event.content.get("msgtype").and_then(Value::as_str) != Some("m.text") {
            return None;
        }
        let body = event.content.get("body").and_then(Value::as_str)?;
        let event_id = event.event_id.clone()?;

        let mut channel = Channel::group(room_id);
        channel.name = self.room_name(room_id).map(str::to_string);

        let mut user = User::new(event.sender.clone());
        user.nick = self.member_name(room_id, &event.sender).map(str::to_string);

        Some(Message {
            id: event_id,
            content: body.to_string(),
            channel,
            user,
            platform: Some(Platform::Matrix),
            reply_to: reply_target(&event.content),
            created_at: event
                .origin_server_ts
                .and_then(|ts| Utc.timestamp_millis_opt(ts).single()),
        })
    }
}

fn reply_target(content: &Value) -> Option<String> {
    content
        .get("m.relates_to")?
        .get("m.in_reply_to")?
        .get("event_id")?
        .as_str()
        .map(str::to_string)
}
