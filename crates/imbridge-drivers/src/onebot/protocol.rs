//! OneBot v11 frame encoding and decoding.
//!
//! Pure functions: no I/O happens here, so both WebSocket roles share them
//! and they can be tested without sockets.

use crate::error::DriverError;
use crate::Result;
use chrono::{DateTime, TimeZone, Utc};
use imbridge_core::{
    Channel, ChannelType, Event, Message, Platform, SendMessageRequest, User,
    EVENT_MEMBER_JOIN, EVENT_MEMBER_LEAVE,
};
use serde_json::{json, Map, Value};
use tracing::debug;

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(Message),
    Event(Event),
    /// Heartbeats, lifecycle notices, action responses and unsupported posts.
    Ignored,
}

/// Avatar URL of a QQ account.
pub fn avatar_url(user_id: &str) -> String {
    format!("http://q1.qlogo.cn/g?b=qq&nk={}&s=640", user_id)
}

/// Build the action frame for a send request.
///
/// Private channels map to `send_private_msg`, everything else to
/// `send_group_msg`. The channel ID must be an integer.
pub fn encode_send(request: &SendMessageRequest) -> Result<String> {
    let raw_id = request.channel_id().trim();
    let target: i64 = raw_id.parse().map_err(|_| {
        DriverError::invalid_request(format!(
            "QQ channel id must be an integer, got '{}'",
            raw_id
        ))
    })?;

    let (action, key) = match request.channel.kind {
        ChannelType::Private => ("send_private_msg", "user_id"),
        ChannelType::Group | ChannelType::Channel => ("send_group_msg", "group_id"),
    };

    let mut params = Map::new();
    params.insert("message".into(), Value::String(request.content.clone()));
    params.insert(key.into(), Value::from(target));
    if let Some((at_sender, auto_escape)) = request.qq_extra() {
        params.insert("at_sender".into(), Value::Bool(at_sender));
        params.insert("auto_escape".into(), Value::Bool(auto_escape));
    }

    Ok(json!({ "action": action, "params": params }).to_string())
}

/// Decode one text frame.
pub fn parse_frame(text: &str) -> std::result::Result<Inbound, serde_json::Error> {
    let data: Value = serde_json::from_str(text)?;
    Ok(classify(&data))
}

fn classify(data: &Value) -> Inbound {
    // Action responses carry status/retcode/echo; nothing to deliver.
    if data.get("status").is_some() || data.get("retcode").is_some() || data.get("echo").is_some() {
        return Inbound::Ignored;
    }

    match data.get("post_type").and_then(Value::as_str) {
        Some("message") => parse_message(data).map_or(Inbound::Ignored, Inbound::Message),
        Some("notice") => parse_notice(data).map_or(Inbound::Ignored, Inbound::Event),
        Some("meta_event") => Inbound::Ignored,
        other => {
            debug!("Ignoring OneBot post type {:?}", other);
            Inbound::Ignored
        }
    }
}

fn parse_message(data: &Value) -> Option<Message> {
    let id = id_field(data, "message_id")?;
    let user_id = id_field(data, "user_id")?;

    let channel = match id_field(data, "group_id") {
        Some(group_id) => Channel {
            name: str_field(data, "group_name"),
            ..Channel::group(group_id)
        },
        None => Channel::private(user_id.clone()),
    };

    let sender = data.get("sender");
    let user = User {
        name: sender.and_then(|s| str_field(s, "nickname")),
        nick: sender.and_then(|s| str_field(s, "card")),
        avatar: Some(avatar_url(&user_id)),
        is_bot: false,
        id: user_id,
    };

    Some(Message {
        id,
        content: content_of(data),
        channel,
        user,
        platform: Some(Platform::Qq),
        reply_to: reply_of(data),
        created_at: time_of(data),
    })
}

fn parse_notice(data: &Value) -> Option<Event> {
    let kind = match data.get("notice_type").and_then(Value::as_str) {
        Some("group_increase") => EVENT_MEMBER_JOIN,
        Some("group_decrease") => EVENT_MEMBER_LEAVE,
        other => {
            debug!("Ignoring OneBot notice type {:?}", other);
            return None;
        }
    };

    let id = data
        .get("time")
        .map(value_to_string)
        .unwrap_or_default();
    let mut event = Event::new(id, kind, Platform::Qq);

    if let Some(group_id) = id_field(data, "group_id") {
        event = event.with_channel(Channel::group(group_id));
    }
    if let Some(user_id) = id_field(data, "user_id") {
        event = event.with_user(User::new(user_id));
    }

    let mut extra = Map::new();
    for key in ["sub_type", "operator_id"] {
        if let Some(value) = data.get(key) {
            extra.insert(key.into(), value.clone());
        }
    }
    if !extra.is_empty() {
        event = event.with_data(Value::Object(extra));
    }

    Some(event)
}

/// Message text: `message` when it is a plain string, then `raw_message`,
/// then the concatenated text segments of an array message.
fn content_of(data: &Value) -> String {
    if let Some(text) = data.get("message").and_then(Value::as_str) {
        return text.to_string();
    }
    if let Some(raw) = data.get("raw_message").and_then(Value::as_str) {
        return raw.to_string();
    }
    segments(data)
        .filter(|seg| seg.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|seg| seg.pointer("/data/text").and_then(Value::as_str))
        .collect()
}

fn reply_of(data: &Value) -> Option<String> {
    if let Some(seg) = segments(data).find(|seg| seg.get("type").and_then(Value::as_str) == Some("reply")) {
        return seg.pointer("/data/id").map(value_to_string);
    }

    // String messages use CQ codes: [CQ:reply,id=123]
    let text = data
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| data.get("raw_message").and_then(Value::as_str))?;
    let start = text.find("[CQ:reply,")?;
    let code = &text[start + "[CQ:reply,".len()..];
    let code = &code[..code.find(']')?];
    code.split(',')
        .find_map(|kv| kv.strip_prefix("id="))
        .map(str::to_string)
}

fn segments(data: &Value) -> impl Iterator<Item = &Value> {
    data.get("message")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn time_of(data: &Value) -> Option<DateTime<Utc>> {
    let secs = data.get("time")?.as_i64()?;
    Utc.timestamp_opt(secs, 0).single()
}

fn id_field(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::Null => None,
        v => Some(value_to_string(v)),
    }
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
