//! Discord REST payload shapes and their mapping to core types

use chrono::{DateTime, Utc};
use lfg_core::{
    Button, ButtonStyle, ChannelId, ChannelKind, Embed, EmbedField, GuildId, MessageId, Post,
    RoleId, UserId, VoiceRoom,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const VIEW_CHANNEL: u64 = 1 << 10;
pub const CONNECT: u64 = 1 << 20;
pub const SPEAK: u64 = 1 << 21;

const OVERWRITE_ROLE: u8 = 0;
const COMPONENT_ROW: u8 = 1;
const COMPONENT_BUTTON: u8 = 2;
const THREAD_ARCHIVE_MINUTES: u32 = 1440;

pub fn channel_type(kind: ChannelKind) -> u8 {
    match kind {
        ChannelKind::Text => 0,
        ChannelKind::Voice => 2,
        ChannelKind::Category => 4,
        ChannelKind::PublicThread => 11,
        ChannelKind::PrivateThread => 12,
    }
}

/// Kinds outside the ones the core works with map to `None`
pub fn channel_kind(raw: u8) -> Option<ChannelKind> {
    match raw {
        0 => Some(ChannelKind::Text),
        2 => Some(ChannelKind::Voice),
        4 => Some(ChannelKind::Category),
        11 => Some(ChannelKind::PublicThread),
        12 => Some(ChannelKind::PrivateThread),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
pub struct UserObject {
    pub id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct RoleObject {
    pub id: RoleId,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ChannelObject {
    pub id: ChannelId,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
}

#[derive(Debug, Deserialize)]
pub struct ThreadList {
    pub threads: Vec<ChannelObject>,
}

#[derive(Debug, Deserialize)]
pub struct MessageObject {
    pub id: MessageId,
    #[serde(default)]
    pub content: String,
    pub author: UserObject,
    #[serde(default)]
    pub embeds: Vec<EmbedObject>,
    #[serde(default)]
    pub components: Vec<ComponentObject>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EmbedObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<FooterObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FieldObject {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FooterObject {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentObject {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentObject>,
}

fn style_code(style: ButtonStyle) -> u8 {
    match style {
        ButtonStyle::Primary => 1,
        ButtonStyle::Secondary => 2,
        ButtonStyle::Success => 3,
        ButtonStyle::Danger => 4,
    }
}

fn style_from_code(code: u8) -> ButtonStyle {
    match code {
        1 => ButtonStyle::Primary,
        3 => ButtonStyle::Success,
        4 => ButtonStyle::Danger,
        _ => ButtonStyle::Secondary,
    }
}

impl From<&Embed> for EmbedObject {
    fn from(embed: &Embed) -> Self {
        Self {
            title: Some(embed.title.clone()),
            description: Some(embed.description.clone()),
            color: Some(embed.color),
            fields: embed
                .fields
                .iter()
                .map(|f| FieldObject {
                    name: f.name.clone(),
                    value: f.value.clone(),
                    inline: false,
                })
                .collect(),
            footer: embed.footer.clone().map(|text| FooterObject { text }),
            timestamp: embed.timestamp,
        }
    }
}

impl From<EmbedObject> for Embed {
    fn from(raw: EmbedObject) -> Self {
        Self {
            title: raw.title.unwrap_or_default(),
            description: raw.description.unwrap_or_default(),
            color: raw.color.unwrap_or_default(),
            fields: raw
                .fields
                .into_iter()
                .map(|f| EmbedField {
                    name: f.name,
                    value: f.value,
                })
                .collect(),
            footer: raw.footer.map(|f| f.text),
            timestamp: raw.timestamp,
        }
    }
}

/// Body for creating or editing a message. Every field is sent so an edit
/// fully replaces the previous content.
pub fn message_body(post: &Post) -> Value {
    let embeds: Vec<EmbedObject> = post.embed.iter().map(EmbedObject::from).collect();
    let components: Vec<ComponentObject> = if post.buttons.is_empty() {
        Vec::new()
    } else {
        vec![ComponentObject {
            kind: COMPONENT_ROW,
            style: None,
            label: None,
            custom_id: None,
            disabled: false,
            components: post
                .buttons
                .iter()
                .map(|b| ComponentObject {
                    kind: COMPONENT_BUTTON,
                    style: Some(style_code(b.style)),
                    label: Some(b.label.clone()),
                    custom_id: Some(b.custom_id.clone()),
                    disabled: b.disabled,
                    components: Vec::new(),
                })
                .collect(),
        }]
    };

    json!({
        "content": post.content.clone().unwrap_or_default(),
        "embeds": embeds,
        "components": components,
        "allowed_mentions": { "parse": [] },
    })
}

impl From<MessageObject> for Post {
    fn from(raw: MessageObject) -> Self {
        let buttons = raw
            .components
            .into_iter()
            .flat_map(|row| row.components)
            .filter(|c| c.kind == COMPONENT_BUTTON)
            .filter_map(|c| {
                Some(Button {
                    custom_id: c.custom_id?,
                    label: c.label.unwrap_or_default(),
                    style: style_from_code(c.style.unwrap_or_default()),
                    disabled: c.disabled,
                })
            })
            .collect();

        Post {
            content: Some(raw.content).filter(|c| !c.is_empty()),
            embed: raw.embeds.into_iter().next().map(Embed::from),
            buttons,
            author: Some(raw.author.id),
        }
    }
}

fn voice_overwrites(guild: GuildId, role: RoleId) -> Value {
    // The @everyone role shares the guild's id
    json!([
        {
            "id": guild.to_string(),
            "type": OVERWRITE_ROLE,
            "allow": "0",
            "deny": (VIEW_CHANNEL | CONNECT).to_string(),
        },
        {
            "id": role.to_string(),
            "type": OVERWRITE_ROLE,
            "allow": (VIEW_CHANNEL | CONNECT | SPEAK).to_string(),
            "deny": "0",
        },
    ])
}

pub fn voice_room_body(guild: GuildId, room: &VoiceRoom) -> Value {
    let mut body = json!({
        "name": room.name,
        "type": channel_type(ChannelKind::Voice),
        "user_limit": room.user_limit,
        "permission_overwrites": voice_overwrites(guild, room.role),
    });
    if let Some(category) = room.category {
        body["parent_id"] = json!(category.to_string());
    }
    body
}

pub fn voice_room_patch(guild: GuildId, room: &VoiceRoom) -> Value {
    json!({
        "name": room.name,
        "user_limit": room.user_limit,
        "permission_overwrites": voice_overwrites(guild, room.role),
    })
}

pub fn role_body(name: &str) -> Value {
    json!({
        "name": name,
        "permissions": "0",
        "hoist": false,
        "mentionable": false,
    })
}

pub fn public_thread_body(name: &str) -> Value {
    json!({
        "name": name,
        "auto_archive_duration": THREAD_ARCHIVE_MINUTES,
    })
}

pub fn private_thread_body(name: &str) -> Value {
    json!({
        "name": name,
        "type": channel_type(ChannelKind::PrivateThread),
        "invitable": false,
        "auto_archive_duration": THREAD_ARCHIVE_MINUTES,
    })
}

/// Seconds to wait before retrying a rate-limited call
pub fn retry_after(body: &Value, header: Option<&str>) -> Option<f64> {
    body.get("retry_after")
        .and_then(Value::as_f64)
        .or_else(|| header.and_then(|h| h.trim().parse().ok()))
        .filter(|secs: &f64| secs.is_finite() && *secs >= 0.0)
}
