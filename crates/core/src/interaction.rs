//! Inbound interactions and their replies
//!
//! An outer harness translates platform events (slash commands, button
//! presses, autocomplete requests) into `Interaction` values and delivers
//! the returned `Reply` back to the platform.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{ChannelId, GuildId, MessageId, SquadEdit, UserId};
use crate::permissions::MemberPermissions;

/// Prefix of every button id the bot owns
pub const BUTTON_PREFIX: &str = "lfg";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    #[serde(default)]
    pub permissions: MemberPermissions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub guild_id: GuildId,
    /// Channel the interaction was invoked in
    pub channel_id: ChannelId,
    pub actor: Actor,
    pub kind: InteractionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InteractionKind {
    Command { command: Command },
    Button { custom_id: String },
    Autocomplete {
        command: String,
        option: String,
        #[serde(default)]
        query: String,
    },
}

/// Parameters of the Open command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub mode: String,
    pub platform: String,
    pub positions: String,
    pub slots: u8,
    #[serde(default)]
    pub crossplay: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub ttl_minutes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Command {
    Setup,
    Open(OpenRequest),
    Edit {
        message: String,
        #[serde(default)]
        changes: SquadEdit,
    },
    Add {
        message: String,
        user: UserId,
        #[serde(default)]
        force: bool,
    },
    Kick {
        message: String,
        user: UserId,
    },
    Room {
        message: String,
        #[serde(default)]
        voice: Option<bool>,
        #[serde(default)]
        thread: Option<bool>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Message { content: String, ephemeral: bool },
    Choices { choices: Vec<String> },
    /// Not ours to answer
    Ignored,
}

impl Reply {
    /// Private reply to the invoking user
    pub fn ephemeral(content: impl Into<String>) -> Self {
        Reply::Message {
            content: content.into(),
            ephemeral: true,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Reply::Message { content, .. } => Some(content),
            _ => None,
        }
    }
}

/// Squad post buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonAction {
    Join,
    Leave,
    Room,
    Close,
}

impl ButtonAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ButtonAction::Join => "join",
            ButtonAction::Leave => "leave",
            ButtonAction::Room => "room",
            ButtonAction::Close => "close",
        }
    }

    /// `lfg:<action>:<message_id>`
    pub fn custom_id(self, message: MessageId) -> String {
        format!("{}:{}:{}", BUTTON_PREFIX, self.as_str(), message)
    }

    /// Parse a button id. `None` for ids that are not ours.
    pub fn parse(custom_id: &str) -> Option<(ButtonAction, MessageId)> {
        let mut parts = custom_id.split(':');
        if parts.next()? != BUTTON_PREFIX {
            return None;
        }
        let action = match parts.next()? {
            "join" => ButtonAction::Join,
            "leave" => ButtonAction::Leave,
            "room" => ButtonAction::Room,
            "close" => ButtonAction::Close,
            _ => return None,
        };
        let message = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some((action, message))
    }
}

/// A reference to a squad post given as command input: a bare message id
/// or a message link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub message_id: MessageId,
    /// Channel named by a link
    pub channel_id: Option<ChannelId>,
}

fn is_snowflake(s: &str) -> bool {
    (17..=20).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
}

impl FromStr for MessageRef {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let input = input.trim();
        let invalid = || Error::Validation("That is not a message id or message link.".into());

        if is_snowflake(input) {
            let message_id = input.parse().map_err(|_| invalid())?;
            return Ok(Self {
                message_id,
                channel_id: None,
            });
        }

        // .../channels/<guild>/<channel>/<message>
        let tail = input
            .rsplit_once("channels/")
            .map(|(_, tail)| tail)
            .ok_or_else(invalid)?;
        let parts: Vec<&str> = tail.trim_end_matches('/').split('/').collect();
        match parts.as_slice() {
            [guild, channel, message]
                if guild.bytes().all(|b| b.is_ascii_digit())
                    && !guild.is_empty()
                    && is_snowflake(channel)
                    && is_snowflake(message) =>
            {
                Ok(Self {
                    message_id: message.parse().map_err(|_| invalid())?,
                    channel_id: Some(channel.parse().map_err(|_| invalid())?),
                })
            }
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_ids() {
        let id = ButtonAction::Join.custom_id(MessageId(123));
        assert_eq!(id, "lfg:join:123");
        assert_eq!(ButtonAction::parse(&id), Some((ButtonAction::Join, MessageId(123))));
        assert_eq!(ButtonAction::parse("lfg:dance:123"), None);
        assert_eq!(ButtonAction::parse("other:join:123"), None);
        assert_eq!(ButtonAction::parse("lfg:join:abc"), None);
    }

    #[test]
    fn test_message_ref_raw_id() {
        let r: MessageRef = " 123456789012345678 ".parse().unwrap();
        assert_eq!(r.message_id, MessageId(123456789012345678));
        assert_eq!(r.channel_id, None);
    }

    #[test]
    fn test_message_ref_link() {
        let r: MessageRef =
            "https://discord.com/channels/111111111111111111/222222222222222222/333333333333333333"
                .parse()
                .unwrap();
        assert_eq!(r.message_id, MessageId(333333333333333333));
        assert_eq!(r.channel_id, Some(ChannelId(222222222222222222)));
    }

    #[test]
    fn test_message_ref_rejects_garbage() {
        assert!("hello".parse::<MessageRef>().is_err());
        assert!("12345".parse::<MessageRef>().is_err());
        assert!("https://discord.com/channels/1/2".parse::<MessageRef>().is_err());
    }

    #[test]
    fn test_interaction_wire_format() {
        let raw = r#"{
            "guild_id": "1",
            "channel_id": "2",
            "actor": {"user_id": "3"},
            "kind": {"kind": "command", "command": {"name": "open", "mode": "Rec", "platform": "PS5", "positions": "PG", "slots": 2}}
        }"#;
        let interaction: Interaction = serde_json::from_str(raw).unwrap();
        match interaction.kind {
            InteractionKind::Command {
                command: Command::Open(req),
            } => {
                assert_eq!(req.slots, 2);
                assert_eq!(req.name, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!interaction.actor.permissions.manage_channels);
    }
}
