//! Gateway frame types
//!
//! Every frame is one JSON object tagged by `type`, length-prefixed on the
//! wire. A connection opens with `Hello`; after `Welcome` the harness sends
//! `Interaction` frames and receives a `Reply` carrying the same id.

use lfg_core::{Interaction, Reply};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// First frame from the harness
    Hello { token: String },

    Welcome,

    Rejected { reason: String },

    Interaction { id: Uuid, interaction: Interaction },

    Reply { id: Uuid, reply: Reply },

    Ping,

    Pong,

    ServerShutdown,
}

impl Frame {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lfg_core::{Actor, ChannelId, GuildId, InteractionKind, MemberPermissions, UserId};

    #[test]
    fn test_wire_shape() {
        let raw = br#"{"type":"Hello","token":"abc"}"#;
        assert_eq!(
            Frame::from_bytes(raw).unwrap(),
            Frame::Hello {
                token: "abc".into()
            }
        );

        let pong = String::from_utf8(Frame::Pong.to_bytes().unwrap()).unwrap();
        assert_eq!(pong, r#"{"type":"Pong"}"#);
    }

    #[test]
    fn test_interaction_frame_carries_button() {
        let id = Uuid::new_v4();
        let frame = Frame::Interaction {
            id,
            interaction: Interaction {
                guild_id: GuildId(1),
                channel_id: ChannelId(2),
                actor: Actor {
                    user_id: UserId(3),
                    permissions: MemberPermissions::default(),
                },
                kind: InteractionKind::Button {
                    custom_id: "lfg:join:42".into(),
                },
            },
        };

        let json: serde_json::Value = serde_json::from_slice(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], "Interaction");
        assert_eq!(json["interaction"]["kind"]["kind"], "button");
        assert_eq!(Frame::from_bytes(&frame.to_bytes().unwrap()).unwrap(), frame);
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(Frame::from_bytes(br#"{"type":"JoinRequest"}"#).is_err());
    }
}
