//! Visible squad post
//!
//! Every transition re-renders the whole post from the squad state. The
//! encoded state rides along in the embed footer.

use chrono::Utc;

use crate::codec::{self, CodecError};
use crate::config::SquadConfig;
use crate::interaction::ButtonAction;
use crate::models::{Button, ButtonStyle, Embed, EmbedField, MessageId, Post, Squad, SquadState};

pub const COLOR_OPEN: u32 = 0x00A86B;
pub const COLOR_DONE: u32 = 0x888888;
pub const COLOR_EXPIRED: u32 = 0x777777;

/// Marks the guide post so setup can find and refresh it
pub const PIN_MARKER: &str = "[[LFG_PIN]]";

pub fn title(squad: &Squad) -> String {
    let headline = squad.headline();
    match squad.state() {
        SquadState::Forming => format!("🔎 {}", headline),
        SquadState::Full => format!("🔒 [FULL] {}", headline),
        SquadState::Closed => format!("🔒 [CLOSED] {}", headline),
        SquadState::Expired => format!("⏲️ [EXPIRED] {}", headline),
    }
}

fn color(state: SquadState) -> u32 {
    match state {
        SquadState::Forming => COLOR_OPEN,
        SquadState::Full | SquadState::Closed => COLOR_DONE,
        SquadState::Expired => COLOR_EXPIRED,
    }
}

fn buttons(squad: &Squad, message: MessageId) -> Vec<Button> {
    let terminal = squad.is_terminal();
    let button = |action: ButtonAction, label: &str, style, disabled| Button {
        custom_id: action.custom_id(message),
        label: label.to_string(),
        style,
        disabled,
    };

    vec![
        button(
            ButtonAction::Join,
            "Join",
            ButtonStyle::Success,
            terminal || squad.is_full(),
        ),
        button(ButtonAction::Leave, "Leave", ButtonStyle::Secondary, terminal),
        button(ButtonAction::Room, "Private room", ButtonStyle::Primary, terminal),
        button(ButtonAction::Close, "Disband", ButtonStyle::Danger, terminal),
    ]
}

/// Render the post for a squad. Buttons need the post's own id, so a post
/// rendered before it was sent carries none.
pub fn render(squad: &Squad, message: Option<MessageId>) -> Result<Post, CodecError> {
    let footer = codec::encode(squad)?;

    let description = [
        format!("**Wanted:** {}", squad.positions),
        format!("**Slots:** {}/{}", squad.joined.len(), squad.slots),
        format!("👤 **Host:** {}", squad.host_id.mention()),
    ]
    .join("\n");

    let members = if squad.joined.is_empty() {
        "— open —".to_string()
    } else {
        squad
            .joined
            .iter()
            .map(|id| format!("• {}", id.mention()))
            .collect::<Vec<_>>()
            .join("\n")
    };

    Ok(Post {
        content: None,
        embed: Some(Embed {
            title: title(squad),
            description,
            color: color(squad.state()),
            fields: vec![EmbedField {
                name: "Members".to_string(),
                value: members,
            }],
            footer: Some(footer),
            timestamp: Some(Utc::now()),
        }),
        buttons: message.map(|m| buttons(squad, m)).unwrap_or_default(),
        author: None,
    })
}

/// Guide post for the squad channel
pub fn guide(config: &SquadConfig) -> Post {
    let text = [
        "📌 **How squad search works**".to_string(),
        "• **/lfg**: mode, platform, positions, slots".to_string(),
        "• **Optional**:".to_string(),
        format!(
            "  – **squad_name**: pick a free name from the list (autocomplete, e.g. \"{} Mamba\")",
            config.name_prefix
        ),
        "  – **crossplay**: allow players across consoles".to_string(),
        "• **Join/Leave** with the buttons".to_string(),
        format!(
            "• When **full**: [FULL], a **private voice room** in \"{}\" and a **private thread**",
            config.voice_category
        ),
        "• **Disband**: host or moderators end the squad (role and voice room are deleted, the thread is archived)".to_string(),
        format!(
            "• Squads expire after **{} minutes** by default",
            config.default_ttl_minutes
        ),
        "• Be respectful, no spam".to_string(),
    ]
    .join("\n");

    Post::text(format!("{}\n\n{}", text, PIN_MARKER))
}
