//! Interaction router
//!
//! Turns inbound interactions into lifecycle calls, checking the actor's
//! permission against the squad first. Errors never escape: users see the
//! error's message, internal failures are logged and answered generically.

use std::sync::Arc;

use tracing::{debug, error, instrument, warn};

use crate::error::{Error, Result};
use crate::interaction::{Actor, ButtonAction, Command, Interaction, InteractionKind, MessageRef, Reply};
use crate::lifecycle::{Opened, SquadManager};
use crate::models::{Squad, SquadKey, UserId};
use crate::permissions::{ActorRole, PermissionMatrix, SquadAction};

/// Command and option that autocomplete answers for
const NAME_COMMAND: &str = "lfg";
const NAME_OPTION: &str = "squad_name";

fn authorize(actor: &Actor, host: Option<UserId>, action: SquadAction) -> Result<()> {
    let role = ActorRole::resolve(actor.user_id, host, actor.permissions);
    if !PermissionMatrix::can_perform(role, action) {
        return Err(Error::PermissionDenied(PermissionMatrix::denial(action).into()));
    }
    Ok(())
}

fn opened_reply(opened: &Opened, note: Option<&str>) -> Reply {
    let mut content = format!("✅ **{}** is live: {}", opened.squad.name, opened.url);
    if let Some(thread) = opened.squad.thread_id {
        content.push_str(&format!(" (Thread: {})", thread.mention()));
    }
    if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
        content.push_str(&format!("\n📝 {}", note));
    }
    Reply::ephemeral(content)
}

fn room_reply(voice: bool, thread: bool) -> Reply {
    let what = match (voice, thread) {
        (true, true) => "voice room & thread",
        (true, false) => "voice room",
        _ => "thread",
    };
    Reply::ephemeral(format!("✅ Private {} ready.", what))
}

pub struct Router {
    manager: Arc<SquadManager>,
}

impl Router {
    pub fn new(manager: Arc<SquadManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<SquadManager> {
        &self.manager
    }

    /// Handle one interaction and produce the reply
    #[instrument(skip(self, interaction), fields(guild = %interaction.guild_id, user = %interaction.actor.user_id))]
    pub async fn handle(&self, interaction: &Interaction) -> Reply {
        match self.dispatch(interaction).await {
            Ok(reply) => reply,
            Err(e) if e.is_user_facing() => {
                debug!(error = %e, "Interaction refused");
                Reply::ephemeral(e.user_message())
            }
            Err(e) => {
                error!(error = %e, "Interaction failed");
                Reply::ephemeral(e.user_message())
            }
        }
    }

    async fn dispatch(&self, interaction: &Interaction) -> Result<Reply> {
        match &interaction.kind {
            InteractionKind::Command { command } => self.command(interaction, command).await,
            InteractionKind::Button { custom_id } => self.button(interaction, custom_id).await,
            InteractionKind::Autocomplete {
                command,
                option,
                query,
            } => Ok(self.autocomplete(interaction, command, option, query).await),
        }
    }

    async fn autocomplete(&self, interaction: &Interaction, command: &str, option: &str, query: &str) -> Reply {
        if command != NAME_COMMAND || option != NAME_OPTION {
            return Reply::Ignored;
        }
        match self
            .manager
            .autocomplete_names(interaction.guild_id, query)
            .await
        {
            Ok(choices) => Reply::Choices { choices },
            Err(e) => {
                warn!(error = %e, "Name autocomplete failed");
                Reply::Choices {
                    choices: Vec::new(),
                }
            }
        }
    }

    async fn squad(&self, interaction: &Interaction, reference: MessageRef) -> Result<(SquadKey, Squad)> {
        self.manager
            .resolve(interaction.guild_id, interaction.channel_id, reference)
            .await
    }

    async fn squad_from_input(&self, interaction: &Interaction, raw: &str) -> Result<(SquadKey, Squad)> {
        let reference: MessageRef = raw.parse()?;
        self.squad(interaction, reference).await
    }

    async fn button(&self, interaction: &Interaction, custom_id: &str) -> Result<Reply> {
        let Some((action, message_id)) = ButtonAction::parse(custom_id) else {
            return Ok(Reply::Ignored);
        };
        let actor = &interaction.actor;
        let reference = MessageRef {
            message_id,
            channel_id: None,
        };
        let (key, squad) = self.squad(interaction, reference).await?;

        match action {
            ButtonAction::Join => {
                authorize(actor, Some(squad.host_id), SquadAction::Join)?;
                let squad = self.manager.join(&key, actor.user_id).await?;
                Ok(Reply::ephemeral(format!("✅ You joined **{}**.", squad.name)))
            }
            ButtonAction::Leave => {
                authorize(actor, Some(squad.host_id), SquadAction::Leave)?;
                let squad = self.manager.leave(&key, actor.user_id).await?;
                Ok(Reply::ephemeral(format!("✅ You left **{}**.", squad.name)))
            }
            ButtonAction::Room => {
                authorize(actor, Some(squad.host_id), SquadAction::RequestPrivateRoom)?;
                self.manager.request_private_room(&key, None, None).await?;
                Ok(room_reply(true, true))
            }
            ButtonAction::Close => {
                authorize(actor, Some(squad.host_id), SquadAction::Close)?;
                self.manager.close(&key).await?;
                Ok(Reply::ephemeral("🔒 Squad disbanded."))
            }
        }
    }

    async fn command(&self, interaction: &Interaction, command: &Command) -> Result<Reply> {
        let actor = &interaction.actor;
        let guild = interaction.guild_id;

        match command {
            Command::Setup => {
                authorize(actor, None, SquadAction::Setup)?;
                let channel = self.manager.setup(guild).await?;
                Ok(Reply::ephemeral(format!(
                    "✅ Squad channel ready: {}",
                    channel.mention()
                )))
            }
            Command::Open(request) => {
                authorize(actor, None, SquadAction::Open)?;
                let opened = self.manager.open(guild, actor.user_id, request).await?;
                Ok(opened_reply(&opened, request.note.as_deref()))
            }
            Command::Edit { message, changes } => {
                let (key, squad) = self.squad_from_input(interaction, message).await?;
                authorize(actor, Some(squad.host_id), SquadAction::Edit)?;
                self.manager.edit(&key, changes).await?;
                Ok(Reply::ephemeral("✅ Squad updated."))
            }
            Command::Add {
                message,
                user,
                force,
            } => {
                let (key, squad) = self.squad_from_input(interaction, message).await?;
                authorize(actor, Some(squad.host_id), SquadAction::ManualAdd)?;
                let squad = self.manager.add_member(&key, *user, *force).await?;
                Ok(Reply::ephemeral(format!(
                    "✅ {} added to **{}**.",
                    user.mention(),
                    squad.name
                )))
            }
            Command::Kick { message, user } => {
                let (key, squad) = self.squad_from_input(interaction, message).await?;
                authorize(actor, Some(squad.host_id), SquadAction::ManualRemove)?;
                let squad = self.manager.remove_member(&key, *user).await?;
                Ok(Reply::ephemeral(format!(
                    "✅ {} removed from **{}**.",
                    user.mention(),
                    squad.name
                )))
            }
            Command::Room {
                message,
                voice,
                thread,
            } => {
                let (key, squad) = self.squad_from_input(interaction, message).await?;
                authorize(actor, Some(squad.host_id), SquadAction::RequestPrivateRoom)?;
                self.manager
                    .request_private_room(&key, *voice, *thread)
                    .await?;
                Ok(room_reply(voice.unwrap_or(true), thread.unwrap_or(true)))
            }
        }
    }
}
