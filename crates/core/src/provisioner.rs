//! Side-effect resources bound to a squad
//!
//! Roles, voice rooms and threads are created lazily and torn down when a
//! squad ends. Apart from finding the squad channel, every operation here
//! is best effort: platform failures are logged and the caller continues
//! with whatever succeeded.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::SquadConfig;
use crate::error::{Error, Result};
use crate::models::{ChannelId, GuildId, RoleId, Squad, SquadKey, UserId};
use crate::names::{NameAllocator, NameHandle};
use crate::platform::{ChannelKind, Platform, PlatformError, VoiceRoom};

/// Resources created by a provisioning pass that the squad does not
/// reference yet
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Provisioned {
    pub voice_id: Option<ChannelId>,
    pub thread_id: Option<ChannelId>,
}

impl Provisioned {
    pub fn is_empty(&self) -> bool {
        self.voice_id.is_none() && self.thread_id.is_none()
    }
}

/// Handles taken out of a squad that has ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released {
    pub name: String,
    pub role_id: Option<RoleId>,
    pub voice_id: Option<ChannelId>,
    pub thread_id: Option<ChannelId>,
}

impl Released {
    /// Detach role and voice room from a squad; the thread stays referenced
    /// so the transcript remains reachable from the post.
    pub fn take(squad: &mut Squad) -> Self {
        Self {
            name: squad.name.clone(),
            role_id: squad.role_id.take(),
            voice_id: squad.voice_id.take(),
            thread_id: squad.thread_id,
        }
    }
}

fn voice_room(squad: &Squad, role: RoleId, category: Option<ChannelId>) -> VoiceRoom {
    VoiceRoom {
        name: squad.name.clone(),
        user_limit: squad.slots,
        role,
        category,
    }
}

/// Platform limit for thread names, in characters
const THREAD_NAME_LIMIT: usize = 100;

fn thread_name(squad: &Squad, kind: &str) -> String {
    let name = format!("[{}] {} {}", squad.mode, squad.name, kind);
    if name.chars().count() <= THREAD_NAME_LIMIT {
        return name;
    }
    let mut clipped: String = name.chars().take(THREAD_NAME_LIMIT - 1).collect();
    clipped.push('…');
    clipped
}

fn log_failure(squad: &str, op: &str, error: &PlatformError) {
    warn!(squad = %squad, op = op, error = %error, "Squad provisioning step failed");
}

pub struct Provisioner {
    platform: Arc<dyn Platform>,
    names: Arc<NameAllocator>,
    config: Arc<SquadConfig>,
}

impl Provisioner {
    pub fn new(platform: Arc<dyn Platform>, names: Arc<NameAllocator>, config: Arc<SquadConfig>) -> Self {
        Self {
            platform,
            names,
            config,
        }
    }

    /// Find or create the text channel squads are posted in
    pub async fn ensure_lfg_channel(&self, guild: GuildId) -> Result<ChannelId> {
        let name = &self.config.channel_name;
        if let Some(channel) = self.platform.find_channel(guild, ChannelKind::Text, name).await? {
            return Ok(channel);
        }
        let channel = self
            .platform
            .create_channel(guild, ChannelKind::Text, name)
            .await?;
        info!(guild = %guild, channel = %channel, "Created squad channel");
        Ok(channel)
    }

    /// The squad's exclusivity role
    pub fn ensure_exclusivity_handle(&self, squad: &Squad) -> Result<RoleId> {
        squad
            .role_id
            .ok_or_else(|| Error::NotFound(format!("{} has no squad role", squad.name)))
    }

    async fn ensure_voice_category(&self, guild: GuildId) -> Option<ChannelId> {
        let name = &self.config.voice_category;
        let found = match self
            .platform
            .find_channel(guild, ChannelKind::Category, name)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                log_failure(name, "find voice category", &e);
                return None;
            }
        };
        if found.is_some() {
            return found;
        }
        match self
            .platform
            .create_channel(guild, ChannelKind::Category, name)
            .await
        {
            Ok(category) => Some(category),
            Err(e) => {
                log_failure(name, "create voice category", &e);
                None
            }
        }
    }

    /// Create the role-restricted voice room unless the squad has one.
    /// Returns the room only when it was created by this call.
    pub async fn ensure_voice_room(&self, key: &SquadKey, squad: &Squad) -> Option<ChannelId> {
        if squad.voice_id.is_some() {
            return None;
        }
        let role = match self.ensure_exclusivity_handle(squad) {
            Ok(role) => role,
            Err(e) => {
                warn!(squad = %squad.name, error = %e, "Cannot create voice room");
                return None;
            }
        };

        let category = self.ensure_voice_category(key.guild_id).await;
        match self
            .platform
            .create_voice_room(key.guild_id, &voice_room(squad, role, category))
            .await
        {
            Ok(voice) => {
                info!(squad = %squad.name, voice = %voice, "Voice room created");
                Some(voice)
            }
            Err(e) => {
                log_failure(&squad.name, "create voice room", &e);
                None
            }
        }
    }

    /// Make sure the squad has a thread. With `force_private`, a public
    /// thread is replaced by a private one holding every member and the old
    /// thread is archived. Returns the thread only when it was created by
    /// this call.
    pub async fn ensure_discussion_thread(
        &self,
        key: &SquadKey,
        squad: &Squad,
        force_private: bool,
    ) -> Option<ChannelId> {
        if !force_private {
            if squad.thread_id.is_some() {
                return None;
            }
            let name = thread_name(squad, "chat");
            return match self
                .platform
                .start_thread(key.channel_id, key.message_id, &name)
                .await
            {
                Ok(thread) => Some(thread),
                Err(e) => {
                    log_failure(&squad.name, "start thread", &e);
                    None
                }
            };
        }

        if squad.thread_private && squad.thread_id.is_some() {
            return None;
        }

        let name = thread_name(squad, "private");
        let thread = match self.platform.create_private_thread(key.channel_id, &name).await {
            Ok(thread) => thread,
            Err(e) => {
                log_failure(&squad.name, "create private thread", &e);
                return None;
            }
        };
        for member in &squad.joined {
            self.add_to_thread(&squad.name, thread, *member).await;
        }
        if let Some(public) = squad.thread_id {
            self.archive(&squad.name, public).await;
        }
        info!(squad = %squad.name, thread = %thread, "Private thread created");
        Some(thread)
    }

    /// Re-apply name, capacity and access role to an existing voice room
    pub async fn sync_voice_room(&self, key: &SquadKey, squad: &Squad) {
        let (Some(voice), Some(role)) = (squad.voice_id, squad.role_id) else {
            return;
        };
        if let Err(e) = self
            .platform
            .update_voice_room(key.guild_id, voice, &voice_room(squad, role, None))
            .await
        {
            log_failure(&squad.name, "update voice room", &e);
        }
    }

    pub async fn grant(&self, guild: GuildId, squad: &str, role: RoleId, user: UserId) {
        if let Err(e) = self.platform.add_member_role(guild, user, role).await {
            log_failure(squad, "grant role", &e);
        }
    }

    pub async fn revoke(&self, guild: GuildId, squad: &str, role: RoleId, user: UserId) {
        if let Err(e) = self.platform.remove_member_role(guild, user, role).await {
            log_failure(squad, "revoke role", &e);
        }
    }

    pub async fn add_to_thread(&self, squad: &str, thread: ChannelId, user: UserId) {
        if let Err(e) = self.platform.add_thread_member(thread, user).await {
            log_failure(squad, "add thread member", &e);
        }
    }

    pub async fn remove_from_thread(&self, squad: &str, thread: ChannelId, user: UserId) {
        if let Err(e) = self.platform.remove_thread_member(thread, user).await {
            log_failure(squad, "remove thread member", &e);
        }
    }

    async fn archive(&self, squad: &str, thread: ChannelId) {
        if let Err(e) = self.platform.archive_thread(thread).await {
            log_failure(squad, "archive thread", &e);
        }
    }

    async fn delete_voice(&self, squad: &str, voice: ChannelId) {
        match self.platform.delete_channel(voice).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(squad = %squad, "Voice room already gone"),
            Err(e) => log_failure(squad, "delete voice room", &e),
        }
    }

    /// Give back a role by name: deletes the role and frees the name
    pub async fn release_name(&self, guild: GuildId, name: &str, role: RoleId) {
        let handle = NameHandle {
            name: name.to_string(),
            role_id: role,
        };
        if let Err(e) = self.names.release(guild, &handle).await {
            warn!(squad = %name, error = %e, "Failed to release squad name");
        }
    }

    /// Tear down the resources of an ended squad
    pub async fn release(&self, key: &SquadKey, released: &Released) {
        if let Some(voice) = released.voice_id {
            self.delete_voice(&released.name, voice).await;
        }
        if let Some(role) = released.role_id {
            self.release_name(key.guild_id, &released.name, role).await;
        }
        if let Some(thread) = released.thread_id {
            self.archive(&released.name, thread).await;
        }
        info!(squad = %released.name, message = %key.message_id, "Squad resources released");
    }

    /// Remove resources that lost a race and are referenced by no squad
    pub async fn discard(&self, squad: &str, provisioned: Provisioned) {
        if let Some(voice) = provisioned.voice_id {
            self.delete_voice(squad, voice).await;
        }
        if let Some(thread) = provisioned.thread_id {
            self.archive(squad, thread).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Post, SquadDetails, SquadStatus};
    use crate::names::NamePool;
    use crate::platform::{MemoryPlatform, PlatformOp};
    use crate::storage::Database;

    const GUILD: GuildId = GuildId(1);

    struct Fixture {
        platform: Arc<MemoryPlatform>,
        names: Arc<NameAllocator>,
        provisioner: Provisioner,
    }

    fn fixture() -> Fixture {
        let platform = Arc::new(MemoryPlatform::new());
        let config = Arc::new(SquadConfig::default());
        let db = Database::open_in_memory().unwrap().shared();
        let names = Arc::new(NameAllocator::new(
            NamePool::new(vec!["Squad Mamba".into()]),
            "Squad",
            db,
            platform.clone(),
        ));
        let provisioner = Provisioner::new(platform.clone(), names.clone(), config);
        Fixture {
            platform,
            names,
            provisioner,
        }
    }

    async fn squad_with_post(f: &Fixture) -> (SquadKey, Squad) {
        let handle = f.names.allocate(GUILD, "Mamba").await.unwrap();
        let channel = f.provisioner.ensure_lfg_channel(GUILD).await.unwrap();
        let message = f.platform.add_post(channel, Post::text("squad"));
        let mut squad = Squad::new(
            handle.name,
            UserId(10),
            SquadDetails {
                mode: "Rec".into(),
                platform: "PS5".into(),
                positions: "any".into(),
                crossplay: false,
            },
            2,
            handle.role_id,
            120,
        );
        squad.joined.push(UserId(11));
        let key = SquadKey {
            guild_id: GUILD,
            channel_id: channel,
            message_id: message,
        };
        (key, squad)
    }

    #[tokio::test]
    async fn test_lfg_channel_is_reused() {
        let f = fixture();
        let first = f.provisioner.ensure_lfg_channel(GUILD).await.unwrap();
        let second = f.provisioner.ensure_lfg_channel(GUILD).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.platform.calls(PlatformOp::CreateChannel), 1);
    }

    #[tokio::test]
    async fn test_voice_room_is_restricted_and_idempotent() {
        let f = fixture();
        let (key, mut squad) = squad_with_post(&f).await;

        let voice = f.provisioner.ensure_voice_room(&key, &squad).await.unwrap();
        let room = f.platform.channel(voice).unwrap();
        assert_eq!(room.user_limit, Some(2));
        assert_eq!(room.access_role, squad.role_id);
        let category = f.platform.channel(room.parent.unwrap()).unwrap();
        assert_eq!(category.name, "🎤 Squads");

        squad.voice_id = Some(voice);
        assert!(f.provisioner.ensure_voice_room(&key, &squad).await.is_none());
        assert_eq!(f.platform.calls(PlatformOp::CreateVoiceRoom), 1);
    }

    #[tokio::test]
    async fn test_private_thread_replaces_public_one() {
        let f = fixture();
        let (key, mut squad) = squad_with_post(&f).await;

        let public = f
            .provisioner
            .ensure_discussion_thread(&key, &squad, false)
            .await
            .unwrap();
        squad.thread_id = Some(public);
        assert!(f.provisioner.ensure_discussion_thread(&key, &squad, false).await.is_none());

        let private = f
            .provisioner
            .ensure_discussion_thread(&key, &squad, true)
            .await
            .unwrap();
        let thread = f.platform.channel(private).unwrap();
        assert_eq!(thread.kind, ChannelKind::PrivateThread);
        assert_eq!(thread.name, "[Rec] Squad Mamba private");
        assert_eq!(thread.members, vec![UserId(10), UserId(11)]);
        assert!(f.platform.channel(public).unwrap().locked);

        squad.thread_id = Some(private);
        squad.thread_private = true;
        assert!(f.provisioner.ensure_discussion_thread(&key, &squad, true).await.is_none());
    }

    #[tokio::test]
    async fn test_thread_names_fit_platform_limit() {
        let f = fixture();
        let (key, mut squad) = squad_with_post(&f).await;
        squad.mode = "Ranked ".repeat(14).trim_end().to_string();

        let public = f
            .provisioner
            .ensure_discussion_thread(&key, &squad, false)
            .await
            .unwrap();
        let name = f.platform.channel(public).unwrap().name;
        assert_eq!(name.chars().count(), THREAD_NAME_LIMIT);
        assert!(name.starts_with("[Ranked Ranked"));
        assert!(name.ends_with('…'));
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let f = fixture();
        let (key, squad) = squad_with_post(&f).await;
        f.platform.fail(PlatformOp::CreateVoiceRoom);
        f.platform.fail(PlatformOp::CreatePrivateThread);

        assert!(f.provisioner.ensure_voice_room(&key, &squad).await.is_none());
        assert!(f.provisioner.ensure_discussion_thread(&key, &squad, true).await.is_none());
    }

    #[tokio::test]
    async fn test_release_frees_everything() {
        let f = fixture();
        let (key, mut squad) = squad_with_post(&f).await;
        let role = squad.role_id.unwrap();
        squad.voice_id = f.provisioner.ensure_voice_room(&key, &squad).await;
        squad.thread_id = f.provisioner.ensure_discussion_thread(&key, &squad, true).await;
        squad.thread_private = true;

        squad.status = SquadStatus::Closed;
        let released = Released::take(&mut squad);
        assert!(squad.role_id.is_none() && squad.voice_id.is_none());
        f.provisioner.release(&key, &released).await;

        assert!(f.platform.channel(released.voice_id.unwrap()).is_none());
        assert!(f.platform.channel(released.thread_id.unwrap()).unwrap().archived);
        assert!(f.platform.role_name(role).is_none());
        assert!(!f.names.is_taken(GUILD, "Squad Mamba").await.unwrap());
    }
}
