//! In-memory platform
//!
//! A complete `Platform` kept in process memory. Used by tests across the
//! workspace and for dry runs without a network connection. Individual
//! operations can be made to fail to exercise best-effort provisioning.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{ChannelKind, Platform, PlatformError, PlatformResult, VoiceRoom};
use crate::models::{ChannelId, GuildId, MessageId, Post, RoleId, UserId};

/// Operations that can be switched into failure mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformOp {
    CreateRole,
    DeleteRole,
    AddMemberRole,
    RemoveMemberRole,
    CreateChannel,
    CreateVoiceRoom,
    UpdateVoiceRoom,
    DeleteChannel,
    StartThread,
    CreatePrivateThread,
    AddThreadMember,
    RemoveThreadMember,
    ArchiveThread,
    SendPost,
    EditPost,
}

/// A channel, category, voice room or thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryChannel {
    pub guild: GuildId,
    pub kind: ChannelKind,
    pub name: String,
    pub parent: Option<ChannelId>,
    pub user_limit: Option<u8>,
    pub access_role: Option<RoleId>,
    pub archived: bool,
    pub locked: bool,
    pub members: Vec<UserId>,
}

impl MemoryChannel {
    fn new(guild: GuildId, kind: ChannelKind, name: &str) -> Self {
        Self {
            guild,
            kind,
            name: name.to_string(),
            parent: None,
            user_limit: None,
            access_role: None,
            archived: false,
            locked: false,
            members: Vec::new(),
        }
    }
}

struct MemoryState {
    next_id: u64,
    bot: UserId,
    roles: HashMap<RoleId, (GuildId, String)>,
    member_roles: HashSet<(GuildId, UserId, RoleId)>,
    channels: HashMap<ChannelId, MemoryChannel>,
    posts: BTreeMap<MessageId, (ChannelId, Post)>,
    failing: HashSet<PlatformOp>,
    calls: Vec<PlatformOp>,
}

impl MemoryState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Record a call and fail it if requested
    fn call(&mut self, op: PlatformOp) -> PlatformResult<()> {
        self.calls.push(op);
        if self.failing.contains(&op) {
            return Err(PlatformError::Unavailable(format!("{:?} failed", op)));
        }
        Ok(())
    }

    fn channel_mut(&mut self, channel: ChannelId) -> PlatformResult<&mut MemoryChannel> {
        self.channels
            .get_mut(&channel)
            .ok_or_else(|| PlatformError::NotFound(format!("channel {}", channel)))
    }
}

/// In-memory `Platform` implementation
pub struct MemoryPlatform {
    state: Mutex<MemoryState>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_id: 1000,
                bot: UserId(999),
                roles: HashMap::new(),
                member_roles: HashSet::new(),
                channels: HashMap::new(),
                posts: BTreeMap::new(),
                failing: HashSet::new(),
                calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Memory platform mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// The bot account id
    pub fn bot_user(&self) -> UserId {
        self.lock().bot
    }

    /// Create a text channel as if an admin had made it
    pub fn add_text_channel(&self, guild: GuildId, name: &str) -> ChannelId {
        let mut state = self.lock();
        let id = ChannelId(state.next_id());
        state
            .channels
            .insert(id, MemoryChannel::new(guild, ChannelKind::Text, name));
        id
    }

    /// Create a role outside the bot's control
    pub fn add_role(&self, guild: GuildId, name: &str) -> RoleId {
        let mut state = self.lock();
        let id = RoleId(state.next_id());
        state.roles.insert(id, (guild, name.to_string()));
        id
    }

    /// Post a message as some other user
    pub fn add_post(&self, channel: ChannelId, post: Post) -> MessageId {
        let mut state = self.lock();
        let id = MessageId(state.next_id());
        state.posts.insert(id, (channel, post));
        id
    }

    /// Make every future call of `op` fail
    pub fn fail(&self, op: PlatformOp) {
        self.lock().failing.insert(op);
    }

    pub fn recover(&self, op: PlatformOp) {
        self.lock().failing.remove(&op);
    }

    /// Number of calls made to `op`, failed ones included
    pub fn calls(&self, op: PlatformOp) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    pub fn role_name(&self, role: RoleId) -> Option<String> {
        self.lock().roles.get(&role).map(|(_, name)| name.clone())
    }

    pub fn has_role(&self, guild: GuildId, user: UserId, role: RoleId) -> bool {
        self.lock().member_roles.contains(&(guild, user, role))
    }

    pub fn channel(&self, channel: ChannelId) -> Option<MemoryChannel> {
        self.lock().channels.get(&channel).cloned()
    }

    pub fn channels_of_kind(&self, kind: ChannelKind) -> Vec<ChannelId> {
        let state = self.lock();
        let mut ids: Vec<_> = state
            .channels
            .iter()
            .filter(|(_, c)| c.kind == kind)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    pub fn post(&self, message: MessageId) -> Option<Post> {
        self.lock().posts.get(&message).map(|(_, post)| post.clone())
    }
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    async fn current_user(&self) -> PlatformResult<UserId> {
        Ok(self.lock().bot)
    }

    async fn role_names(&self, guild: GuildId) -> PlatformResult<Vec<String>> {
        let state = self.lock();
        let mut names: Vec<_> = state
            .roles
            .values()
            .filter(|(g, _)| *g == guild)
            .map(|(_, n)| n.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn find_role(&self, guild: GuildId, name: &str) -> PlatformResult<Option<RoleId>> {
        let state = self.lock();
        let mut matches: Vec<_> = state
            .roles
            .iter()
            .filter(|(_, (g, n))| *g == guild && n == name)
            .map(|(id, _)| *id)
            .collect();
        matches.sort();
        Ok(matches.first().copied())
    }

    async fn create_role(&self, guild: GuildId, name: &str) -> PlatformResult<RoleId> {
        let mut state = self.lock();
        state.call(PlatformOp::CreateRole)?;
        let id = RoleId(state.next_id());
        state.roles.insert(id, (guild, name.to_string()));
        Ok(id)
    }

    async fn delete_role(&self, _guild: GuildId, role: RoleId) -> PlatformResult<()> {
        let mut state = self.lock();
        state.call(PlatformOp::DeleteRole)?;
        if state.roles.remove(&role).is_none() {
            return Err(PlatformError::NotFound(format!("role {}", role)));
        }
        state.member_roles.retain(|(_, _, r)| *r != role);
        Ok(())
    }

    async fn add_member_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> PlatformResult<()> {
        let mut state = self.lock();
        state.call(PlatformOp::AddMemberRole)?;
        if !state.roles.contains_key(&role) {
            return Err(PlatformError::NotFound(format!("role {}", role)));
        }
        state.member_roles.insert((guild, user, role));
        Ok(())
    }

    async fn remove_member_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> PlatformResult<()> {
        let mut state = self.lock();
        state.call(PlatformOp::RemoveMemberRole)?;
        state.member_roles.remove(&(guild, user, role));
        Ok(())
    }

    async fn find_channel(
        &self,
        guild: GuildId,
        kind: ChannelKind,
        name: &str,
    ) -> PlatformResult<Option<ChannelId>> {
        let state = self.lock();
        let mut matches: Vec<_> = state
            .channels
            .iter()
            .filter(|(_, c)| c.guild == guild && c.kind == kind && c.name == name)
            .map(|(id, _)| *id)
            .collect();
        matches.sort();
        Ok(matches.first().copied())
    }

    async fn channel_kind(
        &self,
        guild: GuildId,
        channel: ChannelId,
    ) -> PlatformResult<Option<ChannelKind>> {
        let state = self.lock();
        Ok(state
            .channels
            .get(&channel)
            .filter(|c| c.guild == guild)
            .map(|c| c.kind))
    }

    async fn create_channel(
        &self,
        guild: GuildId,
        kind: ChannelKind,
        name: &str,
    ) -> PlatformResult<ChannelId> {
        let mut state = self.lock();
        state.call(PlatformOp::CreateChannel)?;
        let id = ChannelId(state.next_id());
        state.channels.insert(id, MemoryChannel::new(guild, kind, name));
        Ok(id)
    }

    async fn create_voice_room(
        &self,
        guild: GuildId,
        room: &VoiceRoom,
    ) -> PlatformResult<ChannelId> {
        let mut state = self.lock();
        state.call(PlatformOp::CreateVoiceRoom)?;
        let id = ChannelId(state.next_id());
        let mut channel = MemoryChannel::new(guild, ChannelKind::Voice, &room.name);
        channel.parent = room.category;
        channel.user_limit = Some(room.user_limit);
        channel.access_role = Some(room.role);
        state.channels.insert(id, channel);
        Ok(id)
    }

    async fn update_voice_room(
        &self,
        _guild: GuildId,
        channel: ChannelId,
        room: &VoiceRoom,
    ) -> PlatformResult<()> {
        let mut state = self.lock();
        state.call(PlatformOp::UpdateVoiceRoom)?;
        let voice = state.channel_mut(channel)?;
        voice.name = room.name.clone();
        voice.user_limit = Some(room.user_limit);
        voice.access_role = Some(room.role);
        Ok(())
    }

    async fn delete_channel(&self, channel: ChannelId) -> PlatformResult<()> {
        let mut state = self.lock();
        state.call(PlatformOp::DeleteChannel)?;
        state
            .channels
            .remove(&channel)
            .map(|_| ())
            .ok_or_else(|| PlatformError::NotFound(format!("channel {}", channel)))
    }

    async fn start_thread(
        &self,
        channel: ChannelId,
        message: MessageId,
        name: &str,
    ) -> PlatformResult<ChannelId> {
        let mut state = self.lock();
        state.call(PlatformOp::StartThread)?;
        if !state.posts.contains_key(&message) {
            return Err(PlatformError::NotFound(format!("message {}", message)));
        }
        let guild = state.channel_mut(channel)?.guild;
        let id = ChannelId(state.next_id());
        let mut thread = MemoryChannel::new(guild, ChannelKind::PublicThread, name);
        thread.parent = Some(channel);
        state.channels.insert(id, thread);
        Ok(id)
    }

    async fn create_private_thread(
        &self,
        channel: ChannelId,
        name: &str,
    ) -> PlatformResult<ChannelId> {
        let mut state = self.lock();
        state.call(PlatformOp::CreatePrivateThread)?;
        let guild = state.channel_mut(channel)?.guild;
        let id = ChannelId(state.next_id());
        let mut thread = MemoryChannel::new(guild, ChannelKind::PrivateThread, name);
        thread.parent = Some(channel);
        state.channels.insert(id, thread);
        Ok(id)
    }

    async fn add_thread_member(&self, thread: ChannelId, user: UserId) -> PlatformResult<()> {
        let mut state = self.lock();
        state.call(PlatformOp::AddThreadMember)?;
        let thread = state.channel_mut(thread)?;
        if !thread.members.contains(&user) {
            thread.members.push(user);
        }
        Ok(())
    }

    async fn remove_thread_member(&self, thread: ChannelId, user: UserId) -> PlatformResult<()> {
        let mut state = self.lock();
        state.call(PlatformOp::RemoveThreadMember)?;
        state.channel_mut(thread)?.members.retain(|u| *u != user);
        Ok(())
    }

    async fn archive_thread(&self, thread: ChannelId) -> PlatformResult<()> {
        let mut state = self.lock();
        state.call(PlatformOp::ArchiveThread)?;
        let thread = state.channel_mut(thread)?;
        thread.archived = true;
        thread.locked = true;
        Ok(())
    }

    async fn send_post(&self, channel: ChannelId, post: &Post) -> PlatformResult<MessageId> {
        let mut state = self.lock();
        state.call(PlatformOp::SendPost)?;
        state.channel_mut(channel)?;
        let id = MessageId(state.next_id());
        let mut post = post.clone();
        post.author = Some(state.bot);
        state.posts.insert(id, (channel, post));
        Ok(id)
    }

    async fn edit_post(
        &self,
        channel: ChannelId,
        message: MessageId,
        post: &Post,
    ) -> PlatformResult<()> {
        let mut state = self.lock();
        state.call(PlatformOp::EditPost)?;
        let bot = state.bot;
        match state.posts.get_mut(&message) {
            Some((c, existing)) if *c == channel => {
                *existing = post.clone();
                existing.author = Some(bot);
                Ok(())
            }
            _ => Err(PlatformError::NotFound(format!("message {}", message))),
        }
    }

    async fn recent_posts(
        &self,
        channel: ChannelId,
        limit: u8,
    ) -> PlatformResult<Vec<(MessageId, Post)>> {
        let state = self.lock();
        Ok(state
            .posts
            .iter()
            .rev()
            .filter(|(_, (c, _))| *c == channel)
            .take(limit as usize)
            .map(|(id, (_, post))| (*id, post.clone()))
            .collect())
    }
}
