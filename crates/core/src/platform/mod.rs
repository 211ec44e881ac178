//! Chat platform capability
//!
//! Everything the squad core needs from the host platform: roles, channels,
//! threads and posts. The lifecycle manager receives an implementation by
//! injection; the binary wires the REST adapter, tests use `MemoryPlatform`.

mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ChannelId, GuildId, MessageId, Post, RoleId, UserId};

pub use memory::{MemoryChannel, MemoryPlatform, PlatformOp};

/// Platform result type
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Platform call failures
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Platform unavailable: {0}")]
    Unavailable(String),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound(_))
    }
}

/// Channel types the core creates or inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Text,
    Voice,
    Category,
    PublicThread,
    PrivateThread,
}

/// Voice room settings. Access is restricted to holders of `role`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceRoom {
    pub name: String,
    pub user_limit: u8,
    pub role: RoleId,
    pub category: Option<ChannelId>,
}

#[async_trait]
pub trait Platform: Send + Sync {
    /// The bot's own account
    async fn current_user(&self) -> PlatformResult<UserId>;

    /// Names of every role in a guild
    async fn role_names(&self, guild: GuildId) -> PlatformResult<Vec<String>>;

    /// Find a role by exact name
    async fn find_role(&self, guild: GuildId, name: &str) -> PlatformResult<Option<RoleId>>;

    /// Create a non-hoisted, non-mentionable role
    async fn create_role(&self, guild: GuildId, name: &str) -> PlatformResult<RoleId>;

    async fn delete_role(&self, guild: GuildId, role: RoleId) -> PlatformResult<()>;

    async fn add_member_role(&self, guild: GuildId, user: UserId, role: RoleId)
        -> PlatformResult<()>;

    async fn remove_member_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> PlatformResult<()>;

    /// Find a channel of the given kind by exact name
    async fn find_channel(
        &self,
        guild: GuildId,
        kind: ChannelKind,
        name: &str,
    ) -> PlatformResult<Option<ChannelId>>;

    /// Kind of a channel, or `None` if it does not exist in this guild
    async fn channel_kind(
        &self,
        guild: GuildId,
        channel: ChannelId,
    ) -> PlatformResult<Option<ChannelKind>>;

    /// Create a plain text channel or a category
    async fn create_channel(
        &self,
        guild: GuildId,
        kind: ChannelKind,
        name: &str,
    ) -> PlatformResult<ChannelId>;

    /// Create a voice room hidden from everyone except `room.role`
    async fn create_voice_room(&self, guild: GuildId, room: &VoiceRoom)
        -> PlatformResult<ChannelId>;

    /// Re-apply name, limit and access role to an existing voice room
    async fn update_voice_room(
        &self,
        guild: GuildId,
        channel: ChannelId,
        room: &VoiceRoom,
    ) -> PlatformResult<()>;

    async fn delete_channel(&self, channel: ChannelId) -> PlatformResult<()>;

    /// Start a public thread attached to a message
    async fn start_thread(
        &self,
        channel: ChannelId,
        message: MessageId,
        name: &str,
    ) -> PlatformResult<ChannelId>;

    /// Create an access-restricted thread; members must be added explicitly
    async fn create_private_thread(&self, channel: ChannelId, name: &str)
        -> PlatformResult<ChannelId>;

    async fn add_thread_member(&self, thread: ChannelId, user: UserId) -> PlatformResult<()>;

    async fn remove_thread_member(&self, thread: ChannelId, user: UserId) -> PlatformResult<()>;

    /// Archive and lock a thread, keeping its transcript
    async fn archive_thread(&self, thread: ChannelId) -> PlatformResult<()>;

    async fn send_post(&self, channel: ChannelId, post: &Post) -> PlatformResult<MessageId>;

    async fn edit_post(
        &self,
        channel: ChannelId,
        message: MessageId,
        post: &Post,
    ) -> PlatformResult<()>;

    /// Most recent posts in a channel, newest first
    async fn recent_posts(
        &self,
        channel: ChannelId,
        limit: u8,
    ) -> PlatformResult<Vec<(MessageId, Post)>>;

    /// Deep link to a message
    fn message_url(&self, guild: GuildId, channel: ChannelId, message: MessageId) -> String {
        format!(
            "https://discord.com/channels/{}/{}/{}",
            guild, channel, message
        )
    }
}
