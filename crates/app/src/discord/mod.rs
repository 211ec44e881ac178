//! Discord REST adapter
//!
//! Implements the core `Platform` capability against the v10 HTTP API with
//! a bot token. Rate-limited calls are retried after the advertised delay.

mod wire;

use std::time::Duration;

use async_trait::async_trait;
use lfg_core::{
    ChannelId, ChannelKind, GuildId, MessageId, Platform, PlatformError, PlatformResult, Post,
    RoleId, UserId, VoiceRoom,
};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::DiscordConfig;
use crate::error::{AppError, Result};
use wire::{ChannelObject, MessageObject, RoleObject, ThreadList, UserObject};

/// Attempts per call when the API keeps answering 429
const MAX_ATTEMPTS: u32 = 4;

/// Upper bound on random delay added to a retry, in milliseconds
const RETRY_JITTER_MS: u64 = 250;

const REQUEST_TIMEOUT_SECS: u64 = 15;

const USER_AGENT: &str = concat!("DiscordBot (lfg-bot, ", env!("CARGO_PKG_VERSION"), ")");

pub struct DiscordRest {
    http: reqwest::Client,
    api_base: String,
    bot_user: OnceCell<UserId>,
}

impl DiscordRest {
    pub fn new(config: &DiscordConfig) -> Result<Self> {
        let token = config
            .token
            .as_deref()
            .ok_or_else(|| AppError::Config("Discord token missing".into()))?;

        let mut auth = HeaderValue::from_str(&format!("Bot {}", token))
            .map_err(|_| AppError::Config("Discord token contains invalid characters".into()))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_user: OnceCell::new(),
        })
    }

    /// Send a request, retrying while rate limited. Non-success statuses
    /// become `PlatformError`s.
    async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> PlatformResult<String> {
        let url = format!("{}{}", self.api_base, path);

        for attempt in 1..=MAX_ATTEMPTS {
            let mut request = self.http.request(method.clone(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request
                .send()
                .await
                .map_err(|e| PlatformError::Unavailable(e.to_string()))?;
            let status = response.status();
            let retry_header = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let text = response
                .text()
                .await
                .map_err(|e| PlatformError::Unavailable(e.to_string()))?;

            if status.is_success() {
                return Ok(text);
            }

            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_ATTEMPTS {
                let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                let secs = wire::retry_after(&parsed, retry_header.as_deref()).unwrap_or(1.0);
                let jitter = rand::thread_rng().gen_range(0..=RETRY_JITTER_MS);
                let delay = Duration::from_secs_f64(secs) + Duration::from_millis(jitter);
                warn!(%method, path, attempt, delay_ms = delay.as_millis() as u64, "Rate limited");
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(status_error(status, path, text));
        }

        Err(PlatformError::Unavailable(format!(
            "{} {} still rate limited after {} attempts",
            method, path, MAX_ATTEMPTS
        )))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> PlatformResult<T> {
        let text = self.call(Method::GET, path, None).await?;
        decode(path, &text)
    }

    async fn send<T: DeserializeOwned>(&self, method: Method, path: &str, body: &Value) -> PlatformResult<T> {
        let text = self.call(method, path, Some(body)).await?;
        decode(path, &text)
    }

    async fn send_empty(&self, method: Method, path: &str, body: Option<&Value>) -> PlatformResult<()> {
        self.call(method, path, body).await.map(|_| ())
    }

    async fn channels(&self, guild: GuildId, kind: ChannelKind) -> PlatformResult<Vec<ChannelObject>> {
        match kind {
            ChannelKind::PublicThread | ChannelKind::PrivateThread => {
                let list: ThreadList = self.get(&format!("/guilds/{}/threads/active", guild)).await?;
                Ok(list.threads)
            }
            _ => self.get(&format!("/guilds/{}/channels", guild)).await,
        }
    }
}

fn status_error(status: StatusCode, path: &str, body: String) -> PlatformError {
    match status {
        StatusCode::NOT_FOUND => PlatformError::NotFound(path.to_string()),
        StatusCode::FORBIDDEN => PlatformError::Forbidden(path.to_string()),
        _ => PlatformError::Http {
            status: status.as_u16(),
            body,
        },
    }
}

fn decode<T: DeserializeOwned>(path: &str, text: &str) -> PlatformResult<T> {
    serde_json::from_str(text).map_err(|e| PlatformError::Decode(format!("{}: {}", path, e)))
}

#[async_trait]
impl Platform for DiscordRest {
    async fn current_user(&self) -> PlatformResult<UserId> {
        self.bot_user
            .get_or_try_init(|| async {
                let me: UserObject = self.get("/users/@me").await?;
                debug!(user = %me.id, "Resolved bot user");
                Ok::<_, PlatformError>(me.id)
            })
            .await
            .copied()
    }

    async fn role_names(&self, guild: GuildId) -> PlatformResult<Vec<String>> {
        let roles: Vec<RoleObject> = self.get(&format!("/guilds/{}/roles", guild)).await?;
        Ok(roles.into_iter().map(|r| r.name).collect())
    }

    async fn find_role(&self, guild: GuildId, name: &str) -> PlatformResult<Option<RoleId>> {
        let roles: Vec<RoleObject> = self.get(&format!("/guilds/{}/roles", guild)).await?;
        Ok(roles
            .into_iter()
            .filter(|r| r.name == name)
            .map(|r| r.id)
            .min())
    }

    async fn create_role(&self, guild: GuildId, name: &str) -> PlatformResult<RoleId> {
        let role: RoleObject = self
            .send(Method::POST, &format!("/guilds/{}/roles", guild), &wire::role_body(name))
            .await?;
        Ok(role.id)
    }

    async fn delete_role(&self, guild: GuildId, role: RoleId) -> PlatformResult<()> {
        self.send_empty(Method::DELETE, &format!("/guilds/{}/roles/{}", guild, role), None)
            .await
    }

    async fn add_member_role(&self, guild: GuildId, user: UserId, role: RoleId) -> PlatformResult<()> {
        let path = format!("/guilds/{}/members/{}/roles/{}", guild, user, role);
        self.send_empty(Method::PUT, &path, None).await
    }

    async fn remove_member_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> PlatformResult<()> {
        let path = format!("/guilds/{}/members/{}/roles/{}", guild, user, role);
        self.send_empty(Method::DELETE, &path, None).await
    }

    async fn find_channel(
        &self,
        guild: GuildId,
        kind: ChannelKind,
        name: &str,
    ) -> PlatformResult<Option<ChannelId>> {
        let wanted = wire::channel_type(kind);
        Ok(self
            .channels(guild, kind)
            .await?
            .into_iter()
            .filter(|c| c.kind == wanted && c.name.as_deref() == Some(name))
            .map(|c| c.id)
            .min())
    }

    async fn channel_kind(
        &self,
        guild: GuildId,
        channel: ChannelId,
    ) -> PlatformResult<Option<ChannelKind>> {
        let found: ChannelObject = match self.get(&format!("/channels/{}", channel)).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => return Ok(None),
            // Channels of other guilds are not visible to us
            Err(PlatformError::Forbidden(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        if found.guild_id != Some(guild) {
            return Ok(None);
        }
        Ok(wire::channel_kind(found.kind))
    }

    async fn create_channel(
        &self,
        guild: GuildId,
        kind: ChannelKind,
        name: &str,
    ) -> PlatformResult<ChannelId> {
        let body = serde_json::json!({ "name": name, "type": wire::channel_type(kind) });
        let created: ChannelObject = self
            .send(Method::POST, &format!("/guilds/{}/channels", guild), &body)
            .await?;
        Ok(created.id)
    }

    async fn create_voice_room(&self, guild: GuildId, room: &VoiceRoom) -> PlatformResult<ChannelId> {
        let created: ChannelObject = self
            .send(
                Method::POST,
                &format!("/guilds/{}/channels", guild),
                &wire::voice_room_body(guild, room),
            )
            .await?;
        Ok(created.id)
    }

    async fn update_voice_room(
        &self,
        guild: GuildId,
        channel: ChannelId,
        room: &VoiceRoom,
    ) -> PlatformResult<()> {
        let body = wire::voice_room_patch(guild, room);
        self.send_empty(Method::PATCH, &format!("/channels/{}", channel), Some(&body))
            .await
    }

    async fn delete_channel(&self, channel: ChannelId) -> PlatformResult<()> {
        self.send_empty(Method::DELETE, &format!("/channels/{}", channel), None)
            .await
    }

    async fn start_thread(
        &self,
        channel: ChannelId,
        message: MessageId,
        name: &str,
    ) -> PlatformResult<ChannelId> {
        let path = format!("/channels/{}/messages/{}/threads", channel, message);
        let thread: ChannelObject = self
            .send(Method::POST, &path, &wire::public_thread_body(name))
            .await?;
        Ok(thread.id)
    }

    async fn create_private_thread(&self, channel: ChannelId, name: &str) -> PlatformResult<ChannelId> {
        let thread: ChannelObject = self
            .send(
                Method::POST,
                &format!("/channels/{}/threads", channel),
                &wire::private_thread_body(name),
            )
            .await?;
        Ok(thread.id)
    }

    async fn add_thread_member(&self, thread: ChannelId, user: UserId) -> PlatformResult<()> {
        let path = format!("/channels/{}/thread-members/{}", thread, user);
        self.send_empty(Method::PUT, &path, None).await
    }

    async fn remove_thread_member(&self, thread: ChannelId, user: UserId) -> PlatformResult<()> {
        let path = format!("/channels/{}/thread-members/{}", thread, user);
        self.send_empty(Method::DELETE, &path, None).await
    }

    async fn archive_thread(&self, thread: ChannelId) -> PlatformResult<()> {
        let body = serde_json::json!({ "archived": true, "locked": true });
        self.send_empty(Method::PATCH, &format!("/channels/{}", thread), Some(&body))
            .await
    }

    async fn send_post(&self, channel: ChannelId, post: &Post) -> PlatformResult<MessageId> {
        let sent: MessageObject = self
            .send(
                Method::POST,
                &format!("/channels/{}/messages", channel),
                &wire::message_body(post),
            )
            .await?;
        Ok(sent.id)
    }

    async fn edit_post(
        &self,
        channel: ChannelId,
        message: MessageId,
        post: &Post,
    ) -> PlatformResult<()> {
        let body = wire::message_body(post);
        let path = format!("/channels/{}/messages/{}", channel, message);
        self.send_empty(Method::PATCH, &path, Some(&body)).await
    }

    async fn recent_posts(
        &self,
        channel: ChannelId,
        limit: u8,
    ) -> PlatformResult<Vec<(MessageId, Post)>> {
        let limit = limit.clamp(1, 100);
        let messages: Vec<MessageObject> = self
            .get(&format!("/channels/{}/messages?limit={}", channel, limit))
            .await?;
        Ok(messages
            .into_iter()
            .map(|m| (m.id, Post::from(m)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: Option<&str>) -> DiscordConfig {
        DiscordConfig {
            token: token.map(str::to_string),
            api_base: "https://discord.com/api/v10/".into(),
        }
    }

    #[test]
    fn test_requires_token() {
        assert!(matches!(
            DiscordRest::new(&config(None)),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            DiscordRest::new(&config(Some("bad\ntoken"))),
            Err(AppError::Config(_))
        ));

        let rest = DiscordRest::new(&config(Some("abc.def"))).unwrap();
        assert_eq!(rest.api_base, "https://discord.com/api/v10");
    }

    #[test]
    fn test_status_mapping() {
        assert!(status_error(StatusCode::NOT_FOUND, "/channels/1", String::new()).is_not_found());
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "/channels/1", String::new()),
            PlatformError::Forbidden(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "/x", "{\"code\":50035}".into()),
            PlatformError::Http { status: 400, .. }
        ));
    }

    #[test]
    fn test_decode_reports_path() {
        let err = decode::<UserObject>("/users/@me", "not json").unwrap_err();
        assert!(err.to_string().contains("/users/@me"));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_unavailable() {
        let rest = DiscordRest::new(&DiscordConfig {
            token: Some("abc".into()),
            api_base: "http://127.0.0.1:9".into(),
        })
        .unwrap();
        assert!(matches!(
            rest.current_user().await,
            Err(PlatformError::Unavailable(_))
        ));
    }
}
