//! Squad lifecycle
//!
//! Every transition runs in up to three steps:
//!
//! 1. A pure guard-and-mutate closure is applied to the stored state and
//!    written back with compare-and-swap (`commit`), retrying on conflict.
//! 2. Platform side effects implied by the transition run best effort.
//! 3. Resources created in step 2 are merged into the latest state with a
//!    second compare-and-swap; anything that lost a race is discarded.
//!
//! The post is then re-rendered from whatever the store holds.

mod expiry;

pub use expiry::ExpiryScheduler;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::config::SquadConfig;
use crate::error::{Error, Result};
use crate::interaction::{MessageRef, OpenRequest};
use crate::invariants;
use crate::models::{
    ChannelId, GuildId, MessageId, RoleId, Squad, SquadDetails, SquadEdit, SquadKey, SquadStatus,
    UserId, MAX_LABEL_CHARS, MAX_POSITIONS_CHARS,
};
use crate::names::NameAllocator;
use crate::platform::{ChannelKind, Platform};
use crate::provisioner::{Provisioned, Provisioner, Released};
use crate::render::{self, PIN_MARKER};
use crate::storage::{self, SharedDatabase};

/// Compare-and-swap attempts before a transition gives up
const MAX_ATTEMPTS: usize = 3;
/// Autocomplete choice limit
const MAX_CHOICES: usize = 25;
/// How far back setup looks for its guide post
const GUIDE_SEARCH_DEPTH: u8 = 20;

fn squad_not_found() -> Error {
    Error::NotFound("Squad post not found.".into())
}

/// Trimmed, non-empty and short enough to render
fn required(value: &str, field: &str, max_chars: usize) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Validation(format!("{} must not be empty.", field)));
    }
    if value.chars().count() > max_chars {
        return Err(Error::Validation(format!(
            "{} must be at most {} characters.",
            field, max_chars
        )));
    }
    Ok(value.to_string())
}

/// A freshly opened squad
#[derive(Debug, Clone)]
pub struct Opened {
    pub key: SquadKey,
    pub squad: Squad,
    /// Link to the post
    pub url: String,
}

/// Platform work following a committed transition
#[derive(Debug, Default)]
struct Effects {
    /// Members that gain the role and thread access
    added: Vec<UserId>,
    /// Members that lose them
    removed: Vec<UserId>,
    /// Push name, limit and role to the voice room
    sync_voice: bool,
    /// Provision (voice room, private thread)
    provision: Option<(bool, bool)>,
    released: Option<Released>,
}

#[derive(Debug, Default)]
struct EditOutcome {
    /// Previous name and role when renamed
    replaced: Option<(String, RoleId)>,
    truncated: Vec<UserId>,
    slots_changed: bool,
    ttl_minutes: Option<u32>,
    full: bool,
}

pub struct SquadManager {
    db: SharedDatabase,
    platform: Arc<dyn Platform>,
    names: Arc<NameAllocator>,
    provisioner: Provisioner,
    scheduler: ExpiryScheduler,
    config: Arc<SquadConfig>,
}

impl SquadManager {
    /// Build the manager. The receiver yields squads whose expiry timer
    /// fired and must be fed to `run_expiry`.
    pub fn new(
        db: SharedDatabase,
        platform: Arc<dyn Platform>,
        config: SquadConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SquadKey>) {
        let config = Arc::new(config);
        let names = Arc::new(NameAllocator::new(
            config.pool(),
            &config.name_prefix,
            db.clone(),
            platform.clone(),
        ));
        let provisioner = Provisioner::new(platform.clone(), names.clone(), config.clone());
        let (scheduler, due_rx) = ExpiryScheduler::new(db.clone());

        let manager = Self {
            db,
            platform,
            names,
            provisioner,
            scheduler,
            config,
        };
        (manager, due_rx)
    }

    pub fn config(&self) -> &SquadConfig {
        &self.config
    }

    /// Re-arm stored expiry timers after a restart
    pub fn rehydrate(&self) -> Result<usize> {
        self.scheduler.rehydrate()
    }

    /// Expire squads as their timers fire, until the channel closes
    pub async fn run_expiry(self: Arc<Self>, mut due_rx: mpsc::UnboundedReceiver<SquadKey>) {
        while let Some(key) = due_rx.recv().await {
            if let Err(e) = self.expire(&key).await {
                error!(message = %key.message_id, error = %e, "Squad expiry failed");
            }
        }
        debug!("Expiry channel closed");
    }

    /// Current state of the squad hosted by `message`. Posts whose stored
    /// state does not decode count as having no squad.
    pub fn load(&self, message: MessageId) -> Result<Option<(SquadKey, Squad)>> {
        let Some(record) = storage::lock(&self.db).squads().find(message)? else {
            return Ok(None);
        };
        match codec::decode(&record.blob) {
            Ok(squad) => Ok(Some((
                SquadKey {
                    guild_id: record.guild_id,
                    channel_id: record.channel_id,
                    message_id: record.message_id,
                },
                squad,
            ))),
            Err(e) => {
                warn!(message = %message, error = %e, "Stored squad state unreadable");
                Ok(None)
            }
        }
    }

    /// Find the squad a command refers to. A link's channel is used when it
    /// is a text channel of this guild, otherwise the invoking channel.
    pub async fn resolve(
        &self,
        guild: GuildId,
        invoked_in: ChannelId,
        reference: MessageRef,
    ) -> Result<(SquadKey, Squad)> {
        let mut channel = invoked_in;
        if let Some(linked) = reference.channel_id {
            match self.platform.channel_kind(guild, linked).await {
                Ok(Some(ChannelKind::Text)) => channel = linked,
                Ok(_) => {}
                Err(e) => debug!(channel = %linked, error = %e, "Linked channel unresolvable"),
            }
        }

        let (key, squad) = self
            .load(reference.message_id)?
            .ok_or_else(squad_not_found)?;
        if key.guild_id != guild || key.channel_id != channel {
            return Err(squad_not_found());
        }
        Ok((key, squad))
    }

    /// Apply `apply` to the stored squad and write it back if it changed.
    /// The closure may run more than once and must not have side effects.
    fn commit<T>(
        &self,
        message: MessageId,
        mut apply: impl FnMut(&mut Squad) -> Result<T>,
    ) -> Result<(Squad, T)> {
        for attempt in 1..=MAX_ATTEMPTS {
            let record = storage::lock(&self.db)
                .squads()
                .find(message)?
                .ok_or_else(squad_not_found)?;
            let mut squad = codec::decode(&record.blob).map_err(|e| {
                warn!(message = %message, error = %e, "Stored squad state unreadable");
                squad_not_found()
            })?;

            let before = squad.clone();
            let outcome = apply(&mut squad)?;
            if squad == before {
                return Ok((squad, outcome));
            }

            invariants::assert_squad_invariants(&squad);
            let blob = codec::encode(&squad)?;
            let written = storage::lock(&self.db)
                .squads()
                .compare_and_swap(message, record.version, &blob)?;
            if written {
                return Ok((squad, outcome));
            }
            warn!(message = %message, attempt, "Squad changed concurrently, retrying");
        }
        Err(Error::Conflict(message.to_string()))
    }

    /// Open a new squad hosted by `host`
    pub async fn open(&self, guild: GuildId, host: UserId, request: &OpenRequest) -> Result<Opened> {
        let details = SquadDetails {
            mode: required(&request.mode, "Mode", MAX_LABEL_CHARS)?,
            platform: required(&request.platform, "Platform", MAX_LABEL_CHARS)?,
            positions: required(&request.positions, "Positions", MAX_POSITIONS_CHARS)?,
            crossplay: request.crossplay.unwrap_or(false),
        };
        let slots = self.config.check_slots(request.slots)?;
        let ttl_minutes = self.config.check_ttl(
            request
                .ttl_minutes
                .unwrap_or(self.config.default_ttl_minutes),
        )?;

        let wanted = request
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        let handle = match wanted {
            Some(name) => self.names.allocate(guild, name).await?,
            None => self.names.allocate_first_free(guild).await?,
        };

        let squad = Squad::new(
            handle.name.clone(),
            host,
            details,
            slots,
            handle.role_id,
            ttl_minutes,
        );
        match self.publish(guild, squad).await {
            Ok(opened) => Ok(opened),
            Err(e) => {
                self.provisioner
                    .release_name(guild, &handle.name, handle.role_id)
                    .await;
                Err(e)
            }
        }
    }

    async fn publish(&self, guild: GuildId, mut squad: Squad) -> Result<Opened> {
        let channel = self.provisioner.ensure_lfg_channel(guild).await?;
        let post = render::render(&squad, None)?;
        let message = self.platform.send_post(channel, &post).await?;
        let key = SquadKey {
            guild_id: guild,
            channel_id: channel,
            message_id: message,
        };

        if let Some(role) = squad.role_id {
            self.provisioner
                .grant(guild, &squad.name, role, squad.host_id)
                .await;
        }
        squad.thread_id = self
            .provisioner
            .ensure_discussion_thread(&key, &squad, false)
            .await;

        invariants::assert_squad_invariants(&squad);
        let blob = codec::encode(&squad)?;
        storage::lock(&self.db)
            .squads()
            .insert(message, guild, channel, &blob)?;
        if squad.ttl_minutes > 0 {
            self.scheduler.schedule(key, squad.ttl_minutes)?;
        }
        self.refresh(&key).await;

        info!(
            squad = %squad.name,
            guild = %guild,
            message = %message,
            slots = squad.slots,
            "Squad opened"
        );
        Ok(Opened {
            url: self.platform.message_url(guild, channel, message),
            key,
            squad,
        })
    }

    pub async fn join(&self, key: &SquadKey, user: UserId) -> Result<Squad> {
        let (squad, full) = self.commit(key.message_id, |s| {
            s.add_member(user)?;
            Ok(s.is_full())
        })?;
        info!(squad = %squad.name, user = %user, full, "Member joined");

        let effects = Effects {
            added: vec![user],
            provision: full.then_some((true, true)),
            ..Default::default()
        };
        Ok(self.apply(key, squad, effects).await)
    }

    pub async fn leave(&self, key: &SquadKey, user: UserId) -> Result<Squad> {
        let (squad, ()) = self.commit(key.message_id, |s| s.remove_member(user))?;
        info!(squad = %squad.name, user = %user, "Member left");

        let effects = Effects {
            removed: vec![user],
            ..Default::default()
        };
        Ok(self.apply(key, squad, effects).await)
    }

    /// Add `user` on someone's behalf. A full squad only takes them with
    /// `force`, growing by one slot up to the configured maximum.
    pub async fn add_member(&self, key: &SquadKey, user: UserId, force: bool) -> Result<Squad> {
        let max_slots = self.config.max_slots;
        let (squad, (grew, full)) = self.commit(key.message_id, |s| {
            s.ensure_open()?;
            if s.contains(user) {
                return Err(Error::AlreadyJoined);
            }
            let mut grew = false;
            if s.is_full() {
                if !force {
                    return Err(Error::SquadFull);
                }
                if s.slots >= max_slots {
                    return Err(Error::Validation(format!(
                        "The squad already has the maximum of {} slots.",
                        max_slots
                    )));
                }
                s.slots += 1;
                grew = true;
            }
            s.joined.push(user);
            Ok((grew, s.is_full()))
        })?;
        info!(squad = %squad.name, user = %user, forced = grew, "Member added");

        let effects = Effects {
            added: vec![user],
            sync_voice: grew,
            provision: full.then_some((true, true)),
            ..Default::default()
        };
        Ok(self.apply(key, squad, effects).await)
    }

    pub async fn remove_member(&self, key: &SquadKey, user: UserId) -> Result<Squad> {
        let (squad, ()) = self.commit(key.message_id, |s| s.remove_member(user))?;
        info!(squad = %squad.name, user = %user, "Member removed");

        let effects = Effects {
            removed: vec![user],
            ..Default::default()
        };
        Ok(self.apply(key, squad, effects).await)
    }

    /// Change squad details. A new name is reserved before the state is
    /// touched and given back if the change does not go through.
    pub async fn edit(&self, key: &SquadKey, changes: &SquadEdit) -> Result<Squad> {
        if changes.is_empty() {
            return Err(Error::Validation("Nothing to change.".into()));
        }
        let mode = changes
            .mode
            .as_deref()
            .map(|v| required(v, "Mode", MAX_LABEL_CHARS))
            .transpose()?;
        let platform = changes
            .platform
            .as_deref()
            .map(|v| required(v, "Platform", MAX_LABEL_CHARS))
            .transpose()?;
        let positions = changes
            .positions
            .as_deref()
            .map(|v| required(v, "Positions", MAX_POSITIONS_CHARS))
            .transpose()?;
        if let Some(slots) = changes.slots {
            self.config.check_slots(slots)?;
        }
        if let Some(ttl) = changes.ttl_minutes {
            self.config.check_ttl(ttl)?;
        }

        let (_, current) = self.load(key.message_id)?.ok_or_else(squad_not_found)?;
        current.ensure_open()?;
        let renamed = match &changes.name {
            Some(raw) => {
                let name = self.names.canonical(raw)?;
                if name == current.name {
                    None
                } else {
                    Some(self.names.allocate(key.guild_id, &name).await?)
                }
            }
            None => None,
        };

        let result = self.commit(key.message_id, |s| {
            s.ensure_open()?;
            let mut outcome = EditOutcome::default();
            if let Some(handle) = &renamed {
                outcome.replaced = s.role_id.map(|role| (s.name.clone(), role));
                s.name = handle.name.clone();
                s.role_id = Some(handle.role_id);
            }
            if let Some(mode) = &mode {
                s.mode = mode.clone();
            }
            if let Some(platform) = &platform {
                s.platform = platform.clone();
            }
            if let Some(positions) = &positions {
                s.positions = positions.clone();
            }
            if let Some(crossplay) = changes.crossplay {
                s.crossplay = crossplay;
            }
            if let Some(slots) = changes.slots {
                outcome.slots_changed = slots != s.slots;
                outcome.truncated = s.resize(slots)?;
            }
            if let Some(ttl) = changes.ttl_minutes {
                s.ttl_minutes = ttl;
                outcome.ttl_minutes = Some(ttl);
            }
            outcome.full = s.is_full();
            Ok(outcome)
        });

        let (squad, outcome) = match result {
            Ok(committed) => committed,
            Err(e) => {
                if let Some(handle) = renamed {
                    self.provisioner
                        .release_name(key.guild_id, &handle.name, handle.role_id)
                        .await;
                }
                return Err(e);
            }
        };
        info!(squad = %squad.name, message = %key.message_id, "Squad edited");

        if let Some((old_name, old_role)) = &outcome.replaced {
            self.provisioner
                .release_name(key.guild_id, old_name, *old_role)
                .await;
        }
        match outcome.ttl_minutes {
            Some(0) => {
                self.scheduler.cancel(key.message_id)?;
            }
            Some(ttl) => {
                self.scheduler.schedule(*key, ttl)?;
            }
            None => {}
        }

        let effects = Effects {
            added: if renamed.is_some() {
                squad.joined.clone()
            } else {
                Vec::new()
            },
            removed: outcome.truncated,
            sync_voice: renamed.is_some() || outcome.slots_changed,
            provision: outcome.full.then_some((true, true)),
            released: None,
        };
        Ok(self.apply(key, squad, effects).await)
    }

    /// Create the voice room and/or private thread now, full or not.
    /// `None` for either means yes.
    pub async fn request_private_room(
        &self,
        key: &SquadKey,
        voice: Option<bool>,
        thread: Option<bool>,
    ) -> Result<Squad> {
        let voice = voice.unwrap_or(true);
        let thread = thread.unwrap_or(true);
        if !voice && !thread {
            return Err(Error::Validation("Nothing to create.".into()));
        }

        let (_, squad) = self.load(key.message_id)?.ok_or_else(squad_not_found)?;
        squad.ensure_open()?;
        info!(squad = %squad.name, voice, thread, "Private room requested");

        let effects = Effects {
            provision: Some((voice, thread)),
            ..Default::default()
        };
        Ok(self.apply(key, squad, effects).await)
    }

    /// Disband a squad
    pub async fn close(&self, key: &SquadKey) -> Result<Squad> {
        let (squad, released) = self.commit(key.message_id, |s| {
            s.ensure_open()?;
            s.status = SquadStatus::Closed;
            Ok(Released::take(s))
        })?;
        self.scheduler.cancel(key.message_id)?;
        info!(squad = %squad.name, message = %key.message_id, "Squad closed");

        let effects = Effects {
            released: Some(released),
            ..Default::default()
        };
        Ok(self.apply(key, squad, effects).await)
    }

    /// Expire a squad whose timer fired. Returns `None` when there was
    /// nothing to do: the expiry was rescheduled, cancelled or the squad
    /// already ended.
    pub async fn expire(&self, key: &SquadKey) -> Result<Option<Squad>> {
        let Some(claimed) = self.scheduler.take_if_due(key.message_id, Utc::now())? else {
            debug!(message = %key.message_id, "Expiry no longer due");
            return Ok(None);
        };

        let committed = self.commit(key.message_id, |s| {
            if s.is_terminal() {
                return Ok(None);
            }
            s.status = SquadStatus::Expired;
            Ok(Some(Released::take(s)))
        });
        let (squad, released) = match committed {
            Ok((squad, Some(released))) => (squad, released),
            Ok((_, None)) => return Ok(None),
            Err(Error::NotFound(_)) => {
                debug!(message = %key.message_id, "Expired squad no longer exists");
                return Ok(None);
            }
            Err(e) => {
                // The claim removed the row; keep the squad scheduled
                match self.scheduler.retry(&claimed) {
                    Ok(Some(due_at)) => {
                        warn!(message = %key.message_id, due_at = %due_at, "Expiry failed, retrying")
                    }
                    Ok(None) => {}
                    Err(retry) => {
                        error!(message = %key.message_id, error = %retry, "Could not reschedule expiry")
                    }
                }
                return Err(e);
            }
        };
        info!(squad = %released.name, message = %key.message_id, "Squad expired");

        let effects = Effects {
            released: Some(released),
            ..Default::default()
        };
        Ok(Some(self.apply(key, squad, effects).await))
    }

    /// Ensure the squad channel and its guide post
    pub async fn setup(&self, guild: GuildId) -> Result<ChannelId> {
        let channel = self.provisioner.ensure_lfg_channel(guild).await?;
        let bot = self.platform.current_user().await?;
        let guide = render::guide(&self.config);

        let existing = self
            .platform
            .recent_posts(channel, GUIDE_SEARCH_DEPTH)
            .await?
            .into_iter()
            .find(|(_, post)| {
                post.author == Some(bot)
                    && post
                        .content
                        .as_deref()
                        .is_some_and(|c| c.contains(PIN_MARKER))
            });

        match existing {
            Some((message, _)) => self.platform.edit_post(channel, message, &guide).await?,
            None => {
                self.platform.send_post(channel, &guide).await?;
            }
        }
        info!(guild = %guild, channel = %channel, "Squad channel set up");
        Ok(channel)
    }

    /// Free names containing `query`, case-insensitively
    pub async fn autocomplete_names(&self, guild: GuildId, query: &str) -> Result<Vec<String>> {
        let query = query.trim().to_lowercase();
        Ok(self
            .names
            .free_names(guild)
            .await?
            .into_iter()
            .filter(|name| name.to_lowercase().contains(&query))
            .take(MAX_CHOICES)
            .collect())
    }

    /// Run the side effects of a committed transition, then re-render
    async fn apply(&self, key: &SquadKey, squad: Squad, effects: Effects) -> Squad {
        if let Some(role) = squad.role_id {
            for user in &effects.added {
                self.provisioner
                    .grant(key.guild_id, &squad.name, role, *user)
                    .await;
            }
            for user in &effects.removed {
                self.provisioner
                    .revoke(key.guild_id, &squad.name, role, *user)
                    .await;
            }
        }
        if let Some(thread) = squad.thread_id.filter(|_| !squad.is_terminal()) {
            for user in &effects.added {
                self.provisioner.add_to_thread(&squad.name, thread, *user).await;
            }
            for user in &effects.removed {
                self.provisioner
                    .remove_from_thread(&squad.name, thread, *user)
                    .await;
            }
        }
        if effects.sync_voice {
            self.provisioner.sync_voice_room(key, &squad).await;
        }
        if let Some((voice, thread)) = effects.provision {
            self.provision(key, &squad, voice, thread).await;
        }
        if let Some(released) = &effects.released {
            self.provisioner.release(key, released).await;
        }

        self.refresh(key).await.unwrap_or(squad)
    }

    /// Create missing resources from a snapshot and record them
    async fn provision(&self, key: &SquadKey, snapshot: &Squad, voice: bool, thread: bool) {
        let mut created = Provisioned::default();
        if voice {
            created.voice_id = self.provisioner.ensure_voice_room(key, snapshot).await;
        }
        if thread {
            created.thread_id = self
                .provisioner
                .ensure_discussion_thread(key, snapshot, true)
                .await;
        }
        if created.is_empty() {
            return;
        }

        let merged = self.commit(key.message_id, |s| {
            if s.is_terminal() {
                return Ok(created);
            }
            let mut orphans = Provisioned::default();
            match created.voice_id {
                Some(voice) if s.voice_id.is_none() => s.voice_id = Some(voice),
                other => orphans.voice_id = other,
            }
            match created.thread_id {
                Some(thread) if !s.thread_private => {
                    s.thread_id = Some(thread);
                    s.thread_private = true;
                }
                other => orphans.thread_id = other,
            }
            Ok(orphans)
        });

        match merged {
            Ok((squad, orphans)) => {
                // Members who joined while the thread was being created
                if let Some(thread) = created.thread_id.filter(|_| orphans.thread_id.is_none()) {
                    for user in squad.joined.iter().filter(|u| !snapshot.contains(**u)) {
                        self.provisioner.add_to_thread(&squad.name, thread, *user).await;
                    }
                }
                if !orphans.is_empty() {
                    info!(squad = %squad.name, "Discarding resources that lost a race");
                    self.provisioner.discard(&squad.name, orphans).await;
                }
            }
            Err(e) => {
                warn!(squad = %snapshot.name, error = %e, "Could not record provisioned resources");
                self.provisioner.discard(&snapshot.name, created).await;
            }
        }
    }

    /// Re-render the post from the stored state
    async fn refresh(&self, key: &SquadKey) -> Option<Squad> {
        let squad = match self.load(key.message_id) {
            Ok(Some((_, squad))) => squad,
            Ok(None) => return None,
            Err(e) => {
                warn!(message = %key.message_id, error = %e, "Could not reload squad");
                return None;
            }
        };
        match render::render(&squad, Some(key.message_id)) {
            Ok(post) => {
                if let Err(e) = self
                    .platform
                    .edit_post(key.channel_id, key.message_id, &post)
                    .await
                {
                    warn!(squad = %squad.name, error = %e, "Failed to update squad post");
                }
            }
            Err(e) => warn!(squad = %squad.name, error = %e, "Failed to render squad post"),
        }
        Some(squad)
    }
}

#[cfg(test)]
mod tests;
