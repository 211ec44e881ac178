//! Squad model - one matchmaking session with bounded capacity

use serde::{Deserialize, Serialize};

use super::{ChannelId, GuildId, MessageId, RoleId, UserId};
use crate::error::{Error, Result};

/// Smallest allowed squad capacity
pub const MIN_SLOTS: u8 = 1;
/// Largest allowed squad capacity
pub const MAX_SLOTS: u8 = 5;
/// Longest squad name, prefix included, in characters
pub const MAX_NAME_CHARS: usize = 40;
/// Longest mode or platform label
pub const MAX_LABEL_CHARS: usize = 60;
/// Longest positions text
pub const MAX_POSITIONS_CHARS: usize = 500;

/// Location of a squad: the post that hosts it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SquadKey {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

/// Persisted lifecycle marker. `Open` covers both Forming and Full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SquadStatus {
    #[default]
    Open,
    Closed,
    Expired,
}

/// Lifecycle state derived from status and roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SquadState {
    /// Fewer members than slots
    Forming,
    /// Every slot taken; resources may or may not exist yet
    Full,
    /// Disbanded by the host or a moderator
    Closed,
    /// Time-to-live elapsed
    Expired,
}

impl SquadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SquadState::Closed | SquadState::Expired)
    }
}

/// Descriptive fields supplied when opening a squad
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquadDetails {
    pub mode: String,
    pub platform: String,
    pub positions: String,
    #[serde(default)]
    pub crossplay: bool,
}

/// The full squad state. Serialized as one camelCase JSON object inside
/// the post footer and the squads table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Squad {
    pub name: String,
    pub host_id: UserId,
    pub mode: String,
    pub platform: String,
    pub positions: String,
    pub crossplay: bool,
    pub slots: u8,
    pub joined: Vec<UserId>,
    pub role_id: Option<RoleId>,
    pub voice_id: Option<ChannelId>,
    pub thread_id: Option<ChannelId>,
    /// Whether `thread_id` points at the access-restricted thread
    #[serde(default)]
    pub thread_private: bool,
    pub ttl_minutes: u32,
    #[serde(default)]
    pub status: SquadStatus,
}

impl Squad {
    pub fn new(
        name: String,
        host_id: UserId,
        details: SquadDetails,
        slots: u8,
        role_id: RoleId,
        ttl_minutes: u32,
    ) -> Self {
        Self {
            name,
            host_id,
            mode: details.mode,
            platform: details.platform,
            positions: details.positions,
            crossplay: details.crossplay,
            slots,
            joined: vec![host_id],
            role_id: Some(role_id),
            voice_id: None,
            thread_id: None,
            thread_private: false,
            ttl_minutes,
            status: SquadStatus::Open,
        }
    }

    pub fn state(&self) -> SquadState {
        match self.status {
            SquadStatus::Closed => SquadState::Closed,
            SquadStatus::Expired => SquadState::Expired,
            SquadStatus::Open if self.is_full() => SquadState::Full,
            SquadStatus::Open => SquadState::Forming,
        }
    }

    pub fn is_full(&self) -> bool {
        self.joined.len() >= self.slots as usize
    }

    pub fn is_terminal(&self) -> bool {
        self.status != SquadStatus::Open
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.joined.contains(&user_id)
    }

    /// Fail with `SquadClosed` unless the squad still accepts changes
    pub fn ensure_open(&self) -> Result<()> {
        if self.is_terminal() {
            return Err(Error::SquadClosed);
        }
        Ok(())
    }

    /// Append a member, enforcing uniqueness and capacity
    pub fn add_member(&mut self, user_id: UserId) -> Result<()> {
        self.ensure_open()?;
        if self.contains(user_id) {
            return Err(Error::AlreadyJoined);
        }
        if self.is_full() {
            return Err(Error::SquadFull);
        }
        self.joined.push(user_id);
        Ok(())
    }

    /// Remove a member, failing if they were never on the roster
    pub fn remove_member(&mut self, user_id: UserId) -> Result<()> {
        self.ensure_open()?;
        let before = self.joined.len();
        self.joined.retain(|id| *id != user_id);
        if self.joined.len() == before {
            return Err(Error::NotJoined);
        }
        Ok(())
    }

    /// Change capacity, truncating the roster to the new size.
    /// Returns the members that no longer fit.
    pub fn resize(&mut self, slots: u8) -> Result<Vec<UserId>> {
        check_slots(slots)?;
        self.slots = slots;
        if self.joined.len() > slots as usize {
            Ok(self.joined.split_off(slots as usize))
        } else {
            Ok(Vec::new())
        }
    }

    /// Structural validity of decoded state
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("empty squad name".into());
        }
        if !(MIN_SLOTS..=MAX_SLOTS).contains(&self.slots) {
            return Err(format!("slots {} outside {}..={}", self.slots, MIN_SLOTS, MAX_SLOTS));
        }
        if self.joined.len() > self.slots as usize {
            return Err(format!(
                "{} members exceed {} slots",
                self.joined.len(),
                self.slots
            ));
        }
        let mut seen = std::collections::HashSet::new();
        if !self.joined.iter().all(|id| seen.insert(*id)) {
            return Err("duplicate member".into());
        }
        Ok(())
    }

    /// Title body shared by every rendered state, e.g. `Squad Mamba – Rec (PS5 • Crossplay)`
    pub fn headline(&self) -> String {
        format!(
            "{} – {} ({}{})",
            self.name,
            self.mode,
            self.platform,
            if self.crossplay { " • Crossplay" } else { "" }
        )
    }
}

/// Partial update applied by the Edit action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquadEdit {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub positions: Option<String>,
    #[serde(default)]
    pub slots: Option<u8>,
    #[serde(default)]
    pub crossplay: Option<bool>,
    #[serde(default)]
    pub ttl_minutes: Option<u32>,
}

impl SquadEdit {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.mode.is_none()
            && self.platform.is_none()
            && self.positions.is_none()
            && self.slots.is_none()
            && self.crossplay.is_none()
            && self.ttl_minutes.is_none()
    }
}

/// Validate a requested capacity
pub fn check_slots(slots: u8) -> Result<u8> {
    if !(MIN_SLOTS..=MAX_SLOTS).contains(&slots) {
        return Err(Error::Validation(format!(
            "Slots must be between {} and {}.",
            MIN_SLOTS, MAX_SLOTS
        )));
    }
    Ok(slots)
}
