//! Squad behaviour configuration
//!
//! Loaded from the `[squads]` table of the bot's TOML config. Every field
//! has a default so an empty table is valid.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{MAX_NAME_CHARS, MAX_SLOTS};
use crate::names::{normalize, NamePool};

fn default_names() -> Vec<String> {
    [
        "Mamba", "Cobra", "Viper", "Python", "Falcon", "Hawk", "Eagle", "Raven", "Wolf", "Panther",
        "Jaguar", "Tiger", "Lion", "Shark", "Orca", "Rhino", "Bison", "Mustang", "Phoenix",
        "Titan",
    ]
    .iter()
    .map(|n| n.to_string())
    .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SquadConfig {
    /// Text channel squad posts go to, created on demand
    pub channel_name: String,
    /// Category voice rooms are created in
    pub voice_category: String,
    pub default_ttl_minutes: u32,
    pub min_ttl_minutes: u32,
    pub max_ttl_minutes: u32,
    pub max_slots: u8,
    pub name_prefix: String,
    pub name_pool: Vec<String>,
}

impl Default for SquadConfig {
    fn default() -> Self {
        Self {
            channel_name: "🔎│squad-suche".to_string(),
            voice_category: "🎤 Squads".to_string(),
            default_ttl_minutes: 120,
            min_ttl_minutes: 15,
            max_ttl_minutes: 1440,
            max_slots: MAX_SLOTS,
            name_prefix: "Squad".to_string(),
            name_pool: default_names(),
        }
    }
}

impl SquadConfig {
    /// Parse a standalone `[squads]`-shaped TOML document
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: SquadConfig =
            toml::from_str(raw).map_err(|e| Error::Validation(format!("squad config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_name.trim().is_empty() {
            return Err(Error::Validation("channel_name must not be empty".into()));
        }
        if self.name_prefix.trim().is_empty() {
            return Err(Error::Validation("name_prefix must not be empty".into()));
        }
        if self.name_pool.iter().all(|n| n.trim().is_empty()) {
            return Err(Error::Validation("name_pool must not be empty".into()));
        }
        if let Some(long) = self
            .pool()
            .names()
            .iter()
            .find(|n| n.chars().count() > MAX_NAME_CHARS)
        {
            return Err(Error::Validation(format!(
                "squad name {:?} is longer than {} characters",
                long, MAX_NAME_CHARS
            )));
        }
        if self.max_slots == 0 || self.max_slots > MAX_SLOTS {
            return Err(Error::Validation(format!(
                "max_slots must be between 1 and {}",
                MAX_SLOTS
            )));
        }
        if self.min_ttl_minutes == 0 || self.min_ttl_minutes > self.max_ttl_minutes {
            return Err(Error::Validation(
                "min_ttl_minutes must be positive and not above max_ttl_minutes".into(),
            ));
        }
        self.check_ttl(self.default_ttl_minutes)?;
        Ok(())
    }

    /// The configured names in canonical, prefixed form without duplicates
    pub fn pool(&self) -> NamePool {
        let mut names: Vec<String> = Vec::new();
        for raw in &self.name_pool {
            let name = normalize(raw, &self.name_prefix);
            if name.is_empty() {
                continue;
            }
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                names.push(name);
            }
        }
        NamePool::new(names)
    }

    /// A ttl of 0 disables expiry; anything else must lie inside the bounds
    pub fn check_ttl(&self, ttl_minutes: u32) -> Result<u32> {
        if ttl_minutes != 0
            && !(self.min_ttl_minutes..=self.max_ttl_minutes).contains(&ttl_minutes)
        {
            return Err(Error::Validation(format!(
                "TTL must be 0 (no expiry) or between {} and {} minutes.",
                self.min_ttl_minutes, self.max_ttl_minutes
            )));
        }
        Ok(ttl_minutes)
    }

    pub fn check_slots(&self, slots: u8) -> Result<u8> {
        if slots == 0 || slots > self.max_slots {
            return Err(Error::Validation(format!(
                "Slots must be between 1 and {}.",
                self.max_slots
            )));
        }
        Ok(slots)
    }
}
