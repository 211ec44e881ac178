//! Squad name allocation
//!
//! Squad names come from a fixed pool and are exclusive per guild. The
//! reservation table is the registry; each reserved name is backed by a
//! platform role of the same name that members of the squad receive. A
//! name is only freed once its role is gone.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{GuildId, RoleId};
use crate::platform::Platform;
use crate::storage::{self, SharedDatabase};

/// Trim and add the prefix unless the input already starts with it
/// (case-insensitive), so "Mamba" and "squad Mamba" name the same squad.
pub fn normalize(input: &str, prefix: &str) -> String {
    let name = input.trim();
    if name.is_empty() {
        return String::new();
    }
    let lead = format!("{} ", prefix.trim());
    let has_prefix = name
        .get(..lead.len())
        .map(|head| head.eq_ignore_ascii_case(&lead))
        .unwrap_or(false);
    if has_prefix {
        name.to_string()
    } else {
        format!("{}{}", lead, name)
    }
}

/// The configured set of allowed names, in canonical spelling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePool {
    names: Vec<String>,
}

impl NamePool {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Pool spelling of a normalized name
    pub fn canonical(&self, name: &str) -> Option<&str> {
        self.names
            .iter()
            .find(|n| n.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.canonical(name).is_some()
    }
}

/// A reserved name and its exclusivity role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameHandle {
    pub name: String,
    pub role_id: RoleId,
}

pub struct NameAllocator {
    pool: NamePool,
    prefix: String,
    db: SharedDatabase,
    platform: Arc<dyn Platform>,
}

impl NameAllocator {
    pub fn new(pool: NamePool, prefix: &str, db: SharedDatabase, platform: Arc<dyn Platform>) -> Self {
        Self {
            pool,
            prefix: prefix.to_string(),
            db,
            platform,
        }
    }

    pub fn pool(&self) -> &NamePool {
        &self.pool
    }

    /// Normalize user input and map it onto the pool
    pub fn canonical(&self, input: &str) -> Result<String> {
        let name = normalize(input, &self.prefix);
        if name.is_empty() {
            return Err(Error::Validation("Squad name must not be empty.".into()));
        }
        self.pool.canonical(&name).map(str::to_string).ok_or_else(|| {
            Error::Validation(format!(
                "**{}** is not an allowed squad name. Pick one from the list.",
                name
            ))
        })
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.pool.is_allowed(&normalize(name, &self.prefix))
    }

    /// Reserved here, or claimed by a role created outside the bot
    pub async fn is_taken(&self, guild: GuildId, name: &str) -> Result<bool> {
        let reserved = storage::lock(&self.db).reservations().find(guild, name)?.is_some();
        if reserved {
            return Ok(true);
        }
        Ok(self.platform.find_role(guild, name).await?.is_some())
    }

    /// Pool names nobody holds, in pool order
    pub async fn free_names(&self, guild: GuildId) -> Result<Vec<String>> {
        let reserved = storage::lock(&self.db).reservations().names(guild)?;
        let roles = self.platform.role_names(guild).await?;
        Ok(self
            .pool
            .names()
            .iter()
            .filter(|n| !reserved.contains(n) && !roles.contains(n))
            .cloned()
            .collect())
    }

    /// Reserve `name` and create its role
    pub async fn allocate(&self, guild: GuildId, name: &str) -> Result<NameHandle> {
        let name = self.canonical(name)?;

        if self.platform.find_role(guild, &name).await?.is_some() {
            return Err(Error::NameTaken(name));
        }

        let session = Uuid::new_v4();
        let reserved = storage::lock(&self.db)
            .reservations()
            .reserve(guild, &name, session)?;
        if !reserved {
            return Err(Error::NameTaken(name));
        }

        let role_id = match self.platform.create_role(guild, &name).await {
            Ok(role_id) => role_id,
            Err(e) => {
                warn!(guild = %guild, name = %name, error = %e, "Failed to create squad role");
                storage::lock(&self.db)
                    .reservations()
                    .cancel(guild, &name, session)?;
                return Err(e.into());
            }
        };

        storage::lock(&self.db)
            .reservations()
            .attach_role(guild, &name, session, role_id)?;

        info!(guild = %guild, name = %name, role = %role_id, "Squad name allocated");
        Ok(NameHandle { name, role_id })
    }

    /// First free pool name, racing other allocations if needed
    pub async fn allocate_first_free(&self, guild: GuildId) -> Result<NameHandle> {
        for name in self.free_names(guild).await? {
            match self.allocate(guild, &name).await {
                Ok(handle) => return Ok(handle),
                Err(Error::NameTaken(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::NamePoolExhausted)
    }

    /// Delete the role and free the name. If the role cannot be deleted
    /// the reservation stays, and `false` is returned.
    pub async fn release(&self, guild: GuildId, handle: &NameHandle) -> Result<bool> {
        match self.platform.delete_role(guild, handle.role_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(name = %handle.name, "Squad role already gone");
            }
            Err(e) => {
                warn!(
                    guild = %guild,
                    name = %handle.name,
                    role = %handle.role_id,
                    error = %e,
                    "Failed to delete squad role, keeping name reserved"
                );
                return Ok(false);
            }
        }

        storage::lock(&self.db)
            .reservations()
            .release(guild, &handle.name, handle.role_id)?;
        info!(guild = %guild, name = %handle.name, "Squad name released");
        Ok(true)
    }
}
