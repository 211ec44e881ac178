//! Permission system for squad operations

use serde::{Deserialize, Serialize};

use crate::models::UserId;

/// Guild-level permission bits relevant to squads, as delivered with
/// each interaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberPermissions {
    #[serde(default)]
    pub administrator: bool,
    /// Moderation privilege
    #[serde(default)]
    pub manage_channels: bool,
}

/// The actor's standing relative to one squad
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActorRole {
    /// Any guild member
    Member = 1,
    /// Opened the squad
    Host = 2,
    /// Holds the moderation privilege
    Moderator = 3,
    Administrator = 4,
}

impl ActorRole {
    /// Highest role the actor holds. `host` is `None` outside a squad.
    pub fn resolve(actor: UserId, host: Option<UserId>, permissions: MemberPermissions) -> Self {
        if permissions.administrator {
            ActorRole::Administrator
        } else if permissions.manage_channels {
            ActorRole::Moderator
        } else if host == Some(actor) {
            ActorRole::Host
        } else {
            ActorRole::Member
        }
    }
}

/// Actions that can be performed on squads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquadAction {
    Open,
    Join,
    Leave,
    Edit,
    ManualAdd,
    ManualRemove,
    RequestPrivateRoom,
    Close,
    /// Create the squad channel and guide post
    Setup,
}

/// Permission matrix for squad actions
pub struct PermissionMatrix;

impl PermissionMatrix {
    /// Check if a role has permission to perform an action
    pub fn can_perform(role: ActorRole, action: SquadAction) -> bool {
        match action {
            SquadAction::Open | SquadAction::Join | SquadAction::Leave => {
                role >= ActorRole::Member
            }

            // Host or moderation privilege
            SquadAction::Edit
            | SquadAction::ManualAdd
            | SquadAction::ManualRemove
            | SquadAction::RequestPrivateRoom
            | SquadAction::Close => role >= ActorRole::Host,

            SquadAction::Setup => role == ActorRole::Administrator,
        }
    }

    /// Reply shown when `can_perform` refuses
    pub fn denial(action: SquadAction) -> &'static str {
        match action {
            SquadAction::Setup => "Only administrators may set up the squad channel.",
            _ => "Only the host or moderators may do that.",
        }
    }
}
