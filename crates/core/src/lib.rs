//! LFG Core Library
//!
//! Squad models, state codec, name allocation, resource provisioning, the
//! squad lifecycle and interaction routing, on top of SQLite storage.

pub mod codec;
pub mod config;
pub mod error;
pub mod interaction;
pub mod invariants;
pub mod lifecycle;
pub mod models;
pub mod names;
pub mod permissions;
pub mod platform;
pub mod provisioner;
pub mod render;
pub mod router;
pub mod storage;

pub use codec::CodecError;
pub use config::SquadConfig;
pub use error::{Error, Result};
pub use interaction::{Actor, ButtonAction, Command, Interaction, InteractionKind, MessageRef, OpenRequest, Reply};
pub use lifecycle::{ExpiryScheduler, Opened, SquadManager};
pub use models::*;
pub use names::{NameAllocator, NameHandle, NamePool};
pub use permissions::*;
pub use platform::{ChannelKind, Platform, PlatformError, PlatformResult, VoiceRoom};
pub use router::Router;
pub use storage::{Database, SharedDatabase};
