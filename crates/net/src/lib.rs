//! LFG interaction gateway
//!
//! TCP transport between the bot and the harness that owns the platform
//! connection. Frames are length-prefixed JSON.
//!
//! ```ignore
//! let server = GatewayServer::start(bind, token, Arc::new(router)).await?;
//!
//! let client = GatewayClient::connect(server.addr(), token).await?;
//! let reply = client.interact(&interaction).await?;
//! ```

pub mod client;
pub mod error;
mod frame;
pub mod protocol;
pub mod server;

pub use client::GatewayClient;
pub use error::{Error, Result};
pub use protocol::Frame;
pub use server::{GatewayServer, InteractionHandler};

/// Default gateway address
pub const DEFAULT_BIND: &str = "127.0.0.1:7341";
