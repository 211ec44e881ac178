//! Data models for LFG

mod ids;
mod post;
mod squad;

pub use ids::*;
pub use post::*;
pub use squad::*;
