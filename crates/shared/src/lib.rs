//! Shared types for the cartwire client and its realtime endpoint.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
