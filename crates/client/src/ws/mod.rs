//! WebSocket transport for realtime sync with the storefront backend.
//!
//! This module provides:
//! - A single lazily-created connection per [`Transport`], bound to the
//!   credential resolved at creation time
//! - Auth handshake and auto-reconnect with exponential backoff and jitter
//! - Generation tracking so nothing from a torn-down connection reaches the
//!   stores
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  Transport                   │
//! │  (owns the slot, generation counter, resolver)│
//! └──────────────────────────────────────────────┘
//!                        │ get_connection()
//!                        ▼
//!               ┌──────────────────┐
//!               │    Connection    │──── status: Observable<ConnectionStatus>
//!               │ (generation, cred)│
//!               └──────────────────┘
//!                        │ Connector::open()
//!                        ▼
//!               ┌──────────────────┐
//!               │      Socket      │  tokio-tungstenite / web_sys::WebSocket
//!               └──────────────────┘
//!                        │ decoded ServerEvent
//!                        ▼
//!        ┌───────────────┴───────────────┐
//!        ▼                               ▼
//! ┌─────────────────────┐      ┌──────────────────┐
//! │ NotificationChannel │      │    CartStore     │
//! └─────────────────────┘      └──────────────────┘
//! ```

mod connection;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{
    Connection, ConnectionOptions, ConnectionStatus, Connector, EventHandler, Inbound,
    InboundStream, ReconnectConfig, Socket,
};
pub use transport::Transport;

#[cfg(not(target_arch = "wasm32"))]
pub use connection::TungsteniteConnector;

#[cfg(target_arch = "wasm32")]
pub use connection::BrowserConnector;

/// The socket connector for the current platform.
#[cfg(not(target_arch = "wasm32"))]
pub fn platform_connector() -> std::sync::Arc<dyn Connector> {
    std::sync::Arc::new(TungsteniteConnector)
}

#[cfg(target_arch = "wasm32")]
pub fn platform_connector() -> std::sync::Arc<dyn Connector> {
    std::sync::Arc::new(BrowserConnector)
}
