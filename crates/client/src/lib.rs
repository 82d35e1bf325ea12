//! Cartwire Client - realtime sync core for the storefront
//!
//! This crate keeps one authenticated WebSocket connection per page and feeds
//! the cart, notification and address stores from it. It builds for the
//! browser (wasm32) and for native targets, where it runs on tokio.

pub mod logging;

pub mod client;
pub mod config;
pub mod credential;
pub mod observable;
pub mod storage;
pub mod stores;
pub mod ws;

#[cfg(feature = "ui")]
pub mod hooks;

pub use client::SyncClient;
pub use config::SyncConfig;
pub use credential::{Credential, CredentialResolver, CREDENTIAL_KEY};
pub use observable::{Observable, Subscription};
pub use stores::{
    AddressState, AddressStore, CartLineItem, CartState, CartStore, IngestOutcome,
    NotificationChannel, NotificationEvent, NotificationSnapshot, NotificationState,
};
pub use ws::{Connection, ConnectionStatus, Connector, ReconnectConfig, Transport};
