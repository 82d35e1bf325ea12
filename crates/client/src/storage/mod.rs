//! Key-value storage backends for the session credential.
//!
//! Two independent sources hold the credential:
//! - [`LocalStore`]: durable storage (`localStorage` on the web, one file per
//!   key under the platform config directory on desktop).
//! - [`CookieJar`]: the cookie header (`document.cookie` on the web, an
//!   in-memory header on desktop).
//!
//! [`MemoryStore`] is a plain in-process map for tests and headless use.

mod cookie;
mod local;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

pub use cookie::{cookie_value, expire_cookie_string, set_cookie_string, CookieJar};
pub use local::LocalStore;

/// Minimal read/write contract over an opaque string store.
pub trait KeyValueStore: Send + Sync {
    /// Read a value. `None` if missing or the backend is unavailable.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value. Returns `true` if the write succeeded.
    fn set(&self, key: &str, value: &str) -> bool;

    /// Delete a value. Missing keys are ignored.
    fn remove(&self, key: &str);

    /// Check if a key holds a value.
    fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with one entry.
    pub fn with_entry(key: &str, value: &str) -> Self {
        let store = Self::new();
        store.set(key, value);
        store
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        true
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
