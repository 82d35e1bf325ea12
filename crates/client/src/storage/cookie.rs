//! Cookie-backed store.

#[cfg(not(target_arch = "wasm32"))]
use std::sync::{Mutex, PoisonError};

use super::KeyValueStore;

/// Find `name` in a `Cookie`-style header (`a=1; b=2`) and URL-decode it.
pub fn cookie_value(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| {
            let value = value.trim();
            urlencoding::decode(value)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| value.to_string())
        })
}

/// `document.cookie` assignment string that sets `name`.
pub fn set_cookie_string(name: &str, value: &str) -> String {
    format!(
        "{}={}; path=/; SameSite=Lax",
        name,
        urlencoding::encode(value)
    )
}

/// `document.cookie` assignment string that expires `name`.
pub fn expire_cookie_string(name: &str) -> String {
    format!("{name}=; path=/; max-age=0")
}

/// The browser cookie store, or an in-memory header on desktop.
#[derive(Debug, Default)]
pub struct CookieJar {
    #[cfg(not(target_arch = "wasm32"))]
    header: Mutex<String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Desktop jar seeded from a raw cookie header, e.g. one captured from a
    /// login webview.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn with_header(header: impl Into<String>) -> Self {
        Self {
            header: Mutex::new(header.into()),
        }
    }

    /// Current raw header.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn header(&self) -> String {
        self.header
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[cfg(target_arch = "wasm32")]
    pub fn header(&self) -> String {
        html_document()
            .and_then(|doc| doc.cookie().ok())
            .unwrap_or_default()
    }
}

#[cfg(target_arch = "wasm32")]
fn html_document() -> Option<web_sys::HtmlDocument> {
    use wasm_bindgen::JsCast;

    web_sys::window()?
        .document()?
        .dyn_into::<web_sys::HtmlDocument>()
        .ok()
}

#[cfg(target_arch = "wasm32")]
impl KeyValueStore for CookieJar {
    fn get(&self, key: &str) -> Option<String> {
        cookie_value(&self.header(), key)
    }

    fn set(&self, key: &str, value: &str) -> bool {
        html_document()
            .map(|doc| doc.set_cookie(&set_cookie_string(key, value)).is_ok())
            .unwrap_or(false)
    }

    fn remove(&self, key: &str) {
        if let Some(doc) = html_document() {
            let _ = doc.set_cookie(&expire_cookie_string(key));
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl KeyValueStore for CookieJar {
    fn get(&self, key: &str) -> Option<String> {
        cookie_value(&self.header(), key)
    }

    fn set(&self, key: &str, value: &str) -> bool {
        let mut header = self.header.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pairs = without_cookie(&header, key);
        pairs.push(format!("{}={}", key, urlencoding::encode(value)));
        *header = pairs.join("; ");
        true
    }

    fn remove(&self, key: &str) {
        let mut header = self.header.lock().unwrap_or_else(PoisonError::into_inner);
        *header = without_cookie(&header, key).join("; ");
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn without_cookie(header: &str, name: &str) -> Vec<String> {
    header
        .split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            pair.split_once('=')
                .map_or(true, |(key, _)| key.trim() != name)
        })
        .map(str::to_string)
        .collect()
}
