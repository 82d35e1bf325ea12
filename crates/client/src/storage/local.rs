//! Durable store.
//!
//! - Web: `localStorage`
//! - Desktop: one file per key in the platform config directory:
//!   - Linux: `~/.config/cartwire/`
//!   - macOS: `~/Library/Application Support/cartwire/`
//!   - Windows: `%APPDATA%\cartwire\`

use super::KeyValueStore;

#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    #[cfg(not(target_arch = "wasm32"))]
    dir: Option<std::path::PathBuf>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

// =========================================
// Web (WASM) implementation
// =========================================

#[cfg(target_arch = "wasm32")]
fn local_storage() -> Option<web_sys::Storage> {
    web_sys::window()?.local_storage().ok()?
}

#[cfg(target_arch = "wasm32")]
impl KeyValueStore for LocalStore {
    fn get(&self, key: &str) -> Option<String> {
        local_storage()?.get_item(key).ok()?
    }

    fn set(&self, key: &str, value: &str) -> bool {
        local_storage()
            .map(|storage| storage.set_item(key, value).is_ok())
            .unwrap_or(false)
    }

    fn remove(&self, key: &str) {
        if let Some(storage) = local_storage() {
            let _ = storage.remove_item(key);
        }
    }
}

// =========================================
// Desktop (native) implementation
// =========================================

#[cfg(not(target_arch = "wasm32"))]
impl LocalStore {
    /// Store rooted at an explicit directory instead of the config dir.
    pub fn at(dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    fn app_dir(&self) -> anyhow::Result<std::path::PathBuf> {
        use anyhow::Context;

        match &self.dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::config_dir()
                .context("no platform config directory")?
                .join("cartwire")),
        }
    }

    fn file_path(&self, key: &str) -> anyhow::Result<std::path::PathBuf> {
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        Ok(self.app_dir()?.join(format!("{safe_key}.value")))
    }

    fn write(&self, key: &str, value: &str) -> anyhow::Result<()> {
        use anyhow::Context;

        let dir = self.app_dir()?;
        if !dir.exists() {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let path = self.file_path(key)?;
        std::fs::write(&path, value).with_context(|| format!("writing {}", path.display()))
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl KeyValueStore for LocalStore {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.file_path(key).ok()?;
        std::fs::read_to_string(path).ok()
    }

    fn set(&self, key: &str, value: &str) -> bool {
        match self.write(key, value) {
            Ok(()) => true,
            Err(e) => {
                crate::log_warn!("LocalStore: failed to save '{}': {:#}", key, e);
                false
            }
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(path) = self.file_path(key) {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("cartwire-{}-{}", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = scratch_dir("roundtrip");
        let store = LocalStore::at(&dir);

        assert!(store.get("accessToken").is_none());
        assert!(store.set("accessToken", "abc123"));
        assert_eq!(store.get("accessToken").as_deref(), Some("abc123"));

        store.remove("accessToken");
        assert!(store.get("accessToken").is_none());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn reads_do_not_create_the_directory() {
        let dir = scratch_dir("readonly");
        let store = LocalStore::at(&dir);

        assert!(store.get("accessToken").is_none());
        store.remove("accessToken");
        assert!(!dir.exists());
    }

    #[test]
    fn keys_are_sanitized() {
        let dir = scratch_dir("sanitize");
        let store = LocalStore::at(&dir);

        assert!(store.set("a/b:c", "v"));
        assert!(dir.join("a_b_c.value").exists());
        assert_eq!(store.get("a/b:c").as_deref(), Some("v"));

        let _ = std::fs::remove_dir_all(dir);
    }
}
