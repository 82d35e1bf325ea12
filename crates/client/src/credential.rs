//! Session credential resolution.
//!
//! The bearer token lives in two places that can disagree: durable storage and
//! the cookie header. Durable storage wins. A token found only in the cookie is
//! promoted into durable storage so later lookups hit the first tier.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::storage::{CookieJar, KeyValueStore, LocalStore};

/// Storage key (and cookie name) holding the bearer token.
pub const CREDENTIAL_KEY: &str = "accessToken";

/// Opaque bearer token.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    /// Wrap a token. Blank tokens are treated as no token at all.
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Outcome of the two-tier lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub credential: Option<Credential>,
    /// The credential came from the cookie and must be written back to
    /// durable storage.
    pub promote: bool,
}

/// Pick the credential from the two tiers without touching storage.
pub fn select_credential(durable: Option<&str>, cookie: Option<&str>) -> Resolution {
    if let Some(credential) = durable.and_then(Credential::new) {
        return Resolution {
            credential: Some(credential),
            promote: false,
        };
    }
    match cookie.and_then(Credential::new) {
        Some(credential) => Resolution {
            credential: Some(credential),
            promote: true,
        },
        None => Resolution {
            credential: None,
            promote: false,
        },
    }
}

pub struct CredentialResolver {
    durable: Arc<dyn KeyValueStore>,
    cookies: Arc<dyn KeyValueStore>,
    key: String,
    resolving: Mutex<()>,
}

impl CredentialResolver {
    pub fn new(durable: Arc<dyn KeyValueStore>, cookies: Arc<dyn KeyValueStore>) -> Self {
        Self {
            durable,
            cookies,
            key: CREDENTIAL_KEY.to_string(),
            resolving: Mutex::new(()),
        }
    }

    /// Resolver over the platform's durable store and cookie jar.
    pub fn platform() -> Self {
        Self::new(Arc::new(LocalStore::new()), Arc::new(CookieJar::new()))
    }

    /// Use a different storage key / cookie name.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Current credential, or `None` for an anonymous session.
    ///
    /// The cookie is only read when durable storage has nothing.
    pub fn resolve(&self) -> Option<Credential> {
        let _guard = self.resolving.lock().unwrap_or_else(PoisonError::into_inner);

        let durable = self.durable.get(&self.key);
        let cookie = match durable.as_deref().and_then(Credential::new) {
            Some(_) => None,
            None => self.cookies.get(&self.key),
        };

        let resolution = select_credential(durable.as_deref(), cookie.as_deref());
        if let (true, Some(credential)) = (resolution.promote, resolution.credential.as_ref()) {
            if self.durable.set(&self.key, credential.as_str()) {
                crate::log_debug!("credential promoted from cookie to durable storage");
            } else {
                crate::log_warn!("credential found in cookie but durable write-back failed");
            }
        }
        resolution.credential
    }

    /// Record a freshly issued credential in both tiers.
    pub fn store(&self, credential: &Credential) {
        let _guard = self.resolving.lock().unwrap_or_else(PoisonError::into_inner);
        let durable = self.durable.set(&self.key, credential.as_str());
        let cookie = self.cookies.set(&self.key, credential.as_str());
        if !(durable && cookie) {
            crate::log_warn!(
                "credential store incomplete (durable: {}, cookie: {})",
                durable,
                cookie
            );
        }
    }

    /// Forget the credential in both tiers.
    pub fn clear(&self) {
        let _guard = self.resolving.lock().unwrap_or_else(PoisonError::into_inner);
        self.durable.remove(&self.key);
        self.cookies.remove(&self.key);
    }
}
