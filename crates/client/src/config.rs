//! Sync core configuration from environment variables.

use crate::ws::ReconnectConfig;

pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ws";
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 50;
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u32 = 5000;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Realtime endpoint (`ws://` or `wss://`).
    pub endpoint: String,
    /// Retention cap of the notification queue.
    pub notification_capacity: usize,
    /// How long to wait for the handshake answer.
    pub handshake_timeout_ms: u32,
    pub reconnect: ReconnectConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Read configuration from the environment.
    ///
    /// Environment variables:
    /// - `CARTWIRE_WS_URL`: realtime endpoint (default: "ws://localhost:8080/ws")
    /// - `CARTWIRE_NOTIFICATION_CAP`: notification retention cap (default: 50)
    /// - `CARTWIRE_HANDSHAKE_TIMEOUT_MS`: handshake timeout (default: 5000)
    /// - `CARTWIRE_RECONNECT_MAX_DELAY_MS`: backoff ceiling (default: 30000)
    ///
    /// In the browser there is no process environment, so the values baked in
    /// at build time are used instead.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| {
            std::env::var(name)
                .ok()
                .or_else(|| build_time_value(name).map(str::to_string))
        })
    }

    /// Build from an arbitrary variable lookup. Invalid values fall back to
    /// the defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(endpoint) = lookup("CARTWIRE_WS_URL") {
            match validate_endpoint(&endpoint) {
                Ok(()) => config.endpoint = endpoint,
                Err(reason) => crate::log_warn!(
                    "ignoring CARTWIRE_WS_URL '{}': {}; using {}",
                    endpoint,
                    reason,
                    DEFAULT_ENDPOINT
                ),
            }
        }

        if let Some(cap) = parse_var::<usize>(&lookup, "CARTWIRE_NOTIFICATION_CAP") {
            config.notification_capacity = cap.max(1);
        }
        if let Some(timeout) = parse_var::<u32>(&lookup, "CARTWIRE_HANDSHAKE_TIMEOUT_MS") {
            config.handshake_timeout_ms = timeout;
        }
        if let Some(max_delay) = parse_var::<u32>(&lookup, "CARTWIRE_RECONNECT_MAX_DELAY_MS") {
            config.reconnect.max_delay_ms = max_delay.max(config.reconnect.initial_delay_ms);
        }

        config
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            crate::log_warn!("ignoring {}='{}': not a valid number", name, raw);
            None
        }
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), String> {
    let url = url::Url::parse(endpoint).map_err(|e| e.to_string())?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(format!("unsupported scheme '{other}'")),
    }
}

fn build_time_value(name: &str) -> Option<&'static str> {
    match name {
        "CARTWIRE_WS_URL" => option_env!("CARTWIRE_WS_URL"),
        "CARTWIRE_NOTIFICATION_CAP" => option_env!("CARTWIRE_NOTIFICATION_CAP"),
        "CARTWIRE_HANDSHAKE_TIMEOUT_MS" => option_env!("CARTWIRE_HANDSHAKE_TIMEOUT_MS"),
        "CARTWIRE_RECONNECT_MAX_DELAY_MS" => option_env!("CARTWIRE_RECONNECT_MAX_DELAY_MS"),
        _ => None,
    }
}
