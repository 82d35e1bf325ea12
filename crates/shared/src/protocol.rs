//! Realtime wire protocol.
//!
//! Every text frame is a JSON [`WsEnvelope`]. The payload is adjacently
//! tagged, so a frame looks like:
//!
//! ```json
//! {"id":"7f1c…","type":"cart.sync","data":{"key":{"productId":"p1"},"quantity":2,"version":4},"ts":"2024-05-01T12:00:00Z"}
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::CartKey;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsEnvelope<T> {
    #[serde(default)]
    pub id: String,
    #[serde(flatten)]
    pub payload: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl<T> WsEnvelope<T> {
    /// Wrap a payload, stamped with the current time.
    pub fn new(id: impl Into<String>, payload: T) -> Self {
        Self {
            id: id.into(),
            payload,
            ts: Some(Utc::now()),
            correlation_id: None,
        }
    }
}

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Handshake, always the first frame on a fresh socket.
    #[serde(rename = "auth")]
    Auth(AuthHandshake),
    /// Mirror of a local cart mutation for cross-session sync.
    #[serde(rename = "cart.mutation")]
    CartMutation(CartSyncEvent),
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "auth.ok")]
    AuthOk(AuthAccepted),
    #[serde(rename = "auth.rejected")]
    AuthRejected(AuthRejected),
    #[serde(rename = "notification")]
    Notification(RawNotification),
    #[serde(rename = "cart.sync")]
    CartSync(CartSyncEvent),
    #[serde(rename = "error")]
    Error(ServerError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthHandshake {
    /// Bearer credential, `null` for an anonymous session.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthAccepted {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRejected {
    #[serde(default)]
    pub reason: String,
}

/// An inbound notice as it appears on the wire.
///
/// Every field is optional here; the notification channel decides what is
/// well-formed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNotification {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

/// Versioned state of one cart line.
///
/// A quantity of zero or less means the line is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSyncEvent {
    pub key: CartKey,
    pub quantity: i64,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// Parse one inbound text frame.
pub fn decode_server_frame(text: &str) -> Result<WsEnvelope<ServerEvent>, serde_json::Error> {
    serde_json::from_str(text)
}

/// Serialize one outbound frame.
pub fn encode_client_frame(envelope: &WsEnvelope<ClientCommand>) -> Result<String, serde_json::Error> {
    serde_json::to_string(envelope)
}
