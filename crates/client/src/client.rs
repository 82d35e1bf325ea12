//! Top-level handle wiring credentials, transport and stores together.

use std::sync::Arc;

use cartwire_shared::{ClientCommand, ServerEvent, WsEnvelope};
use chrono::Utc;

use crate::config::SyncConfig;
use crate::credential::{Credential, CredentialResolver};
use crate::stores::{AddressStore, CartStore, NotificationChannel};
use crate::ws::{platform_connector, Connection, Connector, Transport};

/// One per page. Owns the transport and every store it feeds.
pub struct SyncClient {
    resolver: Arc<CredentialResolver>,
    transport: Arc<Transport>,
    notifications: Arc<NotificationChannel>,
    cart: Arc<CartStore>,
    addresses: Arc<AddressStore>,
}

impl SyncClient {
    pub fn new(
        config: SyncConfig,
        resolver: CredentialResolver,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let resolver = Arc::new(resolver);
        let notifications = Arc::new(NotificationChannel::new(config.notification_capacity));
        let cart = Arc::new(CartStore::new());
        let addresses = Arc::new(AddressStore::new());

        let transport = {
            let notifications = notifications.clone();
            let cart = cart.clone();
            Arc::new(Transport::new(
                resolver.clone(),
                connector,
                &config,
                move |envelope| route_event(&notifications, &cart, envelope),
            ))
        };

        // Weak so the cart does not keep the transport alive.
        let weak = Arc::downgrade(&transport);
        cart.set_emitter(move |mutation| {
            let Some(connection) = weak.upgrade().and_then(|transport| transport.current()) else {
                crate::log_debug!("no connection, cart change for {} stays local", mutation.key);
                return;
            };
            if let Err(e) = connection.send(ClientCommand::CartMutation(mutation)) {
                crate::log_warn!("failed to mirror cart change: {}", e);
            }
        });

        Self {
            resolver,
            transport,
            notifications,
            cart,
            addresses,
        }
    }

    /// Browser storage and socket on wasm, files and tokio-tungstenite
    /// elsewhere.
    pub fn platform(config: SyncConfig) -> Self {
        Self::new(config, CredentialResolver::platform(), platform_connector())
    }

    /// The live connection, opening it if needed.
    pub fn connect(&self) -> Arc<Connection> {
        self.transport.get_connection()
    }

    /// Persist a new credential and reconnect with it. Returns `false` and
    /// changes nothing when the token is blank.
    pub fn sign_in(&self, token: &str) -> bool {
        let Some(credential) = Credential::new(token) else {
            crate::log_warn!("ignoring sign-in with an empty token");
            return false;
        };
        self.resolver.store(&credential);
        self.transport.reset();
        self.transport.get_connection();
        true
    }

    /// Forget the credential and drop the connection. The cart stays as a
    /// guest cart.
    pub fn sign_out(&self) {
        self.resolver.clear();
        self.transport.reset();
        self.addresses.clear();
        crate::log_info!("signed out");
    }

    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn notifications(&self) -> &NotificationChannel {
        &self.notifications
    }

    pub fn cart(&self) -> &CartStore {
        &self.cart
    }

    pub fn addresses(&self) -> &AddressStore {
        &self.addresses
    }
}

/// Deliver one inbound event to the store that owns it. Stale generations
/// were already filtered by the connection loop.
fn route_event(
    notifications: &NotificationChannel,
    cart: &CartStore,
    envelope: WsEnvelope<ServerEvent>,
) {
    match envelope.payload {
        ServerEvent::Notification(raw) => {
            notifications.ingest(raw, envelope.ts.unwrap_or_else(Utc::now));
        }
        ServerEvent::CartSync(event) => {
            cart.apply_server_event(&event);
        }
        ServerEvent::Error(error) => {
            crate::log_warn!(
                "server error {}: {} (correlation {:?})",
                error.code,
                error.message,
                error.correlation_id
            );
        }
        ServerEvent::AuthOk(_) | ServerEvent::AuthRejected(_) => {}
    }
}
