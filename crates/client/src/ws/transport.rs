//! Owner of the one live connection.
//!
//! The transport creates its connection lazily and keeps handing out the same
//! `Arc<Connection>` until [`Transport::reset`]. Resetting is the only way the
//! bound credential can change.
//!
//! The transport also carries a status of its own that follows whichever
//! connection is live, so listeners survive resets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use cartwire_shared::{ServerEvent, WsEnvelope};

use super::connection::{Connection, ConnectionOptions, ConnectionStatus, Connector, EventHandler};
use crate::config::SyncConfig;
use crate::credential::CredentialResolver;
use crate::observable::{Observable, Subscription};

struct Live {
    connection: Arc<Connection>,
    /// Forwards the connection's status into the transport's. Attached once
    /// the slot lock has been released.
    _forward: Option<Subscription>,
}

pub struct Transport {
    resolver: Arc<CredentialResolver>,
    connector: Arc<dyn Connector>,
    options: ConnectionOptions,
    on_event: EventHandler,
    generation: Arc<AtomicU64>,
    slot: Mutex<Option<Live>>,
    status: Observable<ConnectionStatus>,
}

impl Transport {
    pub fn new(
        resolver: Arc<CredentialResolver>,
        connector: Arc<dyn Connector>,
        config: &SyncConfig,
        on_event: impl Fn(WsEnvelope<ServerEvent>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            resolver,
            connector,
            options: ConnectionOptions {
                endpoint: config.endpoint.clone(),
                handshake_timeout_ms: config.handshake_timeout_ms,
                reconnect: config.reconnect.clone(),
            },
            on_event: Arc::new(on_event),
            generation: Arc::new(AtomicU64::new(0)),
            slot: Mutex::new(None),
            status: Observable::new(ConnectionStatus::Disconnected),
        }
    }

    /// The live connection, creating it on first use.
    ///
    /// Never fails: handshake problems show up in the connection's status.
    /// On native targets this must be called inside a tokio runtime.
    pub fn get_connection(&self) -> Arc<Connection> {
        let connection = {
            let mut slot = self.lock_slot();
            if let Some(live) = slot.as_ref() {
                return live.connection.clone();
            }

            let credential = self.resolver.resolve();
            let generation = self.generation.load(Ordering::SeqCst);
            crate::log_info!(
                "opening connection generation {} ({})",
                generation,
                if credential.is_some() { "authenticated" } else { "anonymous" }
            );

            let connection = Connection::open(
                generation,
                credential,
                self.options.clone(),
                self.connector.clone(),
                self.generation.clone(),
                self.on_event.clone(),
            );
            *slot = Some(Live {
                connection: connection.clone(),
                _forward: None,
            });
            connection
        };

        // Subscribing delivers the current status right away, and transport
        // listeners may call back into the transport.
        let forward = self.forward_status(&connection);
        let mut slot = self.lock_slot();
        if let Some(live) = slot.as_mut() {
            if Arc::ptr_eq(&live.connection, &connection) {
                live._forward = Some(forward);
            }
        }
        connection
    }

    fn forward_status(&self, connection: &Connection) -> Subscription {
        let status = self.status.clone();
        let live_generation = self.generation.clone();
        let generation = connection.generation();
        connection.subscribe_status(move |current| {
            // Checked under the status lock, so nothing lands after a reset.
            status.update_if(|status| {
                if live_generation.load(Ordering::SeqCst) != generation || *status == *current {
                    return false;
                }
                *status = current.clone();
                true
            });
        })
    }

    /// The live connection, if one has been created.
    pub fn current(&self) -> Option<Arc<Connection>> {
        self.lock_slot().as_ref().map(|live| live.connection.clone())
    }

    /// Status of the live connection, `Disconnected` when there is none.
    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    /// Status that keeps following the live connection across resets.
    pub fn status_observable(&self) -> &Observable<ConnectionStatus> {
        &self.status
    }

    pub fn subscribe_status(
        &self,
        callback: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.status.subscribe(callback)
    }

    /// Tear down the live connection. The next [`Self::get_connection`]
    /// resolves the credential again and performs a fresh handshake.
    pub fn reset(&self) {
        let previous = {
            let mut slot = self.lock_slot();
            self.generation.fetch_add(1, Ordering::SeqCst);
            slot.take()
        };
        if let Some(live) = previous {
            crate::log_info!(
                "resetting connection generation {}",
                live.connection.generation()
            );
            live.connection.close();
            self.status.set(ConnectionStatus::Disconnected);
        }
    }

    /// Current generation. Bumped by every reset.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<Live>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::credential::CREDENTIAL_KEY;
    use crate::storage::{KeyValueStore, MemoryStore};
    use crate::ws::testing::{settle, ScriptedConnector, ServerSide};
    use crate::ws::ConnectionStatus;
    use cartwire_shared::{
        AuthAccepted, CartKey, CartSyncEvent, ClientCommand, RawNotification, TransportError,
    };
    use futures_util::StreamExt;
    use std::sync::atomic::AtomicUsize;

    /// Durable store that counts reads: one read per credential resolution.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        reads: AtomicUsize,
    }

    impl KeyValueStore for CountingStore {
        fn get(&self, key: &str) -> Option<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> bool {
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) {
            self.inner.remove(key);
        }
    }

    struct Harness {
        transport: Transport,
        durable: Arc<CountingStore>,
        connector: Arc<ScriptedConnector>,
        sockets: futures_channel::mpsc::UnboundedReceiver<crate::ws::testing::ServerSide>,
        events: Arc<Mutex<Vec<ServerEvent>>>,
    }

    fn harness(token: Option<&str>) -> Harness {
        let durable = Arc::new(CountingStore::default());
        if let Some(token) = token {
            durable.set(CREDENTIAL_KEY, token);
        }
        let resolver = Arc::new(CredentialResolver::new(
            durable.clone(),
            Arc::new(MemoryStore::new()),
        ));
        let (connector, sockets) = ScriptedConnector::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut config = SyncConfig::default();
        config.reconnect.jitter_ratio = 0.0;
        let transport = Transport::new(resolver, connector.clone(), &config, move |envelope| {
            sink.lock().unwrap().push(envelope.payload);
        });
        Harness {
            transport,
            durable,
            connector,
            sockets,
            events,
        }
    }

    fn notification(id: &str) -> ServerEvent {
        ServerEvent::Notification(RawNotification {
            id: Some(id.to_string()),
            kind: Some("order.shipped".to_string()),
            ..RawNotification::default()
        })
    }

    #[tokio::test]
    async fn same_connection_until_reset() {
        let mut h = harness(Some("abc123"));

        let first = h.transport.get_connection();
        let second = h.transport.get_connection();
        assert!(Arc::ptr_eq(&first, &second));

        let mut server = h.sockets.next().await.unwrap();
        assert_eq!(server.accept().await.as_deref(), Some("abc123"));
        settle().await;

        assert_eq!(first.status(), ConnectionStatus::Connected);
        assert_eq!(h.connector.opens(), 1);
        assert_eq!(h.durable.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn credential_change_needs_reset() {
        let mut h = harness(Some("old"));
        let first = h.transport.get_connection();
        h.sockets.next().await.unwrap().accept().await;

        h.durable.set(CREDENTIAL_KEY, "new");
        let again = h.transport.get_connection();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(again.bound_credential().unwrap().as_str(), "old");

        h.transport.reset();
        let fresh = h.transport.get_connection();
        assert!(!Arc::ptr_eq(&first, &fresh));
        assert_eq!(fresh.bound_credential().unwrap().as_str(), "new");
        assert_eq!(
            h.sockets.next().await.unwrap().accept().await.as_deref(),
            Some("new")
        );
    }

    #[tokio::test]
    async fn reset_resolves_and_handshakes_exactly_once() {
        let mut h = harness(Some("abc123"));
        let first = h.transport.get_connection();
        let mut server = h.sockets.next().await.unwrap();
        server.accept().await;
        settle().await;

        h.transport.reset();
        assert_eq!(first.status(), ConnectionStatus::Disconnected);
        assert!(first.is_closed());

        let reads_before = h.durable.reads.load(Ordering::SeqCst);
        let opens_before = h.connector.opens();

        let fresh = h.transport.get_connection();
        let _ = h.transport.get_connection();
        let mut server = h.sockets.next().await.unwrap();
        server.accept().await;
        settle().await;

        assert_eq!(h.durable.reads.load(Ordering::SeqCst), reads_before + 1);
        assert_eq!(h.connector.opens(), opens_before + 1);
        assert_eq!(fresh.status(), ConnectionStatus::Connected);
        assert_eq!(fresh.generation(), first.generation() + 1);
    }

    #[tokio::test]
    async fn rejected_credential_is_status_not_panic() {
        let mut h = harness(Some("expired"));
        let connection = h.transport.get_connection();
        h.sockets.next().await.unwrap().reject("token expired").await;
        settle().await;

        assert_eq!(
            connection.status(),
            ConnectionStatus::Error(TransportError::Rejected("token expired".to_string()))
        );
        // Rejection is terminal: no retry with the same credential.
        assert_eq!(h.connector.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_endpoint_reports_error_then_retries() {
        let mut h = harness(None);
        h.connector.set_refusing(true);

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = statuses.clone();
        let connection = h.transport.get_connection();
        let _sub = connection.subscribe_status(move |status| sink.lock().unwrap().push(status.clone()));
        settle().await;

        assert!(matches!(
            connection.status(),
            ConnectionStatus::Error(TransportError::Unreachable(_))
        ));

        h.connector.set_refusing(false);
        let mut server = h.sockets.next().await.unwrap();
        assert_eq!(server.accept().await, None);
        settle().await;

        assert_eq!(connection.status(), ConnectionStatus::Connected);
        let seen = statuses.lock().unwrap().clone();
        assert!(seen.contains(&ConnectionStatus::Reconnecting { attempt: 1 }));
        assert!(h.connector.opens() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_drop_reconnects_with_same_credential() {
        let mut h = harness(Some("abc123"));
        let connection = h.transport.get_connection();
        let mut server = h.sockets.next().await.unwrap();
        server.accept().await;
        settle().await;
        let reads = h.durable.reads.load(Ordering::SeqCst);

        // Storage changes underneath; the reconnect must keep the bound credential.
        h.durable.set(CREDENTIAL_KEY, "rotated");
        server.drop_connection();
        settle().await;
        assert_eq!(connection.status(), ConnectionStatus::Disconnected);

        let mut server = h.sockets.next().await.unwrap();
        assert_eq!(server.accept().await.as_deref(), Some("abc123"));
        settle().await;

        assert_eq!(connection.status(), ConnectionStatus::Connected);
        assert_eq!(h.durable.reads.load(Ordering::SeqCst), reads);
        assert!(Arc::ptr_eq(&connection, &h.transport.get_connection()));
    }

    #[tokio::test]
    async fn dispatches_events_and_counts_garbage() {
        let mut h = harness(Some("abc123"));
        let connection = h.transport.get_connection();
        let mut server = h.sockets.next().await.unwrap();
        server.accept().await;
        settle().await;

        server.push(notification("n1"));
        server.push_raw("{not json");
        server.push(ServerEvent::CartSync(CartSyncEvent {
            key: CartKey::product("p1"),
            quantity: 2,
            version: 1,
            unit_price: None,
        }));
        settle().await;

        let events = h.events.lock().unwrap().clone();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ServerEvent::Notification(_)));
        assert!(matches!(events[1], ServerEvent::CartSync(_)));
        assert_eq!(connection.undecodable_frames(), 1);
    }

    #[tokio::test]
    async fn late_events_from_reset_connection_are_ignored() {
        let mut h = harness(Some("abc123"));
        h.transport.get_connection();
        let mut server = h.sockets.next().await.unwrap();
        server.accept().await;
        settle().await;

        h.transport.reset();
        server.push(notification("late"));
        settle().await;

        assert!(h.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn commands_queued_before_handshake_are_delivered() {
        let mut h = harness(Some("abc123"));
        let connection = h.transport.get_connection();
        let mutation = ClientCommand::CartMutation(CartSyncEvent {
            key: CartKey::product("p1"),
            quantity: 1,
            version: 1,
            unit_price: None,
        });
        connection.send(mutation.clone()).unwrap();

        let mut server = h.sockets.next().await.unwrap();
        server.accept().await;
        assert_eq!(server.recv().await.payload, mutation);

        h.transport.reset();
        assert_eq!(connection.send(mutation), Err(TransportError::Closed));
    }

    fn record_status(
        seen: &Arc<Mutex<Vec<ConnectionStatus>>>,
    ) -> impl Fn(&ConnectionStatus) + Send + Sync + 'static {
        let sink = seen.clone();
        move |status| sink.lock().unwrap().push(status.clone())
    }

    #[tokio::test]
    async fn reset_during_handshake_ignores_late_auth_ok() {
        let mut h = harness(Some("abc123"));
        let connection = h.transport.get_connection();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = connection.subscribe_status(record_status(&seen));
        let transport_seen = Arc::new(Mutex::new(Vec::new()));
        let _transport_sub = h.transport.subscribe_status(record_status(&transport_seen));

        let mut server = h.sockets.next().await.unwrap();
        server.recv().await;
        h.transport.reset();
        server.push(ServerEvent::AuthOk(AuthAccepted::default()));
        server.push(notification("late"));
        settle().await;

        assert_eq!(connection.status(), ConnectionStatus::Disconnected);
        assert_eq!(h.transport.status(), ConnectionStatus::Disconnected);
        assert!(!seen.lock().unwrap().contains(&ConnectionStatus::Connected));
        assert!(!transport_seen.lock().unwrap().contains(&ConnectionStatus::Connected));
        assert!(h.events.lock().unwrap().is_empty());
        assert_eq!(h.connector.opens(), 1);
    }

    #[tokio::test]
    async fn transport_status_follows_the_live_connection() {
        let mut h = harness(Some("abc123"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = h.transport.subscribe_status(record_status(&seen));

        h.transport.get_connection();
        let mut first = h.sockets.next().await.unwrap();
        first.accept().await;
        settle().await;
        assert_eq!(h.transport.status(), ConnectionStatus::Connected);

        h.transport.reset();
        assert_eq!(h.transport.status(), ConnectionStatus::Disconnected);

        h.transport.get_connection();
        let mut second = h.sockets.next().await.unwrap();
        second.accept().await;
        settle().await;
        assert_eq!(h.transport.status(), ConnectionStatus::Connected);

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ConnectionStatus::Disconnected,
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
                ConnectionStatus::Disconnected,
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
            ]
        );
    }

    #[tokio::test]
    async fn status_listener_may_call_back_into_the_transport() {
        let Harness { transport, .. } = harness(Some("abc123"));
        let transport = Arc::new(transport);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let weak = Arc::downgrade(&transport);
        let _sub = transport.subscribe_status(move |_| {
            let live = weak.upgrade().and_then(|transport| transport.current());
            sink.lock().unwrap().push(live.is_some());
        });

        transport.get_connection();
        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
    }

    #[tokio::test]
    async fn undecodable_frames_are_counted_during_and_after_handshake() {
        let mut h = harness(Some("abc123"));
        let connection = h.transport.get_connection();
        let mut server = h.sockets.next().await.unwrap();
        server.recv().await;
        server.push_undecodable();
        server.push(ServerEvent::AuthOk(AuthAccepted::default()));
        settle().await;
        assert_eq!(connection.status(), ConnectionStatus::Connected);

        server.push_undecodable();
        server.push_raw("{not json");
        server.push(notification("n1"));
        settle().await;

        assert_eq!(connection.undecodable_frames(), 3);
        assert_eq!(h.events.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn command_written_to_a_dead_socket_goes_out_after_reconnect() {
        let mut h = harness(Some("abc123"));
        let connection = h.transport.get_connection();
        let mut server = h.sockets.next().await.unwrap();
        server.accept().await;
        settle().await;

        // The write side dies while reads stay open.
        let ServerSide {
            from_client,
            to_client,
        } = server;
        drop(from_client);

        let mutation = ClientCommand::CartMutation(CartSyncEvent {
            key: CartKey::product("p1"),
            quantity: 3,
            version: 2,
            unit_price: None,
        });
        connection.send(mutation.clone()).unwrap();
        settle().await;
        assert_eq!(connection.status(), ConnectionStatus::Disconnected);

        let mut server = h.sockets.next().await.unwrap();
        assert_eq!(server.accept().await.as_deref(), Some("abc123"));
        assert_eq!(server.recv().await.payload, mutation);
        drop(to_client);
    }
}
