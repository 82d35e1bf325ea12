//! In-memory connector for driving the connection loop from tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use cartwire_shared::{
    AuthAccepted, AuthRejected, ClientCommand, ServerEvent, TransportError, WsEnvelope,
};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::future::{self, BoxFuture};
use futures_util::{FutureExt, StreamExt};

use super::connection::{Connector, Inbound, Socket};

/// Server half of one scripted socket.
pub(crate) struct ServerSide {
    pub from_client: UnboundedReceiver<String>,
    pub to_client: UnboundedSender<Result<Inbound, TransportError>>,
}

impl ServerSide {
    pub async fn recv(&mut self) -> WsEnvelope<ClientCommand> {
        let frame = self
            .from_client
            .next()
            .await
            .expect("client closed the socket");
        serde_json::from_str(&frame).expect("client sent an undecodable frame")
    }

    pub fn push(&self, event: ServerEvent) {
        self.push_envelope(WsEnvelope::new(uuid::Uuid::new_v4().to_string(), event));
    }

    pub fn push_envelope(&self, envelope: WsEnvelope<ServerEvent>) {
        self.push_raw(&serde_json::to_string(&envelope).expect("encodable"));
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.to_client.unbounded_send(Ok(Inbound::Text(text.to_string())));
    }

    /// A frame the socket layer could not turn into text.
    pub fn push_undecodable(&self) {
        let _ = self
            .to_client
            .unbounded_send(Ok(Inbound::Undecodable("binary frame".to_string())));
    }

    /// Read the auth frame, accept it and return the token it carried.
    pub async fn accept(&mut self) -> Option<String> {
        let token = self.expect_auth().await;
        self.push(ServerEvent::AuthOk(AuthAccepted::default()));
        token
    }

    pub async fn reject(&mut self, reason: &str) {
        self.expect_auth().await;
        self.push(ServerEvent::AuthRejected(AuthRejected {
            reason: reason.to_string(),
        }));
    }

    async fn expect_auth(&mut self) -> Option<String> {
        match self.recv().await.payload {
            ClientCommand::Auth(auth) => auth.token,
            other => panic!("expected auth frame, got {other:?}"),
        }
    }

    /// Simulate a network drop.
    pub fn drop_connection(self) {
        let _ = self
            .to_client
            .unbounded_send(Err(TransportError::Dropped("network blip".to_string())));
    }
}

pub(crate) struct ScriptedConnector {
    accepted: UnboundedSender<ServerSide>,
    opens: AtomicUsize,
    refuse: AtomicBool,
}

impl ScriptedConnector {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<ServerSide>) {
        let (accepted, sockets) = unbounded();
        let connector = Arc::new(Self {
            accepted,
            opens: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        });
        (connector, sockets)
    }

    /// Number of sockets opened so far (one per handshake attempt).
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Make every following open fail as unreachable.
    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Connector for ScriptedConnector {
    fn open(&self, _endpoint: &str) -> BoxFuture<'static, Result<Socket, TransportError>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return future::ready(Err(TransportError::Unreachable(
                "connection refused".to_string(),
            )))
            .boxed();
        }

        let (outgoing, from_client) = unbounded();
        let (to_client, incoming) = unbounded();
        let _ = self.accepted.unbounded_send(ServerSide {
            from_client,
            to_client,
        });
        future::ready(Ok(Socket::new(outgoing, incoming.boxed()))).boxed()
    }
}

/// Let spawned tasks run until they block.
pub(crate) async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
