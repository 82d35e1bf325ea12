//! The realtime connection: state, handshake and auto-reconnect.
//!
//! The connection loop is platform independent. Sockets come from a
//! [`Connector`]; the platform-specific connector lives in
//! `connection_native` (tokio-tungstenite) or `connection_wasm` (browser
//! `WebSocket`).

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cartwire_shared::{
    decode_server_frame, encode_client_frame, AuthHandshake, ClientCommand, ServerEvent,
    TransportError, WsEnvelope,
};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::future::{AbortHandle, Abortable, BoxFuture};
use futures_util::stream::{BoxStream, Fuse};
use futures_util::{pin_mut, select, FutureExt, StreamExt};
use rand::Rng;

use crate::credential::Credential;
use crate::observable::{Observable, Subscription};

/// Connection status as seen by the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Error(TransportError),
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting { .. }
        )
    }

    pub fn error(&self) -> Option<&TransportError> {
        match self {
            ConnectionStatus::Error(e) => Some(e),
            _ => None,
        }
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u32,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u32,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f32,
    /// Random spread applied to each delay, as a fraction of it (0.2 = ±20%)
    pub jitter_ratio: f32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 1.5,
            jitter_ratio: 0.2,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> u32 {
        let exponent = attempt.min(64) as i32;
        let delay = self.initial_delay_ms as f32 * self.backoff_multiplier.powi(exponent);
        (delay as u32).min(self.max_delay_ms)
    }

    /// [`Self::delay_for_attempt`] with jitter, never above `max_delay_ms`.
    pub fn jittered_delay(&self, attempt: u32) -> u32 {
        let base = self.delay_for_attempt(attempt) as f32;
        if self.jitter_ratio <= 0.0 {
            return base as u32;
        }
        let spread = base * self.jitter_ratio;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        ((base + offset).max(0.0) as u32).min(self.max_delay_ms)
    }
}

/// Connection parameters shared by every connection a transport creates.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub endpoint: String,
    pub handshake_timeout_ms: u32,
    pub reconnect: ReconnectConfig,
}

/// One frame received from a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// A frame that cannot carry text (non UTF-8 binary, blobs). Counted as
    /// undecodable.
    Undecodable(String),
}

/// Items a socket yields. An error ends the socket.
pub type InboundStream = BoxStream<'static, Result<Inbound, TransportError>>;

/// A raw text-frame socket.
pub struct Socket {
    /// Frames to send. Dropping it closes the socket.
    pub outgoing: UnboundedSender<String>,
    incoming: Fuse<InboundStream>,
}

impl Socket {
    pub fn new(outgoing: UnboundedSender<String>, incoming: InboundStream) -> Self {
        Self {
            outgoing,
            incoming: incoming.fuse(),
        }
    }
}

/// Opens sockets to the realtime endpoint.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, endpoint: &str) -> BoxFuture<'static, Result<Socket, TransportError>>;
}

/// Receives decoded server events for the live generation.
pub type EventHandler = Arc<dyn Fn(WsEnvelope<ServerEvent>) + Send + Sync>;

/// One realtime connection, bound to one credential for its whole life.
pub struct Connection {
    generation: u64,
    credential: Option<Credential>,
    status: Observable<ConnectionStatus>,
    sender: UnboundedSender<WsEnvelope<ClientCommand>>,
    abort: AbortHandle,
    undecodable: Arc<AtomicU64>,
}

impl Connection {
    /// Create the connection and start its handshake in the background.
    ///
    /// `live_generation` is the owner's generation counter; once it moves past
    /// `generation`, everything this connection's loop produces is discarded.
    pub(crate) fn open(
        generation: u64,
        credential: Option<Credential>,
        options: ConnectionOptions,
        connector: Arc<dyn Connector>,
        live_generation: Arc<AtomicU64>,
        on_event: EventHandler,
    ) -> Arc<Self> {
        let (sender, receiver) = unbounded();
        let status = Observable::new(ConnectionStatus::Connecting);
        let undecodable = Arc::new(AtomicU64::new(0));
        let (abort, registration) = AbortHandle::new_pair();

        let ctx = LoopContext {
            generation,
            live_generation,
            credential: credential.clone(),
            options,
            connector,
            status: status.clone(),
            undecodable: undecodable.clone(),
            on_event,
        };
        spawn(Abortable::new(run_connection(ctx, receiver), registration).map(|_| ()));

        Arc::new(Self {
            generation,
            credential,
            status,
            sender,
            abort,
            undecodable,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The credential this connection authenticated with.
    pub fn bound_credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    pub fn status_observable(&self) -> &Observable<ConnectionStatus> {
        &self.status
    }

    pub fn subscribe_status(
        &self,
        callback: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.status.subscribe(callback)
    }

    /// Queue a command. Commands sent while disconnected go out after the
    /// next successful handshake. A command whose write hits a dropped socket
    /// is sent again after the reconnect.
    pub fn send(&self, command: ClientCommand) -> Result<(), TransportError> {
        crate::log_debug!("Connection#{}::send {:?}", self.generation, command);
        self.sender
            .unbounded_send(WsEnvelope::new(new_frame_id(), command))
            .map_err(|_| TransportError::Closed)
    }

    /// Frames that could not be decoded since this connection was created.
    pub fn undecodable_frames(&self) -> u64 {
        self.undecodable.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Stop the loop and close the socket.
    pub(crate) fn close(&self) {
        self.abort.abort();
        self.sender.close_channel();
        self.status.set(ConnectionStatus::Disconnected);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

struct LoopContext {
    generation: u64,
    live_generation: Arc<AtomicU64>,
    credential: Option<Credential>,
    options: ConnectionOptions,
    connector: Arc<dyn Connector>,
    status: Observable<ConnectionStatus>,
    undecodable: Arc<AtomicU64>,
    on_event: EventHandler,
}

impl LoopContext {
    fn is_current(&self) -> bool {
        self.live_generation.load(Ordering::SeqCst) == self.generation
    }

    fn publish(&self, status: ConnectionStatus) {
        if self.is_current() {
            self.status.set(status);
        }
    }

    fn decode(&self, frame: Inbound) -> Option<WsEnvelope<ServerEvent>> {
        let text = match frame {
            Inbound::Text(text) => text,
            Inbound::Undecodable(reason) => {
                self.count_undecodable(&reason);
                return None;
            }
        };
        match decode_server_frame(&text) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                self.count_undecodable(&e.to_string());
                None
            }
        }
    }

    fn count_undecodable(&self, reason: &str) {
        self.undecodable.fetch_add(1, Ordering::Relaxed);
        crate::log_warn!("dropping undecodable frame: {}", reason);
    }

    fn dispatch(&self, frame: Inbound) {
        let Some(envelope) = self.decode(frame) else {
            return;
        };
        match envelope.payload {
            ServerEvent::AuthOk(_) | ServerEvent::AuthRejected(_) => {
                crate::log_debug!("ignoring handshake answer outside the handshake");
            }
            _ if !self.is_current() => {
                crate::log_debug!("discarding event for stale generation {}", self.generation);
            }
            _ => (self.on_event)(envelope),
        }
    }
}

enum PumpEnd {
    /// The owning `Connection` went away.
    Closed,
    Dropped(TransportError),
}

async fn run_connection(ctx: LoopContext, mut outbound: UnboundedReceiver<WsEnvelope<ClientCommand>>) {
    let mut attempt = 0u32;
    // A command dequeued but not written when the socket dropped.
    let mut unsent: Option<WsEnvelope<ClientCommand>> = None;

    loop {
        if !ctx.is_current() {
            return;
        }
        if attempt == 0 {
            ctx.publish(ConnectionStatus::Connecting);
        } else {
            ctx.publish(ConnectionStatus::Reconnecting { attempt });
        }

        let failure = match handshake(&ctx).await {
            Ok(socket) => {
                if !ctx.is_current() {
                    return;
                }
                ctx.publish(ConnectionStatus::Connected);
                attempt = 0;
                crate::log_info!("connected to {} (generation {})", ctx.options.endpoint, ctx.generation);

                match pump(&ctx, socket, &mut outbound, &mut unsent).await {
                    PumpEnd::Closed => return,
                    PumpEnd::Dropped(e) => {
                        crate::log_warn!("connection to {} dropped: {}", ctx.options.endpoint, e);
                        ctx.publish(ConnectionStatus::Disconnected);
                        e
                    }
                }
            }
            Err(e) => {
                crate::log_error!("handshake with {} failed: {}", ctx.options.endpoint, e);
                ctx.publish(ConnectionStatus::Error(e.clone()));
                e
            }
        };

        if !failure.is_transient() {
            return;
        }

        let reconnect = &ctx.options.reconnect;
        if reconnect.max_attempts > 0 && attempt >= reconnect.max_attempts {
            crate::log_error!(
                "giving up on {} after {} reconnect attempts",
                ctx.options.endpoint,
                reconnect.max_attempts
            );
            ctx.publish(ConnectionStatus::Error(failure));
            return;
        }

        let delay = reconnect.jittered_delay(attempt);
        crate::log_info!(
            "reconnecting to {} in {}ms (attempt {})",
            ctx.options.endpoint,
            delay,
            attempt + 1
        );
        sleep_ms(delay).await;
        attempt += 1;
    }
}

/// Open a socket and authenticate, bounded by the handshake timeout.
async fn handshake(ctx: &LoopContext) -> Result<Socket, TransportError> {
    let attempt = open_and_authenticate(ctx).fuse();
    let timeout = sleep_ms(ctx.options.handshake_timeout_ms).fuse();
    pin_mut!(attempt, timeout);

    select! {
        result = attempt => result,
        _ = timeout => Err(TransportError::HandshakeTimeout),
    }
}

async fn open_and_authenticate(ctx: &LoopContext) -> Result<Socket, TransportError> {
    let mut socket = ctx.connector.open(&ctx.options.endpoint).await?;

    let hello = WsEnvelope::new(
        new_frame_id(),
        ClientCommand::Auth(AuthHandshake {
            token: ctx.credential.as_ref().map(|c| c.as_str().to_string()),
        }),
    );
    let frame =
        encode_client_frame(&hello).map_err(|e| TransportError::Unreachable(e.to_string()))?;
    socket
        .outgoing
        .unbounded_send(frame)
        .map_err(|_| TransportError::Dropped("socket closed before handshake".to_string()))?;

    while let Some(frame) = socket.incoming.next().await {
        let Some(envelope) = ctx.decode(frame?) else {
            continue;
        };
        match envelope.payload {
            ServerEvent::AuthOk(_) => return Ok(socket),
            ServerEvent::AuthRejected(rejected) => {
                return Err(TransportError::Rejected(rejected.reason))
            }
            other => crate::log_debug!("ignoring pre-handshake event {:?}", other),
        }
    }
    Err(TransportError::Dropped(
        "socket closed during handshake".to_string(),
    ))
}

async fn pump(
    ctx: &LoopContext,
    socket: Socket,
    outbound: &mut UnboundedReceiver<WsEnvelope<ClientCommand>>,
    unsent: &mut Option<WsEnvelope<ClientCommand>>,
) -> PumpEnd {
    let Socket {
        outgoing,
        mut incoming,
    } = socket;

    if let Some(envelope) = unsent.take() {
        if let Err(e) = write_command(&outgoing, envelope, unsent) {
            return PumpEnd::Dropped(e);
        }
    }

    loop {
        select! {
            frame = incoming.next() => match frame {
                Some(Ok(frame)) => ctx.dispatch(frame),
                Some(Err(e)) => return PumpEnd::Dropped(e),
                None => {
                    return PumpEnd::Dropped(TransportError::Dropped(
                        "closed by server".to_string(),
                    ))
                }
            },
            command = outbound.next() => match command {
                Some(envelope) => {
                    if let Err(e) = write_command(&outgoing, envelope, unsent) {
                        return PumpEnd::Dropped(e);
                    }
                }
                None => return PumpEnd::Closed,
            },
        }
    }
}

/// Write one command. On a dead socket the command is parked in `unsent` for
/// the next connection.
fn write_command(
    outgoing: &UnboundedSender<String>,
    envelope: WsEnvelope<ClientCommand>,
    unsent: &mut Option<WsEnvelope<ClientCommand>>,
) -> Result<(), TransportError> {
    let json = match encode_client_frame(&envelope) {
        Ok(json) => json,
        Err(e) => {
            crate::log_error!("serialize failed: {}", e);
            return Ok(());
        }
    };
    if outgoing.unbounded_send(json).is_err() {
        crate::log_warn!("socket closed, holding frame {} for the next connection", envelope.id);
        *unsent = Some(envelope);
        return Err(TransportError::Dropped(
            "socket closed while sending".to_string(),
        ));
    }
    Ok(())
}

fn new_frame_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(not(target_arch = "wasm32"))]
fn spawn(future: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(future);
}

#[cfg(target_arch = "wasm32")]
fn spawn(future: impl Future<Output = ()> + 'static) {
    wasm_bindgen_futures::spawn_local(future);
}

#[cfg(not(target_arch = "wasm32"))]
async fn sleep_ms(ms: u32) {
    tokio::time::sleep(std::time::Duration::from_millis(u64::from(ms))).await;
}

#[cfg(target_arch = "wasm32")]
async fn sleep_ms(ms: u32) {
    gloo_timers::future::TimeoutFuture::new(ms).await;
}

// Include platform-specific implementation
#[cfg(target_arch = "wasm32")]
mod connection_wasm;
#[cfg(target_arch = "wasm32")]
pub use connection_wasm::BrowserConnector;

#[cfg(not(target_arch = "wasm32"))]
mod connection_native;
#[cfg(not(target_arch = "wasm32"))]
pub use connection_native::TungsteniteConnector;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let config = ReconnectConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
            ..ReconnectConfig::default()
        };
        assert_eq!(config.delay_for_attempt(0), 100);
        assert_eq!(config.delay_for_attempt(1), 200);
        assert_eq!(config.delay_for_attempt(3), 800);
        assert_eq!(config.delay_for_attempt(4), 1000);
        assert_eq!(config.delay_for_attempt(u32::MAX), 1000);
    }

    #[test]
    fn jitter_stays_within_spread_and_cap() {
        let config = ReconnectConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 1100,
            backoff_multiplier: 1.0,
            jitter_ratio: 0.5,
            ..ReconnectConfig::default()
        };
        for _ in 0..200 {
            let delay = config.jittered_delay(0);
            assert!((500..=1100).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let config = ReconnectConfig {
            jitter_ratio: 0.0,
            ..ReconnectConfig::default()
        };
        assert_eq!(config.jittered_delay(2), config.delay_for_attempt(2));
    }

    #[test]
    fn status_helpers() {
        assert!(ConnectionStatus::Connected.is_connected());
        assert!(ConnectionStatus::Reconnecting { attempt: 2 }.is_connecting());
        let status = ConnectionStatus::Error(TransportError::HandshakeTimeout);
        assert_eq!(status.error(), Some(&TransportError::HandshakeTimeout));
        assert!(ConnectionStatus::Disconnected.error().is_none());
    }
}
