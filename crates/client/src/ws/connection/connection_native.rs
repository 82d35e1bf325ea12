//! Native/Desktop socket implementation using tokio-tungstenite.

use cartwire_shared::TransportError;
use futures_channel::mpsc::unbounded;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{Connector, Inbound, Socket};

/// Opens sockets with tokio-tungstenite. Must be used inside a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn open(&self, endpoint: &str) -> BoxFuture<'static, Result<Socket, TransportError>> {
        let endpoint = endpoint.to_string();
        async move {
            let (ws_stream, _response) = connect_async(endpoint.as_str())
                .await
                .map_err(|e| TransportError::Unreachable(e.to_string()))?;

            let (mut write, read) = ws_stream.split();
            let (outgoing, mut to_send) = unbounded::<String>();

            // Write task: ends (and closes the socket) once the Socket's
            // sender is dropped.
            tokio::spawn(async move {
                while let Some(text) = to_send.next().await {
                    if let Err(e) = write.send(Message::text(text)).await {
                        crate::log_error!("send failed: {}", e);
                        break;
                    }
                }
                let _ = write.close().await;
            });

            let incoming = read
                .filter_map(|message| async move {
                    match message {
                        Ok(Message::Text(text)) => Some(Ok(Inbound::Text(text.as_str().to_owned()))),
                        Ok(Message::Binary(bytes)) => Some(Ok(binary_frame(&bytes))),
                        Ok(Message::Close(frame)) => {
                            let reason = frame
                                .map(|f| f.reason.as_str().to_owned())
                                .filter(|reason| !reason.is_empty())
                                .unwrap_or_else(|| "closed by server".to_string());
                            Some(Err(TransportError::Dropped(reason)))
                        }
                        // Pong is handled automatically by tungstenite
                        Ok(_) => None,
                        Err(e) => Some(Err(TransportError::Dropped(e.to_string()))),
                    }
                })
                .boxed();

            Ok(Socket::new(outgoing, incoming))
        }
        .boxed()
    }
}

/// Binary frames are accepted when they hold UTF-8 text.
fn binary_frame(bytes: &[u8]) -> Inbound {
    match std::str::from_utf8(bytes) {
        Ok(text) => Inbound::Text(text.to_owned()),
        Err(e) => Inbound::Undecodable(format!("binary frame is not UTF-8: {e}")),
    }
}
