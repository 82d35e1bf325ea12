//! Browser socket implementation using `web_sys::WebSocket`.

use std::cell::RefCell;
use std::rc::Rc;

use cartwire_shared::TransportError;
use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_channel::oneshot;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;
use web_sys::js_sys;
use web_sys::{CloseEvent, ErrorEvent, MessageEvent, WebSocket};

use super::{Connector, Inbound, Socket};

#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserConnector;

impl Connector for BrowserConnector {
    fn open(&self, endpoint: &str) -> BoxFuture<'static, Result<Socket, TransportError>> {
        let endpoint = endpoint.to_string();
        let (result_tx, result_rx) = oneshot::channel();

        // The WebSocket and its callbacks are not Send, so they live in a
        // local task; only channels cross back to the caller.
        spawn_local(async move {
            let _ = result_tx.send(connect_websocket(&endpoint).await);
        });

        async move {
            result_rx.await.unwrap_or_else(|_| {
                Err(TransportError::Unreachable("connect task dropped".to_string()))
            })
        }
        .boxed()
    }
}

type OpenSignal = Rc<RefCell<Option<oneshot::Sender<Result<(), TransportError>>>>>;

/// Report the open result once. Returns `false` if it was already reported.
fn report_open(signal: &OpenSignal, result: Result<(), TransportError>) -> bool {
    match signal.borrow_mut().take() {
        Some(tx) => {
            let _ = tx.send(result);
            true
        }
        None => false,
    }
}

async fn connect_websocket(url: &str) -> Result<Socket, TransportError> {
    let ws = WebSocket::new(url)
        .map_err(|e| TransportError::Unreachable(format!("failed to create WebSocket: {e:?}")))?;

    let (incoming_tx, incoming_rx) = unbounded::<Result<Inbound, TransportError>>();
    let (open_tx, open_rx) = oneshot::channel();
    let open_signal: OpenSignal = Rc::new(RefCell::new(Some(open_tx)));

    let signal = open_signal.clone();
    let onopen_callback = Closure::wrap(Box::new(move |_: web_sys::Event| {
        report_open(&signal, Ok(()));
    }) as Box<dyn FnMut(web_sys::Event)>);
    ws.set_onopen(Some(onopen_callback.as_ref().unchecked_ref()));
    onopen_callback.forget();

    let signal = open_signal.clone();
    let tx = incoming_tx.clone();
    let onclose_callback = Closure::wrap(Box::new(move |e: CloseEvent| {
        let reason = if e.reason().is_empty() {
            format!("Code {}", e.code())
        } else {
            e.reason()
        };
        crate::log_info!("WebSocket onclose: {}", reason);
        if !report_open(&signal, Err(TransportError::Unreachable(reason.clone()))) {
            let _ = tx.unbounded_send(Err(TransportError::Dropped(reason)));
        }
        tx.close_channel();
    }) as Box<dyn FnMut(CloseEvent)>);
    ws.set_onclose(Some(onclose_callback.as_ref().unchecked_ref()));
    onclose_callback.forget();

    let signal = open_signal.clone();
    let tx = incoming_tx.clone();
    let onerror_callback = Closure::wrap(Box::new(move |_: ErrorEvent| {
        crate::log_error!("WebSocket onerror fired");
        let error = "WebSocket error".to_string();
        if !report_open(&signal, Err(TransportError::Unreachable(error.clone()))) {
            let _ = tx.unbounded_send(Err(TransportError::Dropped(error)));
        }
    }) as Box<dyn FnMut(ErrorEvent)>);
    ws.set_onerror(Some(onerror_callback.as_ref().unchecked_ref()));
    onerror_callback.forget();

    let tx = incoming_tx;
    let onmessage_callback = Closure::wrap(Box::new(move |e: MessageEvent| {
        let frame = match e.data().dyn_into::<js_sys::JsString>() {
            Ok(text) => Inbound::Text(String::from(text)),
            Err(_) => Inbound::Undecodable("non-text message".to_string()),
        };
        let _ = tx.unbounded_send(Ok(frame));
    }) as Box<dyn FnMut(MessageEvent)>);
    ws.set_onmessage(Some(onmessage_callback.as_ref().unchecked_ref()));
    onmessage_callback.forget();

    open_rx
        .await
        .unwrap_or_else(|_| Err(TransportError::Unreachable("open signal dropped".to_string())))?;

    Ok(Socket::new(spawn_writer(ws), incoming_rx.boxed()))
}

/// Forward queued frames to the socket; close it when the sender is dropped.
fn spawn_writer(ws: WebSocket) -> UnboundedSender<String> {
    let (outgoing, mut to_send) = unbounded::<String>();
    spawn_local(async move {
        while let Some(text) = to_send.next().await {
            if ws.ready_state() != WebSocket::OPEN {
                crate::log_info!("WebSocket no longer open, stopping writer");
                break;
            }
            if let Err(e) = ws.send_with_str(&text) {
                crate::log_error!("send failed: {:?}", e);
            }
        }
        let _ = ws.close();
    });
    outgoing
}
