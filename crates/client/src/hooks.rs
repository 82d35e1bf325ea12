//! Dioxus bindings: expose stores as signals that follow every publish.

use std::rc::Rc;
use std::sync::Arc;

use dioxus::prelude::*;

use crate::client::SyncClient;
use crate::observable::Observable;
use crate::stores::{AddressState, CartState, NotificationSnapshot};
use crate::ws::ConnectionStatus;

/// Create the page's client once and make it available to descendants.
pub fn use_sync_client_provider(init: impl FnOnce() -> SyncClient) -> Arc<SyncClient> {
    use_context_provider(|| Arc::new(init()))
}

pub fn use_sync_client() -> Arc<SyncClient> {
    use_context::<Arc<SyncClient>>()
}

/// Mirror an observable into a signal for the lifetime of the component.
pub fn use_observable<T>(observable: &Observable<T>) -> Signal<T, SyncStorage>
where
    T: Clone + Send + Sync + 'static,
{
    let signal = use_signal_sync(|| observable.get());
    use_hook(|| {
        let subscription = observable.subscribe(move |value: &T| {
            let mut signal = signal;
            signal.set(value.clone());
        });
        Rc::new(subscription)
    });
    signal
}

pub fn use_cart_state() -> Signal<CartState, SyncStorage> {
    let client = use_sync_client();
    use_observable(client.cart().observable())
}

pub fn use_notifications() -> Signal<NotificationSnapshot, SyncStorage> {
    let client = use_sync_client();
    use_observable(client.notifications().observable())
}

pub fn use_addresses() -> Signal<AddressState, SyncStorage> {
    let client = use_sync_client();
    use_observable(client.addresses().observable())
}

/// Status of whichever connection is live, opening one on mount. Keeps
/// following across sign-in and sign-out resets.
pub fn use_connection_status() -> Signal<ConnectionStatus, SyncStorage> {
    let client = use_sync_client();
    use_hook(|| {
        client.connect();
    });
    use_observable(client.transport().status_observable())
}
