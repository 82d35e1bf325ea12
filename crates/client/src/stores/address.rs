//! Saved addresses and the one currently selected for checkout.

use cartwire_shared::Address;
use serde::{Deserialize, Serialize};

use crate::observable::{Observable, Subscription};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressState {
    pub saved: Vec<Address>,
    pub active_id: Option<String>,
}

impl AddressState {
    pub fn active(&self) -> Option<&Address> {
        let id = self.active_id.as_deref()?;
        self.saved.iter().find(|address| address.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.saved.iter().position(|address| address.id == id)
    }
}

#[derive(Clone)]
pub struct AddressStore {
    state: Observable<AddressState>,
}

impl Default for AddressStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressStore {
    pub fn new() -> Self {
        Self {
            state: Observable::new(AddressState::default()),
        }
    }

    /// Replace the saved list. The active selection survives if its address
    /// is still in the list.
    pub fn set_addresses(&self, saved: Vec<Address>) -> AddressState {
        self.state.update(|state| {
            if let Some(id) = state.active_id.take() {
                if saved.iter().any(|address| address.id == id) {
                    state.active_id = Some(id);
                }
            }
            state.saved = saved;
            state.clone()
        })
    }

    /// Insert or replace by id. Replacement keeps the list position.
    pub fn upsert(&self, address: Address) -> AddressState {
        self.state.update(|state| {
            match state.position(&address.id) {
                Some(pos) => state.saved[pos] = address,
                None => state.saved.push(address),
            }
            state.clone()
        })
    }

    /// Remove by id. Unknown ids are a no-op.
    pub fn remove(&self, id: &str) -> AddressState {
        let mut after = AddressState::default();
        self.state.update_if(|state| {
            let found = state.position(id).is_some();
            if found {
                state.saved.retain(|address| address.id != id);
                if state.active_id.as_deref() == Some(id) {
                    state.active_id = None;
                }
            }
            after = state.clone();
            found
        });
        after
    }

    /// Select the active address. Returns `false` for an unknown id.
    pub fn set_active(&self, id: &str) -> bool {
        let known = self.state.update_if(|state| {
            if state.position(id).is_none() {
                return false;
            }
            state.active_id = Some(id.to_string());
            true
        });
        if !known {
            crate::log_debug!("ignoring unknown address {}", id);
        }
        known
    }

    pub fn active(&self) -> Option<Address> {
        self.state.get().active().cloned()
    }

    pub fn clear(&self) {
        self.state.set(AddressState::default());
    }

    pub fn state(&self) -> AddressState {
        self.state.get()
    }

    pub fn observable(&self) -> &Observable<AddressState> {
        &self.state
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&AddressState) + Send + Sync + 'static,
    ) -> Subscription {
        self.state.subscribe(callback)
    }
}
