//! Client-side cart.
//!
//! Local mutations apply immediately and are mirrored outward through an
//! optional emitter. Server pushes are reconciled per line with a logical
//! version: an event only applies when it is newer than what the line has
//! already seen, from either side.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use cartwire_shared::{CartKey, CartSyncEvent};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::observable::{Observable, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineItem {
    pub key: CartKey,
    /// Always positive. A line at zero is removed instead.
    pub quantity: u32,
    /// Price at the time the line was last added to.
    pub unit_price: Decimal,
    pub added_at: DateTime<Utc>,
}

impl CartLineItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Derived view published after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartState {
    /// In insertion order.
    pub items: Vec<CartLineItem>,
    pub total_quantity: u64,
    pub total_price: Decimal,
}

impl CartState {
    fn from_items(items: &[CartLineItem]) -> Self {
        Self {
            items: items.to_vec(),
            total_quantity: items.iter().map(|item| u64::from(item.quantity)).sum(),
            total_price: items.iter().map(CartLineItem::line_total).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, key: &CartKey) -> Option<&CartLineItem> {
        self.items.iter().find(|item| &item.key == key)
    }
}

/// Receives every local mutation as the event the server should see.
pub type CartEmitter = Arc<dyn Fn(CartSyncEvent) + Send + Sync>;

#[derive(Default)]
struct CartInner {
    items: Vec<CartLineItem>,
    /// Survives removal so a stale event cannot resurrect a deleted line.
    versions: HashMap<CartKey, u64>,
}

impl CartInner {
    fn position(&self, key: &CartKey) -> Option<usize> {
        self.items.iter().position(|item| &item.key == key)
    }

    fn version(&self, key: &CartKey) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: &CartKey) -> u64 {
        let next = self.version(key) + 1;
        self.versions.insert(key.clone(), next);
        next
    }
}

pub struct CartStore {
    inner: Mutex<CartInner>,
    state: Observable<CartState>,
    emitter: Mutex<Option<CartEmitter>>,
    discarded: AtomicU64,
}

impl Default for CartStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CartStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CartInner::default()),
            state: Observable::new(CartState::default()),
            emitter: Mutex::new(None),
            discarded: AtomicU64::new(0),
        }
    }

    /// Install the outbound mirror for local mutations.
    pub fn set_emitter(&self, emitter: impl Fn(CartSyncEvent) + Send + Sync + 'static) {
        *self.emitter.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(emitter));
    }

    /// Add `quantity` of an item. An existing line is merged: quantities sum
    /// and the unit price is refreshed. A non-positive quantity is ignored.
    pub fn add_item(
        &self,
        product_id: &str,
        variant_id: Option<&str>,
        quantity: i64,
        unit_price: Decimal,
    ) -> CartState {
        let Some(quantity) = positive_quantity(quantity) else {
            crate::log_debug!("ignoring add of {} with quantity {}", product_id, quantity);
            return self.state();
        };
        let key = CartKey::new(product_id, variant_id);

        let (state, mutation) = {
            let mut inner = self.lock();
            let total = match inner.position(&key) {
                Some(pos) => {
                    let item = &mut inner.items[pos];
                    item.quantity = item.quantity.saturating_add(quantity);
                    item.unit_price = unit_price;
                    item.quantity
                }
                None => {
                    inner.items.push(CartLineItem {
                        key: key.clone(),
                        quantity,
                        unit_price,
                        added_at: Utc::now(),
                    });
                    quantity
                }
            };
            let version = inner.bump(&key);
            let mutation = CartSyncEvent {
                key,
                quantity: i64::from(total),
                version,
                unit_price: Some(unit_price),
            };
            (self.stage(&inner), mutation)
        };
        self.publish(state, Some(mutation))
    }

    /// Set a line's quantity in place. Zero or less removes the line.
    /// Unknown keys are left alone.
    pub fn update_quantity(&self, key: &CartKey, quantity: i64) -> CartState {
        let Some(quantity) = positive_quantity(quantity) else {
            return self.remove_item(key);
        };

        let (state, mutation) = {
            let mut inner = self.lock();
            let Some(pos) = inner.position(key) else {
                crate::log_debug!("update of {} ignored: not in cart", key);
                return CartState::from_items(&inner.items);
            };
            inner.items[pos].quantity = quantity;
            let unit_price = inner.items[pos].unit_price;
            let version = inner.bump(key);
            let mutation = CartSyncEvent {
                key: key.clone(),
                quantity: i64::from(quantity),
                version,
                unit_price: Some(unit_price),
            };
            (self.stage(&inner), mutation)
        };
        self.publish(state, Some(mutation))
    }

    /// Remove a line. Absent keys are a no-op.
    pub fn remove_item(&self, key: &CartKey) -> CartState {
        let (state, mutation) = {
            let mut inner = self.lock();
            let Some(pos) = inner.position(key) else {
                return CartState::from_items(&inner.items);
            };
            inner.items.remove(pos);
            let version = inner.bump(key);
            (self.stage(&inner), removal(key.clone(), version))
        };
        self.publish(state, Some(mutation))
    }

    /// Empty the cart. Each removed line gets a new version.
    pub fn clear_cart(&self) -> CartState {
        let (state, mutations) = {
            let mut inner = self.lock();
            let keys: Vec<CartKey> = inner.items.drain(..).map(|item| item.key).collect();
            let mutations: Vec<CartSyncEvent> = keys
                .into_iter()
                .map(|key| {
                    let version = inner.bump(&key);
                    removal(key, version)
                })
                .collect();
            (self.stage(&inner), mutations)
        };
        self.state.flush();
        for mutation in mutations {
            self.emit(mutation);
        }
        state
    }

    /// Reconcile with a server push.
    ///
    /// Returns `false` when the event is not newer than the line's current
    /// version and was discarded.
    pub fn apply_server_event(&self, event: &CartSyncEvent) -> bool {
        {
            let mut inner = self.lock();
            let current = inner.version(&event.key);
            if event.version <= current {
                drop(inner);
                let total = self.discarded.fetch_add(1, Ordering::SeqCst) + 1;
                crate::log_debug!(
                    "discarding cart event for {} at version {} (have {}, {} discarded)",
                    event.key,
                    event.version,
                    current,
                    total
                );
                return false;
            }
            inner.versions.insert(event.key.clone(), event.version);

            let pos = inner.position(&event.key);
            match (positive_quantity(event.quantity), pos) {
                (None, Some(pos)) => {
                    inner.items.remove(pos);
                }
                (None, None) => {}
                (Some(quantity), Some(pos)) => {
                    let item = &mut inner.items[pos];
                    item.quantity = quantity;
                    if let Some(price) = event.unit_price {
                        item.unit_price = price;
                    }
                }
                (Some(quantity), None) => {
                    inner.items.push(CartLineItem {
                        key: event.key.clone(),
                        quantity,
                        unit_price: event.unit_price.unwrap_or(Decimal::ZERO),
                        added_at: Utc::now(),
                    });
                }
            }
            self.stage(&inner);
        }
        // Server-originated changes are not echoed back.
        self.state.flush();
        true
    }

    pub fn state(&self) -> CartState {
        self.state.get()
    }

    pub fn get(&self, key: &CartKey) -> Option<CartLineItem> {
        let inner = self.lock();
        inner.position(key).map(|pos| inner.items[pos].clone())
    }

    /// Last version seen for `key`, local or remote. Zero if never touched.
    pub fn version(&self, key: &CartKey) -> u64 {
        self.lock().version(key)
    }

    /// Server events dropped as stale.
    pub fn discarded_count(&self) -> u64 {
        self.discarded.load(Ordering::SeqCst)
    }

    pub fn observable(&self) -> &Observable<CartState> {
        &self.state
    }

    pub fn subscribe(&self, callback: impl Fn(&CartState) + Send + Sync + 'static) -> Subscription {
        self.state.subscribe(callback)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CartInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Derive the state from `inner` and stage it while the caller still
    /// holds the lock, so published states follow mutation order.
    fn stage(&self, inner: &CartInner) -> CartState {
        let state = CartState::from_items(&inner.items);
        self.state.stage(state.clone());
        state
    }

    fn publish(&self, state: CartState, mutation: Option<CartSyncEvent>) -> CartState {
        self.state.flush();
        if let Some(mutation) = mutation {
            self.emit(mutation);
        }
        state
    }

    fn emit(&self, mutation: CartSyncEvent) {
        let emitter = self
            .emitter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(emitter) = emitter {
            emitter(mutation);
        }
    }
}

fn positive_quantity(quantity: i64) -> Option<u32> {
    if quantity <= 0 {
        return None;
    }
    Some(u32::try_from(quantity).unwrap_or(u32::MAX))
}

fn removal(key: CartKey, version: u64) -> CartSyncEvent {
    CartSyncEvent {
        key,
        quantity: 0,
        version,
        unit_price: None,
    }
}
