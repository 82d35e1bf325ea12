//! Observer primitive behind every store.
//!
//! Subscribers get the current value immediately on subscribe and then every
//! published value, synchronously, on the publishing call. Callbacks run with
//! no internal lock held, so a callback may read the store it listens to.
//!
//! Delivery is serialized: one thread at a time walks the subscribers, always
//! with the latest value. A publish that finds delivery already running (on
//! another thread, or from inside a callback) leaves its value to the running
//! delivery, which loops until nothing newer is pending. Subscribers therefore
//! never see an older value after a newer one, and their last delivery is the
//! current value.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Shared<T> {
    value: Mutex<T>,
    subscribers: Mutex<Vec<(u64, Callback<T>)>>,
    next_id: AtomicU64,
    delivering: Mutex<()>,
    dirty: AtomicBool,
}

/// A value with subscribers.
pub struct Observable<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                value: Mutex::new(value),
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                delivering: Mutex::new(()),
                dirty: AtomicBool::new(false),
            }),
        }
    }

    pub fn get(&self) -> T {
        self.value().clone()
    }

    /// Replace the value and notify every subscriber before returning.
    pub fn set(&self, value: T) {
        self.stage(value);
        self.flush();
    }

    /// Mutate in place, then notify. `f` runs under the value lock, so a
    /// check made inside it cannot be overtaken by another writer.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = {
            let mut current = self.value();
            let result = f(&mut current);
            self.shared.dirty.store(true, Ordering::SeqCst);
            result
        };
        self.flush();
        result
    }

    /// Like [`Self::update`], but notifies only when `f` returns `true`.
    pub fn update_if(&self, f: impl FnOnce(&mut T) -> bool) -> bool {
        let changed = {
            let mut current = self.value();
            let changed = f(&mut current);
            if changed {
                self.shared.dirty.store(true, Ordering::SeqCst);
            }
            changed
        };
        if changed {
            self.flush();
        }
        changed
    }

    /// Replace the value without delivering it yet.
    ///
    /// Stores call this while still holding their own lock, so the stored
    /// value follows the order of their mutations, then call [`Self::flush`]
    /// once the lock is released.
    pub fn stage(&self, value: T) {
        *self.value() = value;
        self.shared.dirty.store(true, Ordering::SeqCst);
    }

    /// Deliver the current value if a staged change has not gone out yet.
    pub fn flush(&self) {
        loop {
            let guard = match self.shared.delivering.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            while self.shared.dirty.swap(false, Ordering::SeqCst) {
                let value = self.get();
                for callback in self.callbacks() {
                    callback(&value);
                }
            }
            drop(guard);
            // A publish may have landed between the last swap and the unlock.
            if !self.shared.dirty.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    /// Register `callback`. It is invoked right away with the current value,
    /// or by the delivery already in progress when there is one.
    ///
    /// The subscription lasts until the returned handle is dropped or
    /// [`Subscription::unsubscribe`] is called.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: Callback<T> = Arc::new(callback);
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback.clone()));

        let guard = match self.shared.delivering.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        };
        match guard {
            Some(guard) => {
                callback(&self.get());
                drop(guard);
            }
            None => self.shared.dirty.store(true, Ordering::SeqCst),
        }
        self.flush();

        let weak: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        Subscription {
            detach: Some(Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared
                        .subscribers
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .retain(|(sub_id, _)| *sub_id != id);
                }
            })),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn value(&self) -> MutexGuard<'_, T> {
        self.shared
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn callbacks(&self) -> Vec<Callback<T>> {
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect()
    }
}

/// Handle returned by [`Observable::subscribe`]. Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.detach_now();
    }

    /// Keep the subscription alive for the rest of the process.
    pub fn forget(mut self) {
        self.detach = None;
    }

    fn detach_now(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach_now();
    }
}
