//! Inbound notice queue.
//!
//! Notices arrive from the transport, are kept sorted by `received_at`, and
//! move through `Received -> Presented -> Dismissed` as the UI shows and
//! closes them. The queue is bounded; when it overflows, dismissed entries go
//! first, then presented ones, then the oldest received.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use cartwire_shared::RawNotification;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::observable::{Observable, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationState {
    Received,
    Presented,
    Dismissed,
}

/// A well-formed notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub id: String,
    pub kind: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
    pub presented: bool,
    pub dismissed: bool,
}

impl NotificationEvent {
    pub fn state(&self) -> NotificationState {
        if self.dismissed {
            NotificationState::Dismissed
        } else if self.presented {
            NotificationState::Presented
        } else {
            NotificationState::Received
        }
    }

    fn is_pending(&self) -> bool {
        self.state() == NotificationState::Received
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted,
    /// An entry with the same id is already queued; the first one wins.
    Duplicate,
    /// Missing id or kind. Dropped and counted.
    Malformed,
    /// The queue is full of entries that outrank this one, which is older
    /// than all of them. Nothing changed.
    Evicted,
}

/// What subscribers see.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationSnapshot {
    /// Oldest first.
    pub events: Vec<NotificationEvent>,
    pub pending: usize,
    pub malformed: u64,
}

pub struct NotificationChannel {
    capacity: usize,
    queue: Mutex<Vec<NotificationEvent>>,
    malformed: AtomicU64,
    state: Observable<NotificationSnapshot>,
}

impl NotificationChannel {
    /// A channel retaining at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queue: Mutex::new(Vec::new()),
            malformed: AtomicU64::new(0),
            state: Observable::new(NotificationSnapshot::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take in one inbound notice.
    ///
    /// `fallback_received_at` is used when the notice carries no timestamp of
    /// its own.
    pub fn ingest(
        &self,
        raw: RawNotification,
        fallback_received_at: DateTime<Utc>,
    ) -> IngestOutcome {
        let (Some(id), Some(kind)) = (non_blank(raw.id), non_blank(raw.kind)) else {
            {
                let queue = self.lock();
                let total = self.malformed.fetch_add(1, Ordering::SeqCst) + 1;
                crate::log_debug!("dropping malformed notification ({} so far)", total);
                self.stage(&queue);
            }
            self.state.flush();
            return IngestOutcome::Malformed;
        };

        let event = NotificationEvent {
            id,
            kind,
            payload: raw.payload,
            received_at: raw.received_at.unwrap_or(fallback_received_at),
            presented: false,
            dismissed: false,
        };

        {
            let mut queue = self.lock();
            if queue.iter().any(|existing| existing.id == event.id) {
                crate::log_debug!("duplicate notification {} ignored", event.id);
                return IngestOutcome::Duplicate;
            }

            // Equal timestamps keep arrival order.
            let pos = queue.partition_point(|existing| existing.received_at <= event.received_at);
            let full_of_pending =
                queue.len() >= self.capacity && queue.iter().all(NotificationEvent::is_pending);
            if pos == 0 && full_of_pending {
                crate::log_debug!(
                    "notification {} is older than a full queue, not kept",
                    event.id
                );
                return IngestOutcome::Evicted;
            }
            queue.insert(pos, event);
            evict_overflow(&mut queue, self.capacity);
            self.stage(&queue);
        }
        self.state.flush();
        IngestOutcome::Inserted
    }

    /// Mark the oldest pending notice as presented and return it.
    pub fn present_next(&self) -> Option<NotificationEvent> {
        let event = {
            let mut queue = self.lock();
            let event = queue.iter_mut().find(|event| event.is_pending())?;
            event.presented = true;
            let event = event.clone();
            self.stage(&queue);
            event
        };
        self.state.flush();
        Some(event)
    }

    /// Dismiss one notice. Returns `false` if it is unknown or already
    /// dismissed.
    pub fn dismiss(&self, id: &str) -> bool {
        {
            let mut queue = self.lock();
            match queue.iter_mut().find(|event| event.id == id) {
                Some(event) if !event.dismissed => event.dismissed = true,
                _ => return false,
            }
            self.stage(&queue);
        }
        self.state.flush();
        true
    }

    /// Dismiss everything still open. Returns how many entries changed.
    pub fn dismiss_all(&self) -> usize {
        let changed = {
            let mut queue = self.lock();
            let mut changed = 0;
            for event in queue.iter_mut().filter(|event| !event.dismissed) {
                event.dismissed = true;
                changed += 1;
            }
            if changed == 0 {
                return 0;
            }
            self.stage(&queue);
            changed
        };
        self.state.flush();
        changed
    }

    pub fn get(&self, id: &str) -> Option<NotificationEvent> {
        self.lock().iter().find(|event| event.id == id).cloned()
    }

    pub fn snapshot(&self) -> NotificationSnapshot {
        self.state.get()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().iter().filter(|event| event.is_pending()).count()
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn observable(&self) -> &Observable<NotificationSnapshot> {
        &self.state
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&NotificationSnapshot) + Send + Sync + 'static,
    ) -> Subscription {
        self.state.subscribe(callback)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<NotificationEvent>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stage a snapshot of `queue`. Called with the queue lock held so
    /// snapshots are published in mutation order.
    fn stage(&self, queue: &[NotificationEvent]) {
        self.state.stage(NotificationSnapshot {
            events: queue.to_vec(),
            pending: queue.iter().filter(|event| event.is_pending()).count(),
            malformed: self.malformed.load(Ordering::SeqCst),
        });
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Trim `queue` to `capacity`: oldest dismissed, then oldest presented, then
/// the oldest entry overall.
fn evict_overflow(queue: &mut Vec<NotificationEvent>, capacity: usize) {
    while queue.len() > capacity {
        let victim = queue
            .iter()
            .position(|event| event.dismissed)
            .or_else(|| queue.iter().position(|event| event.presented))
            .unwrap_or(0);
        let evicted = queue.remove(victim);
        crate::log_debug!("evicting notification {} ({:?})", evicted.id, evicted.state());
    }
}
