// src/events.rs
// Post-commit write notifications

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::document::DocumentId;

/// Events emitted after a write has committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreEvent {
    Inserted {
        collection: String,
        ids: Vec<DocumentId>,
        at: DateTime<Utc>,
    },
    Updated {
        collection: String,
        ids: Vec<DocumentId>,
        at: DateTime<Utc>,
    },
    Deleted {
        collection: String,
        ids: Vec<DocumentId>,
        at: DateTime<Utc>,
    },
    CollectionDropped {
        collection: String,
        at: DateTime<Utc>,
    },
}

impl StoreEvent {
    pub fn inserted(collection: &str, ids: Vec<DocumentId>) -> Self {
        StoreEvent::Inserted {
            collection: collection.to_string(),
            ids,
            at: Utc::now(),
        }
    }

    pub fn updated(collection: &str, ids: Vec<DocumentId>) -> Self {
        StoreEvent::Updated {
            collection: collection.to_string(),
            ids,
            at: Utc::now(),
        }
    }

    pub fn deleted(collection: &str, ids: Vec<DocumentId>) -> Self {
        StoreEvent::Deleted {
            collection: collection.to_string(),
            ids,
            at: Utc::now(),
        }
    }

    pub fn collection_dropped(collection: &str) -> Self {
        StoreEvent::CollectionDropped {
            collection: collection.to_string(),
            at: Utc::now(),
        }
    }

    /// Event name as seen by subscribers: `inserted`, `updated`, `deleted`, `collection_dropped`
    pub fn name(&self) -> &'static str {
        match self {
            StoreEvent::Inserted { .. } => "inserted",
            StoreEvent::Updated { .. } => "updated",
            StoreEvent::Deleted { .. } => "deleted",
            StoreEvent::CollectionDropped { .. } => "collection_dropped",
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            StoreEvent::Inserted { collection, .. }
            | StoreEvent::Updated { collection, .. }
            | StoreEvent::Deleted { collection, .. }
            | StoreEvent::CollectionDropped { collection, .. } => collection,
        }
    }

    pub fn ids(&self) -> &[DocumentId] {
        match self {
            StoreEvent::Inserted { ids, .. }
            | StoreEvent::Updated { ids, .. }
            | StoreEvent::Deleted { ids, .. } => ids,
            StoreEvent::CollectionDropped { .. } => &[],
        }
    }
}

pub trait Observer: Send + Sync {
    fn notify(&self, event: &StoreEvent);
}

impl<F> Observer for F
where
    F: Fn(&StoreEvent) + Send + Sync,
{
    fn notify(&self, event: &StoreEvent) {
        self(event)
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Synchronous observer list. Emission happens after commit, so an observer can never
/// undo a write; a panicking observer is logged and skipped.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    observers: RwLock<Vec<(SubscriptionId, Arc<dyn Observer>)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<O: Observer + 'static>(&self, observer: O) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::new(observer)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(sid, _)| *sid != id);
        observers.len() != before
    }

    pub fn has_subscribers(&self) -> bool {
        !self.observers.read().is_empty()
    }

    pub fn emit(&self, event: StoreEvent) {
        // Snapshot so observers may (un)subscribe while being notified
        let observers: Vec<Arc<dyn Observer>> =
            self.observers.read().iter().map(|(_, o)| Arc::clone(o)).collect();
        if observers.is_empty() {
            return;
        }

        trace!("Emitting {} event for {}", event.name(), event.collection());
        for observer in observers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.notify(&event)));
            if outcome.is_err() {
                warn!("Observer panicked while handling {} event", event.name());
            }
        }
    }
}
