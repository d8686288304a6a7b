//! In-process publish/subscribe bus for activity events.
//!
//! Delivery is synchronous: `publish` returns only after every handler that
//! was subscribed at call time has run. Each event goes to the subscribers of
//! its own channel and to the subscribers of [`Channel::All`].

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use tracing::{debug, error, warn};

use crate::domain::{ActivityEvent, ActivityKind};

/// Channel a handler listens on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Only events of one kind
    Kind(ActivityKind),
    /// Every event
    All,
}

impl From<ActivityKind> for Channel {
    fn from(kind: ActivityKind) -> Self {
        Self::Kind(kind)
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A subscriber callback
pub type Handler = Arc<dyn Fn(&ActivityEvent) -> Result<()> + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    handler: Handler,
}

/// Process-local event bus, shared as `Arc<EventBus>`
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    channels: Mutex<HashMap<Channel, Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler on a channel
    pub fn subscribe<F>(&self, channel: impl Into<Channel>, handler: F) -> SubscriptionId
    where
        F: Fn(&ActivityEvent) -> Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let channel = channel.into();
        self.lock()
            .entry(channel)
            .or_default()
            .push(Subscriber {
                id,
                handler: Arc::new(handler),
            });
        debug!(?channel, ?id, "Subscriber added");
        id
    }

    /// Remove a handler. Unknown or already-removed ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut channels = self.lock();
        for subscribers in channels.values_mut() {
            subscribers.retain(|s| s.id != id);
        }
    }

    /// Deliver an event to its channel and to the catch-all channel.
    ///
    /// Returns the number of handlers that completed without error.
    pub fn publish(&self, event: &ActivityEvent) -> usize {
        let kind = event.kind();

        // Snapshot the handler list so handlers may (un)subscribe re-entrantly
        let handlers: Vec<(SubscriptionId, Handler)> = {
            let channels = self.lock();
            [Channel::Kind(kind), Channel::All]
                .iter()
                .filter_map(|c| channels.get(c))
                .flatten()
                .map(|s| (s.id, Arc::clone(&s.handler)))
                .collect()
        };

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(?id, kind = %kind, error = %e, "Event handler failed");
                }
                Err(_) => {
                    error!(?id, kind = %kind, "Event handler panicked");
                }
            }
        }
        delivered
    }

    /// Number of handlers registered on a channel
    pub fn subscriber_count(&self, channel: impl Into<Channel>) -> usize {
        self.lock()
            .get(&channel.into())
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Channel, Vec<Subscriber>>> {
        // A poisoned map is still structurally valid; handlers never run under the lock
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
