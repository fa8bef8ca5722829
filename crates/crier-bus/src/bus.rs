use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crier_frame::Payload;
use tracing::error;

use crate::subscription::{Callback, SenderFilter, SubscriberRef, SubscriptionHandle};

struct Entry {
    id: u64,
    topic: String,
    filter: SenderFilter,
    subscriber: SubscriberRef,
}

struct Table {
    next_id: u64,
    entries: Vec<Entry>,
}

/// Topic → subscriber table with synchronous, registration-ordered
/// delivery.
///
/// The table is shared between caller threads (subscribe/unsubscribe) and
/// the receive-loop thread (publish); callbacks are invoked outside the
/// table lock so they may re-enter the bus.
pub struct EventBus {
    inner: Mutex<Table>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Table {
                next_id: 1,
                entries: Vec::new(),
            }),
        }
    }

    /// Register a callback for (topic, sender filter).
    ///
    /// Duplicate registrations are independent and all fire.
    pub fn subscribe(
        &self,
        topic: &str,
        filter: SenderFilter,
        subscriber: SubscriberRef,
    ) -> SubscriptionHandle {
        let mut table = self.inner.lock().expect("bus table poisoned");
        let id = table.next_id;
        table.next_id += 1;
        table.entries.push(Entry {
            id,
            topic: topic.to_string(),
            filter,
            subscriber,
        });
        SubscriptionHandle(id)
    }

    /// Remove a registration. Removing an unknown or already-removed
    /// handle is a no-op.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut table = self.inner.lock().expect("bus table poisoned");
        table.entries.retain(|entry| entry.id != handle.0);
    }

    /// Deliver an event to every live subscription matching the topic
    /// exactly and whose sender filter matches the payload.
    ///
    /// A panicking subscriber is caught and logged; it does not stop
    /// delivery to the remaining subscribers. Dead weak subscriptions are
    /// pruned here, before dispatch.
    pub fn publish(&self, topic: &str, payload: &Payload) {
        let callbacks: Vec<Arc<Callback>> = {
            let mut table = self.inner.lock().expect("bus table poisoned");
            table.entries.retain(|entry| !entry.subscriber.is_dead());
            table
                .entries
                .iter()
                .filter(|entry| entry.topic == topic && entry.filter.matches(payload))
                .filter_map(|entry| entry.subscriber.upgrade())
                .collect()
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                error!(topic, "subscriber panicked during dispatch");
            }
        }
    }

    /// Number of live registrations.
    pub fn subscription_count(&self) -> usize {
        self.inner.lock().expect("bus table poisoned").entries.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
