use std::sync::{Arc, Weak};

use crier_frame::{Payload, SENDER_KEY};

/// A subscriber callback, invoked with the event payload.
pub type Callback = dyn Fn(&Payload) + Send + Sync + 'static;

/// Identifies a registration; used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub(crate) u64);

/// Filters deliveries by the payload's `sender` value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SenderFilter {
    /// Match any sender, including a missing one.
    #[default]
    Any,
    /// Match only payloads whose sender equals this node id.
    Exact(String),
}

impl SenderFilter {
    /// Filter on a specific sender id.
    pub fn exact(id: impl Into<String>) -> Self {
        Self::Exact(id.into())
    }

    pub(crate) fn matches(&self, payload: &Payload) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(id) => payload
                .get(SENDER_KEY)
                .and_then(|value| value.as_str())
                .is_some_and(|sender| sender == id),
        }
    }
}

/// Callback ownership: strong keeps the callback alive for as long as it
/// is registered; weak becomes invalid once the caller's `Arc` is gone.
pub enum SubscriberRef {
    Strong(Arc<Callback>),
    Weak(Weak<Callback>),
}

impl SubscriberRef {
    /// Register a callback the bus keeps alive.
    pub fn strong<F>(callback: F) -> Self
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        Self::Strong(Arc::new(callback))
    }

    /// Register a callback owned by the caller; the subscription dies with
    /// the caller's `Arc`.
    pub fn weak<F>(callback: &Arc<F>) -> Self
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        let coerced: Arc<Callback> = callback.clone();
        Self::Weak(Arc::downgrade(&coerced))
    }

    /// Liveness check performed before each dispatch.
    pub(crate) fn upgrade(&self) -> Option<Arc<Callback>> {
        match self {
            Self::Strong(callback) => Some(Arc::clone(callback)),
            Self::Weak(callback) => callback.upgrade(),
        }
    }

    pub(crate) fn is_dead(&self) -> bool {
        match self {
            Self::Strong(_) => false,
            Self::Weak(callback) => callback.strong_count() == 0,
        }
    }
}
