//! In-process topic dispatch for crier events.
//!
//! Maps topic names to subscriber callbacks. Delivery is synchronous and
//! in registration order; a panicking subscriber is isolated and logged.
//! Subscribers are owned either strongly (alive while registered) or
//! weakly (dropped automatically once the caller's handle is gone).

pub mod bus;
pub mod subscription;

pub use bus::EventBus;
pub use subscription::{Callback, SenderFilter, SubscriberRef, SubscriptionHandle};
