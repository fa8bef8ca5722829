//! Broker-less named-event exchange between local processes.
//!
//! The first process to bind the configured port becomes the broadcaster
//! for that channel; every other process is a peer that sends over a
//! request/acknowledge control connection and receives over a fan-out
//! subscription. No dedicated broker process, no setup order.
//!
//! # Crate Structure
//!
//! - [`transport`] — TCP endpoints for the two channels
//! - [`frame`] — stream framing and the topic/payload event codec
//! - [`bus`] — in-process topic dispatch
//! - [`node`] — roles, election, and the coordinating [`Node`]
//!
//! Most applications use either a [`Node`] directly or the process-global
//! free functions ([`configure`], [`connect`], [`send`], ...).

mod global;

/// Re-export transport types.
pub mod transport {
    pub use crier_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use crier_frame::*;
}

/// Re-export bus types.
pub mod bus {
    pub use crier_bus::*;
}

/// Re-export node types.
pub mod node {
    pub use crier_node::*;
}

pub use crier_bus::{SenderFilter, SubscriptionHandle};
pub use crier_frame::Payload;
pub use crier_node::{Node, NodeConfig, NodeError, NodeOptions, WaitOptions};

pub use global::{
    configure, connect, disconnect, global_node, is_server, on, send, start_server, stop,
    try_start, wait_for,
};
