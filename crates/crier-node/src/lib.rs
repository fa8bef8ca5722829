//! Broadcaster election, peer protocol, and node coordination.
//!
//! This is the "just works" layer. A [`Node`] lazily decides whether this
//! process must run the broadcaster (by probing the configured port),
//! keeps a peer connected across broadcaster restarts, and dispatches
//! received events to local subscribers.

pub mod broadcaster;
pub mod config;
pub mod control;
pub mod error;
pub mod link;
pub mod node;
pub mod peer;

pub use broadcaster::{Broadcaster, BroadcasterState};
pub use config::{NodeConfig, NodeOptions, Timing, DEFAULT_ADDRESS, DEFAULT_ID, DEFAULT_PORT};
pub use control::{
    ACK, CHECK_TOPIC, CONNECT_TOPIC, DISCONNECT_TOPIC, INTERNAL_PREFIX, SERVER_DISCONNECT_TOPIC,
};
pub use error::{NodeError, Result};
pub use node::{ConnectBuilder, Node, WaitOptions};
pub use peer::{Peer, PeerState};
