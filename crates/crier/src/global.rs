//! The process-global node and its free-function surface.
//!
//! Configuration must happen before the first `send`/`connect`/
//! `wait_for`, since role instances are constructed from the options in
//! effect at start time.

use std::sync::LazyLock;

use crier_bus::SubscriptionHandle;
use crier_frame::Payload;
use crier_node::{ConnectBuilder, Node, NodeOptions, Result, WaitOptions};

static NODE: LazyLock<Node> = LazyLock::new(Node::new);

/// The node behind the free functions, for callers that need the full
/// [`Node`] API.
pub fn global_node() -> &'static Node {
    &NODE
}

/// Set global configuration options.
///
/// Options are: `server` (whether this process may become a
/// broadcaster), `id` (sent with every request), `address`, and `port`.
pub fn configure(options: NodeOptions) {
    NODE.configure(options);
}

/// Whether this process is running the broadcaster.
pub fn is_server() -> bool {
    NODE.is_server()
}

/// Start this process's broadcaster on the configured address and port.
pub fn start_server() -> Result<()> {
    NODE.start_server(None, None)
}

/// Attempt to start up the peer and, if eligible, the broadcaster.
pub fn try_start() {
    NODE.try_start();
}

/// Subscribe to a topic with default options.
pub fn connect<F>(topic: &str, callback: F) -> SubscriptionHandle
where
    F: Fn(&Payload) + Send + Sync + 'static,
{
    NODE.connect(topic, callback)
}

/// Registration builder for sender-filtered or weakly owned callbacks.
pub fn on(topic: &str) -> ConnectBuilder<'static> {
    NODE.on(topic)
}

/// Remove a subscription.
pub fn disconnect(handle: SubscriptionHandle) {
    NODE.disconnect(handle);
}

/// Send an event to the current broadcaster.
pub fn send(topic: &str, payload: Payload) -> Result<bool> {
    NODE.send(topic, payload)
}

/// Block until a matching event arrives or the timeout elapses.
pub fn wait_for(topic: &str, options: WaitOptions) -> Result<Option<Payload>> {
    NODE.wait_for(topic, options)
}

/// Close down the client and server roles of the global node.
pub fn stop() {
    NODE.stop();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_node_is_a_singleton() {
        let first = global_node() as *const Node;
        let second = global_node() as *const Node;
        assert_eq!(first, second);
    }
}
