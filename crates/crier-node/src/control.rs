//! Protocol constants shared by both roles.
//!
//! Topics starting with `__` are reserved for the protocol; application
//! code must not use that prefix.

/// Reply body sent by the broadcaster for every control request.
pub const ACK: &[u8] = b"1";

/// Liveness probe. Payload is empty/ignored; only the acknowledgment
/// matters.
pub const CHECK_TOPIC: &str = "__check";

/// Courtesy announcement a peer sends after starting; payload carries the
/// peer id.
pub const CONNECT_TOPIC: &str = "__connect";

/// Reserved; never sent.
pub const DISCONNECT_TOPIC: &str = "__disconnect";

/// Broadcaster shutdown notice, best effort, sent as a bare topic.
pub const SERVER_DISCONNECT_TOPIC: &str = "__server_disconnect";

/// Prefix every peer subscribes to so internal control topics reach all
/// processes.
pub const INTERNAL_PREFIX: &str = "__";

/// Fan-out option frame opcode: add a topic prefix to the subscription.
pub const SUBSCRIBE_OP: u8 = 0x01;

/// Fan-out option frame opcode: remove a topic prefix.
pub const UNSUBSCRIBE_OP: u8 = 0x00;
