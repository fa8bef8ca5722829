//! TCP transport endpoints for the crier broadcast protocol.
//!
//! Provides the two socket roles everything else builds on: a bound
//! listener with non-blocking accept (the broadcaster's serve loop polls
//! it cooperatively) and deadline-bounded outbound connections (the peer
//! side). A failed bind is a normal outcome here: the bind race is how
//! broadcaster election is decided.

pub mod error;
pub mod tcp;

pub use error::{Result, TransportError};
pub use tcp::{bind_addr, connect, connect_addr, TcpEndpoint};
