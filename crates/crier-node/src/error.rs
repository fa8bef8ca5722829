use std::time::Duration;

/// Errors that can occur in node operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Transport-level error. `Bind` inside this is the lost-election
    /// signal.
    #[error("transport error: {0}")]
    Transport(#[from] crier_transport::TransportError),

    /// Stream framing error.
    #[error("frame error: {0}")]
    Frame(#[from] crier_frame::FrameError),

    /// The caller's topic or payload could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] crier_frame::EncodeError),

    /// A received frame body could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] crier_frame::DecodeError),

    /// The role is already past its start transition.
    #[error("role is already running")]
    AlreadyRunning,

    /// The control request got no reply in time. The connection is kept;
    /// the broadcaster may simply be slow or transiently gone.
    #[error("no reply within {0:?}")]
    ReplyTimeout(Duration),

    /// The configured control port leaves no room for the fan-out
    /// channel at port + 1.
    #[error("port {0} has no room for the fan-out channel")]
    PortOverflow(u16),
}

pub type Result<T> = std::result::Result<T, NodeError>;
