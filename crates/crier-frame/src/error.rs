/// Errors that can occur during stream framing.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x4352 \"CR\")")]
    InvalidMagic,

    /// The frame body exceeds the configured maximum size.
    #[error("frame body too large ({size} bytes, max {max})")]
    BodyTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking read or write expired before a complete frame moved.
    #[error("frame I/O timed out")]
    TimedOut,

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

/// Errors raised when encoding an event into a frame body.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// The topic contains the separator byte and would corrupt the
    /// topic/payload split on decode.
    #[error("topic {topic:?} contains the separator byte")]
    TopicContainsSeparator { topic: String },

    /// The payload could not be serialized.
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised when decoding a frame body into an event.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The payload bytes after the separator are not valid JSON.
    #[error("payload deserialization failed: {0}")]
    Payload(#[from] serde_json::Error),

    /// The topic bytes are not valid UTF-8.
    #[error("topic is not valid UTF-8: {0}")]
    TopicUtf8(#[from] std::str::Utf8Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
