//! Wire framing and the event codec for crier.
//!
//! Two layers live here:
//! - Outer stream framing: every message on a TCP stream is delimited by a
//!   2-byte magic ("CR") and a 4-byte little-endian body length. No partial
//!   reads, no buffer management in user code.
//! - The event codec: a frame body is `<topic-bytes> 0x20 <json-payload>`.
//!   A body with no separator decodes to the whole body as topic with an
//!   empty payload, so malformed frames degrade instead of killing the
//!   stream.

pub mod codec;
pub mod error;
pub mod event;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_BODY, HEADER_SIZE, MAGIC};
pub use error::{DecodeError, EncodeError, FrameError, Result};
pub use event::{decode_event, encode_event, Payload, SENDER_KEY, SEPARATOR};
pub use reader::FrameReader;
pub use writer::FrameWriter;
