//! The event codec: frame body `<topic> 0x20 <json-payload>`.
//!
//! Topics containing the separator byte are rejected at encode time.
//! Decode is tolerant: a body with no separator is an event with an
//! empty payload.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{DecodeError, EncodeError};

/// Ordered string-keyed payload carried by every event.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Separator between topic bytes and serialized payload.
pub const SEPARATOR: u8 = b' ';

/// Payload key identifying the node that produced an event.
pub const SENDER_KEY: &str = "sender";

/// Encode a (topic, payload) pair into a frame body.
pub fn encode_event(topic: &str, payload: &Payload) -> Result<Bytes, EncodeError> {
    if topic.as_bytes().contains(&SEPARATOR) {
        return Err(EncodeError::TopicContainsSeparator {
            topic: topic.to_string(),
        });
    }

    let serialized = serde_json::to_vec(payload)?;
    let mut body = BytesMut::with_capacity(topic.len() + 1 + serialized.len());
    body.put_slice(topic.as_bytes());
    body.put_u8(SEPARATOR);
    body.put_slice(&serialized);
    Ok(body.freeze())
}

/// Decode a frame body into a (topic, payload) pair.
///
/// Splits on the first separator byte. A body with no separator decodes
/// to the whole body as topic with an empty payload.
pub fn decode_event(body: &[u8]) -> Result<(String, Payload), DecodeError> {
    match body.iter().position(|&b| b == SEPARATOR) {
        Some(index) => {
            let topic = std::str::from_utf8(&body[..index])?.to_string();
            let payload = serde_json::from_slice(&body[index + 1..])?;
            Ok((topic, payload))
        }
        None => {
            let topic = std::str::from_utf8(body)?.to_string();
            Ok((topic, Payload::new()))
        }
    }
}
