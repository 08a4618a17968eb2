//! Signaling envelope: JSON text messages of the form `{ "event": ..., ... }`.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ProtocolError;

/// Maximum accepted text message size (1 MiB). Prevents allocation bombs.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Encode a message as a JSON text frame.
pub fn encode_message<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(msg)?;
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(text)
}

/// Decode a JSON text frame.
pub fn decode_message<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(serde_json::from_str(text)?)
}
