//! Protocol and real-time transport errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("truncated frame: event {event} needs {needed} bytes, {available} available")]
    Truncated {
        event: u8,
        needed: usize,
        available: usize,
    },

    #[error("frame payload of {0} bytes exceeds the 16-bit length field")]
    Oversized(usize),

    #[error("message size {size} exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("data channel not open")]
    ChannelClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProtocolError {
    /// Whether the error came from decoding a malformed payload.
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. } | Self::MessageTooLarge { .. } | Self::Json(_)
        )
    }
}
