//! Server errors.

use cohost_types::SessionId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("session already exists: {0}")]
    AlreadyExists(SessionId),

    #[error("session already connected: {0}")]
    AlreadyConnected(SessionId),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("negotiation error: {0}")]
    Negotiation(String),

    #[error("transport error: {0}")]
    TransientIo(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("desktop error: {0}")]
    Desktop(#[from] cohost_desktop::DesktopError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<cohost_protocol::ProtocolError> for ServerError {
    fn from(err: cohost_protocol::ProtocolError) -> Self {
        use cohost_protocol::ProtocolError;
        match err {
            e if e.is_decode() => Self::Decode(e.to_string()),
            ProtocolError::Negotiation(msg) => Self::Negotiation(msg),
            e @ (ProtocolError::Connection(_) | ProtocolError::ChannelClosed) => {
                Self::TransientIo(e.to_string())
            }
            e => Self::Other(anyhow::Error::new(e)),
        }
    }
}
