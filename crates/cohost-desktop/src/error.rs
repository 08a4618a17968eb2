//! Desktop subsystem errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DesktopError {
    #[error("unknown key code: {0}")]
    UnknownKey(u32),

    #[error("unknown button code: {0}")]
    UnknownButton(u32),

    #[error("failed to read cursor: {0}")]
    Cursor(String),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("backend not available on this platform")]
    Unavailable,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
