//! Desktop automation and capture interfaces for cohost.
//!
//! The server never talks to a windowing system or media pipeline directly.
//! It drives the shared desktop through [`Desktop`], reads encoded media
//! and broadcast status through [`Capture`], and hands media offered by
//! clients to a [`MediaSink`]. Platform backends live outside this
//! workspace; [`headless`] provides an in-process desktop that keeps its
//! own pointer and keyboard state, and the `mock` feature adds recording
//! backends for tests.

use async_trait::async_trait;
use bytes::Bytes;
use cohost_types::{CursorImage, CursorPosition, MediaKind, MediaSample, SessionId};
use tokio::sync::{broadcast, mpsc};

pub mod error;
pub mod headless;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::DesktopError;
pub use headless::{DiscardSink, HeadlessCapture, HeadlessDesktop};

/// Capacity of the cursor notification channel.
pub const CURSOR_EVENT_CAPACITY: usize = 64;

/// Cursor change reported by the desktop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorEvent {
    /// The cursor image changed. `serial` identifies the new image.
    Image { serial: u64 },
    /// The pointer moved.
    Position(CursorPosition),
}

/// Drives the shared desktop.
///
/// Calls are short and synchronous. Implementations own all of their
/// mutable state (pressed keys, screen configuration) behind `&self`.
pub trait Desktop: Send + Sync + 'static {
    /// Move the pointer to an absolute position.
    fn move_to(&self, x: i32, y: i32);

    /// Scroll by a delta on both axes.
    fn scroll(&self, dx: i32, dy: i32);

    fn key_down(&self, code: u32) -> Result<(), DesktopError>;
    fn key_up(&self, code: u32) -> Result<(), DesktopError>;
    fn button_down(&self, code: u32) -> Result<(), DesktopError>;
    fn button_up(&self, code: u32) -> Result<(), DesktopError>;

    /// Release every key and button still held down.
    fn reset_keys(&self);

    /// Current cursor image.
    fn cursor_image(&self) -> Result<CursorImage, DesktopError>;

    /// Current pointer position.
    fn cursor_position(&self) -> CursorPosition;

    /// Subscribe to cursor image and position changes.
    fn subscribe_cursor(&self) -> broadcast::Receiver<CursorEvent>;
}

/// Status of the external broadcast (e.g. RTMP) pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStatus {
    pub active: bool,
    pub url: Option<String>,
}

/// Encoded media produced from the shared desktop.
#[async_trait]
pub trait Capture: Send + Sync + 'static {
    /// Subscribe to encoded samples of one kind. `None` when the kind is
    /// not captured.
    fn subscribe(&self, kind: MediaKind) -> Option<broadcast::Receiver<MediaSample>>;

    /// MIME type of the samples of one kind, e.g. `video/VP8`.
    fn mime_type(&self, kind: MediaKind) -> Option<String>;

    /// Current broadcast status.
    fn broadcast_status(&self) -> BroadcastStatus;

    /// Start pushing the stream to an external URL.
    async fn start_broadcast(&self, url: &str) -> Result<(), DesktopError>;

    /// Stop the external broadcast.
    async fn stop_broadcast(&self) -> Result<(), DesktopError>;
}

/// Receives media tracks offered by clients.
pub trait MediaSink: Send + Sync + 'static {
    /// Take ownership of an incoming track's packet feed.
    fn accept(&self, session: &SessionId, kind: MediaKind, packets: mpsc::Receiver<Bytes>);
}
