//! In-process desktop with no windowing system behind it.
//!
//! [`HeadlessDesktop`] tracks the pointer, held keys and buttons, and the
//! cursor image itself, clamped to a fixed screen size. [`HeadlessCapture`]
//! relays samples pushed by an external encoder. Together they let the
//! server run end to end on machines without a display.

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;
use cohost_types::{CursorImage, CursorPosition, MediaKind, MediaSample, SessionId};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace};

use crate::{
    BroadcastStatus, Capture, CursorEvent, Desktop, DesktopError, MediaSink, CURSOR_EVENT_CAPACITY,
};

/// Highest mouse button code accepted (left, middle, right, wheel, side).
const MAX_BUTTON: u32 = 9;

/// Samples buffered per media kind before slow subscribers lag.
const SAMPLE_CAPACITY: usize = 64;

/// Size of the emulated screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSize {
    pub width: u16,
    pub height: u16,
}

impl Default for ScreenSize {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug)]
struct DesktopState {
    position: CursorPosition,
    keys: BTreeSet<u32>,
    buttons: BTreeSet<u32>,
    cursor: CursorImage,
    serial: u64,
}

/// Desktop that keeps its state in memory.
pub struct HeadlessDesktop {
    screen: ScreenSize,
    state: Mutex<DesktopState>,
    cursor_tx: broadcast::Sender<CursorEvent>,
}

impl Default for HeadlessDesktop {
    fn default() -> Self {
        Self::new(ScreenSize::default())
    }
}

impl HeadlessDesktop {
    pub fn new(screen: ScreenSize) -> Self {
        let (cursor_tx, _) = broadcast::channel(CURSOR_EVENT_CAPACITY);
        Self {
            screen,
            state: Mutex::new(DesktopState {
                position: CursorPosition::new(
                    i32::from(screen.width / 2),
                    i32::from(screen.height / 2),
                ),
                keys: BTreeSet::new(),
                buttons: BTreeSet::new(),
                cursor: arrow_cursor(),
                serial: 1,
            }),
            cursor_tx,
        }
    }

    pub fn screen(&self) -> ScreenSize {
        self.screen
    }

    /// Replace the cursor image. Returns the new serial.
    pub fn set_cursor_image(&self, image: CursorImage) -> u64 {
        let serial = {
            let mut state = self.state.lock();
            state.serial += 1;
            state.cursor = image;
            state.serial
        };
        let _ = self.cursor_tx.send(CursorEvent::Image { serial });
        serial
    }

    /// Keys currently held down, ascending.
    pub fn pressed_keys(&self) -> Vec<u32> {
        self.state.lock().keys.iter().copied().collect()
    }

    /// Buttons currently held down, ascending.
    pub fn pressed_buttons(&self) -> Vec<u32> {
        self.state.lock().buttons.iter().copied().collect()
    }

    fn clamp(&self, x: i32, y: i32) -> CursorPosition {
        CursorPosition::new(
            x.clamp(0, i32::from(self.screen.width).saturating_sub(1)),
            y.clamp(0, i32::from(self.screen.height).saturating_sub(1)),
        )
    }
}

impl Desktop for HeadlessDesktop {
    fn move_to(&self, x: i32, y: i32) {
        let position = self.clamp(x, y);
        {
            let mut state = self.state.lock();
            if state.position == position {
                return;
            }
            state.position = position;
        }
        let _ = self.cursor_tx.send(CursorEvent::Position(position));
    }

    fn scroll(&self, dx: i32, dy: i32) {
        trace!(dx, dy, "scroll");
    }

    fn key_down(&self, code: u32) -> Result<(), DesktopError> {
        if code == 0 {
            return Err(DesktopError::UnknownKey(code));
        }
        self.state.lock().keys.insert(code);
        Ok(())
    }

    fn key_up(&self, code: u32) -> Result<(), DesktopError> {
        if code == 0 {
            return Err(DesktopError::UnknownKey(code));
        }
        self.state.lock().keys.remove(&code);
        Ok(())
    }

    fn button_down(&self, code: u32) -> Result<(), DesktopError> {
        if code == 0 || code > MAX_BUTTON {
            return Err(DesktopError::UnknownButton(code));
        }
        self.state.lock().buttons.insert(code);
        Ok(())
    }

    fn button_up(&self, code: u32) -> Result<(), DesktopError> {
        if code == 0 || code > MAX_BUTTON {
            return Err(DesktopError::UnknownButton(code));
        }
        self.state.lock().buttons.remove(&code);
        Ok(())
    }

    fn reset_keys(&self) {
        let mut state = self.state.lock();
        let released = state.keys.len() + state.buttons.len();
        state.keys.clear();
        state.buttons.clear();
        if released > 0 {
            debug!(released, "released held keys and buttons");
        }
    }

    fn cursor_image(&self) -> Result<CursorImage, DesktopError> {
        Ok(self.state.lock().cursor.clone())
    }

    fn cursor_position(&self) -> CursorPosition {
        self.state.lock().position
    }

    fn subscribe_cursor(&self) -> broadcast::Receiver<CursorEvent> {
        self.cursor_tx.subscribe()
    }
}

/// A plain arrow: black outline, white fill, hotspot at the tip.
fn arrow_cursor() -> CursorImage {
    const W: u16 = 12;
    const H: u16 = 16;
    let mut pixels = Vec::with_capacity(usize::from(W) * usize::from(H) * 4);
    for y in 0..H {
        for x in 0..W {
            let pixel = if x > y {
                [0, 0, 0, 0]
            } else if x == 0 || x == y || y == H - 1 {
                [0, 0, 0, 255]
            } else {
                [255, 255, 255, 255]
            };
            pixels.extend_from_slice(&pixel);
        }
    }
    CursorImage {
        width: W,
        height: H,
        x_hot: 0,
        y_hot: 0,
        pixels,
    }
}

/// Capture fed by an external encoder through [`HeadlessCapture::push`].
pub struct HeadlessCapture {
    video: broadcast::Sender<MediaSample>,
    audio: broadcast::Sender<MediaSample>,
    video_mime: String,
    audio_mime: String,
    status: Mutex<BroadcastStatus>,
}

impl HeadlessCapture {
    pub fn new(video_mime: impl Into<String>, audio_mime: impl Into<String>) -> Self {
        let (video, _) = broadcast::channel(SAMPLE_CAPACITY);
        let (audio, _) = broadcast::channel(SAMPLE_CAPACITY);
        Self {
            video,
            audio,
            video_mime: video_mime.into(),
            audio_mime: audio_mime.into(),
            status: Mutex::new(BroadcastStatus::default()),
        }
    }

    /// Publish one encoded sample. Returns the number of subscribers reached.
    pub fn push(&self, kind: MediaKind, sample: MediaSample) -> usize {
        let tx = match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        };
        tx.send(sample).unwrap_or(0)
    }
}

#[async_trait]
impl Capture for HeadlessCapture {
    fn subscribe(&self, kind: MediaKind) -> Option<broadcast::Receiver<MediaSample>> {
        Some(match kind {
            MediaKind::Video => self.video.subscribe(),
            MediaKind::Audio => self.audio.subscribe(),
        })
    }

    fn mime_type(&self, kind: MediaKind) -> Option<String> {
        Some(match kind {
            MediaKind::Video => self.video_mime.clone(),
            MediaKind::Audio => self.audio_mime.clone(),
        })
    }

    fn broadcast_status(&self) -> BroadcastStatus {
        self.status.lock().clone()
    }

    async fn start_broadcast(&self, url: &str) -> Result<(), DesktopError> {
        if url.is_empty() {
            return Err(DesktopError::Capture("broadcast url is empty".into()));
        }
        *self.status.lock() = BroadcastStatus {
            active: true,
            url: Some(url.to_string()),
        };
        info!(url, "broadcast started");
        Ok(())
    }

    async fn stop_broadcast(&self) -> Result<(), DesktopError> {
        let mut status = self.status.lock();
        if status.active {
            info!("broadcast stopped");
        }
        *status = BroadcastStatus::default();
        Ok(())
    }
}

/// Sink that drops every incoming track.
#[derive(Debug, Default)]
pub struct DiscardSink;

impl MediaSink for DiscardSink {
    fn accept(&self, session: &SessionId, kind: MediaKind, packets: mpsc::Receiver<Bytes>) {
        debug!(session_id = %session, %kind, "discarding incoming track");
        drop(packets);
    }
}
