//! Mock desktop backends for testing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use cohost_types::{CursorImage, CursorPosition, MediaKind, SessionId};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::{CursorEvent, Desktop, DesktopError, MediaSink, CURSOR_EVENT_CAPACITY};

// ---------------------------------------------------------------------------
// MockDesktop
// ---------------------------------------------------------------------------

/// A call made on [`MockDesktop`], recorded for test observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopCall {
    Move { x: i32, y: i32 },
    Scroll { dx: i32, dy: i32 },
    KeyDown(u32),
    KeyUp(u32),
    ButtonDown(u32),
    ButtonUp(u32),
    ResetKeys,
}

#[derive(Debug)]
struct MockDesktopState {
    calls: Vec<DesktopCall>,
    position: CursorPosition,
    cursor: CursorImage,
    fail_input: bool,
    fail_cursor: bool,
}

/// Desktop that records every call.
pub struct MockDesktop {
    state: Arc<Mutex<MockDesktopState>>,
    image_fetches: Arc<AtomicUsize>,
    cursor_tx: broadcast::Sender<CursorEvent>,
}

impl Default for MockDesktop {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDesktop {
    pub fn new() -> Self {
        let (cursor_tx, _) = broadcast::channel(CURSOR_EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(MockDesktopState {
                calls: Vec::new(),
                position: CursorPosition::default(),
                cursor: CursorImage {
                    width: 2,
                    height: 2,
                    x_hot: 1,
                    y_hot: 1,
                    pixels: vec![255; 16],
                },
                fail_input: false,
                fail_cursor: false,
            })),
            image_fetches: Arc::new(AtomicUsize::new(0)),
            cursor_tx,
        }
    }

    /// Get a clonable handle for observing and steering the desktop.
    pub fn handle(&self) -> MockDesktopHandle {
        MockDesktopHandle {
            state: Arc::clone(&self.state),
            image_fetches: Arc::clone(&self.image_fetches),
            cursor_tx: self.cursor_tx.clone(),
        }
    }

    fn record(&self, call: DesktopCall) {
        self.state.lock().calls.push(call);
    }

    fn record_fallible(&self, call: DesktopCall) -> Result<(), DesktopError> {
        let mut state = self.state.lock();
        if state.fail_input {
            return Err(DesktopError::Other(anyhow::anyhow!("injected input failure")));
        }
        state.calls.push(call);
        Ok(())
    }
}

impl Desktop for MockDesktop {
    fn move_to(&self, x: i32, y: i32) {
        let mut state = self.state.lock();
        state.position = CursorPosition::new(x, y);
        state.calls.push(DesktopCall::Move { x, y });
    }

    fn scroll(&self, dx: i32, dy: i32) {
        self.record(DesktopCall::Scroll { dx, dy });
    }

    fn key_down(&self, code: u32) -> Result<(), DesktopError> {
        self.record_fallible(DesktopCall::KeyDown(code))
    }

    fn key_up(&self, code: u32) -> Result<(), DesktopError> {
        self.record_fallible(DesktopCall::KeyUp(code))
    }

    fn button_down(&self, code: u32) -> Result<(), DesktopError> {
        self.record_fallible(DesktopCall::ButtonDown(code))
    }

    fn button_up(&self, code: u32) -> Result<(), DesktopError> {
        self.record_fallible(DesktopCall::ButtonUp(code))
    }

    fn reset_keys(&self) {
        self.record(DesktopCall::ResetKeys);
    }

    fn cursor_image(&self) -> Result<CursorImage, DesktopError> {
        self.image_fetches.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if state.fail_cursor {
            return Err(DesktopError::Cursor("injected cursor failure".into()));
        }
        Ok(state.cursor.clone())
    }

    fn cursor_position(&self) -> CursorPosition {
        self.state.lock().position
    }

    fn subscribe_cursor(&self) -> broadcast::Receiver<CursorEvent> {
        self.cursor_tx.subscribe()
    }
}

/// Clonable observer handle for [`MockDesktop`].
#[derive(Clone)]
pub struct MockDesktopHandle {
    state: Arc<Mutex<MockDesktopState>>,
    image_fetches: Arc<AtomicUsize>,
    cursor_tx: broadcast::Sender<CursorEvent>,
}

impl MockDesktopHandle {
    /// Snapshot of all recorded calls.
    pub fn calls(&self) -> Vec<DesktopCall> {
        self.state.lock().calls.clone()
    }

    /// Number of `reset_keys` calls.
    pub fn reset_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| **c == DesktopCall::ResetKeys)
            .count()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of `cursor_image` calls.
    pub fn image_fetches(&self) -> usize {
        self.image_fetches.load(Ordering::SeqCst)
    }

    /// Replace the cursor image returned by later fetches.
    pub fn set_cursor_image(&self, image: CursorImage) {
        self.state.lock().cursor = image;
    }

    /// Announce a cursor image change with the given serial.
    pub fn announce_image(&self, serial: u64) {
        let _ = self.cursor_tx.send(CursorEvent::Image { serial });
    }

    /// Move the pointer from the desktop side and announce it.
    pub fn announce_position(&self, position: CursorPosition) {
        self.state.lock().position = position;
        let _ = self.cursor_tx.send(CursorEvent::Position(position));
    }

    /// Make key and button calls fail.
    pub fn fail_input(&self, fail: bool) {
        self.state.lock().fail_input = fail;
    }

    /// Make cursor image fetches fail.
    pub fn fail_cursor(&self, fail: bool) {
        self.state.lock().fail_cursor = fail;
    }
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

/// Incoming track handed to [`MockSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedTrack {
    pub session: SessionId,
    pub kind: MediaKind,
}

/// Media sink that records which tracks it was given.
#[derive(Clone, Default)]
pub struct MockSink {
    accepted: Arc<Mutex<Vec<AcceptedTrack>>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks accepted so far.
    pub fn accepted(&self) -> Vec<AcceptedTrack> {
        self.accepted.lock().clone()
    }
}

impl MediaSink for MockSink {
    fn accept(&self, session: &SessionId, kind: MediaKind, _packets: mpsc::Receiver<Bytes>) {
        self.accepted.lock().push(AcceptedTrack {
            session: session.clone(),
            kind,
        });
    }
}
