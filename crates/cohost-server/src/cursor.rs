//! Cursor distribution: rendered cursor images cached by serial, pushed to
//! every listening peer along with pointer positions.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use cohost_desktop::Desktop;
use cohost_protocol::wire::encode_server_frame;
use cohost_protocol::ServerFrame;
use cohost_types::{CursorImage, CursorPosition, SessionId};
use image::{DynamicImage, ImageFormat, RgbaImage};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::error::ServerError;

/// Receives encoded cursor frames.
pub trait CursorListener: Send + Sync {
    /// Identity used for registration.
    fn listener_id(&self) -> &SessionId;

    /// Deliver one encoded frame. Must not block.
    fn deliver(&self, frame: Bytes);
}

/// A cursor image ready to send.
#[derive(Debug)]
pub struct RenderedCursor {
    pub width: u16,
    pub height: u16,
    pub x_hot: u16,
    pub y_hot: u16,
    pub png: Bytes,
    /// Encoded cursor-image frame.
    pub frame: Bytes,
}

impl RenderedCursor {
    /// Render raw RGBA pixels to PNG and encode the frame.
    pub fn render(image: &CursorImage) -> Result<Self, ServerError> {
        let expected = image.expected_len();
        let rgba = RgbaImage::from_raw(
            u32::from(image.width),
            u32::from(image.height),
            image.pixels.clone(),
        )
        .ok_or_else(|| {
            ServerError::Other(anyhow::anyhow!(
                "cursor image has {} bytes, expected {expected}",
                image.pixels.len()
            ))
        })?;

        let mut png = Vec::new();
        DynamicImage::ImageRgba8(rgba)
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| ServerError::Other(anyhow::anyhow!("failed to encode cursor: {e}")))?;
        let png = Bytes::from(png);

        let frame = encode_server_frame(&ServerFrame::CursorImage {
            width: image.width,
            height: image.height,
            x_hot: image.x_hot,
            y_hot: image.y_hot,
            png: png.clone(),
        })?;
        Ok(Self {
            width: image.width,
            height: image.height,
            x_hot: image.x_hot,
            y_hot: image.y_hot,
            png,
            frame,
        })
    }
}

type Listeners = Mutex<HashMap<SessionId, Arc<dyn CursorListener>>>;

/// Fans cursor images and positions out to listeners.
pub struct CursorDistributor {
    desktop: Arc<dyn Desktop>,
    max_serial: u64,
    cache: RwLock<HashMap<u64, Arc<RenderedCursor>>>,
    current: RwLock<Option<Arc<RenderedCursor>>>,
    image_listeners: Listeners,
    position_listeners: Listeners,
}

impl CursorDistributor {
    /// Serials of `0` or above `max_serial` are never cached.
    pub fn new(desktop: Arc<dyn Desktop>, max_serial: u64) -> Self {
        Self {
            desktop,
            max_serial,
            cache: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            image_listeners: Mutex::new(HashMap::new()),
            position_listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Last known cursor, fetched from the desktop on first use.
    pub fn get_current(&self) -> Result<Arc<RenderedCursor>, ServerError> {
        if let Some(current) = self.current.read().as_ref() {
            return Ok(Arc::clone(current));
        }
        let mut current = self.current.write();
        if let Some(current) = current.as_ref() {
            return Ok(Arc::clone(current));
        }
        let rendered = Arc::new(RenderedCursor::render(&self.desktop.cursor_image()?)?);
        *current = Some(Arc::clone(&rendered));
        Ok(rendered)
    }

    /// Cursor for `serial`, rendering it on a cache miss.
    pub fn get(&self, serial: u64) -> Result<Arc<RenderedCursor>, ServerError> {
        let cacheable = serial != 0 && serial <= self.max_serial;
        if !cacheable {
            trace!(serial, "cursor serial outside cache window");
            return Ok(Arc::new(RenderedCursor::render(&self.desktop.cursor_image()?)?));
        }

        if let Some(hit) = self.cache.read().get(&serial) {
            return Ok(Arc::clone(hit));
        }
        let mut cache = self.cache.write();
        if let Some(hit) = cache.get(&serial) {
            return Ok(Arc::clone(hit));
        }
        let rendered = Arc::new(RenderedCursor::render(&self.desktop.cursor_image()?)?);
        cache.insert(serial, Arc::clone(&rendered));
        debug!(serial, cached = cache.len(), "cursor image cached");
        Ok(rendered)
    }

    /// Current pointer position on the desktop.
    pub fn position(&self) -> CursorPosition {
        self.desktop.cursor_position()
    }

    /// Handle a cursor-changed notification from the desktop.
    pub fn on_cursor_changed(&self, serial: u64) -> Result<(), ServerError> {
        let cursor = self.get(serial)?;
        *self.current.write() = Some(Arc::clone(&cursor));
        for listener in snapshot(&self.image_listeners) {
            listener.deliver(cursor.frame.clone());
        }
        Ok(())
    }

    /// Push a pointer position to every position listener except `host`.
    pub fn push_position(&self, position: CursorPosition, host: Option<&SessionId>) {
        let frame = match position_frame(position) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to encode cursor position");
                return;
            }
        };
        for listener in snapshot(&self.position_listeners) {
            if Some(listener.listener_id()) == host {
                continue;
            }
            listener.deliver(frame.clone());
        }
    }

    pub fn add_image_listener(&self, listener: Arc<dyn CursorListener>) {
        let id = listener.listener_id().clone();
        self.image_listeners.lock().insert(id, listener);
    }

    pub fn add_position_listener(&self, listener: Arc<dyn CursorListener>) {
        let id = listener.listener_id().clone();
        self.position_listeners.lock().insert(id, listener);
    }

    /// Remove `listener` from both lists, but only where it is still the
    /// registration for its id.
    pub fn remove_listener(&self, listener: &dyn CursorListener) {
        let id = listener.listener_id();
        let target = std::ptr::from_ref(listener);
        for list in [&self.image_listeners, &self.position_listeners] {
            let mut list = list.lock();
            if list
                .get(id)
                .is_some_and(|l| std::ptr::addr_eq(Arc::as_ptr(l), target))
            {
                list.remove(id);
            }
        }
    }

    pub fn image_listener_count(&self) -> usize {
        self.image_listeners.lock().len()
    }

    pub fn position_listener_count(&self) -> usize {
        self.position_listeners.lock().len()
    }

    /// Number of cached serials.
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }
}

/// Encode a pointer position frame, clamping to the wire range.
pub fn position_frame(position: CursorPosition) -> Result<Bytes, ServerError> {
    let clamp = |v: i32| u16::try_from(v.max(0)).unwrap_or(u16::MAX);
    Ok(encode_server_frame(&ServerFrame::CursorPosition {
        x: clamp(position.x),
        y: clamp(position.y),
    })?)
}

fn snapshot(listeners: &Listeners) -> Vec<Arc<dyn CursorListener>> {
    listeners.lock().values().cloned().collect()
}

#[cfg(test)]
mod tests {
    use cohost_desktop::mock::MockDesktop;

    use super::*;

    struct Recorder {
        id: SessionId,
        frames: Mutex<Vec<Bytes>>,
    }

    impl Recorder {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                id: SessionId::new(name),
                frames: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.frames.lock().len()
        }
    }

    impl CursorListener for Recorder {
        fn listener_id(&self) -> &SessionId {
            &self.id
        }

        fn deliver(&self, frame: Bytes) {
            self.frames.lock().push(frame);
        }
    }

    fn distributor() -> (CursorDistributor, cohost_desktop::mock::MockDesktopHandle) {
        let desktop = MockDesktop::new();
        let handle = desktop.handle();
        (CursorDistributor::new(Arc::new(desktop), 200), handle)
    }

    #[test]
    fn same_serial_fetches_once() {
        let (cursors, handle) = distributor();
        let first = cursors.get(42).unwrap();
        let second = cursors.get(42).unwrap();
        assert_eq!(handle.image_fetches(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn serials_outside_window_always_miss() {
        let (cursors, handle) = distributor();
        cursors.get(201).unwrap();
        cursors.get(201).unwrap();
        cursors.get(0).unwrap();
        assert_eq!(handle.image_fetches(), 3);
        assert_eq!(cursors.cached(), 0);
    }

    #[test]
    fn get_current_is_lazy_and_sticky() {
        let (cursors, handle) = distributor();
        assert_eq!(handle.image_fetches(), 0);
        cursors.get_current().unwrap();
        cursors.get_current().unwrap();
        assert_eq!(handle.image_fetches(), 1);
    }

    #[test]
    fn rendered_frame_carries_png() {
        let (cursors, _handle) = distributor();
        let cursor = cursors.get(1).unwrap();
        assert_eq!(cursor.frame[0], 0x81);
        assert_eq!(&cursor.png[..4], b"\x89PNG");
        assert_eq!((cursor.width, cursor.height), (2, 2));
    }

    #[test]
    fn malformed_image_is_an_error() {
        let (cursors, handle) = distributor();
        handle.set_cursor_image(CursorImage {
            width: 4,
            height: 4,
            x_hot: 0,
            y_hot: 0,
            pixels: vec![0; 3],
        });
        assert!(cursors.get(7).is_err());
        assert_eq!(cursors.cached(), 0);
    }

    #[test]
    fn cursor_change_reaches_image_listeners() {
        let (cursors, _handle) = distributor();
        let a = Recorder::new("a");
        cursors.add_image_listener(a.clone());
        cursors.on_cursor_changed(3).unwrap();
        assert_eq!(a.count(), 1);
        assert!(Arc::ptr_eq(
            &cursors.get_current().unwrap(),
            &cursors.get(3).unwrap()
        ));
    }

    #[test]
    fn listener_registration_is_idempotent() {
        let (cursors, _handle) = distributor();
        let a = Recorder::new("a");
        cursors.add_position_listener(a.clone());
        cursors.add_position_listener(a.clone());
        assert_eq!(cursors.position_listener_count(), 1);
        cursors.remove_listener(a.as_ref());
        assert_eq!(cursors.position_listener_count(), 0);
        cursors.remove_listener(Recorder::new("never").as_ref());
        assert_eq!(cursors.position_listener_count(), 0);
    }

    #[test]
    fn replaced_listener_is_not_removed_by_its_predecessor() {
        let (cursors, _handle) = distributor();
        let old = Recorder::new("a");
        let new = Recorder::new("a");
        cursors.add_image_listener(old.clone());
        cursors.add_image_listener(new.clone());
        cursors.add_position_listener(new.clone());

        cursors.remove_listener(old.as_ref());
        assert_eq!(cursors.image_listener_count(), 1);
        assert_eq!(cursors.position_listener_count(), 1);

        cursors.remove_listener(new.as_ref());
        assert_eq!(cursors.image_listener_count(), 0);
        assert_eq!(cursors.position_listener_count(), 0);
    }

    #[test]
    fn positions_skip_the_host() {
        let (cursors, _handle) = distributor();
        let host = Recorder::new("host");
        let viewer = Recorder::new("viewer");
        cursors.add_position_listener(host.clone());
        cursors.add_position_listener(viewer.clone());

        cursors.push_position(CursorPosition::new(10, 20), Some(host.listener_id()));
        assert_eq!(host.count(), 0);
        assert_eq!(viewer.count(), 1);
        assert_eq!(
            &viewer.frames.lock()[0][..],
            &[0x80, 0, 4, 0, 10, 0, 20]
        );
    }

    #[test]
    fn negative_positions_clamp_to_zero() {
        let frame = position_frame(CursorPosition::new(-5, 70_000)).unwrap();
        assert_eq!(&frame[..], &[0x80, 0, 4, 0, 0, 0xff, 0xff]);
    }
}
