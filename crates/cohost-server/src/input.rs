//! Data-channel input dispatch: decode, authorize, drive the desktop.

use std::sync::Arc;

use bytes::Bytes;
use cohost_desktop::Desktop;
use cohost_protocol::wire::{decode_client_frame, encode_server_frame};
use cohost_protocol::{ClientFrame, ServerFrame};
use cohost_types::{unix_millis, CursorPosition, InputIntent};
use tracing::{debug, trace, warn};

use crate::error::ServerError;
use crate::registry::Registry;
use crate::session::Session;

/// What happened to one data-channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Applied to the desktop.
    Applied(InputIntent),
    /// Sender may not control. Dropped.
    Rejected(InputIntent),
    /// Answer to send back on the same channel.
    Reply(Bytes),
    /// Malformed or unknown. Dropped.
    Ignored,
}

/// Routes decoded input from peers to the desktop.
pub struct InputDispatcher {
    registry: Arc<Registry>,
    desktop: Arc<dyn Desktop>,
    button_threshold: u32,
}

impl InputDispatcher {
    pub fn new(registry: Arc<Registry>, desktop: Arc<dyn Desktop>, button_threshold: u32) -> Self {
        Self {
            registry,
            desktop,
            button_threshold,
        }
    }

    /// Whether `session` may drive the desktop right now.
    ///
    /// Under implicit hosting any session allowed to host may; otherwise
    /// only the current host. Private mode shuts non-admins out.
    pub fn may_control(&self, session: &Session) -> bool {
        if !session.profile().can_host || self.registry.is_private_for(session) {
            return false;
        }
        self.registry.settings().implicit_hosting || self.registry.is_host(session.id())
    }

    /// Handle one frame from `session`'s data channel.
    ///
    /// Decode errors are logged and the frame dropped; the channel stays up.
    pub fn handle(&self, session: &Session, data: &[u8]) -> Dispatched {
        let frame = match decode_client_frame(data) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(session_id = %session.id(), error = %e, "dropping malformed input frame");
                return Dispatched::Ignored;
            }
        };

        match frame {
            ClientFrame::Ping { client_ts } => {
                match encode_server_frame(&ServerFrame::Pong {
                    client_ts,
                    server_ts: unix_millis(),
                }) {
                    Ok(pong) => Dispatched::Reply(pong),
                    Err(e) => {
                        warn!(error = %e, "failed to encode pong");
                        Dispatched::Ignored
                    }
                }
            }
            ClientFrame::Unknown { event } => {
                trace!(session_id = %session.id(), event, "ignoring unknown input event");
                Dispatched::Ignored
            }
            ClientFrame::Input(intent) => {
                let intent = intent.classify(self.button_threshold);
                if !self.may_control(session) {
                    self.record_inactive(session, intent);
                    trace!(session_id = %session.id(), ?intent, "input from non-controlling session");
                    return Dispatched::Rejected(intent);
                }
                if let Err(e) = self.apply(intent) {
                    warn!(session_id = %session.id(), ?intent, error = %e, "desktop rejected input");
                }
                Dispatched::Applied(intent)
            }
        }
    }

    fn record_inactive(&self, session: &Session, intent: InputIntent) {
        let InputIntent::Move { x, y } = intent else {
            return;
        };
        if !self.registry.settings().inactive_cursors || !session.profile().sends_inactive_cursor {
            return;
        }
        self.registry
            .set_inactive_cursor(session.id(), CursorPosition::new(x.into(), y.into()));
    }

    fn apply(&self, intent: InputIntent) -> Result<(), ServerError> {
        trace!(?intent, "applying input");
        match intent {
            InputIntent::Move { x, y } => self.desktop.move_to(x.into(), y.into()),
            InputIntent::Scroll { dx, dy } => self.desktop.scroll(dx.into(), dy.into()),
            InputIntent::KeyDown(code) => self.desktop.key_down(code)?,
            InputIntent::KeyUp(code) => self.desktop.key_up(code)?,
            InputIntent::ButtonDown(code) => self.desktop.button_down(code)?,
            InputIntent::ButtonUp(code) => self.desktop.button_up(code)?,
        }
        Ok(())
    }
}
