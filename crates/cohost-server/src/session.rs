//! One client's session: identity, profile, state, transport, peer.

use std::sync::Arc;

use cohost_protocol::envelope::encode_message;
use cohost_types::{
    CursorPosition, MemberProfile, ServerMessage, SessionId, SessionState, SessionSummary,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ServerError;
use crate::peer::Peer;

/// Outbound half of a client transport.
///
/// Messages are queued on a bounded channel drained by the connection's
/// writer task. Sends never block: a full queue is a transient error for
/// that one recipient.
#[derive(Debug)]
pub struct Transport {
    tx: mpsc::Sender<Arc<str>>,
    cancel: CancellationToken,
}

impl Transport {
    /// Create a transport and the receiver its writer task drains.
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Arc::new(Self {
                tx,
                cancel: CancellationToken::new(),
            }),
            rx,
        )
    }

    /// Queue an already encoded message.
    pub fn send_text(&self, text: Arc<str>) -> Result<(), ServerError> {
        if self.cancel.is_cancelled() {
            return Err(ServerError::TransientIo("transport closed".into()));
        }
        self.tx.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => ServerError::TransientIo("outbound queue full".into()),
            TrySendError::Closed(_) => ServerError::TransientIo("transport closed".into()),
        })
    }

    /// Ask the connection to flush what is queued and shut down.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Token cancelled by [`Transport::close`].
    pub fn cancelled(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[derive(Default)]
struct SessionInner {
    profile: MemberProfile,
    state: SessionState,
    cursor: Option<CursorPosition>,
    transport: Option<Arc<Transport>>,
    peer: Option<Arc<Peer>>,
}

/// A session tracked by the [`Registry`](crate::registry::Registry).
///
/// Fields are only mutated through the registry, which fires the matching
/// events. Readers get copies.
pub struct Session {
    id: SessionId,
    inner: Mutex<SessionInner>,
}

impl Session {
    pub(crate) fn new(id: SessionId, profile: MemberProfile) -> Self {
        Self {
            id,
            inner: Mutex::new(SessionInner {
                profile,
                ..SessionInner::default()
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn profile(&self) -> MemberProfile {
        self.inner.lock().profile.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state.clone()
    }

    pub fn summary(&self) -> SessionSummary {
        let inner = self.inner.lock();
        SessionSummary {
            id: self.id.clone(),
            profile: inner.profile.clone(),
            state: inner.state.clone(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.inner.lock().profile.is_admin
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().state.is_connected
    }

    pub fn is_watching(&self) -> bool {
        self.inner.lock().state.is_watching
    }

    /// Last pointer position reported while not in control.
    pub fn cursor(&self) -> Option<CursorPosition> {
        self.inner.lock().cursor
    }

    /// Live real-time peer, if any.
    pub fn peer(&self) -> Option<Arc<Peer>> {
        self.inner.lock().peer.clone()
    }

    /// Encode and queue a message. A session without a transport drops it.
    pub fn send(&self, msg: &ServerMessage) -> Result<(), ServerError> {
        let text: Arc<str> = encode_message(msg)?.into();
        self.send_text(text)
    }

    /// Queue an already encoded message.
    pub fn send_text(&self, text: Arc<str>) -> Result<(), ServerError> {
        let transport = self.inner.lock().transport.clone();
        match transport {
            Some(transport) => transport.send_text(text),
            None => Ok(()),
        }
    }

    /// Send, logging failures instead of returning them.
    pub fn notify(&self, msg: &ServerMessage) {
        if let Err(e) = self.send(msg) {
            warn!(session_id = %self.id, event = msg.event(), error = %e, "failed to deliver message");
        }
    }

    pub(crate) fn replace_transport(
        &self,
        transport: Option<Arc<Transport>>,
    ) -> Option<Arc<Transport>> {
        std::mem::replace(&mut self.inner.lock().transport, transport)
    }

    /// Detach `transport` if it is still the current one.
    pub(crate) fn detach_transport(&self, transport: &Arc<Transport>) -> bool {
        let mut inner = self.inner.lock();
        match &inner.transport {
            Some(current) if Arc::ptr_eq(current, transport) => {
                inner.transport = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn replace_profile(&self, profile: MemberProfile) -> MemberProfile {
        std::mem::replace(&mut self.inner.lock().profile, profile)
    }

    pub(crate) fn set_connected(&self, connected: bool) -> bool {
        self.inner.lock().state.set_connected(connected)
    }

    pub(crate) fn set_watching(&self, watching: bool) -> bool {
        self.inner.lock().state.set_watching(watching)
    }

    pub(crate) fn set_cursor(&self, position: CursorPosition) {
        self.inner.lock().cursor = Some(position);
    }

    pub(crate) fn replace_peer(&self, peer: Option<Arc<Peer>>) -> Option<Arc<Peer>> {
        std::mem::replace(&mut self.inner.lock().peer, peer)
    }

    /// Drop `peer` if it is still the current one.
    pub(crate) fn detach_peer(&self, peer: &Arc<Peer>) -> bool {
        let mut inner = self.inner.lock();
        match &inner.peer {
            Some(current) if Arc::ptr_eq(current, peer) => {
                inner.peer = None;
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("profile", &inner.profile.name)
            .field("state", &inner.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_without_transport_is_a_noop() {
        let session = Session::new(SessionId::new("a"), MemberProfile::user("a"));
        assert!(session.send(&ServerMessage::Heartbeat).is_ok());
    }

    #[tokio::test]
    async fn send_queues_encoded_json() {
        let session = Session::new(SessionId::new("a"), MemberProfile::user("a"));
        let (transport, mut rx) = Transport::channel(4);
        session.replace_transport(Some(transport));

        session.send(&ServerMessage::Heartbeat).unwrap();
        let text = rx.recv().await.unwrap();
        assert_eq!(&*text, r#"{"event":"system/heartbeat"}"#);
    }

    #[test]
    fn full_queue_is_transient() {
        let (transport, _rx) = Transport::channel(1);
        transport.send_text("one".into()).unwrap();
        assert!(matches!(
            transport.send_text("two".into()),
            Err(ServerError::TransientIo(_))
        ));
    }

    #[test]
    fn closed_transport_rejects_sends() {
        let (transport, _rx) = Transport::channel(4);
        transport.close();
        assert!(transport.is_closed());
        assert!(transport.send_text("x".into()).is_err());
    }

    #[test]
    fn detach_only_matches_current_transport() {
        let session = Session::new(SessionId::new("a"), MemberProfile::user("a"));
        let (old, _rx1) = Transport::channel(1);
        let (new, _rx2) = Transport::channel(1);
        session.replace_transport(Some(Arc::clone(&new)));

        assert!(!session.detach_transport(&old));
        assert!(session.detach_transport(&new));
        assert!(!session.detach_transport(&new));
        assert!(session.replace_transport(None).is_none());
    }
}
