//! Signaling peer: one session's negotiated real-time connection.
//!
//! A peer wraps an [`RtcConnection`] and runs an event pump that relays
//! local candidates to the client, tracks connection state, feeds
//! data-channel frames to the input dispatcher, and streams cursor frames
//! back. When the pump exits the connection is closed and the registry is
//! told, which releases control if the session was host.

use std::sync::Arc;

use bytes::Bytes;
use cohost_desktop::MediaSink;
use cohost_protocol::{RemoteTrack, RtcConnection, RtcEvent};
use cohost_types::{IceCandidate, ServerMessage, SessionId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::cursor::{position_frame, CursorDistributor, CursorListener};
use crate::error::ServerError;
use crate::input::{Dispatched, InputDispatcher};
use crate::registry::Registry;
use crate::state::PeerState;

/// Outbound data-channel frames buffered per peer.
pub const DATA_QUEUE: usize = 64;

/// Shared services a peer's event pump needs.
#[derive(Clone)]
pub struct PeerContext {
    pub registry: Arc<Registry>,
    pub cursors: Arc<CursorDistributor>,
    pub input: Arc<InputDispatcher>,
    pub sink: Arc<dyn MediaSink>,
}

pub struct Peer {
    session_id: SessionId,
    conn: Arc<dyn RtcConnection>,
    state: Mutex<PeerState>,
    data_tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    wait_for_gathering: bool,
}

impl Peer {
    /// Wrap a connection. Returns the receiver of outbound data-channel
    /// frames, to be handed to [`Peer::spawn`].
    ///
    /// With `wait_for_gathering` offers and answers are returned only once
    /// ICE gathering has finished.
    pub fn new(
        session_id: SessionId,
        conn: Arc<dyn RtcConnection>,
        wait_for_gathering: bool,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (data_tx, data_rx) = mpsc::channel(DATA_QUEUE);
        let peer = Arc::new(Self {
            session_id,
            conn,
            state: Mutex::new(PeerState::New),
            data_tx,
            cancel: CancellationToken::new(),
            wait_for_gathering,
        });
        (peer, data_rx)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock()
    }

    /// Generate the local offer.
    pub async fn create_offer(&self) -> Result<String, ServerError> {
        let sdp = self.conn.create_offer(self.wait_for_gathering).await?;
        self.transition(PeerState::on_offer);
        Ok(sdp)
    }

    pub async fn set_remote_answer(&self, sdp: &str) -> Result<(), ServerError> {
        Ok(self.conn.set_remote_answer(sdp).await?)
    }

    /// Apply a client offer and return our answer.
    pub async fn set_remote_offer(&self, sdp: &str) -> Result<String, ServerError> {
        let answer = self
            .conn
            .set_remote_offer(sdp, self.wait_for_gathering)
            .await?;
        self.transition(PeerState::on_offer);
        Ok(answer)
    }

    pub async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), ServerError> {
        Ok(self.conn.add_remote_candidate(candidate).await?)
    }

    /// Queue a data-channel frame. Frames are dropped when the queue is
    /// full or the peer is closed.
    pub fn send_frame(&self, frame: Bytes) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        match self.data_tx.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                trace!(session_id = %self.session_id, error = %e, "data frame dropped");
                false
            }
        }
    }

    /// Stop the event pump. The connection is closed by the pump.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Pause or resume the outgoing media.
    pub fn set_paused(&self, paused: bool) {
        debug!(session_id = %self.session_id, paused, "media paused state");
        self.conn.set_paused(paused);
    }

    fn transition(&self, f: impl FnOnce(PeerState) -> Option<PeerState>) -> Option<PeerState> {
        let mut state = self.state.lock();
        let next = f(*state)?;
        debug!(session_id = %self.session_id, from = %*state, to = %next, "peer state");
        *state = next;
        Some(next)
    }

    /// Start the event pump.
    pub fn spawn(
        self: &Arc<Self>,
        ctx: PeerContext,
        events: mpsc::Receiver<RtcEvent>,
        data_rx: mpsc::Receiver<Bytes>,
    ) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(ctx, events, data_rx))
    }

    async fn run(
        self: Arc<Self>,
        ctx: PeerContext,
        mut events: mpsc::Receiver<RtcEvent>,
        mut data_rx: mpsc::Receiver<Bytes>,
    ) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                Some(frame) = data_rx.recv() => {
                    if let Err(e) = self.conn.send_data(frame).await {
                        trace!(session_id = %self.session_id, error = %e, "data channel send failed");
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if !self.on_event(&ctx, event) {
                        break;
                    }
                }
            }
        }

        self.cancel.cancel();
        ctx.cursors.remove_listener(self.as_ref());
        if let Err(e) = self.conn.close().await {
            debug!(session_id = %self.session_id, error = %e, "error closing connection");
        }
        self.transition(|_| Some(PeerState::Closed));
        ctx.registry.peer_closed(&self.session_id, &self);
        info!(session_id = %self.session_id, "peer closed");
    }

    /// Handle one backend event. Returns `false` when the peer must shut
    /// down.
    fn on_event(self: &Arc<Self>, ctx: &PeerContext, event: RtcEvent) -> bool {
        let Some(session) = ctx.registry.get(&self.session_id) else {
            return false;
        };
        match event {
            RtcEvent::LocalCandidate(candidate) => {
                session.notify(&ServerMessage::SignalCandidate(candidate));
            }
            RtcEvent::GatheringComplete => {
                trace!(session_id = %self.session_id, "ice gathering complete");
            }
            RtcEvent::StateChanged(rtc) => {
                let Some(next) = self.transition(|s| s.on_rtc(rtc)) else {
                    return true;
                };
                if next == PeerState::Connected {
                    if let Err(e) = ctx.registry.set_watching(&self.session_id, true) {
                        debug!(session_id = %self.session_id, error = %e, "cannot mark watching");
                    }
                }
                if next.is_terminal() {
                    info!(session_id = %self.session_id, state = %next, "peer lost");
                    return false;
                }
            }
            RtcEvent::DataChannelOpen => {
                self.push_initial_cursor(&ctx.cursors);
                ctx.cursors
                    .add_image_listener(Arc::clone(self) as Arc<dyn CursorListener>);
                ctx.cursors
                    .add_position_listener(Arc::clone(self) as Arc<dyn CursorListener>);
                debug!(session_id = %self.session_id, "data channel open");
            }
            RtcEvent::DataChannelClose => {
                ctx.cursors.remove_listener(self.as_ref());
                debug!(session_id = %self.session_id, "data channel closed");
            }
            RtcEvent::DataChannelMessage(data) => {
                if let Dispatched::Reply(frame) = ctx.input.handle(&session, &data) {
                    self.send_frame(frame);
                }
            }
            RtcEvent::RemoteTrack(track) => {
                self.on_remote_track(ctx.sink.as_ref(), session.profile().can_share_media, track);
            }
        }
        true
    }

    fn push_initial_cursor(&self, cursors: &CursorDistributor) {
        match cursors.get_current() {
            Ok(cursor) => {
                self.send_frame(cursor.frame.clone());
            }
            Err(e) => warn!(session_id = %self.session_id, error = %e, "no cursor image to push"),
        }
        match position_frame(cursors.position()) {
            Ok(frame) => {
                self.send_frame(frame);
            }
            Err(e) => warn!(session_id = %self.session_id, error = %e, "no cursor position to push"),
        }
    }

    fn on_remote_track(&self, sink: &dyn MediaSink, allowed: bool, track: RemoteTrack) {
        if allowed {
            info!(session_id = %self.session_id, kind = %track.kind, track = %track.id, "accepting client media");
            sink.accept(&self.session_id, track.kind, track.packets);
            return;
        }
        debug!(session_id = %self.session_id, kind = %track.kind, "client may not share media, discarding track");
        let mut packets = track.packets;
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    packet = packets.recv() => if packet.is_none() { break },
                }
            }
        });
    }
}

impl CursorListener for Peer {
    fn listener_id(&self) -> &SessionId {
        &self.session_id
    }

    fn deliver(&self, frame: Bytes) {
        self.send_frame(frame);
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use cohost_desktop::mock::{MockDesktop, MockSink};
    use cohost_protocol::mock::MockRtcBackend;
    use cohost_protocol::{RtcBackend, RtcConfig, RtcState};
    use cohost_types::{MediaKind, MemberProfile, Settings};

    use super::*;
    use crate::session::Transport;

    struct Fixture {
        ctx: PeerContext,
        sink: MockSink,
        backend: MockRtcBackend,
        rtc: cohost_protocol::mock::MockRtcHandle,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(Registry::new(Settings {
            implicit_hosting: true,
            ..Settings::default()
        }));
        let desktop: Arc<MockDesktop> = Arc::new(MockDesktop::new());
        let sink = MockSink::new();
        let (backend, rtc) = MockRtcBackend::new();
        let ctx = PeerContext {
            registry: Arc::clone(&registry),
            cursors: Arc::new(CursorDistributor::new(desktop.clone(), 200)),
            input: Arc::new(InputDispatcher::new(registry, desktop, 8)),
            sink: Arc::new(sink.clone()),
        };
        Fixture {
            ctx,
            sink,
            backend,
            rtc,
        }
    }

    async fn connected_peer(
        f: &Fixture,
        profile: MemberProfile,
    ) -> (Arc<Peer>, mpsc::Receiver<Arc<str>>, JoinHandle<()>) {
        let id = SessionId::new(profile.name.clone());
        f.ctx.registry.create(id.clone(), profile).unwrap();
        let (transport, rx) = Transport::channel(32);
        f.ctx.registry.connect(&id, transport).unwrap();

        let (conn, events) = f.backend.create_connection(&RtcConfig::default()).await.unwrap();
        let (peer, data_rx) = Peer::new(id.clone(), conn, false);
        peer.create_offer().await.unwrap();
        f.ctx.registry.attach_peer(&id, Arc::clone(&peer)).unwrap();
        let task = peer.spawn(f.ctx.clone(), events, data_rx);
        (peer, rx, task)
    }

    #[tokio::test]
    async fn connected_state_marks_watching() {
        let f = fixture();
        let (peer, _rx, _task) = connected_peer(&f, MemberProfile::user("a")).await;
        assert_eq!(peer.state(), PeerState::Negotiating);

        let conn = f.rtc.last_connection().unwrap();
        conn.set_state(RtcState::Connected).await;
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while !f.ctx.registry.get(peer.session_id()).unwrap().is_watching() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(peer.state(), PeerState::Connected);
    }

    #[tokio::test]
    async fn failure_releases_host_and_closes() {
        let f = fixture();
        let (peer, _rx, task) = connected_peer(&f, MemberProfile::user("a")).await;
        f.ctx.registry.request_control(peer.session_id()).unwrap();

        let conn = f.rtc.last_connection().unwrap();
        conn.set_state(RtcState::Connected).await;
        conn.set_state(RtcState::Failed).await;
        task.await.unwrap();

        assert!(f.ctx.registry.host_id().is_none());
        assert!(conn.is_closed());
        assert!(f.ctx.registry.get(peer.session_id()).unwrap().peer().is_none());
        assert_eq!(peer.state(), PeerState::Closed);
    }

    #[tokio::test]
    async fn local_candidates_are_relayed() {
        let f = fixture();
        let (_peer, mut rx, _task) = connected_peer(&f, MemberProfile::user("a")).await;
        let conn = f.rtc.last_connection().unwrap();
        conn.emit(RtcEvent::LocalCandidate(IceCandidate {
            candidate: "candidate:1".into(),
            ..IceCandidate::default()
        }))
        .await;

        let text = rx.recv().await.unwrap();
        assert!(text.contains("signal/candidate"));
        assert!(text.contains("candidate:1"));
    }

    #[tokio::test]
    async fn media_is_forwarded_only_with_permission() {
        let f = fixture();
        let (_peer, _rx, _task) = connected_peer(&f, MemberProfile::user("a")).await;
        let allowed = f.rtc.last_connection().unwrap();
        allowed.add_remote_track(MediaKind::Audio, "mic").await.unwrap();

        let denied_profile = MemberProfile {
            can_share_media: false,
            ..MemberProfile::user("b")
        };
        let (_peer_b, _rx_b, _task_b) = connected_peer(&f, denied_profile).await;
        let denied = f.rtc.last_connection().unwrap();
        denied.add_remote_track(MediaKind::Video, "cam").await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while f.sink.accepted().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        // Let the second track's event be processed too.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let accepted = f.sink.accepted();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].session, SessionId::new("a"));
        assert!(!denied.is_closed());
    }

    #[tokio::test]
    async fn close_stops_pump_and_deregisters() {
        let f = fixture();
        let (peer, _rx, task) = connected_peer(&f, MemberProfile::user("a")).await;
        let conn = f.rtc.last_connection().unwrap();
        conn.open_data_channel().await;
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while f.ctx.cursors.image_listener_count() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        peer.close();
        task.await.unwrap();
        assert_eq!(f.ctx.cursors.image_listener_count(), 0);
        assert_eq!(f.ctx.cursors.position_listener_count(), 0);
        assert!(!peer.send_frame(Bytes::from_static(b"x")));
    }
}
