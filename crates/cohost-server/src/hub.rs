//! The hub ties the registry, control, cursors, peers and input together
//! and handles client signaling messages.

use std::sync::Arc;

use cohost_desktop::{Capture, CursorEvent, Desktop, MediaSink};
use cohost_protocol::envelope::decode_message;
use cohost_protocol::{LocalTrack, RtcBackend, RtcConfig};
use cohost_types::{
    ClientMessage, ControlHost, MediaKind, ServerMessage, SessionId,
};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::cursor::CursorDistributor;
use crate::error::ServerError;
use crate::input::InputDispatcher;
use crate::member::{Credentials, MemberProvider};
use crate::peer::{Peer, PeerContext};
use crate::registry::{Registry, RegistryEvent};
use crate::session::{Session, Transport};

/// External collaborators the hub drives.
pub struct Backends {
    pub desktop: Arc<dyn Desktop>,
    pub capture: Arc<dyn Capture>,
    pub sink: Arc<dyn MediaSink>,
    pub rtc: Arc<dyn RtcBackend>,
    pub members: Arc<dyn MemberProvider>,
}

/// Shared server state.
pub struct Hub {
    config: Config,
    rtc_config: RtcConfig,
    registry: Arc<Registry>,
    cursors: Arc<CursorDistributor>,
    desktop: Arc<dyn Desktop>,
    capture: Arc<dyn Capture>,
    rtc: Arc<dyn RtcBackend>,
    members: Arc<dyn MemberProvider>,
    peer_ctx: PeerContext,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Hub {
    pub fn new(config: Config, backends: Backends) -> Result<Arc<Self>, ServerError> {
        let rtc_config = RtcConfig {
            ice_lite: config.webrtc.ice_lite,
            ice_trickle: config.webrtc.ice_trickle,
            ice_servers: config.webrtc.ice_servers.clone(),
            nat1to1_ips: config.webrtc.nat1to1.clone(),
            udp_port_range: config.webrtc.port_range()?,
        };
        let registry = Arc::new(Registry::new(config.session.initial_settings()));
        let cursors = Arc::new(CursorDistributor::new(
            Arc::clone(&backends.desktop),
            config.cursor.max_serial,
        ));
        let input = Arc::new(InputDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&backends.desktop),
            config.session.button_threshold,
        ));
        let peer_ctx = PeerContext {
            registry: Arc::clone(&registry),
            cursors: Arc::clone(&cursors),
            input,
            sink: backends.sink,
        };
        install_broadcasts(&registry, Arc::clone(&backends.desktop));

        Ok(Arc::new(Self {
            config,
            rtc_config,
            registry,
            cursors,
            desktop: backends.desktop,
            capture: backends.capture,
            rtc: backends.rtc,
            members: backends.members,
            peer_ctx,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn cursors(&self) -> &Arc<CursorDistributor> {
        &self.cursors
    }

    /// Spawn the cursor pump and the inactive-cursor ticker.
    pub fn start(self: &Arc<Self>) {
        let cursor_task = tokio::spawn(cursor_pump(
            self.desktop.subscribe_cursor(),
            Arc::clone(&self.cursors),
            Arc::clone(&self.registry),
            self.shutdown.clone(),
        ));
        let ticker_task = tokio::spawn(inactive_cursor_ticker(
            Arc::clone(&self.registry),
            self.config.server.inactive_cursors_period(),
            self.shutdown.clone(),
        ));
        self.tasks.lock().extend([cursor_task, ticker_task]);
        info!("hub started");
    }

    /// Disconnect every client and stop background tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for session in self.registry.list() {
            if session.is_connected() {
                let _ = self.registry.disconnect(session.id(), "server shutting down");
            }
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!("hub stopped");
    }

    /// Authenticate and find or create the member's session.
    ///
    /// A session that is still connected keeps its profile; the new
    /// connection is then refused or replaces the old one on connect.
    pub fn login(&self, credentials: &Credentials) -> Result<Arc<Session>, ServerError> {
        let (id, profile) = self.members.authenticate(credentials)?;
        if !profile.can_login {
            return Err(ServerError::Unauthorized(format!("{id} may not log in")));
        }
        if !profile.is_admin && self.registry.settings().locked_logins {
            return Err(ServerError::Forbidden("logins are locked".into()));
        }
        if let Some(session) = self.registry.get(&id) {
            if !session.is_connected() {
                self.registry.update_profile(&id, profile)?;
            }
            return Ok(session);
        }
        match self.registry.create(id.clone(), profile) {
            Ok(session) => Ok(session),
            Err(ServerError::AlreadyExists(_)) => {
                self.registry.get(&id).ok_or(ServerError::NotFound(id))
            }
            Err(e) => Err(e),
        }
    }

    /// Attach a transport and send the client its initial state.
    pub fn connect(&self, session: &Arc<Session>, transport: Arc<Transport>) -> Result<(), ServerError> {
        self.registry.connect(session.id(), transport)?;
        session.notify(&self.system_init(session.id()));
        if session.is_admin() {
            session.notify(&self.system_admin());
        }
        Ok(())
    }

    /// Delete `session` if it is still disconnected once the reconnect
    /// grace period has passed.
    pub fn expire_when_idle(self: &Arc<Self>, session: &Session) {
        let hub = Arc::clone(self);
        let id = session.id().clone();
        let grace = self.config.server.reconnect_grace();
        tokio::spawn(async move {
            tokio::select! {
                () = hub.shutdown.cancelled() => return,
                () = tokio::time::sleep(grace) => {}
            }
            if hub.registry.delete_if_disconnected(&id) {
                debug!(session_id = %id, "idle session expired");
            }
        });
    }

    fn system_init(&self, id: &SessionId) -> ServerMessage {
        ServerMessage::SystemInit {
            session_id: id.clone(),
            control_host: ControlHost::new(self.registry.host_id()),
            sessions: self.registry.list().iter().map(|s| s.summary()).collect(),
            settings: self.registry.settings(),
        }
    }

    fn system_admin(&self) -> ServerMessage {
        let status = self.capture.broadcast_status();
        ServerMessage::SystemAdmin {
            broadcast_active: status.active,
            broadcast_url: status.url,
        }
    }

    /// Create a real-time peer for `session`, replacing any previous one,
    /// and send the client our offer.
    pub async fn create_peer(&self, session: &Arc<Session>) -> Result<Arc<Peer>, ServerError> {
        if !session.profile().can_watch {
            return Err(ServerError::Unauthorized(format!(
                "{} may not watch",
                session.id()
            )));
        }
        let (conn, events) = self.rtc.create_connection(&self.rtc_config).await?;

        let prepared = async {
            for kind in [MediaKind::Video, MediaKind::Audio] {
                let (Some(samples), Some(mime_type)) =
                    (self.capture.subscribe(kind), self.capture.mime_type(kind))
                else {
                    continue;
                };
                conn.add_local_track(LocalTrack {
                    kind,
                    id: kind.to_string(),
                    stream_id: "cohost".to_string(),
                    mime_type,
                    samples,
                })
                .await?;
            }
            let (peer, data_rx) = Peer::new(
                session.id().clone(),
                Arc::clone(&conn),
                !self.rtc_config.ice_trickle,
            );
            let sdp = peer.create_offer().await?;
            self.registry.attach_peer(session.id(), Arc::clone(&peer))?;
            if self.registry.is_private_for(session) {
                peer.set_paused(true);
            }
            Ok::<_, ServerError>((peer, data_rx, sdp))
        }
        .await;

        let (peer, data_rx, sdp) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                let _ = conn.close().await;
                return Err(e);
            }
        };

        session.notify(&ServerMessage::SignalProvide {
            id: session.id().clone(),
            sdp,
            ice_lite: self.rtc_config.ice_lite,
            ice_servers: self.rtc_config.ice_servers.clone(),
        });
        peer.spawn(self.peer_ctx.clone(), events, data_rx);
        info!(session_id = %session.id(), "peer created");
        Ok(peer)
    }

    /// Handle one JSON message from a client.
    pub async fn handle_message(&self, session: &Arc<Session>, text: &str) -> Result<(), ServerError> {
        let msg: ClientMessage = decode_message(text)?;
        let id = session.id();
        trace!(session_id = %id, event = msg.event(), "client message");

        match msg {
            ClientMessage::SignalRequest => {
                self.create_peer(session).await?;
            }
            ClientMessage::SignalOffer { sdp } => {
                let peer = current_peer(session)?;
                let answer = self.negotiate(session, &peer, peer.set_remote_offer(&sdp)).await?;
                session.send(&ServerMessage::SignalAnswer { sdp: answer })?;
            }
            ClientMessage::SignalAnswer { sdp } => {
                let peer = current_peer(session)?;
                self.negotiate(session, &peer, peer.set_remote_answer(&sdp)).await?;
            }
            ClientMessage::SignalCandidate(candidate) => {
                let peer = current_peer(session)?;
                peer.add_remote_candidate(candidate).await?;
            }
            ClientMessage::ControlRequest => {
                self.registry.request_control(id)?;
            }
            ClientMessage::ControlRelease => self.registry.release_control(id)?,
            ClientMessage::ControlTake => self.registry.take_control(id)?,
            ClientMessage::ControlGive(target) => {
                self.registry.give_control(id, &target.target_id)?;
            }
            ClientMessage::ControlReset => self.registry.reset_control(id)?,
            ClientMessage::ControlLock => self.registry.lock_control(id)?,
            ClientMessage::ControlUnlock => self.registry.unlock_control(id)?,
            ClientMessage::SystemSettings(settings) => {
                if !session.is_admin() {
                    return Err(ServerError::Unauthorized(format!(
                        "{id} may not change settings"
                    )));
                }
                self.registry.update_settings(|s| *s = settings);
            }
            ClientMessage::Heartbeat => {}
        }
        Ok(())
    }

    /// Run a negotiation step; on failure the peer is reset and the client
    /// told to start over.
    async fn negotiate<T>(
        &self,
        session: &Session,
        peer: &Arc<Peer>,
        step: impl std::future::Future<Output = Result<T, ServerError>>,
    ) -> Result<T, ServerError> {
        match step.await {
            Ok(value) => Ok(value),
            Err(e @ ServerError::Negotiation(_)) => {
                warn!(session_id = %session.id(), error = %e, "negotiation failed, resetting peer");
                peer.close();
                session.notify(&ServerMessage::SignalClose);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

fn current_peer(session: &Session) -> Result<Arc<Peer>, ServerError> {
    session
        .peer()
        .ok_or_else(|| ServerError::Negotiation(format!("{} has no real-time peer", session.id())))
}

/// Turn registry events into client broadcasts and desktop side effects.
fn install_broadcasts(registry: &Arc<Registry>, desktop: Arc<dyn Desktop>) {
    let weak = Arc::downgrade(registry);
    registry.subscribe(move |event| {
        let Some(registry) = weak.upgrade() else {
            return;
        };
        match event {
            RegistryEvent::Created(session) => {
                registry.broadcast(&ServerMessage::SessionCreated(session.summary()), &[]);
            }
            RegistryEvent::Deleted(session) => {
                registry.broadcast(
                    &ServerMessage::SessionDeleted {
                        id: session.id().clone(),
                    },
                    &[],
                );
            }
            RegistryEvent::Connected(session) => {
                registry.broadcast(
                    &ServerMessage::MemberConnected(session.summary()),
                    &[session.id()],
                );
            }
            RegistryEvent::Disconnected(session) => {
                registry.broadcast(
                    &ServerMessage::MemberDisconnected(session.summary()),
                    &[session.id()],
                );
            }
            RegistryEvent::ProfileChanged { session, new, .. } => {
                registry.broadcast(
                    &ServerMessage::SessionProfile {
                        id: session.id().clone(),
                        profile: new.clone(),
                    },
                    &[],
                );
            }
            RegistryEvent::StateChanged { session, state } => {
                registry.broadcast(
                    &ServerMessage::SessionStateChanged {
                        id: session.id().clone(),
                        state: state.clone(),
                    },
                    &[],
                );
            }
            RegistryEvent::HostChanged { old, new } => {
                if old.is_some() {
                    debug!("host changed, releasing held keys");
                    desktop.reset_keys();
                }
                registry.broadcast(&ServerMessage::ControlHost(ControlHost::new(new.clone())), &[]);
            }
            RegistryEvent::SettingsChanged { new, .. } => {
                registry.broadcast(&ServerMessage::SystemSettings(new.clone()), &[]);
            }
        }
    });
}

async fn cursor_pump(
    mut events: tokio::sync::broadcast::Receiver<CursorEvent>,
    cursors: Arc<CursorDistributor>,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(CursorEvent::Image { serial }) => {
                if let Err(e) = cursors.on_cursor_changed(serial) {
                    warn!(serial, error = %e, "failed to distribute cursor image");
                }
            }
            Ok(CursorEvent::Position(position)) => {
                cursors.push_position(position, registry.host_id().as_ref());
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "cursor events lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("cursor pump stopped");
}

async fn inactive_cursor_ticker(
    registry: Arc<Registry>,
    period: std::time::Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !registry.settings().inactive_cursors {
            continue;
        }
        let cursors = registry.pop_inactive_cursors();
        if cursors.is_empty() {
            continue;
        }
        registry.inactive_cursors_broadcast(&ServerMessage::SessionCursors { cursors });
    }
}

#[cfg(test)]
mod tests {
    use cohost_desktop::mock::{MockDesktop, MockDesktopHandle, MockSink};
    use cohost_desktop::HeadlessCapture;
    use cohost_protocol::mock::{MockRtcBackend, MockRtcHandle};
    use cohost_types::MemberProfile;
    use tokio::sync::mpsc;

    use super::*;
    use crate::member::MultiuserProvider;

    /// Uses the username as the session id, so logins can meet an
    /// existing session.
    struct ByName;

    impl MemberProvider for ByName {
        fn authenticate(
            &self,
            credentials: &Credentials,
        ) -> Result<(SessionId, MemberProfile), ServerError> {
            let name = credentials.username.as_str();
            let profile = if credentials.password == "admin" {
                MemberProfile::admin(name)
            } else {
                MemberProfile::user(name)
            };
            Ok((SessionId::new(name), profile))
        }
    }

    struct Fixture {
        hub: Arc<Hub>,
        desktop: MockDesktopHandle,
        rtc: MockRtcHandle,
    }

    fn fixture(config: Config) -> Fixture {
        fixture_with(
            config,
            Arc::new(MultiuserProvider::new("admin".into(), "user".into())),
        )
    }

    fn fixture_with(config: Config, members: Arc<dyn MemberProvider>) -> Fixture {
        let desktop = MockDesktop::new();
        let handle = desktop.handle();
        let (rtc, rtc_handle) = MockRtcBackend::new();
        let hub = Hub::new(
            config,
            Backends {
                desktop: Arc::new(desktop),
                capture: Arc::new(HeadlessCapture::new("video/VP8", "audio/opus")),
                sink: Arc::new(MockSink::new()),
                rtc: Arc::new(rtc),
                members,
            },
        )
        .unwrap();
        Fixture {
            hub,
            desktop: handle,
            rtc: rtc_handle,
        }
    }

    fn login(hub: &Hub, name: &str, password: &str) -> Arc<Session> {
        hub.login(&Credentials {
            username: name.into(),
            password: password.into(),
        })
        .unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(text.to_string());
        }
        out
    }

    fn events(messages: &[String]) -> Vec<String> {
        messages
            .iter()
            .map(|m| {
                let value: serde_json::Value = serde_json::from_str(m).unwrap();
                value["event"].as_str().unwrap_or_default().to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn connect_sends_init_then_admin_status() {
        let f = fixture(Config::default());
        let root = login(&f.hub, "root", "admin");
        let (transport, mut rx) = Transport::channel(32);
        f.hub.connect(&root, transport).unwrap();

        let got = events(&drain(&mut rx));
        assert_eq!(got, vec!["system/init", "system/admin"]);
    }

    #[tokio::test]
    async fn relogin_refreshes_a_disconnected_session() {
        let f = fixture_with(Config::default(), Arc::new(ByName));
        let first = login(&f.hub, "alice", "user");
        let second = login(&f.hub, "alice", "admin");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.is_admin());
    }

    #[tokio::test]
    async fn relogin_leaves_a_connected_session_alone() {
        let f = fixture_with(Config::default(), Arc::new(ByName));
        let root = login(&f.hub, "root", "admin");
        let (transport, _rx) = Transport::channel(32);
        f.hub.connect(&root, transport).unwrap();

        let again = login(&f.hub, "root", "user");
        assert!(Arc::ptr_eq(&root, &again));
        assert!(root.is_admin());
    }

    #[tokio::test]
    async fn locked_logins_admit_only_admins() {
        let mut config = Config::default();
        config.session.locked_logins = true;
        let f = fixture(config);
        let refused = f.hub.login(&Credentials {
            username: "alice".into(),
            password: "user".into(),
        });
        assert!(matches!(refused, Err(ServerError::Forbidden(_))));
        assert!(login(&f.hub, "root", "admin").is_admin());
    }

    #[tokio::test]
    async fn idle_sessions_expire_after_grace() {
        let mut config = Config::default();
        config.server.reconnect_grace_ms = 10;
        let f = fixture(config);
        let gone = login(&f.hub, "alice", "user");
        let kept = login(&f.hub, "bob", "user");
        let (transport, _rx) = Transport::channel(32);
        f.hub.connect(&kept, transport).unwrap();

        f.hub.expire_when_idle(&gone);
        f.hub.expire_when_idle(&kept);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(f.hub.registry().get(gone.id()).is_none());
        assert!(f.hub.registry().get(kept.id()).is_some());
    }

    #[tokio::test]
    async fn private_mode_pauses_non_admin_media() {
        let mut config = Config::default();
        config.session.private_mode = true;
        let f = fixture(config);
        let alice = login(&f.hub, "alice", "user");
        let root = login(&f.hub, "root", "admin");
        for session in [&alice, &root] {
            let (transport, _rx) = Transport::channel(32);
            f.hub.connect(session, transport).unwrap();
        }

        f.hub.create_peer(&alice).await.unwrap();
        let alice_conn = f.rtc.last_connection().unwrap();
        f.hub.create_peer(&root).await.unwrap();
        let root_conn = f.rtc.last_connection().unwrap();
        assert!(alice_conn.is_paused());
        assert!(!root_conn.is_paused());

        f.hub.registry().update_settings(|s| s.private_mode = false);
        assert!(!alice_conn.is_paused());
        f.hub.registry().update_settings(|s| s.private_mode = true);
        assert!(alice_conn.is_paused());
        assert!(!root_conn.is_paused());
    }

    #[tokio::test]
    async fn create_peer_sends_provide_with_local_tracks() {
        let f = fixture(Config::default());
        let alice = login(&f.hub, "alice", "user");
        let (transport, mut rx) = Transport::channel(32);
        f.hub.connect(&alice, transport).unwrap();
        drain(&mut rx);

        f.hub.create_peer(&alice).await.unwrap();
        let messages = drain(&mut rx);
        assert_eq!(events(&messages), vec!["signal/provide"]);
        assert!(messages[0].contains("mock-offer-1"));

        let conn = f.rtc.last_connection().unwrap();
        let kinds: Vec<_> = conn.local_tracks().into_iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![MediaKind::Video, MediaKind::Audio]);
    }

    #[tokio::test]
    async fn signal_answer_reaches_connection() {
        let f = fixture(Config::default());
        let alice = login(&f.hub, "alice", "user");
        let (transport, _rx) = Transport::channel(32);
        f.hub.connect(&alice, transport).unwrap();
        f.hub.create_peer(&alice).await.unwrap();

        f.hub
            .handle_message(&alice, r#"{"event":"signal/answer","sdp":"v=0 answer"}"#)
            .await
            .unwrap();
        assert_eq!(
            f.rtc.last_connection().unwrap().remote_answers(),
            vec!["v=0 answer".to_string()]
        );
    }

    #[tokio::test]
    async fn failed_negotiation_resets_peer() {
        let f = fixture(Config::default());
        let alice = login(&f.hub, "alice", "user");
        let (transport, mut rx) = Transport::channel(32);
        f.hub.connect(&alice, transport).unwrap();
        let peer = f.hub.create_peer(&alice).await.unwrap();
        drain(&mut rx);

        let result = f
            .hub
            .handle_message(&alice, r#"{"event":"signal/answer","sdp":""}"#)
            .await;
        assert!(matches!(result, Err(ServerError::Negotiation(_))));
        assert!(peer.is_closed());
        assert_eq!(events(&drain(&mut rx)), vec!["signal/close"]);
    }

    #[tokio::test]
    async fn failed_offer_closes_connection() {
        let f = fixture(Config::default());
        let alice = login(&f.hub, "alice", "user");
        let (transport, _rx) = Transport::channel(32);
        f.hub.connect(&alice, transport).unwrap();
        f.rtc.fail_offer(true);

        assert!(f.hub.create_peer(&alice).await.is_err());
        assert!(f.rtc.last_connection().unwrap().is_closed());
        assert!(alice.peer().is_none());
    }

    #[tokio::test]
    async fn malformed_message_is_a_decode_error() {
        let f = fixture(Config::default());
        let alice = login(&f.hub, "alice", "user");
        assert!(matches!(
            f.hub.handle_message(&alice, "{not json").await,
            Err(ServerError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn settings_are_admin_only() {
        let f = fixture(Config::default());
        let alice = login(&f.hub, "alice", "user");
        let root = login(&f.hub, "root", "admin");
        let msg = r#"{"event":"system/settings","locked_controls":true,"implicit_hosting":true}"#;

        assert!(matches!(
            f.hub.handle_message(&alice, msg).await,
            Err(ServerError::Unauthorized(_))
        ));
        f.hub.handle_message(&root, msg).await.unwrap();
        assert!(f.hub.registry().settings().locked_controls);
    }

    #[tokio::test]
    async fn host_change_resets_desktop_keys() {
        let f = fixture(Config::default());
        let alice = login(&f.hub, "alice", "user");
        let (transport, _rx) = Transport::channel(32);
        f.hub.connect(&alice, transport).unwrap();

        f.hub
            .handle_message(&alice, r#"{"event":"control/request"}"#)
            .await
            .unwrap();
        assert_eq!(f.desktop.reset_count(), 0);
        f.hub
            .handle_message(&alice, r#"{"event":"control/release"}"#)
            .await
            .unwrap();
        assert_eq!(f.desktop.reset_count(), 1);
    }

    #[tokio::test]
    async fn inactive_cursors_reach_permitted_viewers() {
        let mut config = Config::default();
        config.session.inactive_cursors = true;
        config.server.inactive_cursors_period_ms = 10;
        let f = fixture(config);
        f.hub.start();

        let alice = login(&f.hub, "alice", "user");
        let (transport, mut rx) = Transport::channel(32);
        f.hub.connect(&alice, transport).unwrap();
        drain(&mut rx);

        f.hub
            .registry()
            .set_inactive_cursor(alice.id(), cohost_types::CursorPosition::new(3, 4));
        let text = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(text.contains("session/cursors"));
        f.hub.shutdown();
    }

    #[tokio::test]
    async fn shutdown_disconnects_everyone() {
        let f = fixture(Config::default());
        let alice = login(&f.hub, "alice", "user");
        let (transport, _rx) = Transport::channel(32);
        f.hub.connect(&alice, Arc::clone(&transport)).unwrap();

        f.hub.shutdown();
        assert!(transport.is_closed());
        assert!(!alice.is_connected());
    }
}
