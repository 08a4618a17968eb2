//! Session registry: the table of live sessions, the host pointer, room
//! settings, and the typed event bus every cross-session effect goes
//! through.
//!
//! Mutations serialize on an emit lock, change state under the table lock,
//! release it, then deliver events to listeners in registration order.
//! Listeners therefore see post-transition state and may call back into
//! the registry, including mutating operations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cohost_protocol::envelope::encode_message;
use cohost_types::{
    CursorPosition, MemberProfile, ServerMessage, SessionCursors, SessionId, SessionState,
    Settings,
};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::peer::Peer;
use crate::session::{Session, Transport};

/// Something that changed in the registry.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Created(Arc<Session>),
    Deleted(Arc<Session>),
    Connected(Arc<Session>),
    Disconnected(Arc<Session>),
    ProfileChanged {
        session: Arc<Session>,
        old: MemberProfile,
        new: MemberProfile,
    },
    StateChanged {
        session: Arc<Session>,
        state: SessionState,
    },
    HostChanged {
        old: Option<SessionId>,
        new: Option<SessionId>,
    },
    SettingsChanged {
        old: Settings,
        new: Settings,
    },
}

/// Handle returned by [`Registry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&RegistryEvent) + Send + Sync>;

pub(crate) struct RegistryState {
    pub(crate) sessions: HashMap<SessionId, Arc<Session>>,
    pub(crate) host: Option<SessionId>,
    pub(crate) settings: Settings,
}

impl RegistryState {
    pub(crate) fn admin_connected(&self) -> bool {
        self.sessions
            .values()
            .any(|s| s.is_admin() && s.is_connected())
    }

    /// Whether private mode applies to `session`.
    pub(crate) fn is_private_for(&self, session: &Session) -> bool {
        self.settings.private_mode && !session.is_admin()
    }

    /// Clear the host if it is `id`.
    pub(crate) fn release_if_host(&mut self, id: &SessionId) -> Option<RegistryEvent> {
        if self.host.as_ref() == Some(id) {
            self.host = None;
            Some(RegistryEvent::HostChanged {
                old: Some(id.clone()),
                new: None,
            })
        } else {
            None
        }
    }

    /// Point the host at `new`. `None` if it already was.
    pub(crate) fn replace_host(&mut self, new: Option<SessionId>) -> Option<RegistryEvent> {
        if self.host == new {
            return None;
        }
        let old = std::mem::replace(&mut self.host, new.clone());
        Some(RegistryEvent::HostChanged { old, new })
    }
}

/// Table of sessions and owner of the host pointer.
pub struct Registry {
    pub(crate) state: Mutex<RegistryState>,
    pub(crate) emit: ReentrantMutex<()>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    inactive: Mutex<HashMap<SessionId, Vec<CursorPosition>>>,
}

impl Registry {
    pub fn new(settings: Settings) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                sessions: HashMap::new(),
                host: None,
                settings,
            }),
            emit: ReentrantMutex::new(()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            inactive: Mutex::new(HashMap::new()),
        }
    }

    // -- events -------------------------------------------------------------

    /// Register a listener. Listeners run synchronously, in registration
    /// order, on the task that caused the change.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub(crate) fn dispatch(&self, events: &[RegistryEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for event in events {
            for listener in &listeners {
                listener(event);
            }
        }
    }

    // -- table --------------------------------------------------------------

    /// Register a new session.
    pub fn create(
        &self,
        id: SessionId,
        profile: MemberProfile,
    ) -> Result<Arc<Session>, ServerError> {
        let _emit = self.emit.lock();
        let session = {
            let mut state = self.state.lock();
            if state.sessions.contains_key(&id) {
                return Err(ServerError::AlreadyExists(id));
            }
            let session = Arc::new(Session::new(id.clone(), profile));
            state.sessions.insert(id, Arc::clone(&session));
            session
        };
        info!(session_id = %session.id(), "session created");
        self.dispatch(&[RegistryEvent::Created(Arc::clone(&session))]);
        Ok(session)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.state.lock().sessions.get(id).cloned()
    }

    /// Snapshot of every session, ordered by id.
    pub fn list(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self.state.lock().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.id().cmp(b.id()));
        sessions
    }

    /// Visit a snapshot of the sessions until `f` returns `false`.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Session>) -> bool,
    {
        for session in self.list() {
            if !f(&session) {
                break;
            }
        }
    }

    /// Remove a session. A host is released first; a connected session is
    /// torn down.
    pub fn delete(&self, id: &SessionId) -> Result<(), ServerError> {
        let _emit = self.emit.lock();
        let mut events = Vec::new();
        let session = {
            let mut state = self.state.lock();
            let Some(session) = state.sessions.remove(id) else {
                warn!(session_id = %id, "delete of unknown session");
                return Err(ServerError::NotFound(id.clone()));
            };
            events.extend(state.release_if_host(id));
            session
        };
        if let Some(transport) = session.replace_transport(None) {
            transport.close();
        }
        if let Some(peer) = session.replace_peer(None) {
            peer.close();
        }
        session.set_watching(false);
        if session.set_connected(false) {
            events.push(RegistryEvent::Disconnected(Arc::clone(&session)));
        }
        self.inactive.lock().remove(id);
        info!(session_id = %id, "session deleted");
        let was_admin = session.is_admin();
        events.push(RegistryEvent::Deleted(session));
        self.dispatch(&events);
        if was_admin {
            self.protect_without_admin();
        }
        Ok(())
    }

    /// Delete `id` unless it is connected. Returns whether it was deleted.
    pub fn delete_if_disconnected(&self, id: &SessionId) -> bool {
        let _emit = self.emit.lock();
        match self.get(id) {
            Some(session) if !session.is_connected() => self.delete(id).is_ok(),
            _ => false,
        }
    }

    // -- connection lifecycle -----------------------------------------------

    /// Attach a client transport to a session.
    ///
    /// A session that is already connected is refused with
    /// `AlreadyConnected` unless merciful reconnect is enabled, in which
    /// case the old transport and peer are closed and replaced.
    pub fn connect(&self, id: &SessionId, transport: Arc<Transport>) -> Result<(), ServerError> {
        let _emit = self.emit.lock();
        let (session, merciful) = {
            let state = self.state.lock();
            let Some(session) = state.sessions.get(id).cloned() else {
                warn!(session_id = %id, "connect of unknown session");
                return Err(ServerError::NotFound(id.clone()));
            };
            (session, state.settings.merciful_reconnect)
        };
        let profile = session.profile();
        if !profile.can_login || !profile.can_connect {
            return Err(ServerError::Unauthorized(format!(
                "{id} is not allowed to connect"
            )));
        }

        if session.is_connected() {
            if !merciful {
                return Err(ServerError::AlreadyConnected(id.clone()));
            }
            if let Some(old) = session.replace_transport(Some(transport)) {
                send_disconnect(&old, "reconnected from another connection");
                old.close();
            }
            if let Some(peer) = session.replace_peer(None) {
                peer.close();
            }
            info!(session_id = %id, "session reconnected, previous transport replaced");
            return Ok(());
        }

        session.replace_transport(Some(transport));
        session.set_connected(true);
        info!(session_id = %id, "session connected");
        self.dispatch(&[RegistryEvent::Connected(Arc::clone(&session))]);

        if profile.is_admin {
            self.unprotect_with_admin();
        }
        Ok(())
    }

    /// Tear down a session's transport and peer, keeping the record.
    ///
    /// The client is told why before its transport closes.
    pub fn disconnect(&self, id: &SessionId, reason: &str) -> Result<(), ServerError> {
        let _emit = self.emit.lock();
        let Some(session) = self.get(id) else {
            warn!(session_id = %id, "disconnect of unknown session");
            return Err(ServerError::NotFound(id.clone()));
        };
        let transport = session.replace_transport(None);
        if let Some(transport) = &transport {
            send_disconnect(transport, reason);
            transport.close();
        }
        info!(session_id = %id, reason, "disconnecting session");
        let events = self.teardown(&session);
        self.dispatch(&events);
        if session.is_admin() {
            self.protect_without_admin();
        }
        Ok(())
    }

    /// Called when a connection ends on its own. A transport that has
    /// already been replaced or detached is ignored.
    pub fn transport_closed(&self, id: &SessionId, transport: &Arc<Transport>) {
        let _emit = self.emit.lock();
        let Some(session) = self.get(id) else {
            return;
        };
        if !session.detach_transport(transport) {
            debug!(session_id = %id, "stale transport closed");
            return;
        }
        info!(session_id = %id, "transport closed");
        let events = self.teardown(&session);
        self.dispatch(&events);
        if session.is_admin() {
            self.protect_without_admin();
        }
    }

    /// Lock controls when no admin is left in a protected room.
    fn protect_without_admin(&self) {
        if self.state.lock().admin_connected() {
            return;
        }
        self.update_settings(|s| {
            if s.control_protection && !s.locked_controls {
                s.locked_controls = true;
            }
        });
    }

    /// Unlock a protected room now that an admin is connected.
    fn unprotect_with_admin(&self) {
        self.update_settings(|s| {
            if s.control_protection && s.locked_controls {
                s.locked_controls = false;
            }
        });
    }

    fn teardown(&self, session: &Arc<Session>) -> Vec<RegistryEvent> {
        let mut events = Vec::new();
        events.extend(self.state.lock().release_if_host(session.id()));
        if let Some(peer) = session.replace_peer(None) {
            peer.close();
        }
        if session.set_watching(false) {
            events.push(RegistryEvent::StateChanged {
                session: Arc::clone(session),
                state: session.state(),
            });
        }
        if session.set_connected(false) {
            events.push(RegistryEvent::Disconnected(Arc::clone(session)));
        }
        events
    }

    /// Install a freshly negotiated peer, closing any previous one.
    pub fn attach_peer(&self, id: &SessionId, peer: Arc<Peer>) -> Result<(), ServerError> {
        let _emit = self.emit.lock();
        let session = self.get(id).ok_or_else(|| ServerError::NotFound(id.clone()))?;
        if !session.is_connected() {
            return Err(ServerError::TransientIo(format!("{id} is not connected")));
        }
        if let Some(old) = session.replace_peer(Some(peer)) {
            debug!(session_id = %id, "replacing real-time peer");
            old.close();
        }
        Ok(())
    }

    /// Called when a peer shuts down. The session stops watching and, if it
    /// was host, releases control. A peer that was already replaced is
    /// ignored.
    pub fn peer_closed(&self, id: &SessionId, peer: &Arc<Peer>) {
        let _emit = self.emit.lock();
        let Some(session) = self.get(id) else {
            return;
        };
        if !session.detach_peer(peer) {
            return;
        }
        let mut events = Vec::new();
        events.extend(self.state.lock().release_if_host(id));
        if session.set_watching(false) {
            events.push(RegistryEvent::StateChanged {
                session: Arc::clone(&session),
                state: session.state(),
            });
        }
        self.dispatch(&events);
    }

    /// Record whether the session's peer is connected.
    pub fn set_watching(&self, id: &SessionId, watching: bool) -> Result<(), ServerError> {
        let _emit = self.emit.lock();
        let session = self.get(id).ok_or_else(|| ServerError::NotFound(id.clone()))?;
        if session.set_watching(watching) {
            let state = session.state();
            self.dispatch(&[RegistryEvent::StateChanged { session, state }]);
        }
        Ok(())
    }

    // -- profile and settings -----------------------------------------------

    /// Replace a session's profile and enforce what it no longer allows.
    pub fn update_profile(&self, id: &SessionId, profile: MemberProfile) -> Result<(), ServerError> {
        let _emit = self.emit.lock();
        let session = self.get(id).ok_or_else(|| ServerError::NotFound(id.clone()))?;
        let old = session.replace_profile(profile.clone());
        if old == profile {
            return Ok(());
        }
        let admin_changed = old.is_admin != profile.is_admin;

        let mut events = vec![RegistryEvent::ProfileChanged {
            session: Arc::clone(&session),
            old,
            new: profile.clone(),
        }];
        let private = {
            let mut state = self.state.lock();
            let private = state.is_private_for(&session);
            if !profile.can_host || private {
                events.extend(state.release_if_host(id));
            }
            private
        };
        self.dispatch(&events);

        if admin_changed {
            if let Some(peer) = session.peer() {
                peer.set_paused(private);
            }
            if session.is_connected() {
                if profile.is_admin {
                    self.unprotect_with_admin();
                } else {
                    self.protect_without_admin();
                }
            }
        }

        if !profile.can_watch {
            if let Some(peer) = session.replace_peer(None) {
                debug!(session_id = %id, "profile lost watch permission, closing peer");
                peer.close();
            }
            if session.set_watching(false) {
                let state = session.state();
                self.dispatch(&[RegistryEvent::StateChanged {
                    session: Arc::clone(&session),
                    state,
                }]);
            }
        }
        if (!profile.can_connect || !profile.can_login) && session.is_connected() {
            self.disconnect(id, "profile changed")?;
        }
        Ok(())
    }

    pub fn settings(&self) -> Settings {
        self.state.lock().settings.clone()
    }

    /// Apply `f` to the room settings.
    ///
    /// Switching control protection on with no admin connected locks
    /// controls. Locking controls or entering private mode releases a
    /// non-admin host. Toggling private mode pauses or resumes every
    /// non-admin peer.
    pub fn update_settings<F>(&self, f: F) -> Settings
    where
        F: FnOnce(&mut Settings),
    {
        let _emit = self.emit.lock();
        let mut events = Vec::new();
        let (old, new) = {
            let mut state = self.state.lock();
            let old = state.settings.clone();
            let mut new = old.clone();
            f(&mut new);

            if new.control_protection
                && !old.control_protection
                && !new.locked_controls
                && !state.admin_connected()
            {
                new.locked_controls = true;
            }
            if (new.locked_controls && !old.locked_controls)
                || (new.private_mode && !old.private_mode)
            {
                let non_admin_host = state
                    .host
                    .as_ref()
                    .and_then(|h| state.sessions.get(h))
                    .is_some_and(|s| !s.is_admin());
                if non_admin_host {
                    events.extend(state.replace_host(None));
                }
            }
            if new == old {
                return new;
            }
            state.settings = new.clone();
            (old, new)
        };
        if !new.inactive_cursors {
            self.inactive.lock().clear();
        }
        if new.private_mode != old.private_mode {
            for session in self.list() {
                if let Some(peer) = session.peer() {
                    peer.set_paused(new.private_mode && !session.is_admin());
                }
            }
        }
        info!(
            locked_controls = new.locked_controls,
            control_protection = new.control_protection,
            implicit_hosting = new.implicit_hosting,
            private_mode = new.private_mode,
            locked_logins = new.locked_logins,
            "settings changed"
        );
        events.push(RegistryEvent::SettingsChanged {
            old,
            new: new.clone(),
        });
        self.dispatch(&events);
        new
    }

    // -- host ---------------------------------------------------------------

    /// Current host session.
    pub fn host(&self) -> Option<Arc<Session>> {
        let state = self.state.lock();
        state.host.as_ref().and_then(|h| state.sessions.get(h).cloned())
    }

    pub fn host_id(&self) -> Option<SessionId> {
        self.state.lock().host.clone()
    }

    pub fn is_host(&self, id: &SessionId) -> bool {
        self.state.lock().host.as_ref() == Some(id)
    }

    /// Whether `session` is held back by private mode: no control and no
    /// media.
    pub fn is_private_for(&self, session: &Session) -> bool {
        self.state.lock().is_private_for(session)
    }

    // -- delivery -----------------------------------------------------------

    /// Send to every connected session except `exclude`. Per-recipient
    /// failures are logged.
    pub fn broadcast(&self, msg: &ServerMessage, exclude: &[&SessionId]) {
        self.broadcast_where(msg, |s| !exclude.contains(&s.id()));
    }

    /// Send to every connected admin except `exclude`.
    pub fn admin_broadcast(&self, msg: &ServerMessage, exclude: &[&SessionId]) {
        self.broadcast_where(msg, |s| s.is_admin() && !exclude.contains(&s.id()));
    }

    /// Send to every connected session allowed to see inactive cursors.
    pub fn inactive_cursors_broadcast(&self, msg: &ServerMessage) {
        self.broadcast_where(msg, |s| s.profile().can_see_inactive_cursors);
    }

    fn broadcast_where<F>(&self, msg: &ServerMessage, filter: F)
    where
        F: Fn(&Session) -> bool,
    {
        let text: Arc<str> = match encode_message(msg) {
            Ok(text) => text.into(),
            Err(e) => {
                warn!(event = msg.event(), error = %e, "failed to encode broadcast");
                return;
            }
        };
        for session in self.list() {
            if !session.is_connected() || !filter(&session) {
                continue;
            }
            if let Err(e) = session.send_text(Arc::clone(&text)) {
                warn!(
                    session_id = %session.id(),
                    event = msg.event(),
                    error = %e,
                    "broadcast delivery failed"
                );
            }
        }
    }

    // -- inactive cursors ---------------------------------------------------

    /// Record a pointer position from a session that is not in control.
    pub fn set_inactive_cursor(&self, id: &SessionId, position: CursorPosition) {
        let Some(session) = self.get(id) else {
            return;
        };
        session.set_cursor(position);
        self.inactive
            .lock()
            .entry(id.clone())
            .or_default()
            .push(position);
    }

    /// Take every position recorded since the last call.
    pub fn pop_inactive_cursors(&self) -> Vec<SessionCursors> {
        let recorded = std::mem::take(&mut *self.inactive.lock());
        let mut cursors: Vec<_> = recorded
            .into_iter()
            .map(|(id, cursors)| SessionCursors { id, cursors })
            .collect();
        cursors.sort_by(|a, b| a.id.cmp(&b.id));
        cursors
    }
}

fn send_disconnect(transport: &Transport, reason: &str) {
    let msg = ServerMessage::SystemDisconnect {
        message: reason.to_string(),
    };
    match encode_message(&msg) {
        Ok(text) => {
            let _ = transport.send_text(text.into());
        }
        Err(e) => warn!(error = %e, "failed to encode disconnect message"),
    }
}
